use std::io::{self, BufRead};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::libs::interrupt;

const MAX_LINE_LENGTH: usize = 1024;

struct TextSlot {
    line: Option<String>,
    eof: bool,
}

/// Single-producer/single-consumer hand-off of command lines.
///
/// Two independent lock/condvar pairs implement a strict handshake:
/// the producer installs a line and signals `cond_text`, then blocks
/// on `cond_ack` until the consumer has taken it. There is no
/// buffering between the two, so stdin backpressure follows command
/// execution. EOF is sticky.
struct Mailbox {
    text: Mutex<TextSlot>,
    cond_text: Condvar,
    ack: Mutex<bool>,
    cond_ack: Condvar,
}

impl Mailbox {
    fn new() -> Mailbox {
        Mailbox {
            text: Mutex::new(TextSlot {
                line: None,
                eof: false,
            }),
            cond_text: Condvar::new(),
            ack: Mutex::new(false),
            cond_ack: Condvar::new(),
        }
    }

    // Producer side: installs the line, then waits for the ACK before
    // the slot may be reused.
    fn deliver(&self, line: &str) {
        let mut line = line.to_string();
        if line.len() >= MAX_LINE_LENGTH {
            let mut cut = MAX_LINE_LENGTH - 1;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }

        {
            let mut slot = self.text.lock().unwrap();
            slot.line = Some(line);
        }
        self.cond_text.notify_one();

        let mut ack = self.ack.lock().unwrap();
        while !*ack {
            ack = self.cond_ack.wait(ack).unwrap();
        }
        *ack = false;
    }

    fn deliver_eof(&self) {
        self.text.lock().unwrap().eof = true;
        self.cond_text.notify_one();
    }

    // Consumer side: waits for a line or EOF, then ACKs the slot.
    fn take(&self) -> Option<String> {
        let line = {
            let mut slot = self.text.lock().unwrap();
            loop {
                if slot.eof {
                    return None;
                }
                if slot.line.is_some() {
                    break;
                }
                slot = self.cond_text.wait(slot).unwrap();
            }
            slot.line.take()
        };

        {
            let mut ack = self.ack.lock().unwrap();
            *ack = true;
        }
        self.cond_ack.notify_one();

        line
    }
}

fn handle_special(text: &str) {
    if text == "break" {
        interrupt::raise();
    }
}

// Classifies and routes every input line until the reader runs dry.
fn reader_loop<R: BufRead>(input: R, mailbox: &Mailbox) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix('\\') {
            handle_special(rest);
        } else if let Some(rest) = line.strip_prefix(':') {
            mailbox.deliver(rest);
        } else {
            mailbox.deliver(line);
        }
    }
    mailbox.deliver_eof();
}

/// Reads command lines from standard input on a dedicated thread.
///
/// Lines starting with `\` are directives handled inside the reader
/// (`\break` raises the user-break flag without waiting for the
/// consumer); a leading `:` is stripped and the rest delivered as a
/// command; anything else is delivered verbatim.
pub struct AsyncInput {
    mailbox: Arc<Mailbox>,
}

impl AsyncInput {
    pub fn start() -> AsyncInput {
        let mailbox = Arc::new(Mailbox::new());
        let reader_mailbox = Arc::clone(&mailbox);
        thread::spawn(move || {
            let stdin = io::stdin();
            reader_loop(stdin.lock(), &reader_mailbox);
        });
        AsyncInput { mailbox }
    }

    /// Blocks until the next command line, or returns `None` at EOF
    /// (and on every call after it).
    pub fn read_command(&self) -> Option<String> {
        self.mailbox.take()
    }
}
