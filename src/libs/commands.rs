use crate::libs::common::hex_parser;
use crate::libs::device::{Address, CtlOp, Device, EraseKind};
use crate::libs::output;

/// The command interface the RSP dispatcher hands `qRcmd` text to, and
/// the interactive shell feeds typed lines into. Implementations print
/// through the output layer so captures pick their text up.
pub trait CommandProcessor {
    fn process_command(&mut self, device: &mut dyn Device, cmd: &str);
}

/// The stock target-maintenance commands.
pub struct TargetCommands;

impl TargetCommands {
    fn cmd_erase(&mut self, device: &mut dyn Device, mut args: std::str::SplitWhitespace) {
        let result = match args.next() {
            None | Some("all") => device.erase(EraseKind::All, 0),
            Some("segment") => match args.next().map(hex_parser) {
                Some(Ok(addr)) => device.erase(EraseKind::Segment, addr),
                _ => {
                    output::print_err("usage: erase segment <address>");
                    return;
                }
            },
            Some(other) => {
                output::print_err(&format!("erase: unknown kind: {}", other));
                return;
            }
        };
        if let Err(e) = result {
            output::print_err(&format!("erase: {}", e));
        }
    }

    fn cmd_regs(&mut self, device: &mut dyn Device) {
        let regs = match device.getregs() {
            Ok(regs) => regs,
            Err(e) => {
                output::print_err(&format!("regs: {}", e));
                return;
            }
        };
        for row in 0..4 {
            let mut line = String::new();
            for col in 0..4 {
                let i = row * 4 + col;
                line.push_str(&format!("r{:<2} 0x{:04x}    ", i, regs[i]));
            }
            output::print(line.trim_end());
        }
    }

    fn cmd_md(&mut self, device: &mut dyn Device, mut args: std::str::SplitWhitespace) {
        let addr = match args.next().map(hex_parser) {
            Some(Ok(addr)) => addr,
            _ => {
                output::print_err("usage: md <address> [length]");
                return;
            }
        };
        let len = match args.next().map(hex_parser) {
            Some(Ok(len)) => len as usize,
            Some(Err(_)) => {
                output::print_err("usage: md <address> [length]");
                return;
            }
            None => 64,
        };

        let mut mem = vec![0u8; len];
        if let Err(e) = device.readmem(addr, &mut mem) {
            output::print_err(&format!("md: {}", e));
            return;
        }
        hexdump(addr, &mem);
    }

    fn cmd_help(&mut self) {
        output::print("Available commands:");
        output::print("    erase [all|segment <addr>]  erase flash");
        output::print("    reset                       reset the target");
        output::print("    regs                        show registers");
        output::print("    md <addr> [len]             dump memory");
        output::print("    help                        this text");
    }
}

impl CommandProcessor for TargetCommands {
    fn process_command(&mut self, device: &mut dyn Device, cmd: &str) {
        let mut words = cmd.split_whitespace();
        match words.next() {
            Some("erase") => self.cmd_erase(device, words),
            Some("reset") => {
                if let Err(e) = device.ctl(CtlOp::Reset) {
                    output::print_err(&format!("reset: {}", e));
                }
            }
            Some("regs") => self.cmd_regs(device),
            Some("md") => self.cmd_md(device, words),
            Some("help") => self.cmd_help(),
            Some(other) => output::print_err(&format!("unknown command: {}", other)),
            None => {}
        }
    }
}

// Prints sixteen bytes per row with an ASCII column.
fn hexdump(base: Address, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let mut line = format!("    {:04x}:", base as usize + row * 16);
        for b in chunk {
            line.push_str(&format!(" {:02x}", b));
        }
        line.push_str(&"   ".repeat(16 - chunk.len()));
        line.push_str("  |");
        for &b in chunk {
            line.push(if (0x20..0x7f).contains(&b) { b as char } else { '.' });
        }
        line.push('|');
        output::print(&line);
    }
}
