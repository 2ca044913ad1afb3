use std::cell::RefCell;

/// A capture sink receives every fragment of text the current thread
/// would otherwise print.
pub type CaptureSink = Box<dyn FnMut(&str)>;

thread_local! {
    static CAPTURE: RefCell<Vec<CaptureSink>> = RefCell::new(Vec::new());
}

/// Pushes a capture sink for the current thread.
///
/// While at least one sink is installed, all output on this thread is
/// delivered to the most recently pushed sink instead of the terminal.
/// Every [`capture_start`] must be paired with a [`capture_end`].
pub fn capture_start(sink: CaptureSink) {
    CAPTURE.with(|c| c.borrow_mut().push(sink));
}

/// Pops the most recently pushed capture sink.
pub fn capture_end() {
    CAPTURE.with(|c| {
        c.borrow_mut().pop();
    });
}

fn deliver(text: &str) -> bool {
    CAPTURE.with(|c| {
        let mut stack = c.borrow_mut();
        match stack.last_mut() {
            Some(sink) => {
                sink(text);
                true
            }
            None => false,
        }
    })
}

/// Prints a line of normal output.
pub fn print(text: &str) {
    if !deliver(text) {
        println!("{}", text);
    }
}

/// Prints a line of debug chatter.
pub fn print_dbg(text: &str) {
    if !deliver(text) {
        println!("{}", text);
    }
}

/// Prints a line of error output.
pub fn print_err(text: &str) {
    if !deliver(text) {
        eprintln!("{}", text);
    }
}
