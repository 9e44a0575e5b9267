//! Test logging for structured test output.
//!
//! Output goes to stderr so `cargo test -- --nocapture` shows it next to the
//! library's own tracing output. Set `TEST_LOG_QUIET=1` to silence it.
#![allow(dead_code)]

use std::cell::RefCell;
use std::time::Instant;

/// Per-test logger that tracks the current phase and elapsed time.
pub struct TestLogger {
    name: String,
    started: Instant,
    phase: RefCell<String>,
    quiet: bool,
}

impl TestLogger {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let quiet = std::env::var("TEST_LOG_QUIET").is_ok_and(|v| v == "1" || v == "true");
        let logger = Self {
            name: name.to_string(),
            started: Instant::now(),
            phase: RefCell::new("start".to_string()),
            quiet,
        };
        logger.emit("begin");
        logger
    }

    fn emit(&self, message: &str) {
        if self.quiet {
            return;
        }
        eprintln!(
            "[{:>6}ms] {} ({}): {message}",
            self.started.elapsed().as_millis(),
            self.name,
            self.phase.borrow()
        );
    }

    pub fn phase(&self, phase: &str) {
        *self.phase.borrow_mut() = phase.to_string();
        self.emit("phase");
    }

    pub fn info(&self, message: &str) {
        self.emit(message);
    }

    pub fn http_request(&self, method: &str, url: &str) {
        self.emit(&format!("{method} {url}"));
    }

    pub fn command(&self, args: &[&str]) {
        self.emit(&format!("pvcast {}", args.join(" ")));
    }

    pub fn finish_ok(&self) {
        self.emit("ok");
    }
}
