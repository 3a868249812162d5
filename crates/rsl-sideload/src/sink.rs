use std::io::{self, Write};

use tracing::info;

/// Where operator-facing progress text goes. Text is printed verbatim; the
/// caller supplies any newlines.
pub trait OutputSink {
    fn print(&mut self, text: &str);
}

/// Recovery console: stdout, mirrored into the log.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn print(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();

        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            info!(target: "console", "{line}");
        }
    }
}
