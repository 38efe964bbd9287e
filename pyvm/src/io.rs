use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Destination for program output.
pub trait OutputSink {
    fn emit(&mut self, text: &str);
}

/// Writes straight to the process's stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        // output errors are not reported to the program
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects output in a shared buffer. Clones share the same buffer, so a
/// host can hand one to the interpreter and read through another.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    buffer: Arc<Mutex<String>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }
}

impl OutputSink for CaptureSink {
    fn emit(&mut self, text: &str) {
        self.buffer.lock().push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_is_shared_between_clones() {
        let sink = CaptureSink::new();
        let mut writer = sink.clone();
        writer.emit("hello ");
        writer.emit("world\n");
        assert_eq!(sink.contents(), "hello world\n");
        assert_eq!(sink.take(), "hello world\n");
        assert_eq!(sink.contents(), "");
    }
}
