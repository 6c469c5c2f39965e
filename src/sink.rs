//! Live output forwarding.
//!
//! A sink receives generated tokens during `plan()` and captured process
//! output during `confirm()`, one chunk at a time, synchronously in the
//! caller's task. A slow sink therefore slows generation and execution down.

/// Receives streamed output chunks.
pub trait OutputSink: Send {
    fn emit(&mut self, chunk: &str);
}

impl<F> OutputSink for F
where
    F: FnMut(&str) + Send,
{
    fn emit(&mut self, chunk: &str) {
        self(chunk)
    }
}

/// Sink that drops everything; stands in when the caller passes none.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl OutputSink for Discard {
    fn emit(&mut self, _chunk: &str) {}
}

/// Sink that accumulates every chunk, mostly useful in tests and for
/// front-ends that render once at the end.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    pub chunks: Vec<String>,
}

impl Collector {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

impl OutputSink for Collector {
    fn emit(&mut self, chunk: &str) {
        self.chunks.push(chunk.to_string());
    }
}
