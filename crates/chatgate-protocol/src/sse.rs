use bytes::Bytes;

/// The terminator line OpenAI streams end with.
pub const DONE_DATA: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_DATA
    }
}

/// Incremental Server-Sent-Events parser.
///
/// Feed raw body chunks as they arrive; completed events come back in order.
/// Tolerates CRLF line endings, `:` comment lines, and chunk boundaries that
/// fall mid-line or mid-event.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            // Providers occasionally interleave binary keep-alives; skip them.
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(line) = self.take_line() {
            self.consume_line(&line, &mut out);
        }
        out
    }

    /// Flush whatever remains at end of stream. Some providers omit the final
    /// blank line before closing the connection.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            self.consume_field(&line);
        }
        self.flush_event(&mut out);
        out
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.find('\n')?;
        let mut line: String = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    fn consume_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.flush_event(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        self.consume_field(line);
    }

    fn consume_field(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.pending_event = (!value.is_empty()).then(|| value.to_string());
        } else if line == "event" {
            self.pending_event = None;
        } else if let Some(value) = line.strip_prefix("data:") {
            self.pending_data.push(value.trim_start().to_string());
        } else if line == "data" {
            self.pending_data.push(String::new());
        }
    }

    fn flush_event(&mut self, out: &mut Vec<SseEvent>) {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return;
        }
        out.push(SseEvent {
            event: self.pending_event.take(),
            data: self.pending_data.join("\n"),
        });
        self.pending_data.clear();
    }
}
