//! Output sink: where a command callback's `printf` output goes.
//!
//! A command callback never writes to a socket directly. It calls
//! [`OutputSink::printf`], which either buffers into the reply payload being
//! built for a UDP/UNIX query, or streams straight to the connected
//! TCP/LOCAL session. Buffering vs. streaming, and whether a flush actually
//! does anything, depends on the transport and on whether the session is
//! interactive — mirrors `_printf`/`_flush` in the upstream server.

use std::fmt::Write as _;

/// Where `printf` calls are headed for the command currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// UDP/UNIX request: output accumulates into a reply buffer that's sent
    /// back as one payload when the command returns.
    Buffered,
    /// TCP/LOCAL interactive session: output streams immediately; `flush`
    /// is meaningful here.
    Streaming,
    /// No destination at all (fire-and-forget dispatch, or in-process
    /// invocation with no caller listening) — output is discarded.
    Discard,
}

/// Per-dispatch output destination threaded through to command callbacks.
///
/// Interior-mutable by design: callbacks only ever see a shared reference
/// (`&OutputSink`), never a mutable one, matching the module-level
/// `printf`/`flush` free functions of the upstream server.
pub struct OutputSink {
    mode: SinkMode,
    buffer: std::sync::Mutex<String>,
    writer: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl OutputSink {
    pub fn buffered() -> Self {
        OutputSink {
            mode: SinkMode::Buffered,
            buffer: std::sync::Mutex::new(String::new()),
            writer: None,
        }
    }

    pub fn streaming(writer: Box<dyn Fn(&str) + Send + Sync>) -> Self {
        OutputSink {
            mode: SinkMode::Streaming,
            buffer: std::sync::Mutex::new(String::new()),
            writer: Some(writer),
        }
    }

    /// A buffered sink (reply payload accumulates for the final reply) that
    /// also sends an intermediate reply through `writer` whenever
    /// [`Self::flush`]/[`Self::wheel`]/[`Self::march`] is called, mirroring
    /// `_flush()`'s `_reply()` call in the upstream server: a long-running
    /// UDP/UNIX command callback that calls `flush()` mid-dispatch ships
    /// whatever has accumulated so far as an early reply datagram, then
    /// keeps accumulating into a now-empty buffer for whatever reply
    /// follows (either another flush, or the final one the transport sends
    /// once the callback returns).
    pub fn buffered_flushable(writer: Box<dyn Fn(&str) + Send + Sync>) -> Self {
        OutputSink {
            mode: SinkMode::Buffered,
            buffer: std::sync::Mutex::new(String::new()),
            writer: Some(writer),
        }
    }

    pub fn discard() -> Self {
        OutputSink {
            mode: SinkMode::Discard,
            buffer: std::sync::Mutex::new(String::new()),
            writer: None,
        }
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    /// Writes formatted text, appending a trailing newline unless `text`
    /// already ends with one. In buffered mode this accumulates into the
    /// eventual reply; in streaming mode it's written through immediately.
    pub fn printf(&self, text: &str) {
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        match self.mode {
            SinkMode::Discard => {}
            SinkMode::Buffered => {
                let mut buf = self.buffer.lock().unwrap();
                let _ = write!(buf, "{line}");
            }
            SinkMode::Streaming => {
                if let Some(writer) = &self.writer {
                    writer(&line);
                }
            }
        }
    }

    /// Same as [`Self::printf`] but never appends a newline — used by the
    /// introspection query handlers, which build up a payload field by
    /// field.
    pub fn printf_no_newline(&self, text: &str) {
        match self.mode {
            SinkMode::Discard => {}
            SinkMode::Buffered => {
                let mut buf = self.buffer.lock().unwrap();
                let _ = write!(buf, "{text}");
            }
            SinkMode::Streaming => {
                if let Some(writer) = &self.writer {
                    writer(text);
                }
            }
        }
    }

    /// Flushes any buffered content through immediately. For a streaming
    /// sink this is a true immediate write-through. For a buffered sink
    /// constructed via [`Self::buffered_flushable`], this sends the
    /// accumulated payload as an early, partial reply and clears the
    /// buffer so accumulation continues for the next flush (or the final
    /// reply); a plain [`Self::buffered`] sink with no writer has nothing
    /// to flush through and this is a no-op, matching a discard/in-process
    /// dispatch where there is no transport to ship an early reply over.
    pub fn flush(&self) {
        if self.mode == SinkMode::Discard {
            return;
        }
        if let Some(writer) = &self.writer {
            let mut buf = self.buffer.lock().unwrap();
            if !buf.is_empty() {
                writer(&buf);
                buf.clear();
            }
        }
    }

    /// A rotating "spinner" character sequence (`|`, `/`, `-`, `\`),
    /// written in place via carriage return, for long-running commands on
    /// an interactive session.
    pub fn wheel(&self, message: Option<&str>) {
        static WHEEL: [char; 4] = ['|', '/', '-', '\\'];
        let idx = WHEEL_POS.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % WHEEL.len();
        let prefix = message.unwrap_or("");
        self.printf_no_newline(&format!("\r{prefix}{}", WHEEL[idx]));
        self.flush();
    }

    /// Prints a dot every `count`-th call, "marching" across the line —
    /// used by commands that process many items and want a lightweight
    /// progress indicator.
    pub fn march(&self, message: Option<&str>) {
        if let Some(message) = message {
            self.printf_no_newline(message);
        } else {
            self.printf_no_newline(".");
        }
        self.flush();
    }

    /// Drains and returns the accumulated buffer, for buffered-mode
    /// transports building a reply payload.
    pub fn take_buffer(&self) -> String {
        let mut buf = self.buffer.lock().unwrap();
        std::mem::take(&mut *buf)
    }
}

static WHEEL_POS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn buffered_sink_accumulates() {
        let sink = OutputSink::buffered();
        sink.printf("hello");
        sink.printf("world");
        assert_eq!(sink.take_buffer(), "hello\nworld\n");
        assert_eq!(sink.take_buffer(), "");
    }

    #[test]
    fn streaming_sink_writes_through() {
        let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let sink = OutputSink::streaming(Box::new(move |s| captured_clone.lock().unwrap().push(s.to_string())));
        sink.printf("hi");
        assert_eq!(captured.lock().unwrap().as_slice(), ["hi\n"]);
    }

    #[test]
    fn discard_sink_drops_everything() {
        let sink = OutputSink::discard();
        sink.printf("ignored");
        assert_eq!(sink.take_buffer(), "");
    }
}
