//! Line batching for high-frequency terminal output.

/// Flush when a batch reaches this many lines
pub const MAX_BATCH_LINES: usize = 12;
/// Flush when a batch reaches this many bytes
pub const MAX_BATCH_BYTES: usize = 8 * 1024;
/// Periodic flush interval for pending content
pub const FLUSH_INTERVAL_MS: u64 = 80;

/// One flushed batch of sanitized output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub text: String,
}

/// Accumulates sanitized text into line batches.
///
/// A batch is emitted when it reaches `MAX_BATCH_LINES` complete lines or
/// `MAX_BATCH_BYTES` bytes; the caller's periodic timer flushes whatever
/// is pending, including a trailing fragment that never saw its newline.
/// A single line at or above the byte threshold bypasses batching and is
/// emitted standalone.
pub struct Coalescer {
    lines: Vec<String>,
    bytes: usize,
    partial: String,
}

impl Coalescer {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            bytes: 0,
            partial: String::new(),
        }
    }

    /// Feed sanitized text; returns zero or more batches due for emission.
    pub fn push(&mut self, text: &str) -> Vec<Batch> {
        let mut out = Vec::new();
        let mut rest = text;

        while let Some(nl) = rest.find('\n') {
            let (head, tail) = rest.split_at(nl + 1);
            rest = tail;

            let mut line = std::mem::take(&mut self.partial);
            line.push_str(head);

            if line.len() >= MAX_BATCH_BYTES {
                // Oversize line: flush what came before, then the line alone
                if let Some(batch) = self.take_pending() {
                    out.push(batch);
                }
                out.push(Batch { text: line });
                continue;
            }

            // Keep batches under the byte cap: flush before appending would
            // push the pending batch past it.
            if self.bytes + line.len() > MAX_BATCH_BYTES {
                if let Some(batch) = self.take_pending() {
                    out.push(batch);
                }
            }

            self.bytes += line.len();
            self.lines.push(line);

            if self.lines.len() >= MAX_BATCH_LINES {
                if let Some(batch) = self.take_pending() {
                    out.push(batch);
                }
            }
        }

        self.partial.push_str(rest);
        if self.partial.len() >= MAX_BATCH_BYTES {
            if let Some(batch) = self.take_pending() {
                out.push(batch);
            }
            out.push(Batch {
                text: std::mem::take(&mut self.partial),
            });
        }

        out
    }

    /// Timer flush: everything pending, trailing fragment included.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.lines.is_empty() && self.partial.is_empty() {
            return None;
        }
        let mut text = String::with_capacity(self.bytes + self.partial.len());
        for line in self.lines.drain(..) {
            text.push_str(&line);
        }
        text.push_str(&std::mem::take(&mut self.partial));
        self.bytes = 0;
        Some(Batch { text })
    }

    fn take_pending(&mut self) -> Option<Batch> {
        if self.lines.is_empty() {
            return None;
        }
        let mut text = String::with_capacity(self.bytes);
        for line in self.lines.drain(..) {
            text.push_str(&line);
        }
        self.bytes = 0;
        Some(Batch { text })
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Coalescer, MAX_BATCH_BYTES, MAX_BATCH_LINES};

    #[test]
    fn twenty_short_lines_yield_at_least_two_batches() {
        let mut c = Coalescer::new();
        let mut batches = Vec::new();
        for i in 0..20 {
            batches.extend(c.push(&format!("line-{i:04}\n")));
        }
        batches.extend(c.flush());
        assert!(batches.len() >= 2, "got {} batches", batches.len());
        let total: String = batches.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(total.lines().count(), 20);
    }

    #[test]
    fn batch_never_exceeds_line_limit() {
        let mut c = Coalescer::new();
        let mut batches = Vec::new();
        for _ in 0..100 {
            batches.extend(c.push("x\n"));
        }
        batches.extend(c.flush());
        for batch in &batches {
            assert!(batch.text.lines().count() <= MAX_BATCH_LINES);
        }
    }

    #[test]
    fn oversize_line_is_emitted_standalone() {
        let mut c = Coalescer::new();
        let big = format!("{}\n", "a".repeat(MAX_BATCH_BYTES));
        let mut batches = c.push("small\n");
        batches.extend(c.push(&big));
        // "small" flushed first, then the oversize line on its own
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].text, "small\n");
        assert_eq!(batches[1].text, big);
        assert!(c.flush().is_none());
    }

    #[test]
    fn byte_threshold_triggers_flush_under_cap() {
        let mut c = Coalescer::new();
        let line = format!("{}\n", "b".repeat(2048));
        let mut batches = Vec::new();
        for _ in 0..4 {
            batches.extend(c.push(&line));
        }
        // The fourth line would cross 8 KiB, so the first three flush
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].text.lines().count(), 3);
        assert!(batches[0].text.len() <= MAX_BATCH_BYTES);
        batches.extend(c.flush());
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn partial_fragment_flushes_on_timer() {
        let mut c = Coalescer::new();
        assert!(c.push("no newline yet").is_empty());
        let batch = c.flush().expect("fragment to flush");
        assert_eq!(batch.text, "no newline yet");
        assert!(c.flush().is_none());
    }

    #[test]
    fn fragment_joins_next_chunk_into_one_line() {
        let mut c = Coalescer::new();
        assert!(c.push("hel").is_empty());
        assert!(c.push("lo\n").is_empty());
        let batch = c.flush().expect("line to flush");
        assert_eq!(batch.text, "hello\n");
    }
}
