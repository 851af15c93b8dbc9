//! Stream filter that strips `<think>...</think>` sections from live output.
//!
//! Generation models emit internal reasoning wrapped in think-tags. The
//! filter removes everything between the sentinels while forwarding plain
//! text as soon as it provably cannot be part of a sentinel, so chunks are
//! never delayed by more than `len("</think>") - 1` bytes. Sentinels split
//! across chunk boundaries are handled by keeping a small tail buffer
//! between calls.
//!
//! Nesting is tracked with a depth counter (floored at zero). A dangling
//! unmatched `<think>` suppresses the rest of the stream: the filter fails
//! closed, never open.

use minne_core::error::ProviderError;
use tokio::sync::mpsc;

const START_TAG: &str = "<think>";
const END_TAG: &str = "</think>";

/// Stateful per-stream filter. Feed chunks with [`push`](Self::push),
/// then call [`finish`](Self::finish) once the stream ends to flush any
/// held tail.
#[derive(Debug)]
pub struct ThinkTagFilter {
    enabled: bool,
    depth: usize,
    buffer: String,
}

impl ThinkTagFilter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            depth: 0,
            buffer: String::new(),
        }
    }

    /// Consume one incoming chunk and return the text that is safe to emit.
    pub fn push(&mut self, chunk: &str) -> String {
        if !self.enabled {
            return chunk.to_string();
        }
        self.buffer.push_str(chunk);
        let (out, consumed) = scan(&self.buffer, &mut self.depth, true);
        self.buffer.drain(..consumed);
        out
    }

    /// Flush at end of stream. Held text is emitted only when every start
    /// sentinel was matched; a trailing sentinel fragment never leaks.
    pub fn finish(mut self) -> String {
        if !self.enabled {
            return String::new();
        }
        let buffer = std::mem::take(&mut self.buffer);
        let (out, _) = scan(&buffer, &mut self.depth, false);
        if self.depth > 0 {
            return String::new();
        }
        out
    }
}

/// Scan `input` from the front, emitting depth-zero text and consuming
/// sentinels. With `hold_tail` set, a trailing fragment that could still
/// become a sentinel is left unconsumed for the next chunk; without it
/// (end of stream) such a fragment is silently dropped.
fn scan(input: &str, depth: &mut usize, hold_tail: bool) -> (String, usize) {
    let mut out = String::new();
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        if rest.starts_with(START_TAG) {
            *depth += 1;
            i += START_TAG.len();
            continue;
        }
        if rest.starts_with(END_TAG) {
            *depth = depth.saturating_sub(1);
            i += END_TAG.len();
            continue;
        }
        if rest.len() < END_TAG.len() && is_sentinel_prefix(rest) {
            if hold_tail {
                return (out, i);
            }
            // End of stream: the fragment can never complete, drop it.
            return (out, input.len());
        }
        let ch = rest.chars().next().expect("rest is non-empty");
        if *depth == 0 {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    (out, input.len())
}

fn is_sentinel_prefix(s: &str) -> bool {
    START_TAG.starts_with(s) || END_TAG.starts_with(s)
}

/// Wrap a live chunk stream with the filter.
///
/// Errors pass through untouched; the filtered remainder is flushed when
/// the inner stream closes. Filtered chunks are forwarded as soon as they
/// become available — the stream is never buffered whole.
pub fn filter_stream(
    mut inner: mpsc::Receiver<Result<String, ProviderError>>,
    enabled: bool,
) -> mpsc::Receiver<Result<String, ProviderError>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut filter = ThinkTagFilter::new(enabled);
        while let Some(item) = inner.recv().await {
            match item {
                Ok(chunk) => {
                    let emitted = filter.push(&chunk);
                    if !emitted.is_empty() && tx.send(Ok(emitted)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        let tail = filter.finish();
        if !tail.is_empty() {
            let _ = tx.send(Ok(tail)).await;
        }
    });
    rx
}
