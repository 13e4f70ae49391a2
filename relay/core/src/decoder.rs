//! Chunk Decoder
//!
//! Turns the backend's newline-delimited JSON stream into [`StreamFragment`]s.
//!
//! Decoding happens in two stages:
//! - [`LineBuffer`] reassembles complete lines from arbitrary byte chunks
//!   (a chunk boundary may fall in the middle of a line or of a UTF-8 sequence)
//! - [`decode_line`] maps one line to at most one fragment
//!
//! Errors are per-line. A malformed line yields a [`StreamFragment::Error`]
//! and the lines after it are decoded normally.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::backend::{LineReceiver, UpstreamError};

/// One decoded piece of an upstream stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    /// Answer text, in arrival order
    Text(String),
    /// A line that could not be decoded, or a backend-reported error
    Error(String),
}

impl StreamFragment {
    /// Whether this fragment carries answer text
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// Reassembles newline-terminated lines from raw byte chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed
    ///
    /// The trailing `\n` (and a `\r` before it) is stripped. Bytes after the
    /// last newline stay buffered until the next chunk or [`finish`](Self::finish).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush the final unterminated line, if any, once the transport closed
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }

    /// Number of buffered bytes not yet terminated by a newline
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode a single stream line
///
/// Blank lines yield `None`. Everything else yields exactly one fragment.
#[must_use]
pub fn decode_line(line: &str) -> Option<StreamFragment> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Some(StreamFragment::Error(format!(
                "malformed stream line: {e}"
            )))
        }
    };

    let Some(object) = value.as_object() else {
        return Some(StreamFragment::Error(
            "stream line is not a JSON object".to_string(),
        ));
    };

    // Ollama reports mid-stream failures as {"error": "..."}
    if let Some(error) = object.get("error").and_then(Value::as_str) {
        return Some(StreamFragment::Error(error.to_string()));
    }

    match object.get("response").and_then(Value::as_str) {
        Some(text) => Some(StreamFragment::Text(text.to_string())),
        None => Some(StreamFragment::Error(
            "stream line has no `response` field".to_string(),
        )),
    }
}

/// Lazily decode a sequence of lines, skipping blank ones
pub fn decode_lines<I>(lines: I) -> impl Iterator<Item = StreamFragment>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| decode_line(line.as_ref()))
}

/// Async decoder over the line channel produced by an upstream client
///
/// Transport failures are passed through untouched so the caller can tell a
/// broken line apart from a broken connection.
pub struct ChunkDecoder {
    lines: LineReceiver,
    lines_seen: u64,
}

impl ChunkDecoder {
    /// Wrap an upstream line receiver
    #[must_use]
    pub fn new(lines: LineReceiver) -> Self {
        Self {
            lines,
            lines_seen: 0,
        }
    }

    /// Next fragment, or `None` once the upstream closed
    ///
    /// Cancel safe: an await point is only ever `recv()` on the channel.
    pub async fn next(&mut self) -> Option<Result<StreamFragment, UpstreamError>> {
        loop {
            match self.lines.recv().await? {
                Ok(line) => {
                    self.lines_seen += 1;
                    if let Some(fragment) = decode_line(&line) {
                        return Some(Ok(fragment));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Number of raw lines received so far, blank ones included
    #[must_use]
    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    /// Build a decoder fed from an in-memory list of lines
    #[cfg(test)]
    pub(crate) fn from_lines<I>(lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(Ok(line)).expect("capacity covers every line");
        }
        Self::new(rx)
    }
}
