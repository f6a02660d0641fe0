//! SSE stream parsing for OpenAI-compatible streaming responses.
//!
//! Network chunks do not align with SSE lines, so bytes are buffered until a
//! full line is available before decoding.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use sage_core::{Error, Result, TokenStream};

use super::types::ChatCompletionChunk;

/// Outcome of parsing one SSE line.
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse a single SSE line.
pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return Ok(SseLine::Skip);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return Ok(SseLine::Skip);
    };

    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| Error::Inference(format!("Failed to parse SSE chunk: {}", e)))?;

    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(content))
    }
}

struct SseState<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Decode every complete line in the buffer. Returns false once `[DONE]`
    /// has been seen.
    fn drain_lines(&mut self) -> bool {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if !self.push_line(&String::from_utf8_lossy(&line)) {
                return false;
            }
        }
        true
    }

    fn push_line(&mut self, line: &str) -> bool {
        match parse_sse_line(line) {
            Ok(SseLine::Delta(text)) => self.pending.push_back(Ok(text)),
            Ok(SseLine::Skip) => {}
            Ok(SseLine::Done) => return false,
            Err(e) => self.pending.push_back(Err(e)),
        }
        true
    }
}

/// Parse SSE stream from an OpenAI-compatible endpoint into text deltas.
pub fn parse_sse_stream<S, E>(stream: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(stream),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let tokens = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    if !st.drain_lines() {
                        st.finished = true;
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(Error::Inference(format!("Stream error: {}", e))));
                }
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    st.push_line(&String::from_utf8_lossy(&rest));
                }
            }
        }
    });

    Box::pin(tokens)
}
