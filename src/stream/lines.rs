/// Incremental line reassembly over an HTTP response body.
///
/// Chunks arrive at arbitrary byte boundaries; complete lines are yielded as
/// soon as their terminator (`\n`, `\r\n` or a bare `\r`) arrives and the
/// unterminated tail is kept for the next chunk.
use bytes::{Buf, BytesMut};
use futures_util::Stream;
use memchr::memchr2_iter;
use smallvec::SmallVec;

const LOG_PREVIEW_BYTES: usize = 64;

struct PendingLines {
    lines: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingLines {
    #[inline]
    fn new() -> Self {
        Self {
            lines: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.lines.len() {
            return None;
        }
        let line = std::mem::take(&mut self.lines[self.head]);
        self.head += 1;
        if self.head == self.lines.len() {
            self.lines.clear();
            self.head = 0;
        }
        Some(line)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.lines.reserve(parsed.len());
        self.lines.extend(parsed.drain(..));
    }
}

/// Splits a byte stream into trimmed text lines.
///
/// Holds a single byte buffer of unterminated data. Splitting happens on raw
/// bytes before UTF-8 decoding: `\r` and `\n` never occur inside a multi-byte
/// sequence, so a character cut by a chunk boundary simply waits in the buffer
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: BytesMut,
    // Prefix of `buffer` already known to contain no terminator.
    scanned: usize,
    // Previous chunk ended with `\r`; a leading `\n` completes that `\r\n`.
    skip_leading_lf: bool,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the lines it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed one chunk and append completed lines into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let mut chunk = chunk;
        if self.skip_leading_lf && !chunk.is_empty() {
            self.skip_leading_lf = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.buffer.extend_from_slice(chunk);

        let scan_start = self.scanned;
        let mut line_start = 0;
        for rel_pos in memchr2_iter(b'\r', b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            if line_end < line_start {
                // `\n` of a `\r\n` pair already consumed.
                continue;
            }
            push_decoded_line(&self.buffer[line_start..line_end], out);
            line_start = line_end + 1;
            if self.buffer[line_end] == b'\r' {
                match self.buffer.get(line_end + 1) {
                    Some(&b'\n') => line_start = line_end + 2,
                    Some(_) => {}
                    None => self.skip_leading_lf = true,
                }
            }
        }

        self.buffer.advance(line_start);
        self.scanned = self.buffer.len();
    }

    /// Drain the unterminated tail once the body has ended.
    ///
    /// Returns `None` when the tail is empty after trimming.
    pub fn flush(&mut self) -> Option<String> {
        let tail = self.buffer.split();
        self.scanned = 0;
        self.skip_leading_lf = false;
        if tail.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(1);
        push_decoded_line(&tail, &mut out);
        out.pop().filter(|line| !line.is_empty())
    }

    /// Bytes currently held back waiting for a line break.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn push_decoded_line(raw: &[u8], out: &mut Vec<String>) {
    match std::str::from_utf8(raw) {
        Ok(text) => out.push(text.trim().to_owned()),
        Err(err) => {
            let preview = String::from_utf8_lossy(&raw[..raw.len().min(LOG_PREVIEW_BYTES)]);
            tracing::warn!(
                error = %err,
                line_len = raw.len(),
                preview = %preview,
                "skipping upstream line that is not valid UTF-8"
            );
        }
    }
}

/// Turn a response body stream into a lazy stream of lines.
///
/// A line is yielded as soon as the chunk that completes it arrives. When the
/// body ends, the unterminated tail (if any) is yielded last. A body error is
/// yielded once as `Err` and ends the stream; the partial tail is discarded.
pub fn line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            LineReassembler::new(),
            Vec::<String>::with_capacity(8),
            PendingLines::new(),
            false,
        ),
        |(mut stream, mut reassembler, mut parsed, mut pending, mut finished)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((
                        Ok(line),
                        (stream, reassembler, parsed, pending, finished),
                    ));
                }
                if finished {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(chunk)) => {
                        reassembler.feed_into(&chunk, &mut parsed);
                        pending.extend_from_vec(&mut parsed);
                    }
                    Some(Err(err)) => {
                        finished = true;
                        return Some((
                            Err(err),
                            (stream, reassembler, parsed, pending, finished),
                        ));
                    }
                    None => {
                        finished = true;
                        let tail = reassembler.flush()?;
                        return Some((
                            Ok(tail),
                            (stream, reassembler, parsed, pending, finished),
                        ));
                    }
                }
            }
        },
    )
}
