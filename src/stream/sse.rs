/// SSE (Server-Sent Events) line decoding for the streaming relay.
///
/// The relay is line-oriented: upstream body bytes are split into lines by
/// [`LineBuffer`], then each line is classified by [`SseDecoder`] into the
/// handful of shapes the relay cares about. Forwarding to the downstream
/// client never waits on classification; only the parallel audit
/// accumulation consumes the classified form.
use memchr::memchr;

/// Incremental splitter turning arbitrary byte chunks into complete lines.
///
/// Chunks may arrive at any byte boundary. Lines are decoded lossily as
/// UTF-8 with a trailing `\r` stripped, matching what a permissive SSE
/// consumer does with CRLF upstreams.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and append every completed line to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.buf.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(pos) = memchr(b'\n', &self.buf[start..]) {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if let [head @ .., b'\r'] = line {
                line = head;
            }
            out.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
    }

    /// Flush any trailing line that never saw a terminator (end of body).
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// One classified SSE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Frame separator; consumed by the decoder.
    Blank,
    /// Leading `:`; consumed by the decoder.
    Comment,
    /// `event:` line; updates the carried event name, no payload.
    Event(&'a str),
    /// `data: [DONE]` terminal marker.
    Done,
    /// `data:` payload (prefix stripped, trimmed).
    Data(&'a str),
    /// Anything else; forwarded verbatim and ignored for extraction.
    Other,
}

/// Classify a single raw line per the SSE framing the relay consumes.
#[must_use]
pub fn classify_line(raw: &str) -> SseLine<'_> {
    let line = raw.trim();
    if line.is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(name) = line.strip_prefix("event:") {
        return SseLine::Event(name.trim());
    }
    if let Some(payload) = line.strip_prefix("data:") {
        let payload = payload.trim();
        if payload == "[DONE]" {
            return SseLine::Done;
        }
        return SseLine::Data(payload);
    }
    SseLine::Other
}

/// Stateful decoder carrying the current event name between lines.
///
/// Everything except the event name is stateless across frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    current_event: Option<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a line, updating the carried event name on `event:` lines.
    pub fn decode<'a>(&mut self, raw: &'a str) -> SseLine<'a> {
        let line = classify_line(raw);
        if let SseLine::Event(name) = line {
            self.current_event = Some(name.to_string());
        }
        line
    }

    #[must_use]
    pub fn current_event(&self) -> Option<&str> {
        self.current_event.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_from(buf: &mut LineBuffer, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        buf.push(chunk, &mut out);
        out
    }

    #[test]
    fn test_line_buffer_complete_lines() {
        let mut buf = LineBuffer::new();
        let lines = lines_from(&mut buf, b"data: a\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(lines_from(&mut buf, b"data: hel").is_empty());
        let lines = lines_from(&mut buf, b"lo\n");
        assert_eq!(lines, vec!["data: hello"]);
    }

    #[test]
    fn test_line_buffer_crlf() {
        let mut buf = LineBuffer::new();
        let lines = lines_from(&mut buf, b"data: a\r\n\r\n");
        assert_eq!(lines, vec!["data: a", ""]);
    }

    #[test]
    fn test_line_buffer_finish_flushes_tail() {
        let mut buf = LineBuffer::new();
        assert!(lines_from(&mut buf, b"tail without newline").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("tail without newline"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_lossy_utf8() {
        let mut buf = LineBuffer::new();
        let lines = lines_from(&mut buf, b"data: \xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("data: "));
    }

    #[test]
    fn test_classify_blank_and_comment() {
        assert_eq!(classify_line(""), SseLine::Blank);
        assert_eq!(classify_line("   "), SseLine::Blank);
        assert_eq!(classify_line(": keep-alive"), SseLine::Comment);
    }

    #[test]
    fn test_classify_event_line() {
        assert_eq!(
            classify_line("event: response.output_text.delta"),
            SseLine::Event("response.output_text.delta")
        );
    }

    #[test]
    fn test_classify_data_and_done() {
        assert_eq!(classify_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(classify_line("data:{\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(classify_line("data: [DONE]"), SseLine::Done);
        assert_eq!(classify_line("data:[DONE]"), SseLine::Done);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify_line("retry: 100"), SseLine::Other);
        assert_eq!(classify_line("garbage line"), SseLine::Other);
    }

    #[test]
    fn test_decoder_carries_event_name() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.current_event().is_none());
        decoder.decode("event: message.delta");
        assert_eq!(decoder.current_event(), Some("message.delta"));
        decoder.decode("data: {\"delta\":\"x\"}");
        assert_eq!(decoder.current_event(), Some("message.delta"));
        decoder.decode("event: response.delta");
        assert_eq!(decoder.current_event(), Some("response.delta"));
    }
}
