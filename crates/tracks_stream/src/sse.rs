//! Line-oriented decoder for `event:`/`data:` frames

/// Sentinel payload marking the logical end of a reply
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

/// Result of decoding one line that carried a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    Frame(Frame),
    /// `data: [DONE]`, which is not forwarded as a frame
    Done,
}

/// Tracks the current event name across lines.
///
/// Every `data: ` line produces exactly one frame; the protocol never
/// accumulates multi-line data blocks.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    current_event: String,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_event(&self) -> &str {
        &self.current_event
    }

    pub fn decode_line(&mut self, line: &str) -> Option<DecodedLine> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(event) = line.strip_prefix("event: ") {
            self.current_event = event.trim().to_string();
            None
        } else if let Some(data) = line.strip_prefix("data: ") {
            if data == DONE_SENTINEL {
                return Some(DecodedLine::Done);
            }
            Some(DecodedLine::Frame(Frame {
                event: self.current_event.clone(),
                data: data.to_string(),
            }))
        } else {
            None
        }
    }
}
