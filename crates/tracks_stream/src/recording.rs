use crate::error::StreamError;
use crate::lines::decode_utf8;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Recording of one request and the raw chunks of its response
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordingSession {
    /// The request that was sent
    pub request: serde_json::Value,
    /// When the recording was started
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Raw body chunks as received
    pub chunks: Vec<RecordedChunk>,
}

/// Single recorded chunk with timing info
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecordedChunk {
    /// Chunk text. A character split across network chunks is stored whole
    /// in the later chunk.
    pub data: String,
    /// Milliseconds since recording start
    pub timestamp_ms: u64,
}

/// Records raw response chunks into a JSON array of sessions
pub struct StreamRecorder {
    file_path: PathBuf,
    current_session: Option<RecordingSession>,
    start_time: Option<Instant>,
    /// Leading bytes of a character that continues in the next chunk
    incomplete_utf8: Vec<u8>,
}

impl StreamRecorder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            current_session: None,
            start_time: None,
            incomplete_utf8: Vec::new(),
        }
    }

    pub fn start_recording(&mut self, request: serde_json::Value) {
        self.current_session = Some(RecordingSession {
            request,
            timestamp: chrono::Utc::now(),
            chunks: Vec::new(),
        });
        self.start_time = Some(Instant::now());
        self.incomplete_utf8.clear();
    }

    pub fn record_chunk(&mut self, chunk: &[u8]) {
        if let (Some(session), Some(start_time)) = (self.current_session.as_mut(), self.start_time)
        {
            let data = decode_utf8(&mut self.incomplete_utf8, chunk);
            if !data.is_empty() {
                session.chunks.push(RecordedChunk {
                    data,
                    timestamp_ms: start_time.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Append the current session to the recording file
    pub fn end_recording(&mut self) -> Result<(), StreamError> {
        let start_time = self.start_time.take();
        let Some(mut session) = self.current_session.take() else {
            return Ok(());
        };
        // A truncated trailing character is kept lossily
        if !self.incomplete_utf8.is_empty() {
            let bytes = std::mem::take(&mut self.incomplete_utf8);
            session.chunks.push(RecordedChunk {
                data: String::from_utf8_lossy(&bytes).into_owned(),
                timestamp_ms: start_time
                    .map(|start| start.elapsed().as_millis() as u64)
                    .unwrap_or_default(),
            });
        }

        let mut sessions = if self.file_path.exists() {
            load_recordings(&self.file_path)?
        } else {
            Vec::new()
        };
        sessions.push(session);

        let json = serde_json::to_string_pretty(&sessions)
            .map_err(|e| StreamError::Recording(format!("Failed to serialize recording: {e}")))?;
        std::fs::write(&self.file_path, json + "\n").map_err(|e| {
            StreamError::Recording(format!(
                "Failed to write recording file {}: {e}",
                self.file_path.display()
            ))
        })
    }
}

pub fn load_recordings<P: AsRef<Path>>(path: P) -> Result<Vec<RecordingSession>, StreamError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        StreamError::Recording(format!(
            "Failed to read recording file {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&contents)
        .map_err(|e| StreamError::Recording(format!("Failed to parse recording file: {e}")))
}

/// Recorded sessions handed out one per request, in order
#[derive(Debug, Clone)]
pub struct PlaybackState {
    sessions: Arc<Vec<RecordingSession>>,
    index: Arc<Mutex<usize>>,
    pub fast: bool,
}

impl PlaybackState {
    pub fn new(sessions: Vec<RecordingSession>, fast: bool) -> Self {
        Self {
            sessions: Arc::new(sessions),
            index: Arc::new(Mutex::new(0)),
            fast,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, fast: bool) -> Result<Self, StreamError> {
        Ok(Self::new(load_recordings(path)?, fast))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Take the next session, or None if exhausted
    pub fn next_session(&self) -> Option<RecordingSession> {
        let mut idx = self
            .index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let session = self.sessions.get(*idx)?.clone();
        *idx += 1;
        Some(session)
    }
}
