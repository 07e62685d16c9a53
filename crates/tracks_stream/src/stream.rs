//! Chunk sources for the stream consumer
//!
//! Live HTTP responses and recorded playback go through the same consumer,
//! so a recording replays with identical reassembly behavior.

use crate::error::StreamError;
use crate::recording::RecordedChunk;
use async_trait::async_trait;
use reqwest::Response;
use std::time::{Duration, Instant};

/// Source of raw body chunks, in arrival order
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk, or `None` once the transfer has ended
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError>;
}

/// Body of a live HTTP response
pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StreamError::Transport(format!("HTTP chunk error: {e}"))),
        }
    }
}

/// Replays recorded chunks
pub struct PlaybackChunkStream {
    chunks: Vec<RecordedChunk>,
    current_index: usize,
    start_time: Instant,
    fast_mode: bool,
}

impl PlaybackChunkStream {
    pub fn new(chunks: Vec<RecordedChunk>, fast_mode: bool) -> Self {
        Self {
            chunks,
            current_index: 0,
            start_time: Instant::now(),
            fast_mode,
        }
    }

    /// Chunks delivered back to back with no timing
    #[cfg(test)]
    pub(crate) fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = texts
            .into_iter()
            .map(|text| RecordedChunk {
                data: text.into(),
                timestamp_ms: 0,
            })
            .collect();
        Self::new(chunks, true)
    }
}

#[async_trait]
impl ChunkStream for PlaybackChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let Some(chunk) = self.chunks.get(self.current_index) else {
            return Ok(None);
        };

        if self.fast_mode {
            // Still yield so cancellation can interleave
            tokio::task::yield_now().await;
        } else {
            let elapsed = self.start_time.elapsed();
            let expected_time = Duration::from_millis(chunk.timestamp_ms);
            if elapsed < expected_time {
                tokio::time::sleep(expected_time - elapsed).await;
            }
        }

        self.current_index += 1;
        Ok(Some(chunk.data.clone().into_bytes()))
    }
}
