//! Streaming reassembly engine for the Tracks chat protocol
//!
//! This crate implements:
//! - Line reassembly over arbitrarily split network chunks
//! - Decoding of `event:`/`data:` SSE frames
//! - Interpretation of `session`, `message`, `output` and `done` events
//! - Aggregation of tagged output segments into display blocks
//! - Conversation turn state and request cancellation
//! - HTTP transport, recording and playback of raw chunk streams


pub mod aggregate;
pub mod cancel;
pub mod client;
pub mod consumer;
pub mod conversation;
pub mod display;
pub mod error;
pub mod event;
pub mod lines;
pub mod recording;
pub mod sse;
pub mod stream;

pub use aggregate::{
    flatten_blocks, AggregatorState, Block, BlockSnapshot, SegmentAggregator, TerminalKind,
};
pub use cancel::{CancellationController, RequestState};
pub use client::{ChatClient, ChatClientConfig, ChatSession, StreamHandle};
pub use consumer::{StreamConsumer, StreamOutcome, TurnUpdateCallback, STOP_MARKER};
pub use conversation::{ConversationHandle, ConversationState, Role, Turn};
pub use display::{CommandSummary, DiffSummary};
pub use error::StreamError;
pub use event::{interpret, Segment, StreamUpdate, Tag};
pub use lines::LineReassembler;
pub use recording::{
    load_recordings, PlaybackState, RecordedChunk, RecordingSession, StreamRecorder,
};
pub use sse::{DecodedLine, Frame, SseFrameDecoder};
pub use stream::{ChunkStream, HttpChunkStream, PlaybackChunkStream};
