//! Single reader loop that turns a chunk stream into conversation updates

use crate::cancel::{CancellationController, RequestState};
use crate::conversation::{ConversationHandle, ConversationState, Turn};
use crate::error::StreamError;
use crate::event::{interpret, Segment, StreamUpdate, Tag};
use crate::lines::LineReassembler;
use crate::recording::StreamRecorder;
use crate::sse::{DecodedLine, SseFrameDecoder};
use crate::stream::ChunkStream;
use std::sync::{Arc, MutexGuard};
use tracing::{debug, error, info, trace, warn};

/// Appended as an `agent` segment when the user stops a reply
pub const STOP_MARKER: &str = "\n\n[Stopped by user]";

/// Invoked with the assistant turn after every applied update
pub type TurnUpdateCallback = Arc<dyn Fn(&Turn) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

pub struct StreamConsumer {
    controller: CancellationController,
    callback: Option<TurnUpdateCallback>,
    recorder: Option<StreamRecorder>,
    reassembler: LineReassembler,
    decoder: SseFrameDecoder,
    dropped_frames: usize,
    saw_done: bool,
}

fn lock(conversation: &ConversationHandle) -> MutexGuard<'_, ConversationState> {
    conversation
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StreamConsumer {
    pub fn new(controller: CancellationController) -> Self {
        Self {
            controller,
            callback: None,
            recorder: None,
            reassembler: LineReassembler::new(),
            decoder: SseFrameDecoder::new(),
            dropped_frames: 0,
            saw_done: false,
        }
    }

    pub fn with_callback(mut self, callback: Option<TurnUpdateCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Record raw chunks; the recorder must already have a session started
    pub fn with_recorder(mut self, recorder: Option<StreamRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Frames dropped because their payload failed to decode
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Whether the `[DONE]` sentinel was seen
    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    /// Drive `stream` to its end, a cancellation or a transport failure.
    ///
    /// Aggregated state is kept in all three cases.
    pub async fn run(
        &mut self,
        stream: &mut dyn ChunkStream,
        conversation: &ConversationHandle,
    ) -> Result<StreamOutcome, StreamError> {
        self.controller.begin();
        let token = self.controller.token().clone();

        let natural = loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break RequestState::Cancelled,
                next = stream.next_chunk() => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    self.controller.mark_streaming();
                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.record_chunk(&chunk);
                    }
                    trace!("Received chunk of {} bytes", chunk.len());
                    for line in self.reassembler.feed(&chunk) {
                        self.process_line(&line, conversation);
                    }
                }
                Ok(None) => {
                    if self.reassembler.has_pending() {
                        debug!("Stream ended inside a line, flushing the fragment");
                    }
                    if let Some(line) = self.reassembler.flush() {
                        self.process_line(&line, conversation);
                    }
                    break RequestState::Completed;
                }
                Err(e) => return self.finish_failed(e, conversation),
            }
        };

        match self.settle(natural, conversation) {
            RequestState::Cancelled => Ok(StreamOutcome::Cancelled),
            _ => Ok(StreamOutcome::Completed),
        }
    }

    /// End a request that was stopped before any response arrived
    pub fn finish_cancelled(&mut self, conversation: &ConversationHandle) -> StreamOutcome {
        self.settle(RequestState::Cancelled, conversation);
        StreamOutcome::Cancelled
    }

    /// End a request whose transport failed. A cancel that raced ahead wins.
    pub fn finish_failed(
        &mut self,
        error: StreamError,
        conversation: &ConversationHandle,
    ) -> Result<StreamOutcome, StreamError> {
        error!("Chat request failed: {}", error);
        match self.settle(RequestState::Failed, conversation) {
            RequestState::Cancelled => Ok(StreamOutcome::Cancelled),
            _ => Err(error),
        }
    }

    /// The request's single terminal transition
    fn settle(
        &mut self,
        natural: RequestState,
        conversation: &ConversationHandle,
    ) -> RequestState {
        let state = self.controller.settle(natural);
        info!(
            "Stream finished: {:?} ({} frames dropped)",
            state, self.dropped_frames
        );
        if state == RequestState::Cancelled {
            self.apply(
                StreamUpdate::Segment(Segment::new(Tag::Agent, STOP_MARKER)),
                conversation,
            );
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.end_recording() {
                warn!("Failed to save recording: {}", e);
            }
        }
        state
    }

    fn process_line(&mut self, line: &str, conversation: &ConversationHandle) {
        match self.decoder.decode_line(line) {
            None => {}
            Some(DecodedLine::Done) => {
                debug!("Received [DONE] sentinel");
                self.saw_done = true;
            }
            Some(DecodedLine::Frame(frame)) => match interpret(&frame) {
                Ok(Some(update)) => {
                    trace!("Applying update from '{}' frame", frame.event);
                    self.apply(update, conversation);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Dropping frame: {} (data: {})", e, frame.data);
                    self.dropped_frames += 1;
                }
            },
        }
    }

    fn apply(&self, update: StreamUpdate, conversation: &ConversationHandle) {
        let turn = match &self.callback {
            Some(_) => lock(conversation)
                .begin_or_extend_assistant_turn(update)
                .cloned(),
            None => {
                lock(conversation).begin_or_extend_assistant_turn(update);
                None
            }
        };
        if let (Some(callback), Some(turn)) = (&self.callback, turn) {
            callback(&turn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Block;
    use crate::stream::PlaybackChunkStream;
    use std::sync::Mutex;

    fn conversation_with_prompt(prompt: &str) -> ConversationHandle {
        let mut state = ConversationState::new();
        state.append_user_turn(prompt);
        Arc::new(Mutex::new(state))
    }

    /// SSE body for a list of (event, data) frames
    fn sse_body(frames: &[(&str, &str)]) -> String {
        frames
            .iter()
            .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
            .collect()
    }

    #[tokio::test]
    async fn test_full_reply_from_split_chunks() {
        let body = sse_body(&[
            ("output", r#"{"tag":"meta","data":"{}"}"#),
            ("session", r#"{"session_id":"sess-1"}"#),
            ("output", r#"{"tag":"thinking","data":"Let me "}"#),
            ("output", r#"{"tag":"thinking","data":"look."}"#),
            ("output", r#"{"tag":"exec","data":"ls\n"}"#),
            ("output", r#"{"tag":"exec_time","data":"12ms"}"#),
            ("output", r#"{"tag":"exec_output","data":"a.txt\n"}"#),
            ("output", r#"{"tag":"agent","data":"Found a.txt"}"#),
            ("output", r#"{"tag":"done","data":""}"#),
            ("done", r#"{"session_id":"sess-1","full_content":"Found a.txt"}"#),
        ]) + "data: [DONE]\n";

        // Split every 7 bytes, across prefixes and payloads
        let chunks: Vec<String> = body
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let mut stream = PlaybackChunkStream::from_texts(chunks);

        let conversation = conversation_with_prompt("what is here?");
        let controller = CancellationController::new();
        let mut consumer = StreamConsumer::new(controller.clone());
        let outcome = consumer.run(&mut stream, &conversation).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(controller.state(), RequestState::Completed);
        assert!(consumer.saw_done());
        assert_eq!(consumer.dropped_frames(), 0);

        let state = conversation.lock().unwrap();
        assert_eq!(state.session_id(), Some("sess-1"));
        assert_eq!(state.turns().len(), 2);
        let reply = state.last_turn().unwrap();
        assert_eq!(reply.content, "Found a.txt");
        assert_eq!(
            reply.blocks.to_vec(),
            vec![
                Block::Thinking("Let me look.".to_string()),
                Block::ExecutionGroup {
                    command: "ls\n".to_string(),
                    output: "a.txt\n".to_string(),
                    duration: Some("12ms".to_string()),
                },
                Block::Agent("Found a.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_halt_stream() {
        let body = sse_body(&[
            ("output", r#"{"tag":"stdout","data":"one"}"#),
            ("output", r#"{"tag":"stdout","data":"#),
            ("message", r#"{"content":"two"}"#),
            ("output", r#"{"tag":"stdout","data":" three"}"#),
        ]);
        let mut stream = PlaybackChunkStream::from_texts([body]);
        let conversation = conversation_with_prompt("go");
        let mut consumer = StreamConsumer::new(CancellationController::new());

        let outcome = consumer.run(&mut stream, &conversation).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(consumer.dropped_frames(), 1);

        let state = conversation.lock().unwrap();
        let reply = state.last_turn().unwrap();
        assert_eq!(reply.content, "two");
        assert_eq!(
            reply.blocks.to_vec(),
            vec![Block::Stdout("one three".to_string())]
        );
    }

    #[tokio::test]
    async fn test_done_sentinel_produces_nothing() {
        let mut stream = PlaybackChunkStream::from_texts(["event: message\ndata: [DONE]\n\n"]);
        let conversation = conversation_with_prompt("go");
        let mut consumer = StreamConsumer::new(CancellationController::new());

        consumer.run(&mut stream, &conversation).await.unwrap();
        assert!(consumer.saw_done());
        assert_eq!(consumer.dropped_frames(), 0);
        assert_eq!(conversation.lock().unwrap().turns().len(), 1);
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_processed() {
        let mut stream = PlaybackChunkStream::from_texts([
            "event: output\n",
            r#"data: {"tag":"agent","data":"tail"}"#,
        ]);
        let conversation = conversation_with_prompt("go");
        let mut consumer = StreamConsumer::new(CancellationController::new());

        consumer.run(&mut stream, &conversation).await.unwrap();
        assert_eq!(
            conversation.lock().unwrap().last_turn().unwrap().content,
            "tail"
        );
    }

    #[tokio::test]
    async fn test_callback_sees_every_update() {
        let body = sse_body(&[
            ("session", r#"{"session_id":"s"}"#),
            ("output", r#"{"tag":"agent","data":"a"}"#),
            ("output", r#"{"tag":"agent","data":"b"}"#),
        ]);
        let mut stream = PlaybackChunkStream::from_texts([body]);
        let conversation = conversation_with_prompt("go");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_callback = seen.clone();
        let callback: TurnUpdateCallback = Arc::new(move |turn: &Turn| {
            seen_by_callback.lock().unwrap().push(turn.content.clone());
        });
        let mut consumer =
            StreamConsumer::new(CancellationController::new()).with_callback(Some(callback));
        consumer.run(&mut stream, &conversation).await.unwrap();

        // Session assignment does not touch the turn
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "ab".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_appends_single_marker() {
        let conversation = conversation_with_prompt("hi");
        let controller = CancellationController::new();

        let stop = controller.clone();
        let callback: TurnUpdateCallback = Arc::new(move |turn: &Turn| {
            if turn.content == "Hello " {
                assert!(stop.cancel());
                assert!(!stop.cancel());
            }
        });
        let mut stream = PlaybackChunkStream::from_texts([
            sse_body(&[("output", r#"{"tag":"agent","data":"Hello "}"#)]),
            sse_body(&[("output", r#"{"tag":"agent","data":"never"}"#)]),
        ]);
        let mut consumer = StreamConsumer::new(controller.clone()).with_callback(Some(callback));

        let outcome = consumer.run(&mut stream, &conversation).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(!controller.cancel());

        let state = conversation.lock().unwrap();
        let reply = state.last_turn().unwrap();
        assert_eq!(reply.content, "Hello \n\n[Stopped by user]");
        assert_eq!(reply.content.matches("[Stopped by user]").count(), 1);
        assert_eq!(
            reply.blocks.to_vec(),
            vec![Block::Agent("Hello \n\n[Stopped by user]".to_string())]
        );
    }

    #[tokio::test]
    async fn test_natural_completion_has_no_marker() {
        let mut stream = PlaybackChunkStream::from_texts([sse_body(&[(
            "output",
            r#"{"tag":"agent","data":"Hello"}"#,
        )])]);
        let conversation = conversation_with_prompt("hi");
        let controller = CancellationController::new();
        let mut consumer = StreamConsumer::new(controller.clone());

        consumer.run(&mut stream, &conversation).await.unwrap();
        assert!(!controller.cancel());
        let state = conversation.lock().unwrap();
        assert_eq!(state.last_turn().unwrap().content, "Hello");
    }

    struct FailingStream {
        chunks: Vec<Vec<u8>>,
    }

    #[async_trait::async_trait]
    impl ChunkStream for FailingStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
            if self.chunks.is_empty() {
                Err(StreamError::Transport("connection reset".to_string()))
            } else {
                Ok(Some(self.chunks.remove(0)))
            }
        }
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_turn() {
        let mut stream = FailingStream {
            chunks: vec![sse_body(&[("output", r#"{"tag":"thinking","data":"partial"}"#)])
                .into_bytes()],
        };
        let conversation = conversation_with_prompt("hi");
        let controller = CancellationController::new();
        let mut consumer = StreamConsumer::new(controller.clone());

        let err = consumer.run(&mut stream, &conversation).await.unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));
        assert_eq!(controller.state(), RequestState::Failed);

        let state = conversation.lock().unwrap();
        assert_eq!(
            state.last_turn().unwrap().blocks.to_vec(),
            vec![Block::Thinking("partial".to_string())]
        );
    }
}
