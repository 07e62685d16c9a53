//! HTTP client for the chat endpoint and the per-conversation session driver

use crate::cancel::{CancellationController, RequestState};
use crate::consumer::{StreamConsumer, StreamOutcome, TurnUpdateCallback};
use crate::conversation::{ConversationHandle, ConversationState, Turn};
use crate::error::StreamError;
use crate::recording::{PlaybackState, StreamRecorder};
use crate::stream::{ChunkStream, HttpChunkStream, PlaybackChunkStream};
use reqwest::{Client, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    session_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    config: ChatClientConfig,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }

    /// JSON body of a chat request, as recorded
    pub fn request_body(
        message: &str,
        session_id: Option<&str>,
    ) -> Result<serde_json::Value, StreamError> {
        serde_json::to_value(ChatRequest {
            message,
            session_id,
        })
        .map_err(|e| StreamError::Recording(format!("Failed to serialize request: {e}")))
    }

    /// Send a message and return the streaming response once headers arrive
    pub async fn open_stream(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<Response, StreamError> {
        let mut request_builder = self
            .client
            .post(self.url())
            .header("accept", "text/event-stream");
        if let Some(api_key) = &self.config.api_key {
            request_builder = request_builder.bearer_auth(api_key);
        }

        let response = request_builder
            .json(&ChatRequest {
                message,
                session_id,
            })
            .send()
            .await?;

        debug!("Response headers: {:?}", response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await?;
        Err(StreamError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Clone)]
enum ChunkSource {
    Live(ChatClient),
    Playback(PlaybackState),
}

/// One conversation with the server: submits messages and owns their turns
pub struct ChatSession {
    source: ChunkSource,
    conversation: ConversationHandle,
    callback: Option<TurnUpdateCallback>,
    recording_path: Option<PathBuf>,
}

impl ChatSession {
    pub fn new(client: ChatClient) -> Self {
        Self::with_source(ChunkSource::Live(client))
    }

    /// Replay recorded responses instead of contacting the server
    pub fn playback(state: PlaybackState) -> Self {
        Self::with_source(ChunkSource::Playback(state))
    }

    fn with_source(source: ChunkSource) -> Self {
        Self {
            source,
            conversation: Arc::new(Mutex::new(ConversationState::new())),
            callback: None,
            recording_path: None,
        }
    }

    /// Continue an existing server session
    pub fn with_session_id(self, session_id: impl Into<String>) -> Self {
        Self {
            conversation: Arc::new(Mutex::new(ConversationState::with_session(session_id))),
            ..self
        }
    }

    /// Append every request and its raw chunks to a recording file
    pub fn with_recording(mut self, path: impl Into<PathBuf>) -> Self {
        self.recording_path = Some(path.into());
        self
    }

    pub fn conversation(&self) -> ConversationHandle {
        self.conversation.clone()
    }

    pub fn on_turn_update<F>(&mut self, callback: F)
    where
        F: Fn(&Turn) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Append the user turn and start reading the reply in a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_message(&self, text: impl Into<String>) -> StreamHandle {
        let text = text.into();
        let session_id = {
            let mut conversation = self
                .conversation
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            conversation.append_user_turn(text.clone());
            conversation.session_id().map(str::to_string)
        };

        let controller = CancellationController::new();
        controller.begin();
        info!("Submitting message (session: {:?})", session_id);

        let recorder = self.recording_path.as_ref().and_then(|path| {
            match ChatClient::request_body(&text, session_id.as_deref()) {
                Ok(request) => {
                    let mut recorder = StreamRecorder::new(path);
                    recorder.start_recording(request);
                    Some(recorder)
                }
                Err(e) => {
                    warn!("Not recording this request: {}", e);
                    None
                }
            }
        });
        let consumer = StreamConsumer::new(controller.clone())
            .with_callback(self.callback.clone())
            .with_recorder(recorder);

        let task = tokio::spawn(read_reply(
            consumer,
            self.source.clone(),
            self.conversation.clone(),
            controller.clone(),
            text,
            session_id,
        ));

        StreamHandle { controller, task }
    }
}

async fn read_reply(
    mut consumer: StreamConsumer,
    source: ChunkSource,
    conversation: ConversationHandle,
    controller: CancellationController,
    text: String,
    session_id: Option<String>,
) -> Result<StreamOutcome, StreamError> {
    let mut stream: Box<dyn ChunkStream> = match source {
        ChunkSource::Playback(state) => match state.next_session() {
            Some(session) => Box::new(PlaybackChunkStream::new(session.chunks, state.fast)),
            None => {
                let error = StreamError::Recording("No more recorded sessions".to_string());
                return consumer.finish_failed(error, &conversation);
            }
        },
        ChunkSource::Live(client) => {
            let token = controller.token().clone();
            let response = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Request cancelled before the response arrived");
                    return Ok(consumer.finish_cancelled(&conversation));
                }
                response = client.open_stream(&text, session_id.as_deref()) => response,
            };
            match response {
                Ok(response) => Box::new(HttpChunkStream::new(response)),
                Err(e) => return consumer.finish_failed(e, &conversation),
            }
        }
    };

    consumer.run(stream.as_mut(), &conversation).await
}

/// Handle to one in-flight request
pub struct StreamHandle {
    controller: CancellationController,
    task: JoinHandle<Result<StreamOutcome, StreamError>>,
}

impl StreamHandle {
    /// Stop the request. Returns false if it already ended.
    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }

    /// Cancellation handle that outlives `wait`, e.g. for a Ctrl-C handler
    pub fn stop_handle(&self) -> CancellationController {
        self.controller.clone()
    }

    pub fn state(&self) -> RequestState {
        self.controller.state()
    }

    pub async fn wait(self) -> Result<StreamOutcome, StreamError> {
        self.task
            .await
            .map_err(|e| StreamError::Transport(format!("Reader task failed: {e}")))?
    }
}
