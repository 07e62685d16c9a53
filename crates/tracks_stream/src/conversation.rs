use crate::aggregate::{BlockSnapshot, SegmentAggregator};
use crate::event::{Segment, StreamUpdate, Tag};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One role-attributed message, possibly still streaming
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    /// Concatenation of all `agent` and untagged deltas
    pub content: String,
    pub blocks: BlockSnapshot,
    segments: Arc<Vec<Segment>>,
    pub timestamp: DateTime<Utc>,
    aggregator: SegmentAggregator,
}

impl Turn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            blocks: BlockSnapshot::default(),
            segments: Arc::new(Vec::new()),
            timestamp: Utc::now(),
            aggregator: SegmentAggregator::new(),
        }
    }

    /// Tagged segments in arrival order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Timestamp as `YYYY-MM-DD HH:MM:SS` in a fixed UTC offset (hours)
    pub fn formatted_timestamp(&self, utc_offset_hours: i32) -> String {
        let offset = FixedOffset::east_opt(utc_offset_hours.saturating_mul(3600))
            .unwrap_or_else(|| Utc.fix());
        self.timestamp
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    fn extend_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    fn push_segment(&mut self, segment: Segment) {
        if segment.tag == Tag::Agent {
            self.extend_content(&segment.data);
        }
        self.blocks = self.aggregator.push(&segment);
        // Copies only if an observer still holds an older clone
        Arc::make_mut(&mut self.segments).push(segment);
    }
}

/// Ordered turns of a conversation plus the server-assigned session id
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
    session_id: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue an existing server session
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            turns: Vec::new(),
            session_id: Some(session_id.into()),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn append_user_turn(&mut self, content: impl Into<String>) -> &Turn {
        self.turns.push(Turn::new(Role::User, content.into()));
        &self.turns[self.turns.len() - 1]
    }

    /// Apply one stream update.
    ///
    /// Returns the assistant turn if the update touched it. Session updates
    /// only change the side channel and never create a turn.
    pub fn begin_or_extend_assistant_turn(&mut self, update: StreamUpdate) -> Option<&Turn> {
        match update {
            StreamUpdate::SessionAssigned(session_id) => {
                self.assign_session(session_id);
                None
            }
            StreamUpdate::Done { session_id } => {
                if let Some(session_id) = session_id {
                    self.assign_session(session_id);
                }
                None
            }
            StreamUpdate::ContentDelta(delta) => {
                let turn = self.assistant_tail();
                turn.extend_content(&delta);
                Some(turn)
            }
            StreamUpdate::Segment(segment) => {
                let turn = self.assistant_tail();
                turn.push_segment(segment);
                Some(turn)
            }
        }
    }

    fn assign_session(&mut self, session_id: String) {
        if self.session_id.as_deref() != Some(session_id.as_str()) {
            debug!("Session assigned: {}", session_id);
        }
        self.session_id = Some(session_id);
    }

    /// The in-flight assistant turn, created after a user turn if needed
    fn assistant_tail(&mut self) -> &mut Turn {
        let needs_turn = !matches!(self.turns.last(), Some(turn) if turn.role == Role::Assistant);
        if needs_turn {
            self.turns.push(Turn::new(Role::Assistant, String::new()));
        }
        let last = self.turns.len() - 1;
        &mut self.turns[last]
    }
}

/// Conversation shared between a reader task and its observers
pub type ConversationHandle = Arc<Mutex<ConversationState>>;
