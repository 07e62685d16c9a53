//! Folds tagged segments into display blocks
//!
//! Two passes run incrementally over the segment stream:
//! 1. Consecutive segments with the same tag are coalesced into one group.
//!    Filtered tags are dropped before this pass.
//! 2. Closed groups are folded into execution groups: `exec` opens an
//!    accumulator, `exec_output`/`stderr` extend its output, `exec_time`
//!    sets its duration, anything else closes it.
//!
//! Only the trailing block of a snapshot can change on later pushes; every
//! block before it is final.

use crate::event::{Segment, Tag};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    ExecOutput,
    Stderr,
}

impl TerminalKind {
    pub fn tag(self) -> Tag {
        match self {
            TerminalKind::ExecOutput => Tag::ExecOutput,
            TerminalKind::Stderr => Tag::Stderr,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TerminalKind::Stderr => "Warning",
            TerminalKind::ExecOutput => "Command Output",
        }
    }
}

/// Display-level unit built from one or more segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Thinking(String),
    ExecutionGroup {
        command: String,
        output: String,
        duration: Option<String>,
    },
    /// Unified diff of a file edit
    FileUpdate(String),
    Stdout(String),
    /// Command output with no preceding `exec`
    Terminal {
        content: String,
        kind: TerminalKind,
    },
    Agent(String),
    Error(String),
    /// Any other tag, shown as plain text
    Plain { tag: String, data: String },
}

impl Block {
    /// Raw tag/data pairs this block was built from, in block order.
    /// Execution groups yield command, output, then duration.
    pub fn flatten(&self) -> Vec<Segment> {
        match self {
            Block::Thinking(data) => vec![Segment::new(Tag::Thinking, data.clone())],
            Block::ExecutionGroup {
                command,
                output,
                duration,
            } => {
                let mut segments = vec![Segment::new(Tag::Exec, command.clone())];
                if !output.is_empty() {
                    segments.push(Segment::new(Tag::ExecOutput, output.clone()));
                }
                if let Some(duration) = duration {
                    segments.push(Segment::new(Tag::ExecTime, duration.clone()));
                }
                segments
            }
            Block::FileUpdate(data) => vec![Segment::new(Tag::FileUpdate, data.clone())],
            Block::Stdout(data) => vec![Segment::new(Tag::Stdout, data.clone())],
            Block::Terminal { content, kind } => vec![Segment::new(kind.tag(), content.clone())],
            Block::Agent(data) => vec![Segment::new(Tag::Agent, data.clone())],
            Block::Error(data) => vec![Segment::new(Tag::Error, data.clone())],
            Block::Plain { tag, data } => vec![Segment::new(Tag::parse(tag), data.clone())],
        }
    }
}

pub fn flatten_blocks<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Vec<Segment> {
    blocks.into_iter().flat_map(Block::flatten).collect()
}

/// Immutable view of a turn's blocks at one point of the stream.
///
/// Cloning is cheap: finalized blocks are shared between snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    blocks: Arc<[Arc<Block>]>,
}

impl Default for BlockSnapshot {
    fn default() -> Self {
        Self {
            blocks: Arc::from(Vec::new()),
        }
    }
}

impl BlockSnapshot {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index).map(|block| block.as_ref())
    }

    pub fn last(&self) -> Option<&Block> {
        self.blocks.last().map(|block| block.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().map(|block| block.as_ref())
    }

    pub fn to_vec(&self) -> Vec<Block> {
        self.iter().cloned().collect()
    }

    /// Blocks that later pushes can no longer change
    pub fn finalized(&self) -> impl Iterator<Item = &Block> {
        let count = self.blocks.len().saturating_sub(1);
        self.iter().take(count)
    }
}

/// Run of consecutive segments with the same tag
#[derive(Debug, Clone)]
struct Group {
    tag: Tag,
    data: String,
}

impl Group {
    fn into_block(self) -> Block {
        match self.tag {
            Tag::Thinking => Block::Thinking(self.data),
            Tag::Exec => Block::ExecutionGroup {
                command: self.data,
                output: String::new(),
                duration: None,
            },
            Tag::FileUpdate => Block::FileUpdate(self.data),
            Tag::Stdout => Block::Stdout(self.data),
            Tag::ExecOutput => Block::Terminal {
                content: self.data,
                kind: TerminalKind::ExecOutput,
            },
            Tag::Stderr => Block::Terminal {
                content: self.data,
                kind: TerminalKind::Stderr,
            },
            Tag::Agent => Block::Agent(self.data),
            Tag::Error => Block::Error(self.data),
            tag @ (Tag::ExecTime
            | Tag::Meta
            | Tag::User
            | Tag::Title
            | Tag::TokensUsed
            | Tag::Done
            | Tag::Session
            | Tag::Other(_)) => Block::Plain {
                tag: tag.as_str().to_string(),
                data: self.data,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct ExecAccumulator {
    command: String,
    output: String,
    duration: Option<String>,
}

impl ExecAccumulator {
    fn into_block(self) -> Block {
        Block::ExecutionGroup {
            command: self.command,
            output: self.output,
            duration: self.duration,
        }
    }
}

/// Reducer state of the two aggregation passes
#[derive(Debug, Clone, Default)]
pub struct AggregatorState {
    finished: Vec<Arc<Block>>,
    exec: Option<ExecAccumulator>,
    open: Option<Group>,
}

impl AggregatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one segment into the state
    pub fn apply(mut self, segment: &Segment) -> Self {
        if segment.tag.is_filtered() {
            return self;
        }

        match &mut self.open {
            Some(group) if group.tag == segment.tag => group.data.push_str(&segment.data),
            _ => {
                let next = Group {
                    tag: segment.tag.clone(),
                    data: segment.data.clone(),
                };
                if let Some(closed) = self.open.replace(next) {
                    self.fold(closed);
                }
            }
        }
        self
    }

    /// Blocks for everything applied so far, including open groups
    pub fn snapshot(&self) -> BlockSnapshot {
        let mut tail = AggregatorState {
            finished: Vec::new(),
            exec: self.exec.clone(),
            open: None,
        };
        if let Some(open) = &self.open {
            tail.fold(open.clone());
        }
        tail.close_exec();

        let blocks: Vec<Arc<Block>> = self
            .finished
            .iter()
            .cloned()
            .chain(tail.finished)
            .collect();
        BlockSnapshot {
            blocks: blocks.into(),
        }
    }

    fn fold(&mut self, group: Group) {
        if group.tag == Tag::Exec {
            self.close_exec();
            self.exec = Some(ExecAccumulator {
                command: group.data,
                output: String::new(),
                duration: None,
            });
            return;
        }

        if let Some(exec) = self.exec.as_mut() {
            match group.tag {
                Tag::ExecOutput | Tag::Stderr => {
                    exec.output.push_str(&group.data);
                    return;
                }
                Tag::ExecTime => {
                    exec.duration = Some(group.data);
                    return;
                }
                _ => {}
            }
        }

        self.close_exec();
        self.finished.push(Arc::new(group.into_block()));
    }

    fn close_exec(&mut self) {
        if let Some(exec) = self.exec.take() {
            self.finished.push(Arc::new(exec.into_block()));
        }
    }
}

/// Incremental aggregator for one assistant turn
#[derive(Debug, Clone, Default)]
pub struct SegmentAggregator {
    state: AggregatorState,
}

impl SegmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: &Segment) -> BlockSnapshot {
        let state = std::mem::take(&mut self.state);
        self.state = state.apply(segment);
        self.state.snapshot()
    }

    pub fn snapshot(&self) -> BlockSnapshot {
        self.state.snapshot()
    }

    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Self {
        let state = segments
            .into_iter()
            .fold(AggregatorState::new(), |state, segment| state.apply(segment));
        Self { state }
    }
}
