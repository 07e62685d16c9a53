//! Summaries shown in block headers

use crate::aggregate::Block;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const MAX_COMMAND_DISPLAY_CHARS: usize = 100;

/// Header information for a `file_update` diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    pub filename: String,
    pub additions: usize,
    pub deletions: usize,
}

impl DiffSummary {
    pub fn from_patch(patch: &str) -> Self {
        let filename = patch
            .lines()
            .find(|line| line.starts_with("diff --git"))
            .and_then(|line| line.split(" b/").nth(1))
            .or_else(|| {
                patch
                    .lines()
                    .find_map(|line| line.strip_prefix("+++ b/"))
            })
            .map(|name| name.trim().to_string())
            .unwrap_or_else(|| "Unknown file".to_string());

        let mut additions = 0;
        let mut deletions = 0;
        for line in patch.lines() {
            if line.starts_with('+') && !line.starts_with("+++") {
                additions += 1;
            }
            if line.starts_with('-') && !line.starts_with("---") {
                deletions += 1;
            }
        }

        Self {
            filename,
            additions,
            deletions,
        }
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filename)?;
        if self.additions > 0 {
            write!(f, " +{}", self.additions)?;
        }
        if self.deletions > 0 {
            write!(f, " -{}", self.deletions)?;
        }
        Ok(())
    }
}

/// One-line description of an executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSummary {
    /// The command writes a file through a heredoc or an echo redirect
    FileWrite { path: String },
    Command(String),
}

fn heredoc_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"(?m)^cat\s+<<\s*['"]?(\w+)['"]?\s*>\s*(.+)$"#).unwrap())
}

fn echo_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?m)^echo\s+.*\s*>\s*(.+)$").unwrap())
}

impl CommandSummary {
    pub fn from_command(command: &str) -> Self {
        let trimmed = command.trim();

        if let Some(captures) = heredoc_regex().captures(trimmed) {
            return CommandSummary::FileWrite {
                path: captures[2].trim().to_string(),
            };
        }
        if let Some(captures) = echo_regex().captures(trimmed) {
            return CommandSummary::FileWrite {
                path: captures[1].trim().to_string(),
            };
        }

        let first_line = trimmed.lines().next().unwrap_or_default();
        if first_line.chars().count() > MAX_COMMAND_DISPLAY_CHARS {
            let truncated: String = first_line.chars().take(MAX_COMMAND_DISPLAY_CHARS).collect();
            CommandSummary::Command(format!("{truncated}..."))
        } else {
            CommandSummary::Command(first_line.to_string())
        }
    }
}

impl fmt::Display for CommandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSummary::FileWrite { path } => write!(f, "Write to {path}"),
            CommandSummary::Command(text) => f.write_str(text),
        }
    }
}

impl Block {
    /// Header title used by renderers
    pub fn title(&self) -> String {
        match self {
            Block::Thinking(_) => "Thinking Process".to_string(),
            Block::ExecutionGroup { duration, .. } => match duration {
                Some(duration) => format!("EXECUTE ({duration})"),
                None => "EXECUTE".to_string(),
            },
            Block::FileUpdate(patch) => DiffSummary::from_patch(patch).to_string(),
            Block::Stdout(_) => "Output".to_string(),
            Block::Terminal { kind, .. } => kind.label().to_string(),
            Block::Agent(_) => "Summarize".to_string(),
            Block::Error(_) => "Error".to_string(),
            Block::Plain { tag, .. } => tag.clone(),
        }
    }
}
