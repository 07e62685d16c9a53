//! Plain-text rendering of assistant turns

use crossterm::style::{Color, Stylize};
use tracks_stream::{Block, CommandSummary, Turn};

fn header(title: &str, color: Color, styled: bool) -> String {
    if styled {
        title.with(color).bold().to_string()
    } else {
        title.to_string()
    }
}

fn body(text: &str) -> &str {
    text.trim_end_matches('\n')
}

pub fn render_block(block: &Block, styled: bool) -> String {
    match block {
        Block::Thinking(text) => format!(
            "{}\n{}",
            header(&format!("[{}]", block.title()), Color::DarkGrey, styled),
            body(text)
        ),
        Block::ExecutionGroup {
            command, output, ..
        } => {
            let mut rendered = format!(
                "{}\n$ {}",
                header(&block.title(), Color::Yellow, styled),
                CommandSummary::from_command(command)
            );
            if !output.trim().is_empty() {
                rendered.push('\n');
                rendered.push_str(body(output));
            }
            rendered
        }
        Block::FileUpdate(patch) => format!(
            "{}\n{}",
            header(&block.title(), Color::Blue, styled),
            body(patch)
        ),
        Block::Stdout(text) => body(text).to_string(),
        Block::Terminal { content, .. } => format!(
            "{}\n{}",
            header(&format!("[{}]", block.title()), Color::Magenta, styled),
            body(content)
        ),
        Block::Agent(text) => format!(
            "{}\n{}",
            header(&format!("[{}]", block.title()), Color::Green, styled),
            body(text)
        ),
        Block::Error(text) => body(text)
            .lines()
            .map(|line| header(&format!("! {line}"), Color::Red, styled))
            .collect::<Vec<_>>()
            .join("\n"),
        Block::Plain { tag, data } => format!(
            "{}\n{}",
            header(&format!("[{tag}]"), Color::Grey, styled),
            body(data)
        ),
    }
}

/// Prints each block of the in-flight reply once, as soon as it is final
#[derive(Debug)]
pub struct BlockPrinter {
    printed: usize,
    header_printed: bool,
    utc_offset: i32,
    styled: bool,
}

impl BlockPrinter {
    pub fn new(utc_offset: i32, styled: bool) -> Self {
        Self {
            printed: 0,
            header_printed: false,
            utc_offset,
            styled,
        }
    }

    pub fn begin_turn(&mut self) {
        self.printed = 0;
        self.header_printed = false;
    }

    fn turn_header(&mut self, turn: &Turn, out: &mut Vec<String>) {
        if !self.header_printed {
            self.header_printed = true;
            out.push(header(
                &format!("tracks · {}", turn.formatted_timestamp(self.utc_offset)),
                Color::Cyan,
                self.styled,
            ));
        }
    }

    /// Blocks that became final since the last call
    pub fn take_finalized(&mut self, turn: &Turn) -> Vec<String> {
        let mut out = Vec::new();
        let finalized: Vec<&Block> = turn.blocks.finalized().skip(self.printed).collect();
        if finalized.is_empty() {
            return out;
        }
        self.turn_header(turn, &mut out);
        for block in finalized {
            out.push(render_block(block, self.styled));
            self.printed += 1;
        }
        out
    }

    /// Everything not yet printed, once the reply has ended
    pub fn take_remaining(&mut self, turn: &Turn) -> Vec<String> {
        let mut out = Vec::new();
        let remaining: Vec<&Block> = turn.blocks.iter().skip(self.printed).collect();
        if remaining.is_empty() && self.header_printed {
            return out;
        }
        self.turn_header(turn, &mut out);
        for block in remaining {
            out.push(render_block(block, self.styled));
            self.printed += 1;
        }
        // Untagged text has no block of its own
        if turn.blocks.is_empty() && !turn.content.is_empty() {
            out.push(body(&turn.content).to_string());
        }
        out
    }
}
