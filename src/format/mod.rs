//! Output formats: [`IrBuilder`] implementations that render a function

mod json;

pub use self::json::*;

use crate::ir::{BlockId, Edge, Function, IrBuilder, IrOp};
use crate::{Address, LiftError};
use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;

/// Supported output formats for translated functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text IR dump (default)
    #[default]
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per line)
    #[value(name = "jsonl", alias = "jsonlines")]
    JsonLines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[OutputFormat::Text, OutputFormat::Json, OutputFormat::JsonLines]
    }

    /// Get a fresh builder for this output format
    pub fn builder(&self) -> Box<dyn IrBuilder> {
        match self {
            OutputFormat::Text => Box::new(TextBuilder::default()),
            OutputFormat::Json => Box::new(JsonBuilder::default()),
            OutputFormat::JsonLines => Box::new(JsonLinesBuilder::default()),
        }
    }

    /// Replay `function` into a new builder and return its output
    pub fn render(&self, function: &Function) -> Result<String, LiftError> {
        let mut builder = self.builder();
        function.emit(builder.as_mut())
    }
}

/// Renders a function as an indented op listing, one block per paragraph.
#[derive(Debug, Default)]
pub struct TextBuilder {
    blocks: Vec<TextBlock>,
}

#[derive(Debug)]
struct TextBlock {
    entry: Address,
    comments: Vec<String>,
    lines: Vec<String>,
}

impl TextBuilder {
    fn block_mut(&mut self, id: BlockId) -> Option<&mut TextBlock> {
        self.blocks.get_mut(id.0)
    }
}

impl IrBuilder for TextBuilder {
    fn create_block(&mut self, id: BlockId, entry: Address) {
        debug_assert_eq!(id.0, self.blocks.len());
        self.blocks.push(TextBlock {
            entry,
            comments: Vec::new(),
            lines: Vec::new(),
        });
    }

    fn append(&mut self, block: BlockId, op: &IrOp) {
        if let Some(text) = self.block_mut(block) {
            let line = match op {
                // Instruction boundaries stand out like in a TCG dump
                IrOp::InsnStart { .. } => format!(" ---- {}", op),
                _ => format!(" {}", op),
            };
            text.lines.push(line);
        }
    }

    fn create_branch(&mut self, block: BlockId, edge: &Edge) {
        if let Some(text) = self.block_mut(block) {
            let target = match edge.target {
                Some(target) => target.to_string(),
                None => "*".to_string(),
            };
            text.lines.push(format!(" -> {} {}", edge.kind, target));
        }
    }

    fn attach_debug(&mut self, block: BlockId, op: Option<usize>, note: &str) {
        let Some(text) = self.block_mut(block) else {
            return;
        };
        match op {
            None => text.comments.extend(note.lines().map(str::to_string)),
            // Notes arrive right after the op they describe
            Some(_) => {
                if let Some(line) = text.lines.last_mut() {
                    line.push_str(&format!("  ; {}", note));
                }
            }
        }
    }

    fn finalize(&mut self, function: &Function) -> Result<String, LiftError> {
        let mut output = String::new();
        output.push_str(&format!(
            "function 0x{:x}: {} blocks, {} edges\n",
            function.entry,
            function.block_count(),
            function.edge_count()
        ));

        for (i, block) in self.blocks.iter().enumerate() {
            output.push('\n');
            output.push_str(&format!("{} @ 0x{:x}:\n", BlockId(i), block.entry));
            for comment in &block.comments {
                output.push_str(&format!(" ; {}\n", comment));
            }
            for line in &block.lines {
                output.push_str(line);
                output.push('\n');
            }
        }

        if !function.diagnostics.is_empty() {
            output.push('\n');
            for diagnostic in &function.diagnostics {
                output.push_str(&format!("; warning: {}\n", diagnostic));
            }
        }

        Ok(output)
    }
}
