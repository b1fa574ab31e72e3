//! JSON and JSON Lines output builders

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ir::{BlockId, Edge, Function, IrBuilder, IrOp};
use crate::{Address, LiftError};

/// Serializable op for JSON output
#[derive(Serialize, Deserialize)]
struct OpJson {
    /// The op itself, tagged by kind
    op: IrOp,
    /// Display form, as in the text dump
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<String>,
}

/// Serializable block for JSON output
#[derive(Serialize, Deserialize)]
struct BlockJson {
    id: usize,
    /// Entry address of the block
    entry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<String>,
    ops: Vec<OpJson>,
    /// Outgoing edges; an absent target is a dynamic dispatch
    edges: Vec<Edge>,
}

/// Serializable function for JSON output
#[derive(Serialize, Deserialize)]
struct FunctionJson {
    entry: String,
    debug_info: String,
    /// Whether part of the region failed to decode
    partial: bool,
    blocks: Vec<BlockJson>,
    diagnostics: Vec<String>,
}

fn json_error(e: serde_json::Error) -> LiftError {
    LiftError::Output(format!("JSON serialization error: {}", e))
}

/// Collects the whole function and renders it as one pretty-printed document.
#[derive(Default)]
pub struct JsonBuilder {
    blocks: Vec<BlockJson>,
}

impl IrBuilder for JsonBuilder {
    fn create_block(&mut self, id: BlockId, entry: Address) {
        self.blocks.push(BlockJson {
            id: id.0,
            entry: format!("0x{:x}", entry),
            debug: None,
            ops: Vec::new(),
            edges: Vec::new(),
        });
    }

    fn append(&mut self, block: BlockId, op: &IrOp) {
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.ops.push(OpJson {
                op: op.clone(),
                text: op.to_string(),
                debug: None,
            });
        }
    }

    fn create_branch(&mut self, block: BlockId, edge: &Edge) {
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.edges.push(*edge);
        }
    }

    fn attach_debug(&mut self, block: BlockId, op: Option<usize>, note: &str) {
        let Some(b) = self.blocks.get_mut(block.0) else {
            return;
        };
        match op {
            None => b.debug = Some(note.to_string()),
            Some(index) => {
                if let Some(o) = b.ops.get_mut(index) {
                    o.debug = Some(note.to_string());
                }
            }
        }
    }

    fn finalize(&mut self, function: &Function) -> Result<String, LiftError> {
        let result = FunctionJson {
            entry: format!("0x{:x}", function.entry),
            debug_info: function.debug_info.to_string(),
            partial: function.is_partial(),
            blocks: std::mem::take(&mut self.blocks),
            diagnostics: function.diagnostics.iter().map(ToString::to_string).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

/// Streams one JSON object per line: blocks first, then ops, edges and
/// debug notes as the function is replayed, and a closing summary.
#[derive(Default)]
pub struct JsonLinesBuilder {
    output: String,
    error: Option<LiftError>,
}

impl JsonLinesBuilder {
    fn push(&mut self, record: Value) {
        if self.error.is_some() {
            return;
        }
        match serde_json::to_string(&record) {
            Ok(line) => {
                self.output.push_str(&line);
                self.output.push('\n');
            }
            Err(e) => self.error = Some(json_error(e)),
        }
    }
}

impl IrBuilder for JsonLinesBuilder {
    fn create_block(&mut self, id: BlockId, entry: Address) {
        self.push(json!({
            "type": "block",
            "block": id.0,
            "entry": format!("0x{:x}", entry),
        }));
    }

    fn append(&mut self, block: BlockId, op: &IrOp) {
        self.push(json!({
            "type": "op",
            "block": block.0,
            "op": op,
            "text": op.to_string(),
        }));
    }

    fn create_branch(&mut self, block: BlockId, edge: &Edge) {
        self.push(json!({
            "type": "edge",
            "block": block.0,
            "kind": edge.kind,
            "target": edge.target,
        }));
    }

    fn attach_debug(&mut self, block: BlockId, op: Option<usize>, note: &str) {
        self.push(json!({
            "type": "debug",
            "block": block.0,
            "op": op,
            "note": note,
        }));
    }

    fn finalize(&mut self, function: &Function) -> Result<String, LiftError> {
        for diagnostic in &function.diagnostics {
            self.push(json!({
                "type": "diagnostic",
                "address": format!("0x{:x}", diagnostic.address()),
                "message": diagnostic.to_string(),
            }));
        }
        self.push(json!({
            "type": "function",
            "entry": format!("0x{:x}", function.entry),
            "blocks": function.block_count(),
            "edges": function.edge_count(),
            "partial": function.is_partial(),
        }));

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(std::mem::take(&mut self.output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::debug::DebugInfo;
    use crate::format::OutputFormat;
    use crate::testing::ScriptedDecoder;
    use crate::translate::Translator;
    use crate::ControlFlow;
    use serde_json::Value;

    fn sample(debug_info: DebugInfo) -> crate::ir::Function {
        let decoder = ScriptedDecoder::new()
            .flow(0, 2, ControlFlow::CondJump(4))
            .flow(2, 2, ControlFlow::Jump(0x100))
            .flow(4, 1, ControlFlow::Return);
        let function = Translator::new(&decoder)
            .with_debug_info(debug_info)
            .translate(&[0u8; 5], 0);
        function
    }

    #[test]
    fn test_json_document() {
        let output = OutputFormat::Json.render(&sample(DebugInfo::None)).unwrap();
        let doc: Value = serde_json::from_str(&output).unwrap();

        assert_eq!(doc["entry"], "0x0");
        assert_eq!(doc["debug_info"], "none");
        assert_eq!(doc["partial"], false);
        assert_eq!(doc["blocks"].as_array().unwrap().len(), 3);

        let head = &doc["blocks"][0];
        assert_eq!(head["entry"], "0x0");
        assert_eq!(head["ops"][0]["op"]["op"], "insn_start");
        assert_eq!(head["edges"][0]["kind"], "conditional");
        assert_eq!(head["edges"][0]["target"], 2);
        assert!(head.get("debug").is_none());

        assert_eq!(doc["blocks"][2]["edges"][0]["target"], Value::Null);
        assert_eq!(doc["diagnostics"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_json_carries_debug_notes() {
        let output = OutputFormat::Json.render(&sample(DebugInfo::DecoderTrace)).unwrap();
        let doc: Value = serde_json::from_str(&output).unwrap();

        let head = &doc["blocks"][0];
        assert_eq!(doc["debug_info"], "ptc");
        assert_eq!(head["debug"], "ptc:0x0#0..ptc:0x0#1");
        assert_eq!(head["ops"][1]["debug"], "ptc:0x0#0");
        assert!(head["ops"][0].get("debug").is_none());
    }

    #[test]
    fn test_json_lines_records() {
        let output = OutputFormat::JsonLines
            .render(&sample(DebugInfo::OriginalAssembly))
            .unwrap();
        let records: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        let count = |kind: &str| records.iter().filter(|r| r["type"] == kind).count();
        assert_eq!(count("block"), 3);
        assert_eq!(count("edge"), 3);
        assert_eq!(count("diagnostic"), 1);
        assert!(count("debug") > 0);

        let last = records.last().unwrap();
        assert_eq!(last["type"], "function");
        assert_eq!(last["blocks"], 3);
    }
}
