//! Pixel normalization policy for gender/age models.
//!
//! Some exported gender/age graphs already subtract the mean and scale the
//! input as their first operations; feeding them pre-normalized pixels would
//! normalize twice. The policy here guesses from the names of the leading
//! graph nodes.
//!
//! This is fragile: it depends on how third-party exporters name nodes, not on
//! any contract of the ONNX format. Graphs matching neither pattern within the
//! inspected prefix get the conventional `127.5 / 128.0` constants.

use crate::alignment::PixelNormalization;
use crate::inference::InferenceError;
use std::path::Path;
use tract_onnx::prelude::Framework;

/// Number of leading graph nodes inspected.
pub const INSPECTED_NODES: usize = 8;

/// Name prefixes of an in-graph mean subtraction.
pub const SUBTRACT_NODE_PREFIXES: [&str; 3] = ["Sub", "_minus", "bn_data"];

/// Name prefixes of an in-graph scale multiplication.
pub const MULTIPLY_NODE_PREFIXES: [&str; 3] = ["Mul", "_mul", "bn_data"];

/// The graph normalizes its own input: feed raw pixels.
pub const IN_GRAPH_NORMALIZATION: PixelNormalization = PixelNormalization { mean: 0.0, std: 1.0 };

/// Conventional `(px - 127.5) / 128` normalization.
pub const DEFAULT_NORMALIZATION: PixelNormalization = PixelNormalization {
    mean: 127.5,
    std: 128.0,
};

/// Choose pixel normalization from the model's node names, in graph order.
///
/// Only the first [`INSPECTED_NODES`] names are considered. Both a subtract-
/// and a multiply-style name must appear for the in-graph constants to apply.
pub fn infer_pixel_normalization<S: AsRef<str>>(node_names: &[S]) -> PixelNormalization {
    let mut has_sub = false;
    let mut has_mul = false;
    for name in node_names.iter().take(INSPECTED_NODES) {
        let name = name.as_ref();
        has_sub |= SUBTRACT_NODE_PREFIXES.iter().any(|p| name.starts_with(p));
        has_mul |= MULTIPLY_NODE_PREFIXES.iter().any(|p| name.starts_with(p));
    }

    if has_sub && has_mul {
        IN_GRAPH_NORMALIZATION
    } else {
        DEFAULT_NORMALIZATION
    }
}

/// Read the node names of an ONNX model's main graph, in order.
pub fn read_node_names(model_path: &Path) -> Result<Vec<String>, InferenceError> {
    if !model_path.exists() {
        return Err(InferenceError::ModelNotFound(model_path.display().to_string()));
    }
    let proto = tract_onnx::onnx()
        .proto_model_for_path(model_path)
        .map_err(|e| InferenceError::GraphParse(format!("{}: {e}", model_path.display())))?;
    let graph = proto
        .graph
        .ok_or_else(|| InferenceError::GraphParse(format!("{} has no graph", model_path.display())))?;
    Ok(graph.node.into_iter().map(|n| n.name).collect())
}
