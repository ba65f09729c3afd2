//! Input resolution: the values a node consumes, gathered by walking edges.
//!
//! [`GraphStore::resolve_upstream_value`] only reads the source node's own
//! data. The functions here also follow pass-through nodes, e.g. a
//! reference node without an upload forwards whatever image is connected
//! to it.

use atelier_core::canvas::handles;
use atelier_core::error::CoreError;
use atelier_core::graph::GraphStore;
use atelier_core::node::{ImageRef, NodeData, PortValue, ReferenceValue};
use atelier_core::prompt::{join_fragments, qualifier_hint, GenerationOptions};

/// Upper bound on pass-through hops followed for one value.
const MAX_RESOLVE_DEPTH: usize = 64;

/// Everything a generator needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorInputs {
    pub prompt: String,
    pub references: Vec<ReferenceValue>,
    pub options: GenerationOptions,
}

/// Value a node publishes on `handle`, following pass-through nodes.
pub fn effective_output(graph: &GraphStore, node_id: &str, handle: &str) -> Option<PortValue> {
    resolve(graph, node_id, handle, 0)
}

fn resolve(graph: &GraphStore, node_id: &str, handle: &str, depth: usize) -> Option<PortValue> {
    if depth > MAX_RESOLVE_DEPTH {
        tracing::warn!(node_id, handle, "Gave up resolving a value after too many hops");
        return None;
    }
    let node = graph.node(node_id)?;
    if let Some(value) = node.data.output(handle) {
        return Some(value);
    }
    match &node.data {
        NodeData::Reference(data) if handle == handles::REFERENCE => {
            let image = graph
                .list_incoming(node_id, Some(handles::IMAGE))
                .into_iter()
                .find_map(|edge| {
                    resolve(graph, &edge.source, &edge.source_handle, depth + 1)?.into_image()
                })?;
            Some(PortValue::Reference(ReferenceValue {
                image,
                strength: data.strength,
                qualifiers: data.qualifiers.clone(),
            }))
        }
        _ => None,
    }
}

/// Text fragments connected to a node's `prompt` handle, in connection
/// order. Blank fragments are kept here and dropped when joined.
pub fn prompt_fragments(graph: &GraphStore, node_id: &str) -> Vec<String> {
    graph
        .list_incoming(node_id, Some(handles::PROMPT))
        .into_iter()
        .filter_map(|edge| {
            effective_output(graph, &edge.source, &edge.source_handle)?
                .as_text()
                .map(str::to_string)
        })
        .collect()
}

/// References connected to any of a generator's reference handles, in
/// connection order.
pub fn references(graph: &GraphStore, node_id: &str) -> Vec<ReferenceValue> {
    graph
        .list_incoming(node_id, None)
        .into_iter()
        .filter(|edge| handles::GENERATOR_REFERENCE_INPUTS.contains(&edge.target_handle.as_str()))
        .filter_map(|edge| {
            effective_output(graph, &edge.source, &edge.source_handle)?.into_reference()
        })
        .collect()
}

/// The single image feeding a node's `image` input: the first connection
/// that carries one. Connections from empty nodes are skipped.
pub fn source_image(graph: &GraphStore, node_id: &str) -> Option<ImageRef> {
    graph
        .list_incoming(node_id, Some(handles::IMAGE))
        .into_iter()
        .find_map(|edge| effective_output(graph, &edge.source, &edge.source_handle)?.into_image())
}

/// Resolve a generator's prompt and references.
///
/// The prompt is every connected fragment, then the generator's own text,
/// then one `reference: ...` hint per reference carrying qualifiers, all
/// comma-joined.
pub fn generator_inputs(graph: &GraphStore, node_id: &str) -> Result<GeneratorInputs, CoreError> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| CoreError::node_not_found(node_id))?;
    let NodeData::Generator(data) = &node.data else {
        return Err(CoreError::Validation(format!(
            "Node {node_id} is a '{}' node, not a generator",
            node.kind().name()
        )));
    };

    let references = references(graph, node_id);
    let mut fragments = prompt_fragments(graph, node_id);
    fragments.push(data.prompt.clone());
    fragments.extend(references.iter().filter_map(|r| qualifier_hint(&r.qualifiers)));

    Ok(GeneratorInputs {
        prompt: join_fragments(fragments),
        references,
        options: data.options.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
