//! Node firing with per-node in-flight tracking.
//!
//! A run is split in three so that the suspension point never holds the
//! hierarchy:
//!
//! 1. [`NodeRuntime::begin`] resolves inputs from the live graph, claims the
//!    node, and flags it as running;
//! 2. [`NodeRuntime::execute`] performs the detached [`Job`];
//! 3. [`NodeRuntime::complete`] writes the result (or a node-local error)
//!    back, on whichever board the node lives, and releases the claim.
//!
//! [`NodeRuntime::trigger`] chains the three for callers that own the
//! hierarchy for the whole run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use atelier_core::assets::{AssetRecord, AssetSink};
use atelier_core::error::CoreError;
use atelier_core::hierarchy::BoardHierarchy;
use atelier_core::node::{ImageRef, MattingMode, NodeData};
use atelier_core::prompt::validate_prompt;
use atelier_core::types::{BoardId, NodeId};
use atelier_events::bus::{EventBus, WorkspaceEvent, NODE_COMPLETED, NODE_FAILED};
use atelier_generation::{GenerationRequest, GenerationService};

use crate::error::RuntimeError;
use crate::inputs;
use crate::jobs::{self, Job, JobKind, JobOutput};

/// What activating a node did.
#[derive(Debug, Clone, PartialEq)]
pub enum Firing {
    /// A board link opened its board.
    Navigated(BoardId),
    /// A generator or post-process node produced an image.
    Produced(ImageRef),
}

pub struct NodeRuntime {
    generation: Option<Arc<dyn GenerationService>>,
    assets: Arc<dyn AssetSink>,
    bus: Option<Arc<EventBus>>,
    in_flight: Mutex<HashSet<(BoardId, NodeId)>>,
}

impl NodeRuntime {
    pub fn new(generation: Option<Arc<dyn GenerationService>>, assets: Arc<dyn AssetSink>) -> Self {
        Self {
            generation,
            assets,
            bus: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Announce completed and failed runs on `bus`.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Whether the accurate matting path is available.
    pub fn has_credential(&self) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|service| service.has_credential())
    }

    pub fn is_in_flight(&self, board_id: BoardId, node_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(board_id, node_id.to_string()))
    }

    fn release(&self, board_id: BoardId, node_id: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(board_id, node_id.to_string()));
    }

    // ---- phases ----

    /// Resolve a node's inputs on the open board and claim it.
    ///
    /// Fails with [`CoreError::AlreadyInProgress`] while an earlier run of
    /// the same node has not completed. Nothing is changed on failure.
    pub fn begin(&self, hierarchy: &mut BoardHierarchy, node_id: &str) -> Result<Job, RuntimeError> {
        let board_id = hierarchy.current_board_id();
        if self.is_in_flight(board_id, node_id) {
            return Err(CoreError::AlreadyInProgress(node_id.to_string()).into());
        }

        let graph = hierarchy.graph();
        let node = graph
            .node(node_id)
            .ok_or_else(|| CoreError::node_not_found(node_id))?;
        let kind = match &node.data {
            NodeData::Generator(_) => {
                let inputs = inputs::generator_inputs(graph, node_id)?;
                validate_prompt(&inputs.prompt)?;
                inputs.options.validate()?;
                let mut request =
                    GenerationRequest::new(inputs.prompt).with_options(inputs.options);
                for reference in inputs.references {
                    let bytes = reference.image.bytes.ok_or_else(|| {
                        CoreError::Validation(format!(
                            "A reference image connected to node {node_id} is not loaded"
                        ))
                    })?;
                    request = request.with_reference(bytes, reference.image.mime_type);
                }
                JobKind::Generate(request)
            }
            NodeData::PostProcess(_) => {
                let image = inputs::source_image(graph, node_id).ok_or_else(|| {
                    CoreError::Validation(format!("Node {node_id} has no connected image"))
                })?;
                let source = image.bytes.ok_or_else(|| {
                    CoreError::Validation(format!(
                        "The image connected to node {node_id} is not loaded"
                    ))
                })?;
                let mode = if self.has_credential() {
                    MattingMode::Difference
                } else {
                    MattingMode::Threshold
                };
                JobKind::Matte {
                    source,
                    source_mime: image.mime_type,
                    mode,
                }
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "Node {node_id} of type '{}' cannot be run",
                    other.kind().name()
                ))
                .into())
            }
        };

        hierarchy.edit_node_in_board(board_id, node_id, |data| set_running(data, true))?;
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((board_id, node_id.to_string()));
        tracing::info!(board_id = %board_id, node_id, "Node run started");

        Ok(Job {
            board_id,
            node_id: node_id.to_string(),
            kind,
        })
    }

    /// Perform a job. Touches no shared state.
    pub async fn execute(&self, job: &Job) -> Result<JobOutput, RuntimeError> {
        jobs::execute(job, self.generation.as_deref()).await
    }

    /// Write a job's result back and release the node.
    ///
    /// On success the image replaces the node's previous output; generator
    /// results are also published to the asset library. On failure the
    /// node keeps its previous output, records the error, and the error is
    /// returned as [`CoreError::GenerationFailed`].
    pub fn complete(
        &self,
        hierarchy: &mut BoardHierarchy,
        job: Job,
        result: Result<JobOutput, RuntimeError>,
    ) -> Result<ImageRef, RuntimeError> {
        self.release(job.board_id, &job.node_id);

        match result {
            Ok(output) => {
                let mut image = output.to_image_ref();
                let mode = match &job.kind {
                    JobKind::Generate(request) => {
                        let record = AssetRecord::new(
                            output.bytes.clone(),
                            output.mime_type.clone(),
                            request.prompt.clone(),
                        );
                        image = image.with_asset_id(record.id);
                        self.assets.notify_asset_created(record);
                        None
                    }
                    JobKind::Matte { mode, .. } => Some(*mode),
                };

                let written = image.clone();
                if let Err(e) = hierarchy.edit_node_in_board(job.board_id, &job.node_id, |data| {
                    store_result(data, written, mode)
                }) {
                    tracing::warn!(
                        error = %e,
                        node_id = %job.node_id,
                        "Node disappeared before its result arrived"
                    );
                }
                tracing::info!(
                    board_id = %job.board_id,
                    node_id = %job.node_id,
                    bytes = output.bytes.len(),
                    "Node run completed"
                );
                self.publish(
                    WorkspaceEvent::new(NODE_COMPLETED)
                        .with_board(job.board_id)
                        .with_node(job.node_id)
                        .with_payload(serde_json::json!({ "mimeType": output.mime_type })),
                );
                Ok(image)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    error = %e,
                    board_id = %job.board_id,
                    node_id = %job.node_id,
                    "Node run failed"
                );
                let stored = message.clone();
                if let Err(write_err) = hierarchy
                    .edit_node_in_board(job.board_id, &job.node_id, |data| store_error(data, stored))
                {
                    tracing::warn!(
                        error = %write_err,
                        node_id = %job.node_id,
                        "Could not record failure on node"
                    );
                }
                self.publish(
                    WorkspaceEvent::new(NODE_FAILED)
                        .with_board(job.board_id)
                        .with_node(job.node_id)
                        .with_payload(serde_json::json!({ "error": message })),
                );
                Err(CoreError::GenerationFailed(message).into())
            }
        }
    }

    /// Run a generator or post-process node start to finish.
    pub async fn trigger(
        &self,
        hierarchy: &mut BoardHierarchy,
        node_id: &str,
    ) -> Result<ImageRef, RuntimeError> {
        let job = self.begin(hierarchy, node_id)?;
        let result = self.execute(&job).await;
        self.complete(hierarchy, job, result)
    }

    /// Activate a node: board links open their board, runnable nodes run.
    pub async fn fire(
        &self,
        hierarchy: &mut BoardHierarchy,
        node_id: &str,
    ) -> Result<Firing, RuntimeError> {
        let is_link = hierarchy
            .graph()
            .node(node_id)
            .ok_or_else(|| CoreError::node_not_found(node_id))?
            .data
            .linked_board()
            .is_some();
        if is_link {
            return Ok(Firing::Navigated(hierarchy.open_board_link(node_id)?));
        }
        self.trigger(hierarchy, node_id).await.map(Firing::Produced)
    }

    fn publish(&self, event: WorkspaceEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

fn set_running(data: &mut NodeData, running: bool) {
    match data {
        NodeData::Generator(d) => {
            d.in_progress = running;
            if running {
                d.error = None;
            }
        }
        NodeData::PostProcess(d) => {
            d.in_progress = running;
            if running {
                d.error = None;
            }
        }
        _ => {}
    }
}

fn store_result(data: &mut NodeData, image: ImageRef, mode: Option<MattingMode>) {
    match data {
        NodeData::Generator(d) => {
            d.image = Some(image);
            d.error = None;
        }
        NodeData::PostProcess(d) => {
            d.image = Some(image);
            d.mode = mode;
            d.error = None;
        }
        _ => {}
    }
    set_running(data, false);
}

fn store_error(data: &mut NodeData, message: String) {
    match data {
        NodeData::Generator(d) => d.error = Some(message),
        NodeData::PostProcess(d) => d.error = Some(message),
        _ => {}
    }
    set_running(data, false);
}
