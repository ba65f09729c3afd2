//! Integration tests for [`NodeRuntime`] against a scripted generation
//! service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use atelier_core::canvas::{handles, NodeKind};
use atelier_core::error::CoreError;
use atelier_core::history::HistoryConfig;
use atelier_core::hierarchy::BoardHierarchy;
use atelier_core::matte::{decode_rgba, encode_png};
use atelier_core::node::{
    GeneratorData, ImageData, ImageRef, MattingMode, NewEdge, NodeData, Position,
    PromptBuilderData, ReferenceData,
};
use atelier_core::persistence::{MemoryStore, PersistenceScheduler};
use atelier_events::RecentAssets;
use atelier_generation::{GeneratedImage, GenerationError, GenerationRequest, GenerationService};
use atelier_pipeline::jobs::{BLACK_BACKGROUND_PROMPT, WHITE_BACKGROUND_PROMPT};
use atelier_pipeline::{Firing, NodeRuntime, RuntimeError};
use image::{Rgba, RgbaImage};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

type Reply = Result<Vec<u8>, u16>;

/// Replies from a queue and records every request it receives.
#[derive(Default)]
struct ScriptedService {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    credential: bool,
}

impl ScriptedService {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
            credential: true,
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(bytes)) => Ok(GeneratedImage {
                bytes: bytes.into(),
                mime_type: "image/png".into(),
            }),
            Some(Err(status)) => Err(GenerationError::ApiError {
                status,
                body: "upstream unavailable".into(),
            }),
            None => Err(GenerationError::InvalidResponse("no scripted reply".into())),
        }
    }

    fn has_credential(&self) -> bool {
        self.credential
    }
}

fn png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(w, h, Rgba(rgba))).unwrap()
}

fn hierarchy() -> BoardHierarchy {
    BoardHierarchy::open(
        Box::new(MemoryStore::new()),
        HistoryConfig::default(),
        PersistenceScheduler::default(),
    )
}

fn runtime(service: Option<Arc<ScriptedService>>, assets: Arc<RecentAssets>) -> NodeRuntime {
    NodeRuntime::new(
        service.map(|s| s as Arc<dyn GenerationService>),
        assets,
    )
}

fn add(h: &mut BoardHierarchy, data: NodeData) -> String {
    h.edit(|g| g.add_node(data, Position::default())).unwrap()
}

fn connect(h: &mut BoardHierarchy, source: &str, sh: &str, target: &str, th: &str) {
    h.edit(|g| g.add_edge(NewEdge::new(source, sh, target, th)))
        .unwrap();
}

fn fragment(text: &str) -> NodeData {
    NodeData::PromptBuilder(PromptBuilderData {
        free_text: text.into(),
        selections: Vec::new(),
    })
}

fn generator_data(h: &BoardHierarchy, node_id: &str) -> GeneratorData {
    match &h.graph().node(node_id).unwrap().data {
        NodeData::Generator(data) => data.clone(),
        other => panic!("expected generator, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: generator runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_fragments_reach_the_service_as_one_prompt() {
    let service = ScriptedService::new(vec![Ok(png(1, 1, [9, 9, 9, 255]))]);
    let assets = Arc::new(RecentAssets::default());
    let rt = runtime(Some(service.clone()), assets.clone());
    let mut h = hierarchy();

    let generator = h
        .edit(|g| g.add_node_of_kind(NodeKind::Generator, Position::default()))
        .unwrap();
    let first = add(&mut h, fragment("a lighthouse"));
    let second = add(&mut h, fragment("stormy sea"));
    connect(&mut h, &first, handles::PROMPT, &generator, handles::PROMPT);
    connect(&mut h, &second, handles::PROMPT, &generator, handles::PROMPT);

    let image = rt.trigger(&mut h, &generator).await.unwrap();

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "a lighthouse, stormy sea");

    let data = generator_data(&h, &generator);
    assert_eq!(data.image.as_ref(), Some(&image));
    assert!(!data.in_progress);
    assert!(data.error.is_none());

    let recent = assets.recent();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].source_prompt, "a lighthouse, stormy sea");
    assert_eq!(image.asset_id, Some(recent[0].id));
}

#[tokio::test]
async fn second_trigger_while_running_is_rejected() {
    let service = ScriptedService::new(vec![Ok(png(1, 1, [0, 0, 0, 255]))]);
    let rt = runtime(Some(service.clone()), Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let generator = add(
        &mut h,
        NodeData::Generator(GeneratorData {
            prompt: "a cat".into(),
            ..Default::default()
        }),
    );

    let job = rt.begin(&mut h, &generator).unwrap();
    assert!(generator_data(&h, &generator).in_progress);

    let err = rt.begin(&mut h, &generator).unwrap_err();
    assert!(err.is_already_in_progress());
    assert_matches!(rt.trigger(&mut h, &generator).await, Err(RuntimeError::Core(CoreError::AlreadyInProgress(_))));

    let result = rt.execute(&job).await;
    rt.complete(&mut h, job, result).unwrap();
    assert!(!rt.is_in_flight(h.current_board_id(), &generator));
    assert_eq!(service.requests().len(), 1);
}

#[tokio::test]
async fn failure_is_recorded_on_node_and_prior_image_kept() {
    let service = ScriptedService::new(vec![Err(503), Ok(png(1, 1, [1, 2, 3, 255]))]);
    let rt = runtime(Some(service), Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let previous = ImageRef::from_bytes(vec![7u8; 3], "image/png");
    let generator = add(
        &mut h,
        NodeData::Generator(GeneratorData {
            prompt: "a cat".into(),
            image: Some(previous.clone()),
            ..Default::default()
        }),
    );

    let err = rt.trigger(&mut h, &generator).await.unwrap_err();
    assert_matches!(err, RuntimeError::Core(CoreError::GenerationFailed(ref msg)) if msg.contains("503"));

    let data = generator_data(&h, &generator);
    assert_eq!(data.image, Some(previous));
    assert!(data.error.as_deref().is_some_and(|e| e.contains("503")));
    assert!(!data.in_progress);

    // The node stays usable.
    rt.trigger(&mut h, &generator).await.unwrap();
    assert!(generator_data(&h, &generator).error.is_none());
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_any_call() {
    let service = ScriptedService::new(vec![]);
    let rt = runtime(Some(service.clone()), Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let generator = h
        .edit(|g| g.add_node_of_kind(NodeKind::Generator, Position::default()))
        .unwrap();

    assert_matches!(
        rt.trigger(&mut h, &generator).await,
        Err(RuntimeError::Core(CoreError::Validation(_)))
    );
    assert!(service.requests().is_empty());
    assert!(!rt.is_in_flight(h.current_board_id(), &generator));
}

#[tokio::test]
async fn unloaded_reference_is_rejected_before_any_call() {
    let service = ScriptedService::new(vec![Ok(png(1, 1, [9, 9, 9, 255]))]);
    let rt = runtime(Some(service.clone()), Arc::new(RecentAssets::default()));
    let mut h = hierarchy();

    let generator = add(
        &mut h,
        NodeData::Generator(GeneratorData {
            prompt: "a knight".into(),
            ..Default::default()
        }),
    );
    // Bytes are not persisted, so a reopened reference carries only metadata.
    let reference = add(
        &mut h,
        NodeData::Reference(ReferenceData {
            image: Some(ImageRef {
                mime_type: "image/png".into(),
                ..Default::default()
            }),
            strength: 1.0,
            qualifiers: vec!["pose".into()],
        }),
    );
    connect(&mut h, &reference, handles::REFERENCE, &generator, handles::POSE);

    assert_matches!(
        rt.trigger(&mut h, &generator).await,
        Err(RuntimeError::Core(CoreError::Validation(message))) if message.contains("not loaded")
    );
    assert!(service.requests().is_empty());
    assert!(!rt.is_in_flight(h.current_board_id(), &generator));
    assert!(!generator_data(&h, &generator).in_progress);
}

#[tokio::test]
async fn result_lands_on_origin_board_after_navigation() {
    let service = ScriptedService::new(vec![Ok(png(1, 1, [4, 4, 4, 255]))]);
    let rt = runtime(Some(service), Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let root = h.current_board_id();
    let child = h.create_child_board(root, "Elsewhere").unwrap();
    let generator = add(
        &mut h,
        NodeData::Generator(GeneratorData {
            prompt: "a cat".into(),
            ..Default::default()
        }),
    );

    let job = rt.begin(&mut h, &generator).unwrap();
    h.navigate_to(child).unwrap();
    let result = rt.execute(&job).await;
    rt.complete(&mut h, job, result).unwrap();

    h.navigate_to(root).unwrap();
    let data = generator_data(&h, &generator);
    assert!(data.image.is_some());
    assert!(!data.in_progress);
}

// ---------------------------------------------------------------------------
// Test: post-processing
// ---------------------------------------------------------------------------

fn post_process_graph(h: &mut BoardHierarchy, source: Vec<u8>) -> String {
    let image = add(
        h,
        NodeData::Image(ImageData {
            image: Some(ImageRef::from_bytes(source, "image/png")),
            caption: String::new(),
        }),
    );
    let post = h
        .edit(|g| g.add_node_of_kind(NodeKind::PostProcess, Position::default()))
        .unwrap();
    connect(h, &image, handles::IMAGE, &post, handles::IMAGE);
    post
}

#[tokio::test]
async fn fast_path_without_credential() {
    let rt = runtime(None, Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let mut source = RgbaImage::from_pixel(2, 1, Rgba([255, 255, 255, 255]));
    source.put_pixel(1, 0, Rgba([20, 30, 40, 255]));
    let post = post_process_graph(&mut h, encode_png(&source).unwrap());

    let image = rt.trigger(&mut h, &post).await.unwrap();
    let out = decode_rgba(image.bytes.as_deref().unwrap()).unwrap();
    assert_eq!(out.get_pixel(0, 0).0[3], 0);
    assert_eq!(out.get_pixel(1, 0).0, [20, 30, 40, 255]);

    match &h.graph().node(&post).unwrap().data {
        NodeData::PostProcess(data) => assert_eq!(data.mode, Some(MattingMode::Threshold)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn accurate_path_chains_two_renders_then_mattes() {
    let white = png(2, 2, [255, 255, 255, 255]);
    let black = png(2, 2, [0, 0, 0, 255]);
    let service = ScriptedService::new(vec![Ok(white.clone()), Ok(black)]);
    let assets = Arc::new(RecentAssets::default());
    let rt = runtime(Some(service.clone()), assets.clone());
    let mut h = hierarchy();
    let source = png(2, 2, [120, 60, 30, 255]);
    let post = post_process_graph(&mut h, source.clone());

    let image = rt.trigger(&mut h, &post).await.unwrap();

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].prompt, WHITE_BACKGROUND_PROMPT);
    assert_eq!(&requests[0].reference_images[0].bytes[..], &source[..]);
    assert_eq!(requests[1].prompt, BLACK_BACKGROUND_PROMPT);
    assert_eq!(&requests[1].reference_images[0].bytes[..], &white[..]);

    let out = decode_rgba(image.bytes.as_deref().unwrap()).unwrap();
    assert!(out.pixels().all(|p| p.0[3] == 0));
    assert!(assets.is_empty());
}

#[tokio::test]
async fn post_process_without_source_is_rejected() {
    let rt = runtime(None, Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let post = h
        .edit(|g| g.add_node_of_kind(NodeKind::PostProcess, Position::default()))
        .unwrap();
    assert_matches!(
        rt.trigger(&mut h, &post).await,
        Err(RuntimeError::Core(CoreError::Validation(_)))
    );
}

// ---------------------------------------------------------------------------
// Test: activation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn firing_a_board_link_navigates() {
    let rt = runtime(None, Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let root = h.current_board_id();
    let child = h.create_child_board(root, "Child").unwrap();
    let link = h.graph().nodes()[0].id.clone();

    assert_eq!(rt.fire(&mut h, &link).await.unwrap(), Firing::Navigated(child));
    assert_eq!(h.current_board_id(), child);
}

#[tokio::test]
async fn firing_a_note_is_rejected() {
    let rt = runtime(None, Arc::new(RecentAssets::default()));
    let mut h = hierarchy();
    let note = h
        .edit(|g| g.add_node_of_kind(NodeKind::Note, Position::default()))
        .unwrap();
    assert_matches!(
        rt.fire(&mut h, &note).await,
        Err(RuntimeError::Core(CoreError::Validation(_)))
    );
}
