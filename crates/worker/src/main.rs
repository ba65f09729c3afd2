//! Headless atelier worker.
//!
//! Opens the workspace file, prints a summary, runs nodes of the open board,
//! or mattes a pair of renders from disk.
//!
//! Image bytes are not stored in the workspace file, so `run` reloads them
//! from disk with `--image <node-id>=<path>` before firing.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use atelier_core::canvas::NodeKind;
use atelier_core::hierarchy::BoardHierarchy;
use atelier_core::matte;
use atelier_core::node::ImageRef;
use atelier_core::persistence::PersistenceScheduler;
use atelier_events::{EventBus, JsonFileStore, RecentAssets};
use atelier_generation::{GenerationApi, GenerationService};
use atelier_pipeline::{Firing, NodeRuntime};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;

#[derive(Parser, Debug)]
#[command(name = "atelier-worker", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the open board, its breadcrumbs and its nodes.
    Summary,
    /// Matte a white-background and a black-background render into a PNG.
    Matte {
        white: PathBuf,
        black: PathBuf,
        out: PathBuf,
    },
    /// Fire a node on the open board and save the workspace.
    Run {
        node_id: String,
        /// Load an image file into a node of the open board first. Repeatable.
        #[arg(long = "image", value_name = "NODE=PATH", value_parser = parse_image_arg)]
        images: Vec<(String, PathBuf)>,
        /// Also write the produced image here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;

    match cli.cmd {
        Command::Summary => cmd_summary(&config),
        Command::Matte { white, black, out } => cmd_matte(&white, &black, &out).await,
        Command::Run {
            node_id,
            images,
            out,
        } => cmd_run(&config, &node_id, &images, out.as_deref()).await,
    }
}

fn open_workspace(config: &WorkerConfig) -> BoardHierarchy {
    tracing::info!(path = %config.workspace_path.display(), "Opening workspace");
    BoardHierarchy::open(
        Box::new(JsonFileStore::new(&config.workspace_path)),
        config.history(),
        PersistenceScheduler::new(config.persist_debounce),
    )
}

fn cmd_summary(config: &WorkerConfig) -> anyhow::Result<()> {
    let hierarchy = open_workspace(config);

    let trail: Vec<&str> = hierarchy
        .breadcrumbs()
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    println!("{}", trail.join(" / "));
    println!("boards: {}", hierarchy.board_count());

    let graph = hierarchy.graph();
    println!("nodes: {}  edges: {}", graph.node_count(), graph.edge_count());
    for kind in NodeKind::ALL {
        let count = graph.nodes().iter().filter(|n| n.kind() == *kind).count();
        if count > 0 {
            println!("  {:<15} {count}", kind.name());
        }
    }
    for child in hierarchy.child_boards(hierarchy.current_board_id()) {
        println!("  -> {} ({} nodes)", child.name, child.nodes.len());
    }
    Ok(())
}

async fn cmd_matte(white: &Path, black: &Path, out: &Path) -> anyhow::Result<()> {
    let white_bytes =
        std::fs::read(white).with_context(|| format!("read '{}'", white.display()))?;
    let black_bytes =
        std::fs::read(black).with_context(|| format!("read '{}'", black.display()))?;

    let png = tokio::task::spawn_blocking(move || matte::matte_encoded(&white_bytes, &black_bytes))
        .await??;
    write_output(out, &png)?;
    tracing::info!(out = %out.display(), bytes = png.len(), "Matte written");
    Ok(())
}

async fn cmd_run(
    config: &WorkerConfig,
    node_id: &str,
    images: &[(String, PathBuf)],
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let generation: Option<Arc<dyn GenerationService>> = match &config.generation {
        Some(api) => Some(Arc::new(GenerationApi::new(api.clone())?)),
        None => {
            tracing::warn!("GENERATION_API_URL is not set, only local processing is available");
            None
        }
    };

    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let assets = Arc::new(RecentAssets::new(config.recent_asset_limit).with_bus(bus.clone()));
    let runtime = NodeRuntime::new(generation, assets).with_bus(bus.clone());

    let mut hierarchy = open_workspace(config);
    for (target, path) in images {
        load_image(&mut hierarchy, target, path)?;
    }
    let outcome = runtime.fire(&mut hierarchy, node_id).await;
    bus.publish_all(hierarchy.take_events());
    if !hierarchy.save_now() {
        tracing::warn!("Workspace could not be saved");
    }

    while let Ok(event) = events.try_recv() {
        tracing::info!(
            event_type = %event.event_type,
            board_id = ?event.board_id,
            node_id = ?event.node_id,
            "Event"
        );
    }

    match outcome? {
        Firing::Navigated(board_id) => {
            tracing::info!(board_id = %board_id, "Opened linked board");
        }
        Firing::Produced(image) => {
            let bytes = image.bytes.as_deref().unwrap_or_default();
            tracing::info!(node_id, bytes = bytes.len(), mime_type = %image.mime_type, "Node produced an image");
            if let Some(out) = out {
                write_output(out, bytes)?;
            }
        }
    }
    Ok(())
}

fn parse_image_arg(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((node, path)) if !node.is_empty() && !path.is_empty() => {
            Ok((node.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NODE=PATH, got '{raw}'")),
    }
}

/// Put the bytes of `path` into the image held by `node_id` on the open board.
fn load_image(hierarchy: &mut BoardHierarchy, node_id: &str, path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("read '{}'", path.display()))?;
    let mime_type = matte::sniff_mime_type(&bytes)
        .with_context(|| format!("'{}' is not a supported image", path.display()))?;

    let mut held_image = true;
    let board_id = hierarchy.current_board_id();
    hierarchy.edit_node_in_board(board_id, node_id, |data| match data.image_slot_mut() {
        Some(Some(image)) => image.reload(bytes, mime_type),
        Some(slot) => *slot = Some(ImageRef::from_bytes(bytes, mime_type)),
        None => held_image = false,
    })?;
    anyhow::ensure!(held_image, "node {node_id} cannot hold an image");

    tracing::info!(node_id, path = %path.display(), mime_type, "Loaded image");
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write '{}'", path.display()))
}
