//! In-memory asset library fed by generator runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use atelier_core::assets::{AssetRecord, AssetSink};

use crate::bus::{EventBus, WorkspaceEvent, ASSET_CREATED};

/// Default number of assets kept.
pub const DEFAULT_RECENT_ASSET_LIMIT: usize = 12;

/// Keeps the most recent `limit` assets, newest first, and announces each
/// one on the bus when attached.
pub struct RecentAssets {
    limit: usize,
    records: Mutex<VecDeque<AssetRecord>>,
    bus: Option<Arc<EventBus>>,
}

impl RecentAssets {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: Mutex::new(VecDeque::new()),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Snapshot of the kept assets, newest first.
    pub fn recent(&self) -> Vec<AssetRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentAssets {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_ASSET_LIMIT)
    }
}

impl AssetSink for RecentAssets {
    fn notify_asset_created(&self, asset: AssetRecord) {
        tracing::info!(
            asset_id = %asset.id,
            bytes = asset.image_bytes.len(),
            mime_type = %asset.mime_type,
            "Asset created"
        );
        if let Some(bus) = &self.bus {
            bus.publish(WorkspaceEvent::new(ASSET_CREATED).with_payload(serde_json::json!({
                "assetId": asset.id,
                "mimeType": asset.mime_type,
                "sourcePrompt": asset.source_prompt,
                "timestamp": asset.timestamp,
            })));
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_front(asset);
        records.truncate(self.limit);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(prompt: &str) -> AssetRecord {
        AssetRecord::new(Arc::from(vec![1u8, 2, 3]), "image/png", prompt)
    }

    #[test]
    fn keeps_newest_first_within_limit() {
        let sink = RecentAssets::new(2);
        sink.notify_asset_created(asset("one"));
        sink.notify_asset_created(asset("two"));
        sink.notify_asset_created(asset("three"));

        let prompts: Vec<String> = sink.recent().into_iter().map(|a| a.source_prompt).collect();
        assert_eq!(prompts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn announces_assets_on_the_bus() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let sink = RecentAssets::default().with_bus(bus);

        let record = asset("a fox, watercolor");
        let id = record.id;
        sink.notify_asset_created(record);

        let event = rx.recv().await.expect("should receive asset event");
        assert_eq!(event.event_type, ASSET_CREATED);
        assert_eq!(event.payload["assetId"], id.to_string());
        assert_eq!(event.payload["sourcePrompt"], "a fox, watercolor");
    }
}
