//! The memory archive: in-memory renderable memories backed by the store.
//!
//! Hydration builds every memory from its thumbnail only. The
//! full-resolution asset is fetched lazily by [`MemoryArchive::ensure_high_res`]
//! when the carousel selects an item. Per item:
//!
//! ```text
//! thumbnail-only --[upgrade ok]-----> full resolution
//! thumbnail-only --[upgrade failed]-> degraded (thumbnail for the session)
//! ```
//!
//! The item list lives behind a `parking_lot` mutex that is never held across
//! an `.await`. Results of a suspended fetch are applied by id, since the item
//! may have moved while the fetch was in flight.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::persistence::AssetSource;
use crate::render::{ParamSink, RenderParameterController, Texture, TextureTier, Uniform, VisualParams};
use crate::types::{
    Asset, AssetKeys, Blob, DiaryCard, Dimensions, EffectSettings, MemoryId, MemoryPayload,
    MemoryRecord, SCHEMA_VERSION,
};

// ---------------------------------------------------------------------------
// RenderableMemory
// ---------------------------------------------------------------------------

/// A hydrated memory: its record plus the visual handed to the renderer.
#[derive(Debug, Clone)]
pub struct RenderableMemory {
    /// Record id.
    pub id: MemoryId,
    /// The persisted record.
    pub record: MemoryRecord,
    /// Uniforms and texture read by the renderer.
    pub visual: Arc<VisualParams>,
    has_high_res: bool,
    render_loading: bool,
    degraded: bool,
}

impl RenderableMemory {
    /// Wrap a record and its visual.
    #[must_use]
    pub fn new(record: MemoryRecord, visual: Arc<VisualParams>, has_high_res: bool) -> Self {
        Self {
            id: record.id,
            record,
            visual,
            has_high_res,
            render_loading: false,
            degraded: false,
        }
    }

    /// Build a memory whose texture is `asset` at the given tier.
    #[must_use]
    pub fn from_asset(record: MemoryRecord, asset: Asset, tier: TextureTier, pixel_ratio: f32) -> Self {
        let visual = VisualParams::from_snapshot(&record.settings_snapshot, pixel_ratio);
        visual.set_seed(record.id.seed());
        visual.set_texture(texture_from(asset, tier), record.dimensions);
        Self::new(record, Arc::new(visual), tier == TextureTier::Full)
    }

    /// Whether the full-resolution texture is bound.
    #[must_use]
    pub fn has_high_res(&self) -> bool {
        self.has_high_res
    }

    /// Whether an upgrade is in flight.
    #[must_use]
    pub fn render_loading(&self) -> bool {
        self.render_loading
    }
}

fn texture_from(asset: Asset, tier: TextureTier) -> Texture {
    Texture {
        key: asset.key,
        mime: asset.mime,
        tier,
        bytes: Arc::from(asset.blob),
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Where [`MemoryArchive::add_memory`] puts an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Front of the list (new archives, newest first).
    Prepend,
    /// Back of the list (hydration order).
    Append,
}

/// Counts from one hydration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HydrationReport {
    /// Memories now in the archive.
    pub loaded: usize,
    /// Records skipped for carrying another schema version.
    pub skipped_schema: usize,
    /// Records skipped because their thumbnail was missing or unreadable.
    pub skipped_missing: usize,
    /// Rows that could not be decoded.
    pub skipped_corrupt: usize,
}

/// Result of [`MemoryArchive::ensure_high_res`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The full-resolution texture was bound by this call.
    Upgraded,
    /// Nothing to do.
    AlreadyHighRes,
    /// Another call is fetching it.
    InFlight,
    /// The asset is missing or failed to load; the item stays at thumbnail.
    Degraded,
    /// No item at that index.
    OutOfRange,
}

/// Everything needed to archive a fresh memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    /// Low-resolution image.
    pub thumb: Blob,
    /// Full-resolution image.
    pub render: Blob,
    /// Size of `render`.
    pub dimensions: Dimensions,
    /// Effect settings at archive time.
    pub settings: EffectSettings,
    /// Generated diary card.
    pub diary_card: Option<DiaryCard>,
    /// Conversation log.
    pub transcript: Option<String>,
}

// ---------------------------------------------------------------------------
// MemoryArchive
// ---------------------------------------------------------------------------

/// Ordered collection of renderable memories (newest first).
pub struct MemoryArchive<S> {
    source: S,
    controller: Arc<RenderParameterController>,
    items: Mutex<Vec<RenderableMemory>>,
    pixel_ratio: f32,
}

impl<S> std::fmt::Debug for MemoryArchive<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArchive")
            .field("len", &self.items.lock().len())
            .field("pixel_ratio", &self.pixel_ratio)
            .finish_non_exhaustive()
    }
}

impl<S: AssetSource> MemoryArchive<S> {
    /// Create an empty archive over `source`.
    #[must_use]
    pub fn new(source: S, controller: Arc<RenderParameterController>, pixel_ratio: f32) -> Self {
        Self {
            source,
            controller,
            items: Mutex::new(Vec::new()),
            pixel_ratio,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The controller every visual is registered with.
    #[must_use]
    pub fn controller(&self) -> &Arc<RenderParameterController> {
        &self.controller
    }

    /// Load every stored record, building each memory from its thumbnail.
    ///
    /// Never fails: a store read error ends hydration with what was loaded,
    /// and per-record problems skip only that record. Yields to the runtime
    /// between records.
    pub async fn hydrate(&self) -> HydrationReport {
        let start = Instant::now();
        let mut report = HydrationReport::default();

        let cursor = match self.source.load_memories().await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "Could not read memories; starting empty");
                return report;
            }
        };

        for row in cursor {
            let record = match row {
                Ok(record) => record,
                Err(ArchiveError::SchemaMismatch { id, found, expected }) => {
                    warn!(id = %id, found, expected, "Skipping memory from another schema");
                    report.skipped_schema += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable memory");
                    report.skipped_corrupt += 1;
                    continue;
                }
            };

            if !record.is_current_schema() {
                warn!(
                    id = %record.id,
                    found = record.schema_version,
                    expected = SCHEMA_VERSION,
                    "Skipping memory from another schema"
                );
                report.skipped_schema += 1;
                continue;
            }

            let Some(asset) = self.fetch_thumb(&record).await else {
                report.skipped_missing += 1;
                continue;
            };

            let renderable =
                RenderableMemory::from_asset(record, asset, TextureTier::Thumbnail, self.pixel_ratio);
            self.controller.register(renderable.visual.clone());
            self.add_memory(renderable, Placement::Append);
            report.loaded += 1;

            tokio::task::yield_now().await;
        }

        info!(
            loaded = report.loaded,
            skipped_schema = report.skipped_schema,
            skipped_missing = report.skipped_missing,
            skipped_corrupt = report.skipped_corrupt,
            elapsed_ms = start.elapsed().as_millis(),
            "Archive hydrated"
        );
        report
    }

    async fn fetch_thumb(&self, record: &MemoryRecord) -> Option<Asset> {
        let key = &record.assets.thumb_key;
        if key.is_empty() {
            warn!(id = %record.id, "Memory has no thumbnail key; skipping");
            return None;
        }
        match self.source.load_asset(key).await {
            Ok(Some(asset)) => Some(asset),
            Ok(None) => {
                warn!(id = %record.id, key = %key, "Thumbnail asset missing; skipping");
                None
            }
            Err(e) => {
                warn!(id = %record.id, key = %key, error = %e, "Failed to load thumbnail; skipping");
                None
            }
        }
    }

    /// Insert an already built memory. Returns its index.
    pub fn add_memory(&self, renderable: RenderableMemory, placement: Placement) -> usize {
        let mut items = self.items.lock();
        match placement {
            Placement::Prepend => {
                items.insert(0, renderable);
                0
            }
            Placement::Append => {
                items.push(renderable);
                items.len() - 1
            }
        }
    }

    /// Make sure item `index` shows its full-resolution texture.
    ///
    /// At most one fetch per item is ever in flight. A failed upgrade is
    /// final for the session.
    pub async fn ensure_high_res(&self, index: usize) -> UpgradeOutcome {
        let (id, render_key) = {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(index) else {
                return UpgradeOutcome::OutOfRange;
            };
            if item.has_high_res {
                return UpgradeOutcome::AlreadyHighRes;
            }
            if item.render_loading {
                return UpgradeOutcome::InFlight;
            }
            if item.degraded {
                return UpgradeOutcome::Degraded;
            }
            item.render_loading = true;
            (item.id, item.record.assets.render_key.clone())
        };

        let start = Instant::now();
        let fetched = if render_key.is_empty() {
            Ok(None)
        } else {
            self.source.load_asset(&render_key).await
        };

        let mut items = self.items.lock();
        let Some(item) = items.iter_mut().find(|m| m.id == id) else {
            debug!(id = %id, "Memory gone before its render asset arrived");
            return UpgradeOutcome::Degraded;
        };
        item.render_loading = false;

        match fetched {
            Ok(Some(asset)) => {
                let dimensions = item.record.dimensions;
                item.visual
                    .set_texture(texture_from(asset, TextureTier::Full), dimensions);
                item.has_high_res = true;
                debug!(
                    id = %id,
                    elapsed_us = start.elapsed().as_micros(),
                    "Upgraded to full resolution"
                );
                UpgradeOutcome::Upgraded
            }
            Ok(None) => {
                warn!(id = %id, key = %render_key, "Render asset missing; staying at thumbnail");
                item.degraded = true;
                UpgradeOutcome::Degraded
            }
            Err(e) => {
                warn!(id = %id, key = %render_key, error = %e, "Render asset failed to load; staying at thumbnail");
                item.degraded = true;
                UpgradeOutcome::Degraded
            }
        }
    }

    /// Build the record for a new memory. Pure.
    ///
    /// A missing diary becomes a stub card dated `created_at`.
    #[must_use]
    pub fn serialize_new_memory(
        id: MemoryId,
        dimensions: Dimensions,
        settings_snapshot: EffectSettings,
        diary_card: Option<DiaryCard>,
        transcript: Option<String>,
        created_at: DateTime<Utc>,
    ) -> MemoryRecord {
        MemoryRecord {
            id,
            created_at,
            schema_version: SCHEMA_VERSION,
            assets: AssetKeys::for_id(&id),
            settings_snapshot,
            dimensions,
            diary_card: Some(diary_card.unwrap_or_else(|| DiaryCard::stub(created_at))),
            transcript,
        }
    }

    /// Persist a new memory and put it at the front of the archive.
    ///
    /// The memory starts at full resolution since the render image is
    /// already in hand.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing is added to the archive in that case.
    pub async fn archive_new(&self, memory: NewMemory) -> Result<MemoryRecord> {
        let record = Self::serialize_new_memory(
            MemoryId::new(),
            memory.dimensions,
            memory.settings,
            memory.diary_card,
            memory.transcript,
            Utc::now(),
        );

        let render = memory.render.clone();
        self.source
            .store_memory(record.clone(), MemoryPayload::new(memory.thumb, memory.render))
            .await?;

        let asset = Asset {
            key: record.assets.render_key.clone(),
            mime: render.mime,
            blob: render.bytes,
        };
        let renderable =
            RenderableMemory::from_asset(record.clone(), asset, TextureTier::Full, self.pixel_ratio);
        self.controller.register(renderable.visual.clone());
        self.add_memory(renderable, Placement::Prepend);

        info!(id = %record.id, "Memory archived");
        Ok(record)
    }

    /// Write the time uniform, phase-shifted per item.
    pub fn advance_time(&self, t: f32) {
        for (i, item) in self.items.lock().iter().enumerate() {
            item.visual.set_uniform(Uniform::Time, t + i as f32 * 10.0);
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of memories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the archive is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Ids in display order.
    #[must_use]
    pub fn ids(&self) -> Vec<MemoryId> {
        self.items.lock().iter().map(|m| m.id).collect()
    }

    /// Record at `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<MemoryRecord> {
        self.items.lock().get(index).map(|m| m.record.clone())
    }

    /// Visual at `index`.
    #[must_use]
    pub fn visual(&self, index: usize) -> Option<Arc<VisualParams>> {
        self.items.lock().get(index).map(|m| m.visual.clone())
    }

    /// Whether item `index` has its full-resolution texture.
    #[must_use]
    pub fn has_high_res(&self, index: usize) -> bool {
        self.items.lock().get(index).is_some_and(|m| m.has_high_res)
    }

    /// All visuals in display order.
    #[must_use]
    pub fn visuals(&self) -> Vec<Arc<VisualParams>> {
        self.items.lock().iter().map(|m| m.visual.clone()).collect()
    }
}
