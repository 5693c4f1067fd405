use std::collections::HashMap;

use ghostbot_contracts::color::Color;
use ghostbot_contracts::grid::{BoundingBox, GridCoordinate, PixelSample};
use tracing::{debug, warn};

use crate::api::{TileRequest, TileSource};
use crate::error::EngineResult;
use crate::tiles::decode_tile;

/// Last-known server color per coordinate. Grows for the whole session and
/// is only ever cleared by a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanvasCache {
    pixels: HashMap<GridCoordinate, Color>,
}

impl CanvasCache {
    pub fn get(&self, coord: &GridCoordinate) -> Option<Color> {
        self.pixels.get(coord).copied()
    }

    pub fn insert(&mut self, sample: PixelSample) {
        self.pixels.insert(sample.coord, sample.color);
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Cache, freshness cursor and reload generation, owned by one bot.
#[derive(Debug, Clone, Default)]
pub struct CanvasState {
    cache: CanvasCache,
    cursor: i64,
    generation: u64,
}

/// Decoded result of one sync pass, not yet applied to a cache.
#[derive(Debug, Clone, Default)]
pub struct CanvasDelta {
    pub samples: Vec<PixelSample>,
    pub server_timestamp: Option<i64>,
    pub tiles_requested: usize,
    pub tiles_applied: usize,
    pub tiles_skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tiles_requested: usize,
    pub tiles_applied: usize,
    pub tiles_skipped: usize,
    pub pixels_written: usize,
    pub cursor: i64,
}

impl CanvasState {
    pub fn cache(&self) -> &CanvasCache {
        &self.cache
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops everything known about the canvas and starts a new generation.
    pub fn reset(&mut self) {
        self.cache = CanvasCache::default();
        self.cursor = 0;
        self.generation += 1;
    }

    pub fn apply(&mut self, delta: CanvasDelta) -> SyncReport {
        let pixels_written = delta.samples.len();
        for sample in delta.samples {
            self.cache.insert(sample);
        }
        if let Some(timestamp) = delta.server_timestamp {
            self.cursor = self.cursor.max(timestamp);
        }
        SyncReport {
            tiles_requested: delta.tiles_requested,
            tiles_applied: delta.tiles_applied,
            tiles_skipped: delta.tiles_skipped,
            pixels_written,
            cursor: self.cursor,
        }
    }
}

/// Everything that changed since `since` in the tiles covering `target`.
/// An empty target needs no tiles and touches no network.
pub fn fetch_target_delta(
    source: &dyn TileSource,
    target: &[PixelSample],
    tile_size: i64,
    tiles_per_request: usize,
    since: i64,
) -> EngineResult<CanvasDelta> {
    let Some(bounds) = BoundingBox::of(target) else {
        return Ok(CanvasDelta::default());
    };
    let requests = plan_tile_requests(&bounds, tile_size, since);
    fetch_canvas_delta(source, &requests, tiles_per_request)
}

pub fn plan_tile_requests(bounds: &BoundingBox, tile_size: i64, since: i64) -> Vec<TileRequest> {
    bounds
        .tile_origins(tile_size)
        .into_iter()
        .map(|origin| TileRequest { origin, since })
        .collect()
}

/// Requests tiles in bounded batches and decodes every response. A tile whose
/// bitmap cannot be decoded is logged and skipped; transport errors abort.
pub fn fetch_canvas_delta(
    source: &dyn TileSource,
    requests: &[TileRequest],
    tiles_per_request: usize,
) -> EngineResult<CanvasDelta> {
    let mut delta = CanvasDelta {
        tiles_requested: requests.len(),
        ..CanvasDelta::default()
    };
    for chunk in requests.chunks(tiles_per_request.max(1)) {
        let batch = source.fetch_tiles(chunk)?;
        if let Some(timestamp) = batch.server_timestamp {
            delta.server_timestamp = Some(delta.server_timestamp.unwrap_or(timestamp).max(timestamp));
        }
        for update in &batch.tiles {
            match decode_tile(update) {
                Ok(samples) => {
                    delta.tiles_applied += 1;
                    delta.samples.extend(samples);
                }
                Err(err) => {
                    delta.tiles_skipped += 1;
                    warn!("skipping tile: {err}");
                }
            }
        }
    }
    debug!(
        tiles = delta.tiles_requested,
        pixels = delta.samples.len(),
        "canvas delta fetched"
    );
    Ok(delta)
}
