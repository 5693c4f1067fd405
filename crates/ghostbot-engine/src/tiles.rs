use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ghostbot_contracts::color::Color;
use ghostbot_contracts::grid::{anchor_rgba_buffer, GridCoordinate, PixelSample};

use crate::api::{TileRecord, TileUpdate};
use crate::error::{EngineError, EngineResult};

/// Decodes one server tile into absolute pixel samples.
pub fn decode_tile(update: &TileUpdate) -> EngineResult<Vec<PixelSample>> {
    match &update.record {
        TileRecord::Delta(pixels) => Ok(pixels
            .iter()
            .map(|pixel| PixelSample::new(pixel.coord, Color::from_id(pixel.color)))
            .collect()),
        TileRecord::Full { color_webp } => {
            let Some(origin) = update.origin else {
                return Err(EngineError::TileDecode {
                    tile: None,
                    reason: "full tile without an origin".to_string(),
                });
            };
            decode_full_tile(color_webp, origin)
        }
    }
}

/// Full tiles arrive bottom row first. The bitmap is flipped so that it reads
/// top-down, then anchored at the tile's highest row.
pub fn decode_full_tile(encoded: &str, origin: GridCoordinate) -> EngineResult<Vec<PixelSample>> {
    let decode_err = |reason: String| EngineError::TileDecode {
        tile: Some(origin),
        reason,
    };
    let payload = strip_data_url(encoded.trim());
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| decode_err(format!("invalid base64: {err}")))?;
    let bitmap = image::load_from_memory(&bytes)
        .map_err(|err| decode_err(format!("invalid bitmap: {err}")))?
        .to_rgba8();
    let (width, height) = bitmap.dimensions();
    if width == 0 || height == 0 {
        return Err(decode_err("empty bitmap".to_string()));
    }

    let flipped = image::imageops::flip_vertical(&bitmap);
    let top_left = GridCoordinate::new(origin.x, origin.y + i64::from(height) - 1);
    Ok(anchor_rgba_buffer(flipped.as_raw(), width, top_left).collect())
}

fn strip_data_url(value: &str) -> &str {
    match value.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => value,
    }
}
