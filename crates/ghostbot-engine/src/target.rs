use std::collections::HashSet;

use ghostbot_contracts::color::{free_color_ids, Color, ColorId};
use ghostbot_contracts::grid::{anchor_rgba_buffer, PixelSample};
use serde::Serialize;

use crate::api::GhostImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterPolicy {
    pub include_transparent: bool,
    pub include_free_colors: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            include_transparent: false,
            include_free_colors: true,
        }
    }
}

/// Pixels the bot wants on the canvas, in source row-major order. Built once
/// per reload and never edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPixelSet {
    pixels: Vec<PixelSample>,
}

impl TargetPixelSet {
    pub fn pixels(&self) -> &[PixelSample] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Every pixel of the image on the grid, unfiltered.
pub fn extract_all(image: &GhostImage) -> Vec<PixelSample> {
    anchor_rgba_buffer(image.pixels.as_raw(), image.pixels.width(), image.top_left).collect()
}

pub fn build_target(
    image: &GhostImage,
    allowed: &[Color],
    policy: FilterPolicy,
    ignored: &HashSet<ColorId>,
) -> TargetPixelSet {
    let allowed: HashSet<ColorId> = allowed.iter().map(Color::id).collect();
    let free: HashSet<ColorId> = free_color_ids().into_iter().collect();
    let pixels = extract_all(image)
        .into_iter()
        .filter(|sample| {
            let id = sample.color.id();
            (policy.include_transparent || sample.color.a > 0)
                && (policy.include_free_colors || !free.contains(&id))
                && allowed.contains(&id)
                && !ignored.contains(&id)
        })
        .collect();
    TargetPixelSet { pixels }
}
