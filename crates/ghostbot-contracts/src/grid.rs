use std::fmt;

use crate::color::Color;

/// Absolute position on the shared canvas. Y grows upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoordinate {
    pub x: i64,
    pub y: i64,
}

impl GridCoordinate {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Top-left corner of the tile holding this coordinate.
    pub fn tile_origin(&self, tile_size: i64) -> Self {
        Self {
            x: self.x.div_euclid(tile_size) * tile_size,
            y: self.y.div_euclid(tile_size) * tile_size,
        }
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelSample {
    pub coord: GridCoordinate,
    pub color: Color,
}

impl PixelSample {
    pub const fn new(coord: GridCoordinate, color: Color) -> Self {
        Self { coord, color }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min: GridCoordinate,
    pub max: GridCoordinate,
}

impl BoundingBox {
    pub fn of<'a>(samples: impl IntoIterator<Item = &'a PixelSample>) -> Option<Self> {
        let mut iter = samples.into_iter();
        let first = iter.next()?.coord;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for sample in iter {
            bounds.min.x = bounds.min.x.min(sample.coord.x);
            bounds.min.y = bounds.min.y.min(sample.coord.y);
            bounds.max.x = bounds.max.x.max(sample.coord.x);
            bounds.max.y = bounds.max.y.max(sample.coord.y);
        }
        Some(bounds)
    }

    /// Origins of every tile intersecting the box, column-major like the
    /// server's own tile walk.
    pub fn tile_origins(&self, tile_size: i64) -> Vec<GridCoordinate> {
        let low = self.min.tile_origin(tile_size);
        let high = self.max.tile_origin(tile_size);
        let mut origins = Vec::new();
        let mut x = low.x;
        while x <= high.x {
            let mut y = low.y;
            while y <= high.y {
                origins.push(GridCoordinate::new(x, y));
                y += tile_size;
            }
            x += tile_size;
        }
        origins
    }
}

/// Maps a row-major RGBA buffer onto the grid. Buffer row 0 sits at
/// `top_left.y` and each following row is one unit lower.
pub fn anchor_rgba_buffer(
    rgba: &[u8],
    width: u32,
    top_left: GridCoordinate,
) -> impl Iterator<Item = PixelSample> + '_ {
    let width = i64::from(width.max(1));
    rgba.chunks_exact(4).enumerate().map(move |(index, px)| {
        let index = index as i64;
        let coord = GridCoordinate::new(top_left.x + index % width, top_left.y - index / width);
        PixelSample::new(coord, Color::rgba(px[0], px[1], px[2], px[3]))
    })
}
