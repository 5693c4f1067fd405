//! Seams between the engine and the outside world.
//!
//! Every network call, credential and budget the placement loop depends on
//! comes through one of these traits, so the loop can run against the live
//! server or an in-memory canvas.

use std::sync::Arc;

use ghostbot_contracts::color::{Color, ColorId};
use ghostbot_contracts::grid::GridCoordinate;
use image::RgbaImage;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub origin: GridCoordinate,
    /// Server timestamp the caller is already fresh up to.
    pub since: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPixel {
    pub coord: GridCoordinate,
    pub color: ColorId,
    pub placer: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileRecord {
    Delta(Vec<DeltaPixel>),
    /// Base64 WebP bitmap of the whole tile, bottom row first.
    Full { color_webp: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileUpdate {
    /// `None` when the server key did not carry a usable origin.
    pub origin: Option<GridCoordinate>,
    pub record: TileRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileBatch {
    pub server_timestamp: Option<i64>,
    pub tiles: Vec<TileUpdate>,
}

pub trait TileSource: Send + Sync {
    fn fetch_tiles(&self, requests: &[TileRequest]) -> EngineResult<TileBatch>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub subject: String,
    pub user_id: Option<i64>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        !self.token.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub coord: GridCoordinate,
    pub color: ColorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementResponse {
    pub status: u16,
    pub body: String,
}

pub const AUTH_EXPIRED_STATUS: u16 = 401;

impl PlacementResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_expired(&self) -> bool {
        self.status == AUTH_EXPIRED_STATUS
    }
}

pub trait PlacementApi: Send + Sync {
    /// Transport failures are errors; HTTP failures come back as a response.
    fn place(&self, session: &Session, pixels: &[Placement]) -> EngineResult<PlacementResponse>;
}

pub trait Relogin: Send + Sync {
    /// `Ok(None)` when no fresh credential could be obtained.
    fn relogin(&self) -> EngineResult<Option<Session>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyBudget {
    pub current: u32,
    pub max: u32,
    pub seconds_per_pixel: f64,
}

pub trait EnergySource: Send + Sync {
    fn budget(&self) -> EnergyBudget;
    fn spend(&self, pixels: u32);
}

pub trait PaletteSource: Send + Sync {
    fn allowed_colors(&self) -> EngineResult<Vec<Color>>;
}

#[derive(Debug, Clone)]
pub struct GhostImage {
    pub pixels: RgbaImage,
    pub top_left: GridCoordinate,
}

pub trait ImageSource: Send + Sync {
    fn load(&self) -> EngineResult<GhostImage>;
    fn describe(&self) -> String;
}

#[derive(Clone)]
pub struct Collaborators {
    pub tiles: Arc<dyn TileSource>,
    pub placement: Arc<dyn PlacementApi>,
    pub relogin: Arc<dyn Relogin>,
    pub energy: Arc<dyn EnergySource>,
    pub palette: Arc<dyn PaletteSource>,
}
