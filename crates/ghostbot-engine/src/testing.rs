//! In-memory stand-ins for the server and local collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ghostbot_contracts::color::{Color, ColorId};
use ghostbot_contracts::grid::GridCoordinate;

use crate::api::{
    Collaborators, DeltaPixel, EnergyBudget, EnergySource, GhostImage, ImageSource, Placement,
    PlacementApi, PlacementResponse, Relogin, Session, TileBatch, TileRecord, TileRequest,
    TileSource, TileUpdate,
};
use crate::error::{EngineError, EngineResult};
use crate::local::StaticPalette;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCall {
    pub token: String,
    pub pixels: Vec<Placement>,
}

#[derive(Debug, Default)]
struct ServerState {
    canvas: HashMap<GridCoordinate, (ColorId, i64)>,
    clock: i64,
    fetch_sizes: Vec<usize>,
    placements: Vec<PlaceCall>,
    scripted: VecDeque<PlacementResponse>,
}

/// Canvas server that answers tile fetches with deltas newer than the
/// requested timestamp and applies accepted placements to itself.
#[derive(Debug)]
pub struct FakeServer {
    tile_size: i64,
    valid_token: Option<String>,
    fail_fetch: AtomicBool,
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn with_tile_size(tile_size: i64) -> Self {
        Self {
            tile_size,
            valid_token: None,
            fail_fetch: AtomicBool::new(false),
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Placements are rejected with 401 unless sent with `token`.
    pub fn with_token(token: &str) -> Self {
        Self {
            valid_token: Some(token.to_string()),
            ..Self::with_tile_size(1000)
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn paint(&self, coord: GridCoordinate, color: ColorId) {
        let mut state = self.state();
        state.clock += 1;
        let stamp = state.clock;
        state.canvas.insert(coord, (color, stamp));
    }

    pub fn color_at(&self, coord: GridCoordinate) -> Option<Color> {
        self.state()
            .canvas
            .get(&coord)
            .map(|(color, _)| Color::from_id(*color))
    }

    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.state().fetch_sizes.clone()
    }

    pub fn placements(&self) -> Vec<PlaceCall> {
        self.state().placements.clone()
    }

    /// Next placement gets `response` instead of being applied.
    pub fn script_response(&self, response: PlacementResponse) {
        self.state().scripted.push_back(response);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }
}

impl TileSource for FakeServer {
    fn fetch_tiles(&self, requests: &[TileRequest]) -> EngineResult<TileBatch> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(EngineError::Network("connection refused".to_string()));
        }
        let mut state = self.state();
        state.fetch_sizes.push(requests.len());
        let tiles = requests
            .iter()
            .map(|request| {
                let pixels = state
                    .canvas
                    .iter()
                    .filter(|(coord, (_, stamp))| {
                        coord.tile_origin(self.tile_size) == request.origin && *stamp > request.since
                    })
                    .map(|(coord, (color, _))| DeltaPixel {
                        coord: *coord,
                        color: *color,
                        placer: None,
                    })
                    .collect();
                TileUpdate {
                    origin: Some(request.origin),
                    record: TileRecord::Delta(pixels),
                }
            })
            .collect();
        Ok(TileBatch {
            server_timestamp: Some(state.clock),
            tiles,
        })
    }
}

impl PlacementApi for FakeServer {
    fn place(&self, session: &Session, pixels: &[Placement]) -> EngineResult<PlacementResponse> {
        let mut state = self.state();
        state.placements.push(PlaceCall {
            token: session.token.clone(),
            pixels: pixels.to_vec(),
        });
        if let Some(response) = state.scripted.pop_front() {
            return Ok(response);
        }
        if let Some(valid) = &self.valid_token {
            if &session.token != valid {
                return Ok(PlacementResponse {
                    status: 401,
                    body: "token expired".to_string(),
                });
            }
        }
        for pixel in pixels {
            state.clock += 1;
            let stamp = state.clock;
            state.canvas.insert(pixel.coord, (pixel.color, stamp));
        }
        Ok(PlacementResponse::ok())
    }
}

/// Hands out the scripted sessions in order, then `None`.
#[derive(Debug, Default)]
pub struct ScriptedRelogin {
    sessions: Mutex<VecDeque<Option<Session>>>,
    calls: AtomicUsize,
}

impl ScriptedRelogin {
    pub fn new(sessions: Vec<Option<Session>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Relogin for ScriptedRelogin {
    fn relogin(&self) -> EngineResult<Option<Session>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        Ok(sessions.pop_front().flatten())
    }
}

/// Constant budget; spending is only recorded.
#[derive(Debug)]
pub struct FixedEnergy {
    budget: EnergyBudget,
    spent: AtomicUsize,
}

impl FixedEnergy {
    pub fn new(current: u32, max: u32, seconds_per_pixel: f64) -> Self {
        Self {
            budget: EnergyBudget {
                current,
                max,
                seconds_per_pixel,
            },
            spent: AtomicUsize::new(0),
        }
    }

    pub fn spent(&self) -> usize {
        self.spent.load(Ordering::SeqCst)
    }
}

impl EnergySource for FixedEnergy {
    fn budget(&self) -> EnergyBudget {
        self.budget
    }

    fn spend(&self, pixels: u32) {
        self.spent.fetch_add(pixels as usize, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MemoryImage(pub GhostImage);

impl MemoryImage {
    /// Builds an image from rows listed top row first.
    pub fn from_rows(rows: &[&[Color]], top_left: GridCoordinate) -> Self {
        let height = rows.len() as u32;
        let width = rows.first().map(|row| row.len()).unwrap_or(0) as u32;
        let mut pixels = image::RgbaImage::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, color) in row.iter().enumerate() {
                pixels.put_pixel(
                    x as u32,
                    y as u32,
                    image::Rgba([color.r, color.g, color.b, color.a]),
                );
            }
        }
        Self(GhostImage { pixels, top_left })
    }
}

impl ImageSource for MemoryImage {
    fn load(&self) -> EngineResult<GhostImage> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("memory @ {}", self.0.top_left)
    }
}

pub fn collaborators(
    server: &Arc<FakeServer>,
    relogin: Arc<dyn Relogin>,
    energy: Arc<dyn EnergySource>,
    palette: Vec<Color>,
) -> Collaborators {
    Collaborators {
        tiles: server.clone(),
        placement: server.clone(),
        relogin,
        energy,
        palette: Arc::new(StaticPalette(palette)),
    }
}
