//! Collaborators that need no server: a regenerating energy meter, an image
//! file loader and a fixed palette.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use ghostbot_contracts::color::Color;
use ghostbot_contracts::grid::GridCoordinate;
use tracing::debug;

use crate::api::{EnergyBudget, EnergySource, GhostImage, ImageSource, PaletteSource};
use crate::error::{EngineError, EngineResult};

/// Energy regenerates at one pixel per `seconds_per_pixel` up to `max`.
/// A rate of zero means the meter is always full.
#[derive(Debug)]
pub struct LocalEnergyMeter {
    max: u32,
    seconds_per_pixel: f64,
    state: Mutex<MeterState>,
}

#[derive(Debug)]
struct MeterState {
    stored: f64,
    updated: Instant,
}

impl LocalEnergyMeter {
    pub fn new(current: u32, max: u32, seconds_per_pixel: f64) -> Self {
        Self {
            max,
            seconds_per_pixel: seconds_per_pixel.max(0.0),
            state: Mutex::new(MeterState {
                stored: f64::from(current.min(max)),
                updated: Instant::now(),
            }),
        }
    }

    fn refilled(&self) -> MutexGuard<'_, MeterState> {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        let now = Instant::now();
        let max = f64::from(self.max);
        if self.seconds_per_pixel == 0.0 {
            state.stored = max;
        } else {
            let gained = now.duration_since(state.updated).as_secs_f64() / self.seconds_per_pixel;
            state.stored = (state.stored + gained).min(max);
        }
        state.updated = now;
        state
    }
}

impl EnergySource for LocalEnergyMeter {
    fn budget(&self) -> EnergyBudget {
        let state = self.refilled();
        EnergyBudget {
            current: state.stored.floor() as u32,
            max: self.max,
            seconds_per_pixel: self.seconds_per_pixel,
        }
    }

    fn spend(&self, pixels: u32) {
        let mut state = self.refilled();
        state.stored = (state.stored - f64::from(pixels)).max(0.0);
        debug!(spent = pixels, left = state.stored, "energy spent");
    }
}

#[derive(Debug, Clone)]
pub struct FileImageSource {
    path: PathBuf,
    top_left: GridCoordinate,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>, top_left: GridCoordinate) -> Self {
        Self {
            path: path.into(),
            top_left,
        }
    }
}

impl ImageSource for FileImageSource {
    fn load(&self) -> EngineResult<GhostImage> {
        let pixels = image::open(&self.path)
            .map_err(|err| EngineError::ImageNotLoaded(format!("{}: {err}", self.path.display())))?
            .to_rgba8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(EngineError::ImageNotLoaded(format!(
                "{}: image is empty",
                self.path.display()
            )));
        }
        Ok(GhostImage {
            pixels,
            top_left: self.top_left,
        })
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.path.display(), self.top_left)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticPalette(pub Vec<Color>);

impl PaletteSource for StaticPalette {
    fn allowed_colors(&self) -> EngineResult<Vec<Color>> {
        Ok(self.0.clone())
    }
}
