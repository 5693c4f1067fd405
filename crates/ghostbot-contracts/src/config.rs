use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::color::{parse_color_token, Color, ColorError, ColorId, FREE_COLORS};

pub const DEFAULT_BASE_URL: &str = "https://geopixels.net";
pub const DEFAULT_TILE_SIZE: i64 = 1000;
pub const DEFAULT_TILES_PER_REQUEST: usize = 9;
pub const DEFAULT_ENERGY_RESERVE: u32 = 2;
/// One pixel per day; anything slower is a typo.
pub const MAX_SECONDS_PER_PIXEL: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub energy: EnergyConfig,
    /// Placeable colors as hex text. Empty means the free-colors palette.
    pub palette: Vec<String>,
    pub filters: FilterConfig,
    pub image: Option<ImageConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub tile_size: i64,
    pub tiles_per_request: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub token: String,
    pub subject: String,
    pub user_id: Option<i64>,
    /// JSON file re-read on relogin (`{"token", "subject", "user_id"}`).
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub current: u32,
    pub max: u32,
    pub seconds_per_pixel: f64,
    pub reserve: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub include_transparent: bool,
    pub include_free_colors: bool,
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub path: PathBuf,
    pub x: i64,
    pub y: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            tiles_per_request: DEFAULT_TILES_PER_REQUEST,
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            current: 10,
            max: 10,
            seconds_per_pixel: 30.0,
            reserve: DEFAULT_ENERGY_RESERVE,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            include_transparent: false,
            include_free_colors: true,
            ignored: Vec::new(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            energy: EnergyConfig::default(),
            palette: Vec::new(),
            filters: FilterConfig::default(),
            image: None,
        }
    }
}

impl BotConfig {
    /// Defaults, then the JSON file (if any), then `GHOSTBOT_*` environment
    /// overrides. Color lists are validated before returning.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading config {}", path.display()))?;
                serde_json::from_str::<Self>(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(non_empty_env);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("GHOSTBOT_BASE_URL") {
            self.server.base_url = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = lookup("GHOSTBOT_TOKEN") {
            self.session.token = value;
        }
        if let Some(value) = lookup("GHOSTBOT_SUBJECT") {
            self.session.subject = value;
        }
        if let Some(value) = lookup("GHOSTBOT_USER_ID").and_then(|raw| raw.parse().ok()) {
            self.session.user_id = Some(value);
        }
        if let Some(value) = lookup("GHOSTBOT_SESSION_FILE") {
            self.session.session_file = Some(PathBuf::from(value));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.tile_size <= 0 {
            anyhow::bail!("server.tile_size must be positive");
        }
        if self.server.tiles_per_request == 0 {
            anyhow::bail!("server.tiles_per_request must be positive");
        }
        let seconds_per_pixel = self.energy.seconds_per_pixel;
        if !(0.0..=MAX_SECONDS_PER_PIXEL).contains(&seconds_per_pixel) {
            anyhow::bail!(
                "energy.seconds_per_pixel must be between 0 and {MAX_SECONDS_PER_PIXEL}, got {seconds_per_pixel}"
            );
        }
        self.palette_colors().context("invalid palette entry")?;
        self.ignored_ids().context("invalid filters.ignored entry")?;
        Ok(())
    }

    pub fn palette_colors(&self) -> Result<Vec<Color>, ColorError> {
        if self.palette.is_empty() {
            return Ok(FREE_COLORS.to_vec());
        }
        self.palette
            .iter()
            .map(|text| Color::from_hex(text))
            .collect()
    }

    pub fn ignored_ids(&self) -> Result<Vec<ColorId>, ColorError> {
        self.filters
            .ignored
            .iter()
            .map(|text| parse_color_token(text))
            .collect()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
