//! GeoPixels HTTP collaborators and file-backed relogin.

use std::path::PathBuf;
use std::time::Duration;

use ghostbot_contracts::grid::GridCoordinate;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::{
    DeltaPixel, Placement, PlacementApi, PlacementResponse, Relogin, Session, TileBatch,
    TileRecord, TileRequest, TileSource, TileUpdate, AUTH_EXPIRED_STATUS,
};
use crate::error::{EngineError, EngineResult};

const DEFAULT_TIMEOUT_S: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct GeoPixelsClient {
    base_url: String,
    http: HttpClient,
    timeout: Duration,
}

impl GeoPixelsClient {
    pub fn new(base_url: &str) -> EngineResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(EngineError::Config("base url is empty".to_string()));
        }
        let http = HttpClient::builder()
            .build()
            .map_err(|err| EngineError::Config(format!("http client: {err}")))?;
        Ok(Self {
            base_url,
            http,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_S),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

impl TileSource for GeoPixelsClient {
    fn fetch_tiles(&self, requests: &[TileRequest]) -> EngineResult<TileBatch> {
        let response = self
            .http
            .post(self.endpoint("GetPixelsCached"))
            .timeout(self.timeout)
            .json(&tiles_body(requests))
            .send()?;
        let payload = response_json_or_error("GetPixelsCached", response)?;
        let batch = parse_tile_batch(&payload);
        debug!(
            requested = requests.len(),
            returned = batch.tiles.len(),
            "tile batch received"
        );
        Ok(batch)
    }
}

impl PlacementApi for GeoPixelsClient {
    fn place(&self, session: &Session, pixels: &[Placement]) -> EngineResult<PlacementResponse> {
        let response = self
            .http
            .post(self.endpoint("PlacePixel"))
            .timeout(self.timeout)
            .json(&placement_body(session, pixels))
            .send()?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(PlacementResponse { status, body })
    }
}

fn response_json_or_error(endpoint: &str, response: HttpResponse) -> EngineResult<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        EngineError::Network(format!("{endpoint} response body read failed: {err}"))
    })?;
    if code == AUTH_EXPIRED_STATUS {
        return Err(EngineError::AuthExpired);
    }
    if !status.is_success() {
        let snippet: String = body.chars().take(512).collect();
        return Err(EngineError::Network(format!(
            "{endpoint} request failed ({code}): {snippet}"
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| EngineError::Network(format!("{endpoint} returned invalid JSON: {err}")))
}

pub fn tiles_body(requests: &[TileRequest]) -> Value {
    let tiles: Vec<Value> = requests
        .iter()
        .map(|request| {
            json!({
                "x": request.origin.x,
                "y": request.origin.y,
                "timestamp": request.since,
            })
        })
        .collect();
    json!({ "Tiles": tiles })
}

pub fn placement_body(session: &Session, pixels: &[Placement]) -> Value {
    let pixels: Vec<Value> = pixels
        .iter()
        .map(|pixel| {
            json!({
                "GridX": pixel.coord.x,
                "GridY": pixel.coord.y,
                "Color": pixel.color,
                "UserId": session.user_id,
            })
        })
        .collect();
    json!({
        "Token": session.token,
        "Subject": session.subject,
        "UserId": session.user_id,
        "Pixels": pixels,
    })
}

/// Numeric `_`-separated segments of a tile key such as `"-1000_2000"`.
pub fn parse_tile_key(key: &str) -> Option<GridCoordinate> {
    let mut numbers = key
        .split('_')
        .filter_map(|segment| segment.trim().parse::<i64>().ok());
    let x = numbers.next()?;
    let y = numbers.next()?;
    Some(GridCoordinate::new(x, y))
}

/// Malformed entries are logged and left out; only transport problems are
/// errors.
pub fn parse_tile_batch(payload: &Value) -> TileBatch {
    let server_timestamp = payload
        .get("ServerTimestamp")
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
        .filter(|timestamp| *timestamp > 0);

    let mut tiles = Vec::new();
    if let Some(entries) = payload.get("Tiles").and_then(Value::as_object) {
        for (key, tile) in entries {
            let origin = parse_tile_key(key);
            let kind = tile.get("Type").and_then(Value::as_str).unwrap_or_default();
            let record = match kind {
                "delta" => TileRecord::Delta(parse_delta_pixels(tile)),
                "full" => match tile.get("ColorWebP").and_then(Value::as_str) {
                    Some(encoded) => TileRecord::Full {
                        color_webp: encoded.to_string(),
                    },
                    None => {
                        warn!(tile = %key, "full tile without bitmap");
                        continue;
                    }
                },
                other => {
                    warn!(tile = %key, "unknown tile type {other:?}");
                    continue;
                }
            };
            tiles.push(TileUpdate { origin, record });
        }
    }
    TileBatch {
        server_timestamp,
        tiles,
    }
}

fn parse_delta_pixels(tile: &Value) -> Vec<DeltaPixel> {
    let Some(rows) = tile.get("Pixels").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let fields = row.as_array()?;
            let x = fields.first()?.as_i64()?;
            let y = fields.get(1)?.as_i64()?;
            let color = i32::try_from(fields.get(2)?.as_i64()?).ok()?;
            let placer = fields.get(3).and_then(Value::as_i64);
            Some(DeltaPixel {
                coord: GridCoordinate::new(x, y),
                color,
                placer,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    #[serde(default)]
    token: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    user_id: Option<i64>,
}

/// Re-reads credentials from a JSON file that an external login helper keeps
/// fresh: `{"token": "...", "subject": "...", "user_id": 1}`.
#[derive(Debug, Clone)]
pub struct SessionFileRelogin {
    path: PathBuf,
}

impl SessionFileRelogin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Relogin for SessionFileRelogin {
    fn relogin(&self) -> EngineResult<Option<Session>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("session file {} unreadable: {err}", self.path.display());
                return Ok(None);
            }
        };
        let parsed: SessionFile = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("session file {} invalid: {err}", self.path.display());
                return Ok(None);
            }
        };
        if parsed.token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Session {
            token: parsed.token.trim().to_string(),
            subject: parsed.subject,
            user_id: parsed.user_id,
        }))
    }
}

/// For sessions without any way to refresh credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelogin;

impl Relogin for NoRelogin {
    fn relogin(&self) -> EngineResult<Option<Session>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_keys_accept_negative_segments() {
        assert_eq!(parse_tile_key("1000_2000"), Some(GridCoordinate::new(1000, 2000)));
        assert_eq!(parse_tile_key("-1000_-2000"), Some(GridCoordinate::new(-1000, -2000)));
        assert_eq!(parse_tile_key("tile_3_4"), Some(GridCoordinate::new(3, 4)));
        assert_eq!(parse_tile_key("garbage"), None);
    }

    #[test]
    fn tile_batch_mixes_delta_and_full_records() {
        let payload = json!({
            "ServerTimestamp": 1234,
            "Tiles": {
                "0_0": {"Type": "delta", "Pixels": [[3, 4, 16711680, 9], [5, 6, -1], ["bad"]]},
                "1000_0": {"Type": "full", "ColorWebP": "AAAA"},
                "2000_0": {"Type": "mystery"},
                "3000_0": {"Type": "delta", "Pixels": []}
            }
        });
        let batch = parse_tile_batch(&payload);
        assert_eq!(batch.server_timestamp, Some(1234));
        assert_eq!(batch.tiles.len(), 3);

        let delta = batch
            .tiles
            .iter()
            .find(|tile| tile.origin == Some(GridCoordinate::new(0, 0)));
        assert_eq!(
            delta.map(|tile| &tile.record),
            Some(&TileRecord::Delta(vec![
                DeltaPixel {
                    coord: GridCoordinate::new(3, 4),
                    color: 0xff0000,
                    placer: Some(9),
                },
                DeltaPixel {
                    coord: GridCoordinate::new(5, 6),
                    color: -1,
                    placer: None,
                },
            ]))
        );
        assert!(batch.tiles.iter().any(|tile| tile.record
            == TileRecord::Full {
                color_webp: "AAAA".to_string()
            }));
    }

    #[test]
    fn missing_timestamp_and_tiles_yield_empty_batch() {
        let batch = parse_tile_batch(&json!({}));
        assert_eq!(batch, TileBatch::default());
    }

    #[test]
    fn request_bodies_use_server_field_names() {
        let requests = [TileRequest {
            origin: GridCoordinate::new(-1000, 0),
            since: 42,
        }];
        assert_eq!(
            tiles_body(&requests),
            json!({"Tiles": [{"x": -1000, "y": 0, "timestamp": 42}]})
        );

        let session = Session {
            token: "tok".to_string(),
            subject: "sub".to_string(),
            user_id: Some(77),
        };
        let pixels = [Placement {
            coord: GridCoordinate::new(1, -2),
            color: 0x00ff00,
        }];
        assert_eq!(
            placement_body(&session, &pixels),
            json!({
                "Token": "tok",
                "Subject": "sub",
                "UserId": 77,
                "Pixels": [{"GridX": 1, "GridY": -2, "Color": 65280, "UserId": 77}]
            })
        );
    }

    #[test]
    fn session_file_relogin_reads_fresh_token() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session.json");
        let relogin = SessionFileRelogin::new(&path);
        assert_eq!(relogin.relogin()?, None);

        std::fs::write(&path, r#"{"token": "", "subject": "s"}"#)?;
        assert_eq!(relogin.relogin()?, None);

        std::fs::write(&path, r#"{"token": "fresh", "subject": "s", "user_id": 5}"#)?;
        assert_eq!(
            relogin.relogin()?,
            Some(Session {
                token: "fresh".to_string(),
                subject: "s".to_string(),
                user_id: Some(5),
            })
        );
        Ok(())
    }

    #[test]
    fn client_rejects_empty_base_url() {
        assert!(matches!(
            GeoPixelsClient::new("  "),
            Err(EngineError::Config(_))
        ));
        assert!(GeoPixelsClient::new("https://example.test/")
            .map(|client| client.base_url() == "https://example.test")
            .unwrap_or(false));
    }
}
