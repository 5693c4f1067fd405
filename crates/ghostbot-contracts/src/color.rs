//! Packed color identifiers and hex text for canvas colors.
//!
//! The canvas addresses colors by a 24-bit `0xRRGGBB` identifier. A fully
//! transparent color always maps to [`TRANSPARENT_ID`]; partial alpha is not
//! representable in an identifier and collapses onto the opaque RGB value.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub type ColorId = i32;

/// Identifier reserved for a fully transparent pixel.
pub const TRANSPARENT_ID: ColorId = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("invalid color format: {0}")]
    InvalidColorFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa` (the `#` is optional,
    /// case-insensitive). Missing alpha defaults to `ff`.
    pub fn from_hex(text: &str) -> Result<Self, ColorError> {
        let normalized = normalize_hex(text);
        let mut channels = [0u8; 4];
        hex::decode_to_slice(&normalized, &mut channels)
            .map_err(|_| ColorError::InvalidColorFormat(text.to_string()))?;
        let [r, g, b, a] = channels;
        Ok(Self { r, g, b, a })
    }

    pub fn from_id(id: ColorId) -> Self {
        if id == TRANSPARENT_ID {
            return Self::rgba(0, 0, 0, 0);
        }
        Self::rgb(
            ((id >> 16) & 0xff) as u8,
            ((id >> 8) & 0xff) as u8,
            (id & 0xff) as u8,
        )
    }

    pub fn id(&self) -> ColorId {
        if self.a == 0 {
            return TRANSPARENT_ID;
        }
        (ColorId::from(self.r) << 16) | (ColorId::from(self.g) << 8) | ColorId::from(self.b)
    }

    /// Eight-digit lowercase `#rrggbbaa`.
    pub fn hex(&self) -> String {
        format!("#{}", hex::encode([self.r, self.g, self.b, self.a]))
    }

    pub fn css_rgba(&self) -> String {
        format!("rgba({},{},{},{})", self.r, self.g, self.b, self.a)
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

fn normalize_hex(text: &str) -> String {
    let lower = text.trim().to_ascii_lowercase();
    let digits = lower.strip_prefix('#').unwrap_or(&lower);
    let mut full = match digits.chars().count() {
        3 | 4 => digits.chars().flat_map(|ch| [ch, ch]).collect::<String>(),
        _ => digits.to_string(),
    };
    if full.len() == 6 {
        full.push_str("ff");
    }
    full
}

/// Colors that cost nothing to place.
pub const FREE_COLORS: [Color; 16] = [
    Color::rgb(0xff, 0xff, 0xff),
    Color::rgb(0xff, 0xca, 0x3a),
    Color::rgb(0xff, 0x59, 0x5e),
    Color::rgb(0xf3, 0xbb, 0xc2),
    Color::rgb(0xbd, 0x63, 0x7d),
    Color::rgb(0x6a, 0x4c, 0x93),
    Color::rgb(0xa8, 0xd0, 0xdc),
    Color::rgb(0x1a, 0x53, 0x5c),
    Color::rgb(0x19, 0x82, 0xc4),
    Color::rgb(0x8a, 0xc9, 0x26),
    Color::rgb(0x6b, 0x42, 0x26),
    Color::rgb(0xcf, 0xd0, 0x78),
    Color::rgb(0x8b, 0x1d, 0x24),
    Color::rgb(0xc4, 0x9a, 0x6c),
    Color::rgb(0x00, 0x00, 0x00),
    Color::rgba(0x00, 0x00, 0x00, 0x00),
];

pub fn free_color_ids() -> Vec<ColorId> {
    FREE_COLORS.iter().map(Color::id).collect()
}

/// Parses one operator-supplied color: hex text (`#...` or six to eight bare
/// hex digits) or a numeric identifier.
pub fn parse_color_token(token: &str) -> Result<ColorId, ColorError> {
    let token = token.trim();
    let bare_hex = (6..=8).contains(&token.len()) && token.chars().all(|ch| ch.is_ascii_hexdigit());
    if token.starts_with('#') || bare_hex {
        return Color::from_hex(token).map(|color| color.id());
    }
    token
        .parse::<ColorId>()
        .map_err(|_| ColorError::InvalidColorFormat(token.to_string()))
}

/// Parses a comma-separated color list, optionally wrapped in brackets.
/// Returns the accepted ids and the rejected tokens.
pub fn parse_color_list(text: &str) -> (Vec<ColorId>, Vec<String>) {
    let mut trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        trimmed = inner;
    }
    let mut ids = Vec::new();
    let mut rejected = Vec::new();
    for token in trimmed
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        match parse_color_token(token) {
            Ok(id) => ids.push(id),
            Err(_) => rejected.push(token.to_string()),
        }
    }
    (ids, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_forms_normalize_to_rgba() {
        assert_eq!(Color::from_hex("#F00").unwrap(), Color::rgb(255, 0, 0));
        assert_eq!(Color::from_hex("f008").unwrap(), Color::rgba(255, 0, 0, 0x88));
        assert_eq!(Color::from_hex("#1A535C").unwrap(), Color::rgb(0x1a, 0x53, 0x5c));
        assert_eq!(
            Color::from_hex("#00000000").unwrap(),
            Color::rgba(0, 0, 0, 0)
        );
    }

    #[test]
    fn malformed_hex_is_rejected() {
        for bad in ["", "#12", "#12345", "#1234567", "#gggggg", "#123456789", "ré0"] {
            assert_eq!(
                Color::from_hex(bad),
                Err(ColorError::InvalidColorFormat(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn hex_round_trips() {
        for text in ["#ff00aa80", "#00000000", "#123456ff", "#abcdef01"] {
            let color = Color::from_hex(text).unwrap();
            assert_eq!(color.hex(), text);
            assert_eq!(Color::from_hex(&color.hex()).unwrap(), color);
        }
    }

    #[test]
    fn opaque_ids_round_trip() {
        for (r, g, b) in [(0, 0, 0), (255, 255, 255), (18, 52, 86), (255, 0, 1)] {
            let color = Color::rgb(r, g, b);
            assert_eq!(Color::from_id(color.id()), color);
        }
        assert_eq!(Color::rgb(255, 0, 0).id(), 0xff0000);
    }

    #[test]
    fn transparency_normalizes_to_sentinel() {
        assert_eq!(Color::rgba(12, 34, 56, 0).id(), TRANSPARENT_ID);
        assert_eq!(Color::from_id(TRANSPARENT_ID), Color::rgba(0, 0, 0, 0));
    }

    #[test]
    fn partial_alpha_collapses_onto_opaque_id() {
        assert_eq!(Color::rgba(1, 2, 3, 128).id(), Color::rgb(1, 2, 3).id());
    }

    #[test]
    fn css_and_display_formats() {
        let color = Color::rgba(1, 2, 3, 4);
        assert_eq!(color.css_rgba(), "rgba(1,2,3,4)");
        assert_eq!(color.to_string(), "#01020304");
    }

    #[test]
    fn free_palette_contains_transparent() {
        let ids = free_color_ids();
        assert_eq!(ids.len(), 16);
        assert!(ids.contains(&TRANSPARENT_ID));
        assert!(ids.contains(&0xffffff));
    }

    #[test]
    fn color_list_accepts_hex_ids_and_brackets() {
        let (ids, rejected) = parse_color_list("[#ff0000, 00ff00 ,255, banana]");
        assert_eq!(ids, vec![0xff0000, 0x00ff00, 255]);
        assert_eq!(rejected, vec!["banana".to_string()]);

        let (ids, rejected) = parse_color_list("   ");
        assert!(ids.is_empty());
        assert!(rejected.is_empty());
    }
}
