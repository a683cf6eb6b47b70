//! Text Style System
//!
//! Authored styles come from the template; user overrides are validated
//! and overlaid field by field. Unset fields keep the authored value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_FONT_SIZE: f32 = 1.0;
pub const MAX_FONT_SIZE: f32 = 400.0;

#[derive(Debug, Error, PartialEq)]
pub enum StyleError {
    #[error("Font size {0} outside 1..=400 pt")]
    FontSize(f32),

    #[error("Color must be #RRGGBB, got {0:?}")]
    Color(String),

    #[error("Malformed style object: {0}")]
    Malformed(String),
}

/// Run-level text style. `None` means "inherit from the template".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
}

impl TextStyle {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.color.is_none() && self.bold.is_none() && self.italic.is_none()
    }

    /// Build a user override, rejecting values the deck cannot carry.
    pub fn from_user(
        size: Option<f32>,
        color: Option<&str>,
        bold: Option<bool>,
        italic: Option<bool>,
    ) -> Result<Self, StyleError> {
        if let Some(size) = size {
            if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&size) {
                return Err(StyleError::FontSize(size));
            }
        }
        let color = color.map(normalize_color).transpose()?;
        Ok(Self { size, color, bold, italic })
    }

    /// Parse the `{"text": {"size", "color", "bold", "italic"}}` object
    /// clients attach under mapping metadata `style`.
    pub fn from_metadata(style: &serde_json::Value) -> Result<Option<Self>, StyleError> {
        let text = match style.get("text") {
            Some(text) => text,
            None => return Ok(None),
        };
        let obj = text
            .as_object()
            .ok_or_else(|| StyleError::Malformed("style.text must be an object".into()))?;

        let size = match obj.get("size") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(
                v.as_f64()
                    .ok_or_else(|| StyleError::Malformed("size must be a number".into()))? as f32,
            ),
        };
        let color = match obj.get("color") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| StyleError::Malformed("color must be a string".into()))?,
            ),
        };
        let flag = |key: &str| -> Result<Option<bool>, StyleError> {
            match obj.get(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(v) => v
                    .as_bool()
                    .map(Some)
                    .ok_or_else(|| StyleError::Malformed(format!("{} must be a boolean", key))),
            }
        };

        let style = Self::from_user(size, color, flag("bold")?, flag("italic")?)?;
        Ok(if style.is_empty() { None } else { Some(style) })
    }

    /// Fields set in `over` replace ours.
    pub fn overlay(&self, over: &TextStyle) -> TextStyle {
        TextStyle {
            size: over.size.or(self.size),
            color: over.color.clone().or_else(|| self.color.clone()),
            bold: over.bold.or(self.bold),
            italic: over.italic.or(self.italic),
        }
    }

    /// `sz` attribute value (hundredths of a point).
    pub fn ooxml_size(&self) -> Option<String> {
        self.size.map(|s| ((s * 100.0).round() as i64).to_string())
    }

    /// `srgbClr` value (hex without `#`).
    pub fn ooxml_color(&self) -> Option<String> {
        self.color.as_ref().map(|c| c.trim_start_matches('#').to_string())
    }

    /// RGB triple for rasterizing.
    pub fn rgb(&self) -> Option<[u8; 3]> {
        let hex = self.ooxml_color()?;
        let value = u32::from_str_radix(&hex, 16).ok()?;
        Some([(value >> 16) as u8, (value >> 8) as u8, value as u8])
    }
}

fn normalize_color(raw: &str) -> Result<String, StyleError> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("#{}", hex.to_ascii_uppercase()))
    } else {
        Err(StyleError::Color(raw.to_string()))
    }
}

/// OOXML `sz` (hundredths of a point) to points.
pub(crate) fn from_ooxml_size(sz: &str) -> Option<f32> {
    sz.parse::<f32>().ok().map(|v| v / 100.0)
}

pub(crate) fn from_ooxml_color(val: &str) -> Option<String> {
    normalize_color(val).ok()
}

pub(crate) fn from_ooxml_flag(val: &str) -> Option<bool> {
    match val {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_style_parsed() {
        let style = TextStyle::from_metadata(&json!({
            "text": {"size": 32, "color": "#ff0000", "bold": true}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(style.size, Some(32.0));
        assert_eq!(style.color.as_deref(), Some("#FF0000"));
        assert_eq!(style.bold, Some(true));
        assert_eq!(style.italic, None);
    }

    #[test]
    fn test_metadata_without_text_is_none() {
        assert_eq!(TextStyle::from_metadata(&json!({})).unwrap(), None);
    }

    #[test]
    fn test_user_style_rejects_bad_values() {
        assert_eq!(
            TextStyle::from_user(Some(0.0), None, None, None),
            Err(StyleError::FontSize(0.0))
        );
        assert!(matches!(
            TextStyle::from_user(None, Some("red"), None, None),
            Err(StyleError::Color(_))
        ));
    }

    #[test]
    fn test_overlay_keeps_authored_fields() {
        let authored = TextStyle { size: Some(44.0), color: Some("#000000".into()), bold: None, italic: Some(false) };
        let over = TextStyle { size: None, color: Some("#0000FF".into()), bold: Some(true), italic: None };
        let merged = authored.overlay(&over);
        assert_eq!(merged.size, Some(44.0));
        assert_eq!(merged.color.as_deref(), Some("#0000FF"));
        assert_eq!(merged.bold, Some(true));
        assert_eq!(merged.italic, Some(false));
        assert_eq!(merged.ooxml_size().as_deref(), Some("4400"));
        assert_eq!(merged.rgb(), Some([0, 0, 255]));
    }
}
