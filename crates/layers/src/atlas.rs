//! Sprite atlas metrics, loaded once and shared read-only.
//!
//! The atlas description is a JSON object keyed by feature type:
//!
//! ```json
//! { "0": { "xmin": 0, "ymin": 0, "xmax": 32, "ymax": 64 }, "1": { ... } }
//! ```
//!
//! Each rectangle becomes an atlas word `xmin | ymin<<8 | w<<16 | h<<24`
//! plus the `(w, h)` footprint used by hit testing.

use std::collections::BTreeMap;
use std::sync::Arc;

use foundation::pack_8888;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub struct AtlasRect {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AtlasEntry {
    pub word: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AtlasError {
    #[error("malformed atlas json: {0}")]
    Malformed(String),
    #[error("atlas key {0:?} is not a feature type")]
    InvalidType(String),
    #[error("atlas rect for type {feature_type} is empty or inverted")]
    EmptyRect { feature_type: u32 },
    #[error("atlas rect for type {feature_type} does not fit the 8-bit atlas word")]
    RectOutOfRange { feature_type: u32 },
}

/// Per-type atlas words and metrics. Immutable after load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Atlas {
    entries: BTreeMap<u32, AtlasEntry>,
}

/// Shared handle; the atlas never changes after load.
pub type SharedAtlas = Arc<Atlas>;

impl Atlas {
    pub fn from_json_str(text: &str) -> Result<Self, AtlasError> {
        let raw: BTreeMap<String, AtlasRect> =
            serde_json::from_str(text).map_err(|e| AtlasError::Malformed(e.to_string()))?;
        let mut atlas = Atlas::default();
        for (key, rect) in raw {
            let feature_type: u32 = key
                .trim()
                .parse()
                .map_err(|_| AtlasError::InvalidType(key.clone()))?;
            atlas.insert(feature_type, rect)?;
        }
        Ok(atlas)
    }

    pub fn insert(&mut self, feature_type: u32, rect: AtlasRect) -> Result<(), AtlasError> {
        let width = rect.xmax - rect.xmin;
        let height = rect.ymax - rect.ymin;
        if width <= 0 || height <= 0 {
            return Err(AtlasError::EmptyRect { feature_type });
        }
        let byte = 0..=255;
        if ![rect.xmin, rect.ymin, width, height]
            .iter()
            .all(|v| byte.contains(v))
        {
            return Err(AtlasError::RectOutOfRange { feature_type });
        }
        self.entries.insert(
            feature_type,
            AtlasEntry {
                word: pack_8888(rect.xmin, rect.ymin, width, height),
                width: width as u32,
                height: height as u32,
            },
        );
        Ok(())
    }

    pub fn get(&self, feature_type: u32) -> Option<&AtlasEntry> {
        self.entries.get(&feature_type)
    }

    /// Atlas word for a type; 0 (empty rect) for unknown types.
    pub fn word(&self, feature_type: u32) -> u32 {
        self.get(feature_type).map(|e| e.word).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &AtlasEntry)> + '_ {
        self.entries.iter().map(|(t, e)| (*t, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Atlas, AtlasEntry, AtlasError};
    use foundation::unpack_8888;
    use pretty_assertions::assert_eq;

    const CARS: &str = r#"{
        "0": { "xmin": 0, "ymin": 0, "xmax": 20, "ymax": 40 },
        "1": { "xmin": 20, "ymin": 0, "xmax": 44, "ymax": 48 },
        "10": { "xmin": 44, "ymin": 8, "xmax": 60, "ymax": 40 }
    }"#;

    #[test]
    fn parses_rects_into_words_and_metrics() {
        let atlas = Atlas::from_json_str(CARS).unwrap();
        assert_eq!(atlas.len(), 3);
        assert_eq!(
            atlas.get(1),
            Some(&AtlasEntry {
                word: u32::from_le_bytes([20, 0, 24, 48]),
                width: 24,
                height: 48,
            })
        );
        assert_eq!(unpack_8888(atlas.word(10)), [44, 8, 16, 32]);
    }

    #[test]
    fn unknown_type_maps_to_empty_word() {
        let atlas = Atlas::from_json_str(CARS).unwrap();
        assert_eq!(atlas.get(2), None);
        assert_eq!(atlas.word(2), 0);
    }

    #[test]
    fn rejects_bad_keys_and_rects() {
        let err = Atlas::from_json_str(r#"{"sedan": {"xmin":0,"ymin":0,"xmax":1,"ymax":1}}"#);
        assert_eq!(err, Err(AtlasError::InvalidType("sedan".to_string())));

        let err = Atlas::from_json_str(r#"{"3": {"xmin":5,"ymin":0,"xmax":5,"ymax":1}}"#);
        assert_eq!(err, Err(AtlasError::EmptyRect { feature_type: 3 }));

        let err = Atlas::from_json_str(r#"{"4": {"xmin":0,"ymin":0,"xmax":300,"ymax":1}}"#);
        assert_eq!(err, Err(AtlasError::RectOutOfRange { feature_type: 4 }));

        assert!(matches!(
            Atlas::from_json_str("[1, 2]"),
            Err(AtlasError::Malformed(_))
        ));
    }
}
