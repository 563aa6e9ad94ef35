//! JSON keyboard layout files.
//!
//! ```json
//! {
//!   "name": "104keys",
//!   "unitWidth": 40, "unitHeight": 40, "keySpacing": 4,
//!   "keys": [
//!     {"vkCode": 27, "label": "Esc", "row": 0, "col": 0},
//!     {"vkCode": 32, "label": "Space", "row": 5.25, "col": 3.75, "width": 6.25}
//!   ]
//! }
//! ```
//!
//! Only `vkCode` is required per key.  The pixel constants are optional;
//! when any is present the layout carries its own [`DisplayMetrics`], which
//! take precedence over the configured ones.
//!
//! Layouts are looked up by name in this order: an explicit path, then
//! `layouts/<name>.json` next to the executable, then under the config
//! directory.  The `104keys` layout is also compiled in so the overlay has
//! something to show when no file is installed.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use keystats_core::{DisplayMetrics, KeyCode, KeyInfo, KeyLayout, LayoutError};

/// Name of the compiled-in layout.
pub const BUILTIN_LAYOUT_NAME: &str = "104keys";

const BUILTIN_LAYOUT_JSON: &str = include_str!("../../../layouts/104keys.json");

#[derive(Debug, Error)]
pub enum LayoutLoadError {
    #[error("cannot read layout {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("layout {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("layout {path} is inconsistent: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: LayoutError,
    },
}

/// On-disk shape of a layout file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutFile {
    #[serde(default = "default_name")]
    name: String,
    unit_width: Option<u32>,
    unit_height: Option<u32>,
    key_spacing: Option<u32>,
    #[serde(default)]
    keys: Vec<LayoutKeyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutKeyEntry {
    vk_code: KeyCode,
    #[serde(default)]
    label: String,
    #[serde(default)]
    row: f64,
    #[serde(default)]
    col: f64,
    #[serde(default = "default_span")]
    width: f64,
    #[serde(default = "default_span")]
    height: f64,
}

fn default_name() -> String {
    "Unknown".to_string()
}
fn default_span() -> f64 {
    1.0
}

impl LayoutFile {
    fn into_layout(self) -> Result<KeyLayout, LayoutError> {
        let metrics = if self.unit_width.is_some()
            || self.unit_height.is_some()
            || self.key_spacing.is_some()
        {
            let d = DisplayMetrics::default();
            Some(DisplayMetrics {
                unit_width: self.unit_width.unwrap_or(d.unit_width),
                unit_height: self.unit_height.unwrap_or(d.unit_height),
                key_spacing: self.key_spacing.unwrap_or(d.key_spacing),
            })
        } else {
            None
        };

        let keys = self
            .keys
            .into_iter()
            .map(|k| KeyInfo::new(k.vk_code, k.label, k.row, k.col).with_size(k.width, k.height))
            .collect();

        let layout = KeyLayout::new(self.name, keys)?;
        Ok(match metrics {
            Some(m) => layout.with_metrics(m),
            None => layout,
        })
    }
}

/// Parses layout JSON.  `origin` only labels errors.
///
/// # Errors
///
/// [`LayoutLoadError::Parse`] for malformed JSON and
/// [`LayoutLoadError::Invalid`] for duplicate codes or bad geometry.
pub fn parse_layout(json: &str, origin: &Path) -> Result<KeyLayout, LayoutLoadError> {
    let file: LayoutFile = serde_json::from_str(json).map_err(|source| LayoutLoadError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    file.into_layout().map_err(|source| LayoutLoadError::Invalid {
        path: origin.to_path_buf(),
        source,
    })
}

/// Reads and parses the layout at `path`.
///
/// # Errors
///
/// See [`parse_layout`]; additionally [`LayoutLoadError::Io`] if the file
/// cannot be read.
pub fn load_layout_file(path: &Path) -> Result<KeyLayout, LayoutLoadError> {
    let json = std::fs::read_to_string(path).map_err(|source| LayoutLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_layout(&json, path)
}

/// The compiled-in layout for `name`, if there is one.
pub fn builtin_layout(name: &str) -> Option<KeyLayout> {
    if name != BUILTIN_LAYOUT_NAME {
        return None;
    }
    parse_layout(BUILTIN_LAYOUT_JSON, Path::new("<builtin>")).ok()
}

/// Candidate files for layout `name`, most specific first.
pub fn layout_candidates(
    explicit: Option<&Path>,
    name: &str,
    exe_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Vec<PathBuf> {
    let file_name = format!("{name}.json");
    let mut out = Vec::new();
    if let Some(path) = explicit {
        out.push(path.to_path_buf());
    }
    for dir in [exe_dir, config_dir].into_iter().flatten() {
        out.push(dir.join("layouts").join(&file_name));
    }
    out
}

/// Picks the layout file to load.
///
/// An explicit path is always returned, even if missing, so that loading it
/// reports a proper error.  Otherwise the first existing candidate wins.
pub fn resolve_layout_path(
    explicit: Option<&Path>,
    name: &str,
    exe_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    layout_candidates(None, name, exe_dir, config_dir)
        .into_iter()
        .find(|p| p.is_file())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
