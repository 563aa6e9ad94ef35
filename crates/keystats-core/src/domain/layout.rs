//! Keyboard layout map.
//!
//! A [`KeyLayout`] maps each key code to its label and its position on a
//! unit grid (row, column, width, height measured in key units).  Pixel
//! geometry is derived from [`DisplayMetrics`]:
//!
//! ```text
//! x = col · (unit_width + spacing)
//! y = row · (unit_height + spacing)
//! w = width · unit_width + (width − 1) · spacing
//! h = height · unit_height + (height − 1) · spacing
//! ```
//!
//! The layout is read-only once built.  Switching layouts means building a
//! new one and swapping it in whole.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use super::input::KeyCode;

/// Errors raised while building a layout.
#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    /// Two entries share the same key code.
    #[error("duplicate key code {0} in layout")]
    DuplicateCode(KeyCode),

    /// A key has a zero, negative, or non-finite size.
    #[error("key {code} has invalid size {width}x{height}")]
    InvalidSize { code: KeyCode, width: f64, height: f64 },

    /// A key has a negative or non-finite grid position.
    #[error("key {code} has invalid position row={row} col={col}")]
    InvalidPosition { code: KeyCode, row: f64, col: f64 },
}

/// Pixel constants for rendering a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub unit_width: u32,
    pub unit_height: u32,
    pub key_spacing: u32,
}

impl Default for DisplayMetrics {
    fn default() -> Self {
        Self {
            unit_width: 40,
            unit_height: 40,
            key_spacing: 4,
        }
    }
}

/// Pixel rectangle of a rendered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl KeyGeometry {
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

/// One key of a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    pub code: KeyCode,
    pub label: String,
    pub row: f64,
    pub col: f64,
    pub width: f64,
    pub height: f64,
}

impl KeyInfo {
    /// A 1×1 key at `(row, col)`.
    pub fn new(code: KeyCode, label: impl Into<String>, row: f64, col: f64) -> Self {
        Self {
            code,
            label: label.into(),
            row,
            col,
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn validate(&self) -> Result<(), LayoutError> {
        let size_ok = |v: f64| v.is_finite() && v > 0.0;
        if !size_ok(self.width) || !size_ok(self.height) {
            return Err(LayoutError::InvalidSize {
                code: self.code,
                width: self.width,
                height: self.height,
            });
        }
        let pos_ok = |v: f64| v.is_finite() && v >= 0.0;
        if !pos_ok(self.row) || !pos_ok(self.col) {
            return Err(LayoutError::InvalidPosition {
                code: self.code,
                row: self.row,
                col: self.col,
            });
        }
        Ok(())
    }
}

impl DisplayMetrics {
    /// Pixel rectangle for `key` under these metrics.
    pub fn geometry(&self, key: &KeyInfo) -> KeyGeometry {
        let uw = f64::from(self.unit_width);
        let uh = f64::from(self.unit_height);
        let sp = f64::from(self.key_spacing);
        KeyGeometry {
            x: (key.col * (uw + sp)) as i32,
            y: (key.row * (uh + sp)) as i32,
            width: (key.width * uw + (key.width - 1.0) * sp) as i32,
            height: (key.height * uh + (key.height - 1.0) * sp) as i32,
        }
    }
}

/// An immutable code → key map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyLayout {
    name: String,
    metrics: Option<DisplayMetrics>,
    keys: BTreeMap<KeyCode, KeyInfo>,
}

impl KeyLayout {
    /// Builds a layout, rejecting duplicate codes and malformed geometry.
    ///
    /// # Errors
    ///
    /// Returns the first [`LayoutError`] found; nothing is partially built.
    pub fn new(name: impl Into<String>, keys: Vec<KeyInfo>) -> Result<Self, LayoutError> {
        let mut map = BTreeMap::new();
        for key in keys {
            key.validate()?;
            let code = key.code;
            if map.insert(code, key).is_some() {
                return Err(LayoutError::DuplicateCode(code));
            }
        }
        Ok(Self {
            name: name.into(),
            metrics: None,
            keys: map,
        })
    }

    /// An empty layout.  Used when no layout file could be found.
    pub fn empty() -> Self {
        Self {
            name: "empty".to_string(),
            metrics: None,
            keys: BTreeMap::new(),
        }
    }

    /// Attaches layout-specific pixel metrics that take precedence over the
    /// configured display metrics.
    pub fn with_metrics(mut self, metrics: DisplayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> Option<DisplayMetrics> {
        self.metrics
    }

    /// Metrics to render with: the layout's own, else `fallback`.
    pub fn effective_metrics(&self, fallback: DisplayMetrics) -> DisplayMetrics {
        self.metrics.unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in ascending code order.
    pub fn keys(&self) -> impl Iterator<Item = &KeyInfo> {
        self.keys.values()
    }

    pub fn get(&self, code: KeyCode) -> Option<&KeyInfo> {
        self.keys.get(&code)
    }

    pub fn label(&self, code: KeyCode) -> Option<&str> {
        self.keys.get(&code).map(|k| k.label.as_str())
    }

    pub fn codes(&self) -> BTreeSet<KeyCode> {
        self.keys.keys().copied().collect()
    }

    pub fn geometry(&self, code: KeyCode, metrics: &DisplayMetrics) -> Option<KeyGeometry> {
        self.keys.get(&code).map(|k| metrics.geometry(k))
    }

    /// Pixel size `(width, height)` of the smallest box containing every key.
    pub fn bounds(&self, metrics: &DisplayMetrics) -> (u32, u32) {
        self.keys
            .values()
            .map(|k| metrics.geometry(k))
            .fold((0u32, 0u32), |(w, h), g| {
                (w.max(g.right().max(0) as u32), h.max(g.bottom().max(0) as u32))
            })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
