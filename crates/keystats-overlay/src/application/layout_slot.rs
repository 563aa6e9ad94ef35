//! The active keyboard layout, shared between the engine and the page
//! renderer.
//!
//! A layout is never edited in place.  Loading builds a complete new
//! [`KeyLayout`] first and only then swaps it in, so a broken file leaves the
//! previous layout (and the engine's allow-list) untouched.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use keystats_core::KeyLayout;

use super::stats_handle::StatsHandle;
use crate::infrastructure::storage::layout_file::{load_layout_file, LayoutLoadError};

#[derive(Clone)]
pub struct LayoutSlot {
    current: Arc<RwLock<Arc<KeyLayout>>>,
}

impl LayoutSlot {
    pub fn new(layout: KeyLayout) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(layout))),
        }
    }

    /// The layout in effect right now.
    pub fn current(&self) -> Arc<KeyLayout> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Makes `layout` active and installs its code set as the engine's
    /// allow-list.  An empty layout accepts every code.
    pub fn apply(&self, layout: KeyLayout, stats: &StatsHandle) {
        stats.set_valid_codes(layout.codes());
        info!("layout '{}' active ({} keys)", layout.name(), layout.len());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(layout);
    }

    /// Loads `path` and applies it.  On error the current layout stays.
    ///
    /// # Errors
    ///
    /// Returns the [`LayoutLoadError`] from reading or validating the file.
    pub fn reload_from(&self, path: &Path, stats: &StatsHandle) -> Result<Arc<KeyLayout>, LayoutLoadError> {
        match load_layout_file(path) {
            Ok(layout) => {
                self.apply(layout, stats);
                Ok(self.current())
            }
            Err(e) => {
                warn!("keeping layout '{}': {e}", self.current().name());
                Err(e)
            }
        }
    }
}

impl Default for LayoutSlot {
    fn default() -> Self {
        Self::new(KeyLayout::empty())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keystats_core::KeyInfo;
    use uuid::Uuid;

    fn two_keys() -> KeyLayout {
        KeyLayout::new(
            "two",
            vec![KeyInfo::new(65, "A", 0.0, 0.0), KeyInfo::new(66, "B", 0.0, 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_apply_installs_allow_list() {
        // Arrange
        let stats = StatsHandle::default();
        let slot = LayoutSlot::default();

        // Act
        slot.apply(two_keys(), &stats);

        // Assert
        assert_eq!(slot.current().name(), "two");
        assert!(!stats.record_press(90));
        assert!(stats.record_press(65));
    }

    #[test]
    fn test_apply_empty_layout_accepts_everything() {
        let stats = StatsHandle::default();
        let slot = LayoutSlot::default();
        slot.apply(two_keys(), &stats);

        slot.apply(KeyLayout::empty(), &stats);

        assert!(stats.record_press(90));
    }

    #[test]
    fn test_reload_failure_keeps_previous_layout() {
        // Arrange
        let stats = StatsHandle::default();
        let slot = LayoutSlot::default();
        slot.apply(two_keys(), &stats);
        let dir = std::env::temp_dir().join(format!("keystats_layout_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        // Act
        let result = slot.reload_from(&path, &stats);

        // Assert
        assert!(result.is_err());
        assert_eq!(slot.current().name(), "two");
        assert!(!stats.record_press(90), "allow-list must be unchanged");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reload_success_swaps_layout() {
        let stats = StatsHandle::default();
        let slot = LayoutSlot::default();
        let dir = std::env::temp_dir().join(format!("keystats_layout_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("one.json");
        std::fs::write(
            &path,
            r#"{"name":"one","keys":[{"vkCode":32,"label":"Space","row":0,"col":0,"width":6}]}"#,
        )
        .unwrap();

        let layout = slot.reload_from(&path, &stats).unwrap();

        assert_eq!(layout.name(), "one");
        assert_eq!(slot.current().label(32), Some("Space"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
