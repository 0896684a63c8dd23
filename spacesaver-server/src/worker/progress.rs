//! The worker's progress field (§4.4 step 3, §9 Design Notes "duck-typed
//! progress field"): a small non-durable cell the `/status` handler reads,
//! guarded by `parking_lot` rather than folded into the catalog's durable
//! state on the hot path.

use parking_lot::RwLock;
use spacesaver_core::MediaId;

#[derive(Debug, Clone)]
pub struct EncodeProgress {
    pub id: MediaId,
    pub path: String,
    /// 0.0-1.0, parsed from the encoder's own progress reporting.
    pub fraction: f32,
}

#[derive(Default)]
pub struct ProgressCell(RwLock<Option<EncodeProgress>>);

impl ProgressCell {
    pub fn new() -> Self {
        Self(RwLock::new(None))
    }

    pub fn set(&self, progress: EncodeProgress) {
        *self.0.write() = Some(progress);
    }

    pub fn update_fraction(&self, fraction: f32) {
        if let Some(current) = self.0.write().as_mut() {
            current.fraction = fraction;
        }
    }

    /// Cleared whenever the entry driving it is no longer `IN_PROGRESS`
    /// (§4.4: "Progress field may be wiped whenever the entry is not
    /// IN_PROGRESS").
    pub fn clear(&self) {
        *self.0.write() = None;
    }

    pub fn snapshot(&self) -> Option<EncodeProgress> {
        self.0.read().clone()
    }
}
