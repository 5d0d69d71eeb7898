//! User profile values consumed by the calorie model

use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

/// Body weight used when no profile has been synced
pub const DEFAULT_WEIGHT_KG: u32 = 65;

/// Source of the user's body weight, read at every calorie recomputation
pub trait WeightProvider: Send + Sync {
    fn weight_kg(&self) -> u32;
}

/// Fixed weight, mostly for tests and replay
#[derive(Debug, Clone, Copy)]
pub struct FixedWeight(pub u32);

impl WeightProvider for FixedWeight {
    fn weight_kg(&self) -> u32 {
        self.0
    }
}

/// Profile synced from the companion device. Shared between the command
/// listener (writer) and the engine (reader).
#[derive(Debug)]
pub struct ProfileStore {
    weight_kg: AtomicU32,
    /// 0 until synced
    height_cm: AtomicU32,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(DEFAULT_WEIGHT_KG)
    }
}

impl ProfileStore {
    pub fn new(weight_kg: u32) -> Self {
        let weight_kg = if weight_kg == 0 { DEFAULT_WEIGHT_KG } else { weight_kg };
        Self { weight_kg: AtomicU32::new(weight_kg), height_cm: AtomicU32::new(0) }
    }

    /// Update the weight; zero is ignored. Returns whether the value was taken.
    pub fn set_weight_kg(&self, weight_kg: u32) -> bool {
        if weight_kg == 0 {
            return false;
        }
        let previous = self.weight_kg.swap(weight_kg, Ordering::Relaxed);
        if previous != weight_kg {
            info!(previous = %previous, weight_kg = %weight_kg, "profile_weight_updated");
        }
        true
    }

    /// Update the height; zero is ignored. Not used by the calorie model.
    pub fn set_height_cm(&self, height_cm: u32) -> bool {
        if height_cm == 0 {
            return false;
        }
        self.height_cm.store(height_cm, Ordering::Relaxed);
        true
    }

    pub fn height_cm(&self) -> Option<u32> {
        match self.height_cm.load(Ordering::Relaxed) {
            0 => None,
            h => Some(h),
        }
    }
}

impl WeightProvider for ProfileStore {
    #[inline]
    fn weight_kg(&self) -> u32 {
        self.weight_kg.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weight() {
        assert_eq!(ProfileStore::default().weight_kg(), 65);
        assert_eq!(ProfileStore::new(0).weight_kg(), 65);
    }

    #[test]
    fn test_zero_weight_ignored() {
        let store = ProfileStore::new(70);
        assert!(!store.set_weight_kg(0));
        assert_eq!(store.weight_kg(), 70);
        assert!(store.set_weight_kg(82));
        assert_eq!(store.weight_kg(), 82);
    }

    #[test]
    fn test_height_unset_until_synced() {
        let store = ProfileStore::default();
        assert_eq!(store.height_cm(), None);
        assert!(!store.set_height_cm(0));
        assert!(store.set_height_cm(178));
        assert_eq!(store.height_cm(), Some(178));
    }
}
