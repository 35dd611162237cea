//! Process-wide numeric defaults (spec §4.10), loaded from a packaged
//! `config.toml` and overridable by environment for tests.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Storage-format native chunk size floor (frames).
    pub chunk_size_floor: usize,
    pub pixel_tolerance: f64,
    pub frame_tolerance: f64,
    /// Mask-radius model `r(f) = max(1, floor(c + a * f^b))`.
    pub mask_radius_a: f64,
    pub mask_radius_b: f64,
    pub mask_radius_c: f64,
    /// Memory headroom bumped onto the storage library's size limit, in MB.
    pub memory_headroom_mb: u64,
    pub tukey_alpha: f64,
    /// Minimum masked-blob pixel count to accept (spec §4.5).
    pub min_blob_pixels: u32,
    /// Per-frame brightness floor below which a predicted-peak frame is
    /// masked out during `prepare` (spec §4.6).
    pub min_frame_brightness: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size_floor: 50,
            pixel_tolerance: 50.0,
            frame_tolerance: 10.0,
            mask_radius_a: 1.3858,
            mask_radius_b: 0.330556764635949,
            mask_radius_c: -94.21,
            memory_headroom_mb: 1000,
            tukey_alpha: 0.5,
            min_blob_pixels: 5,
            min_frame_brightness: 350_000.0,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> crate::error::Result<Self> {
        toml::from_str(s).map_err(|e| crate::error::ReduceError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Radius model from spec.md §4.6 / §9: `r(f) = max(1, floor(Re(c + a*f^b)))`.
    pub fn mask_radius(&self, frame_offset: f64) -> i32 {
        let r = self.mask_radius_c + self.mask_radius_a * frame_offset.powf(self.mask_radius_b);
        r.floor().max(1.0) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_packaged_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size_floor, 50);
        assert_eq!(cfg.mask_radius_c, -94.21);
    }

    #[test]
    fn round_trip_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).unwrap();
        let parsed = Config::from_toml_str(&s).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn mask_radius_is_at_least_one() {
        let cfg = Config::default();
        assert!(cfg.mask_radius(0.0) >= 1);
        assert!(cfg.mask_radius(1.0) >= 1);
    }
}
