//! The mask record: a sibling file per entry (spec §3, "Mask record").
//!
//! Holds the predicted-peak list used to build the 3D mask plus the
//! materialised `int8` mask volume itself.

use crate::error::{Result, StoreError};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One predicted Bragg peak position used to punch a disk into the mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskPeak {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: i32,
    /// Negative when this entry needs a cross-entry extra (spec §4.6,
    /// `masked_transform`): `pixel_count < 0` marks "look up this HKL in
    /// siblings".
    pub pixel_count: i64,
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

/// The full mask record for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskFile {
    #[serde(skip)]
    path: PathBuf,
    pub peaks_inferred: Vec<MaskPeak>,
    pub mask_xyz: Vec<MaskPeak>,
    pub mask_xyz_edges: Vec<MaskPeak>,
    pub mask_xyz_extras: Vec<MaskPeak>,
    pub mask: Option<Array3<i8>>,
}

impl MaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            peaks_inferred: Vec::new(),
            mask_xyz: Vec::new(),
            mask_xyz_edges: Vec::new(),
            mask_xyz_extras: Vec::new(),
            mask: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mut file: MaskFile = serde_json::from_str(&data)?;
        file.path = path;
        Ok(file)
    }

    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string(self)?;
        std::fs::write(&self.path, data).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e,
        })
    }

    /// All peaks that should contribute a disk to the mask volume: the
    /// inferred predictions, the detector-edge entries, and any cross-entry
    /// extras, sorted by `z` as required before chunked mask materialisation
    /// (spec §4.6, `masked_transform`).
    pub fn all_mask_peaks(&self) -> Vec<MaskPeak> {
        let mut all = Vec::with_capacity(
            self.mask_xyz.len() + self.mask_xyz_edges.len() + self.mask_xyz_extras.len(),
        );
        all.extend_from_slice(&self.mask_xyz);
        all.extend_from_slice(&self.mask_xyz_edges);
        all.extend_from_slice(&self.mask_xyz_extras);
        all.sort_by(|a, b| a.z.partial_cmp(&b.z).unwrap());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_mask_peaks_sorted_by_z() {
        let mut m = MaskFile::new("/tmp/f1_mask.nxs");
        m.mask_xyz.push(MaskPeak {
            x: 1.0,
            y: 1.0,
            z: 5.0,
            radius: 2,
            pixel_count: 1,
            h: 0,
            k: 0,
            l: 0,
        });
        m.mask_xyz_edges.push(MaskPeak {
            x: 1.0,
            y: 1.0,
            z: 1.0,
            radius: 2,
            pixel_count: 1,
            h: 0,
            k: 0,
            l: 0,
        });
        let all = m.all_mask_peaks();
        assert_eq!(all[0].z, 1.0);
        assert_eq!(all[1].z, 5.0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1_mask.nxs");
        let mut m = MaskFile::new(&path);
        m.peaks_inferred.push(MaskPeak {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            radius: 4,
            pixel_count: 10,
            h: 1,
            k: 0,
            l: 0,
        });
        m.save().unwrap();
        let loaded = MaskFile::load(&path).unwrap();
        assert_eq!(loaded.peaks_inferred.len(), 1);
        assert_eq!(loaded.peaks_inferred[0].h, 1);
    }
}
