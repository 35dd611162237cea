//! The `.pars` settings file handed to the external `cctw` transform
//! subprocess (spec §6, "Subprocess contracts").

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One reciprocal-space axis of the HKL transform grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub name: String,
    pub start: f64,
    pub step: f64,
    pub stop: f64,
}

impl AxisSpec {
    pub fn len(&self) -> usize {
        if self.step == 0.0 {
            return 0;
        }
        (((self.stop - self.start) / self.step).round() as isize + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The settings record written before invoking `cctw transform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSettings {
    pub hkl_axes: [AxisSpec; 3],
    pub input_files: Vec<PathBuf>,
    pub output_file: PathBuf,
    pub mask_file: Option<PathBuf>,
}

impl TransformSettings {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_len_matches_linspace_count() {
        let axis = AxisSpec {
            name: "H".into(),
            start: -5.0,
            step: 0.5,
            stop: 5.0,
        };
        assert_eq!(axis.len(), 21);
    }

    #[test]
    fn write_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1_transform.pars");
        let settings = TransformSettings {
            hkl_axes: [
                AxisSpec {
                    name: "H".into(),
                    start: -5.0,
                    step: 0.1,
                    stop: 5.0,
                },
                AxisSpec {
                    name: "K".into(),
                    start: -5.0,
                    step: 0.1,
                    stop: 5.0,
                },
                AxisSpec {
                    name: "L".into(),
                    start: -5.0,
                    step: 0.1,
                    stop: 5.0,
                },
            ],
            input_files: vec![PathBuf::from("f1.h5")],
            output_file: PathBuf::from("f1_transform.nxs"),
            mask_file: None,
        };
        settings.write(&path).unwrap();
        let read_back = TransformSettings::read(&path).unwrap();
        assert_eq!(read_back.hkl_axes[0].name, "H");
    }
}
