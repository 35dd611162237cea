//! Subprocess contracts for `cctw transform`, `cctw merge`, and the Matern
//! interpolator (spec §6). Modeled as trait objects with a real
//! `std::process::Command`-backed implementation and a test-only fake, so
//! `nxrefine-core`'s own tests never need the actual external executables.

use crate::error::{ReduceError, Result};
use ndarray::{Array3, Ix3};
use nxrefine_store::{AxisSpec, TransformSettings};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Outcome of a successful subprocess invocation, stored into the process
/// record (spec §4.6 `transform`: "record stdout, stderr, and the command
/// line").
#[derive(Debug, Clone)]
pub struct SubprocessOutcome {
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
}

fn run_and_capture(mut command: Command, program: &str) -> Result<SubprocessOutcome> {
    let command_line = format!("{:?}", command);
    let output = command.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        return Err(ReduceError::SubprocessFailed {
            program: program.to_string(),
            code: output.status.code(),
            stderr,
        });
    }
    Ok(SubprocessOutcome {
        command_line,
        stdout,
        stderr,
    })
}

/// The `cctw transform <settings>` contract.
pub trait Transformer: Send + Sync {
    fn transform(&self, settings: &TransformSettings) -> Result<SubprocessOutcome>;
}

/// The `cctw merge <inputs…> -o <output>` contract.
pub trait Merger: Send + Sync {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<SubprocessOutcome>;
}

/// The Julia-based Matern-3 Laplace interpolator contract: `(3D array,
/// list of indices) -> dense 3D array of the same shape`.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, volume: &Array3<f64>, indices: &[(usize, usize, usize)]) -> Result<Array3<f64>>;
}

/// Real `cctw`-backed transformer, invoked as an external process.
pub struct CctwTransformer {
    pub executable: PathBuf,
}

impl CctwTransformer {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Transformer for CctwTransformer {
    fn transform(&self, settings: &TransformSettings) -> Result<SubprocessOutcome> {
        let settings_path = settings.output_file.with_extension("pars");
        settings.write(&settings_path)?;
        let mut command = Command::new(&self.executable);
        command.arg("transform").arg(&settings_path);
        run_and_capture(command, "cctw transform")
    }
}

pub struct CctwMerger {
    pub executable: PathBuf,
}

impl CctwMerger {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Merger for CctwMerger {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<SubprocessOutcome> {
        let mut command = Command::new(&self.executable);
        command.arg("merge");
        for input in inputs {
            command.arg(input);
        }
        command.arg("-o").arg(output);
        run_and_capture(command, "cctw merge")
    }
}

/// Real Matern interpolator, shelling out to an external Julia driver
/// script that reads/writes the volume via a temp `.npy`-equivalent JSON
/// payload. The wire format itself is an external collaborator's concern;
/// only the process boundary is modeled here.
pub struct JuliaMaternInterpolator {
    pub executable: PathBuf,
}

impl JuliaMaternInterpolator {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Interpolator for JuliaMaternInterpolator {
    fn interpolate(&self, volume: &Array3<f64>, indices: &[(usize, usize, usize)]) -> Result<Array3<f64>> {
        let tmp = tempfile::NamedTempFile::new()?;
        let payload = serde_json::json!({
            "shape": volume.dim(),
            "values": volume.as_slice().unwrap_or(&[]),
            "indices": indices,
        });
        std::fs::write(tmp.path(), serde_json::to_vec(&payload)?)?;

        let mut command = Command::new(&self.executable);
        command.arg(tmp.path());
        let outcome = run_and_capture(command, "matern_3d_grid")?;

        let result: Vec<f64> = serde_json::from_str(&outcome.stdout)
            .map_err(|e| ReduceError::InvalidGrid(format!("malformed interpolator output: {e}")))?;
        Array3::from_shape_vec(volume.raw_dim().into_pattern(), result)
            .map(|a| a.into_dimensionality::<Ix3>().unwrap())
            .map_err(|e| ReduceError::InvalidGrid(e.to_string()))
    }
}

/// Test-only fakes, so `nxrefine-core`'s own test suite never shells out.
#[cfg(any(test, feature = "test-fakes"))]
pub mod fakes {
    use super::*;

    pub struct FakeTransformer {
        pub succeed: bool,
    }

    impl Transformer for FakeTransformer {
        fn transform(&self, settings: &TransformSettings) -> Result<SubprocessOutcome> {
            if self.succeed {
                Ok(SubprocessOutcome {
                    command_line: format!("cctw transform {:?}", settings.output_file),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            } else {
                Err(ReduceError::SubprocessFailed {
                    program: "cctw transform".to_string(),
                    code: Some(1),
                    stderr: "synthetic failure".to_string(),
                })
            }
        }
    }

    pub struct FakeMerger {
        pub succeed: bool,
    }

    impl Merger for FakeMerger {
        fn merge(&self, _inputs: &[PathBuf], _output: &Path) -> Result<SubprocessOutcome> {
            if self.succeed {
                Ok(SubprocessOutcome {
                    command_line: "cctw merge".to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            } else {
                Err(ReduceError::SubprocessFailed {
                    program: "cctw merge".to_string(),
                    code: Some(1),
                    stderr: "synthetic failure".to_string(),
                })
            }
        }
    }

    /// Identity interpolator: returns the input volume unchanged except at
    /// the requested indices, which are set to the mean of all input
    /// values — enough structure for tests to assert "something changed".
    pub struct FakeInterpolator;

    impl Interpolator for FakeInterpolator {
        fn interpolate(&self, volume: &Array3<f64>, indices: &[(usize, usize, usize)]) -> Result<Array3<f64>> {
            let mean = volume.mean().unwrap_or(0.0);
            let mut out = volume.clone();
            for &(z, y, x) in indices {
                out[[z, y, x]] = mean;
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    fn test_settings() -> TransformSettings {
        let axis = |name: &str| AxisSpec {
            name: name.to_string(),
            start: -5.0,
            step: 0.1,
            stop: 5.0,
        };
        TransformSettings {
            hkl_axes: [axis("H"), axis("K"), axis("L")],
            input_files: vec![],
            output_file: PathBuf::from("/tmp/f1_transform.nxs"),
            mask_file: None,
        }
    }

    #[test]
    fn fake_transformer_reports_command_line() {
        let transformer = FakeTransformer { succeed: true };
        let settings = test_settings();
        let outcome = transformer.transform(&settings).unwrap();
        assert!(outcome.command_line.contains("transform"));
    }

    #[test]
    fn fake_transformer_failure_surfaces_subprocess_failed() {
        let transformer = FakeTransformer { succeed: false };
        let settings = test_settings();
        let err = transformer.transform(&settings).unwrap_err();
        assert!(matches!(err, ReduceError::SubprocessFailed { .. }));
    }

    #[test]
    fn fake_interpolator_fills_requested_indices() {
        let volume = Array3::<f64>::from_elem((2, 2, 2), 10.0);
        let interpolator = FakeInterpolator;
        let result = interpolator.interpolate(&volume, &[(0, 0, 0)]).unwrap();
        assert_eq!(result[[0, 0, 0]], 10.0);
    }
}
