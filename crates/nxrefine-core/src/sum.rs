//! Sum-across-scans utility (spec §4.8): verify per-entry raw data and
//! `monitor1` presence across a list of scans, then add raw volumes and
//! monitor channels chunkwise, preserving the first scan's mask.

use crate::error::{ReduceError, Result};
use crate::raw::RawDataSource;
use ndarray::{Array2, Array3};

/// One scan's contribution to a sum: its raw data source, monitor
/// channels, and (optionally) its mask.
pub struct SumInput<'a> {
    pub raw: &'a dyn RawDataSource,
    pub monitor1: Vec<f64>,
    pub monitor2: Vec<f64>,
    pub mask: Option<Array2<i8>>,
}

pub struct SumOutput {
    pub raw: Array3<f32>,
    pub monitor1: Vec<f64>,
    pub monitor2: Vec<f64>,
    pub mask: Option<Array2<i8>>,
}

/// Sum every scan's raw volume, read in `chunk_size`-frame chunks (spec
/// §4.8: "copy the first scan's raw file as the destination, then add
/// subsequent scans chunkwise"), and sum the monitor channels.
///
/// Fails if any scan is missing `monitor1` or its shape disagrees with the
/// first scan's (spec §4.8: "verify per-entry raw data files and
/// `monitor1` presence").
pub fn nxsum(inputs: &[SumInput<'_>], chunk_size: usize) -> Result<SumOutput> {
    let first = inputs
        .first()
        .ok_or_else(|| ReduceError::InvalidGrid("nxsum requires at least one scan".to_string()))?;
    if first.monitor1.is_empty() {
        return Err(ReduceError::InvalidGrid("scan 0 is missing monitor1".to_string()));
    }
    let shape = first.raw.shape();

    let mut total = Array3::<f32>::zeros(shape);
    let mut monitor1 = first.monitor1.clone();
    let mut monitor2 = first.monitor2.clone();

    for (i, input) in inputs.iter().enumerate() {
        if input.monitor1.is_empty() {
            return Err(ReduceError::InvalidGrid(format!("scan {i} is missing monitor1")));
        }
        if input.raw.shape() != shape {
            return Err(ReduceError::InvalidGrid(format!(
                "scan {i} shape {:?} does not match scan 0 shape {:?}",
                input.raw.shape(),
                shape
            )));
        }

        if i > 0 {
            let (nz, _, _) = shape;
            let mut z = 0;
            while z < nz {
                let z1 = (z + chunk_size).min(nz);
                let chunk = input.raw.read_chunk(z, z1);
                let mut dest = total.slice_mut(ndarray::s![z..z1, .., ..]);
                dest += &chunk;
                z = z1;
            }
            for (dest, src) in monitor1.iter_mut().zip(input.monitor1.iter()) {
                *dest += src;
            }
            for (dest, src) in monitor2.iter_mut().zip(input.monitor2.iter()) {
                *dest += src;
            }
        } else {
            let (nz, _, _) = shape;
            let mut z = 0;
            while z < nz {
                let z1 = (z + chunk_size).min(nz);
                let chunk = input.raw.read_chunk(z, z1);
                total.slice_mut(ndarray::s![z..z1, .., ..]).assign(&chunk);
                z = z1;
            }
        }
    }

    Ok(SumOutput {
        raw: total,
        monitor1,
        monitor2,
        mask: first.mask.clone(),
    })
}
