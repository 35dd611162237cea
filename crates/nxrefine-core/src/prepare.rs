//! Predicted-peak slab optimisation for the `prepare` stage (spec §4.6).

use crate::raw::RawDataSource;
use ndarray::Array3;

/// A candidate slab around a predicted peak position.
pub struct Slab {
    pub data: Array3<f32>,
    /// Index of `z0` within the slab's first axis.
    pub z_offset: usize,
    pub y_offset: usize,
    pub x_offset: usize,
}

/// Extract a `(2*half_z+1) × (2*half_xy+1) × (2*half_xy+1)` slab around
/// `(x, y, z)`, clamped to the volume bounds.
pub fn extract_slab(raw: &dyn RawDataSource, x: f64, y: f64, z: f64, half_z: usize, half_xy: usize) -> Slab {
    let (nz, ny, nx) = raw.shape();
    let zi = z.round() as i64;
    let yi = y.round() as i64;
    let xi = x.round() as i64;

    let z0 = (zi - half_z as i64).clamp(0, nz as i64 - 1) as usize;
    let z1 = (zi + half_z as i64).clamp(0, nz as i64 - 1) as usize;
    let y0 = (yi - half_xy as i64).clamp(0, ny as i64 - 1) as usize;
    let y1 = (yi + half_xy as i64).clamp(0, ny as i64 - 1) as usize;
    let x0 = (xi - half_xy as i64).clamp(0, nx as i64 - 1) as usize;
    let x1 = (xi + half_xy as i64).clamp(0, nx as i64 - 1) as usize;

    let chunk = raw.read_chunk(z0, z1 + 1);
    let data = chunk.slice(ndarray::s![.., y0..=y1, x0..=x1]).to_owned();

    Slab {
        data,
        z_offset: (zi - z0 as i64).max(0) as usize,
        y_offset: (yi - y0 as i64).max(0) as usize,
        x_offset: (xi - x0 as i64).max(0) as usize,
    }
}

/// `true` if the slab contains a detector gap, signalled by a negative
/// pixel value (spec §4.6: "if the slab includes detector gaps (signal <
/// 0), widen").
pub fn has_gap(slab: &Slab) -> bool {
    slab.data.iter().any(|&v| v < 0.0)
}

/// Optimise the peak's `z` position within the slab via a linear-
/// background-subtracted first moment along the frame axis.
pub fn optimize_z(slab: &Slab) -> f64 {
    let (nz, _, _) = slab.data.dim();
    let per_frame: Vec<f64> = (0..nz)
        .map(|z| slab.data.index_axis(ndarray::Axis(0), z).iter().map(|&v| v as f64).sum())
        .collect();

    let background = (per_frame.first().copied().unwrap_or(0.0) + per_frame.last().copied().unwrap_or(0.0)) / 2.0;
    let weighted: f64 = per_frame
        .iter()
        .enumerate()
        .map(|(z, &v)| (v - background).max(0.0) * z as f64)
        .sum();
    let total: f64 = per_frame.iter().map(|&v| (v - background).max(0.0)).sum();

    if total <= 0.0 {
        slab.z_offset as f64
    } else {
        weighted / total
    }
}

/// Per-frame brightness within the slab, used to decide which frames are
/// masked out for being too dim (spec §4.6: "brightness < 350_000").
pub fn frame_brightness(slab: &Slab) -> Vec<f64> {
    crate::mask::frame_brightness(&slab.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::InMemoryRaw;

    #[test]
    fn extract_slab_clamps_to_bounds() {
        let data = Array3::<f32>::zeros((10, 8, 8));
        let raw = InMemoryRaw::new(data);
        let slab = extract_slab(&raw, 0.0, 0.0, 0.0, 10, 10);
        assert!(slab.data.dim().0 <= 10);
    }

    #[test]
    fn optimize_z_finds_peak_centered_in_slab() {
        let mut data = Array3::<f32>::zeros((21, 5, 5));
        data[[10, 2, 2]] = 1000.0;
        let raw = InMemoryRaw::new(data);
        let slab = extract_slab(&raw, 2.0, 2.0, 10.0, 10, 2);
        let z = optimize_z(&slab);
        assert!((z - 10.0).abs() < 1.0);
    }

    #[test]
    fn has_gap_detects_negative_signal() {
        let mut data = Array3::<f32>::zeros((3, 3, 3));
        data[[1, 1, 1]] = -1.0;
        let slab = Slab {
            data,
            z_offset: 1,
            y_offset: 1,
            x_offset: 1,
        };
        assert!(has_gap(&slab));
    }
}
