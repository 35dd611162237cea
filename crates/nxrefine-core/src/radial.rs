//! The detector-pixel maximum, always-firing pixel detection, and 1D
//! radial integration used by the `max` stage (spec §4.6).
//!
//! The real azimuthal-integrator geometry correction is an external
//! collaborator (spec §1); this implements a plain distance-from-center
//! binning so `max` has a concrete radial sum to write, without pulling
//! in the external calibration library.

use ndarray::{Array2, ArrayView2};

/// Augments `mask` in place with pixels that fire identically across the
/// first 10 frames: `pixel_max == pixel_mean && pixel_mean >= 100`
/// (spec §4.6 `max`).
pub fn detect_always_firing(first_frames: &[Array2<f32>], mask: &mut Array2<i8>) {
    if first_frames.is_empty() {
        return;
    }
    let (h, w) = first_frames[0].dim();
    let n = first_frames.len() as f64;

    for y in 0..h {
        for x in 0..w {
            let values: Vec<f64> = first_frames.iter().map(|f| f[[y, x]] as f64).collect();
            let pixel_max = values.iter().cloned().fold(f64::MIN, f64::max);
            let pixel_mean = values.iter().sum::<f64>() / n;
            if (pixel_max - pixel_mean).abs() < 1e-9 && pixel_mean >= 100.0 {
                mask[[y, x]] = 1;
            }
        }
    }
}

/// Radial integration of a summed detector image around `center`, into
/// `n_bins` bins out to the image's maximum corner distance, with a
/// polarization correction factor applied multiplicatively.
pub fn radial_integrate(image: ArrayView2<f64>, center: (f64, f64), n_bins: usize, polarization: f64) -> Vec<f64> {
    let (h, w) = image.dim();
    let max_r = [(0.0, 0.0), (0.0, w as f64), (h as f64, 0.0), (h as f64, w as f64)]
        .iter()
        .map(|&(y, x)| ((y - center.0).powi(2) + (x - center.1).powi(2)).sqrt())
        .fold(0.0_f64, f64::max);

    let mut sums = vec![0.0_f64; n_bins];
    let mut counts = vec![0u64; n_bins];
    let bin_width = if max_r > 0.0 { max_r / n_bins as f64 } else { 1.0 };

    for y in 0..h {
        for x in 0..w {
            let r = ((y as f64 - center.0).powi(2) + (x as f64 - center.1).powi(2)).sqrt();
            let bin = ((r / bin_width) as usize).min(n_bins - 1);
            sums[bin] += image[[y, x]] * polarization;
            counts[bin] += 1;
        }
    }

    sums.iter()
        .zip(counts.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn always_firing_pixel_is_flagged() {
        let frames: Vec<Array2<f32>> = (0..10)
            .map(|_| {
                let mut f = Array2::<f32>::zeros((4, 4));
                f[[1, 1]] = 150.0;
                f
            })
            .collect();
        let mut mask = Array2::<i8>::zeros((4, 4));
        detect_always_firing(&frames, &mut mask);
        assert_eq!(mask[[1, 1]], 1);
        assert_eq!(mask[[0, 0]], 0);
    }

    #[test]
    fn low_mean_always_firing_pixel_not_flagged() {
        let frames: Vec<Array2<f32>> = (0..10)
            .map(|_| {
                let mut f = Array2::<f32>::zeros((4, 4));
                f[[1, 1]] = 50.0;
                f
            })
            .collect();
        let mut mask = Array2::<i8>::zeros((4, 4));
        detect_always_firing(&frames, &mut mask);
        assert_eq!(mask[[1, 1]], 0);
    }

    #[test]
    fn radial_integrate_center_bin_is_nonzero() {
        let mut image = Array2::<f64>::zeros((10, 10));
        image[[5, 5]] = 100.0;
        let profile = radial_integrate(image.view(), (5.0, 5.0), 8, 0.99);
        assert_eq!(profile.len(), 8);
        assert!(profile[0] > 0.0);
    }
}
