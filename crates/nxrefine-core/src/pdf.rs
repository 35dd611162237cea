//! FFT-based total and difference pair-distribution-function computation
//! (spec §4.7), with Tukey tapering. No FFT need exists in the teacher
//! repo; this is adopted from the wider example pack, grounded on
//! `amenti-labs-openentropy`'s use of `rustfft`.

use ndarray::Array3;
use rustfft::{num_complex::Complex64, FftPlanner};

/// Tukey (tapered cosine) window, `alpha` in `[0, 1]`. `alpha = 0` is a
/// rectangular window, `alpha = 1` is a Hann window.
pub fn tukey_window(n: usize, alpha: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let edge = (alpha * (n as f64 - 1.0) / 2.0).floor() as usize;
    (0..n)
        .map(|i| {
            if alpha == 0.0 {
                1.0
            } else if i < edge {
                0.5 * (1.0 + (std::f64::consts::PI * (2.0 * i as f64 / (alpha * (n as f64 - 1.0)) - 1.0)).cos())
            } else if i >= n - edge {
                0.5 * (1.0
                    + (std::f64::consts::PI
                        * (2.0 * i as f64 / (alpha * (n as f64 - 1.0)) - 2.0 / alpha + 1.0))
                        .cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// Per-axis taper weight `w(z,y,x) = 1/tukey(z) · 1/tukey(y) · 1/tukey(x)`
/// (spec §4.7), with zero-axis samples replaced by half the next sample to
/// avoid dividing by zero at the window edges.
pub fn taper_weights(shape: (usize, usize, usize), alpha: f64) -> Array3<f64> {
    let fix_zero = |mut w: Vec<f64>| {
        if let Some(&next) = w.get(1) {
            if w[0] == 0.0 {
                w[0] = next / 2.0;
            }
        }
        let last = w.len().saturating_sub(1);
        if last > 0 && w[last] == 0.0 {
            let prev = w[last - 1];
            w[last] = prev / 2.0;
        }
        w
    };

    let wz = fix_zero(tukey_window(shape.0, alpha));
    let wy = fix_zero(tukey_window(shape.1, alpha));
    let wx = fix_zero(tukey_window(shape.2, alpha));

    Array3::from_shape_fn(shape, |(z, y, x)| 1.0 / wz[z] * 1.0 / wy[y] * 1.0 / wx[x])
}

/// `fftshift` along every axis: swaps the two halves so the zero-frequency
/// component sits at the volume's center.
pub fn fftshift(v: &Array3<Complex64>) -> Array3<Complex64> {
    let (nz, ny, nx) = v.dim();
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
        let sz = (z + nz / 2) % nz;
        let sy = (y + ny / 2) % ny;
        let sx = (x + nx / 2) % nx;
        v[[sz, sy, sx]]
    })
}

fn fft3_inplace(v: &mut Array3<Complex64>, forward: bool) {
    let (nz, ny, nx) = v.dim();
    let mut planner = FftPlanner::<f64>::new();

    let fft_x = if forward { planner.plan_fft_forward(nx) } else { planner.plan_fft_inverse(nx) };
    for z in 0..nz {
        for y in 0..ny {
            let mut row: Vec<Complex64> = (0..nx).map(|x| v[[z, y, x]]).collect();
            fft_x.process(&mut row);
            for (x, val) in row.into_iter().enumerate() {
                v[[z, y, x]] = val;
            }
        }
    }

    let fft_y = if forward { planner.plan_fft_forward(ny) } else { planner.plan_fft_inverse(ny) };
    for z in 0..nz {
        for x in 0..nx {
            let mut col: Vec<Complex64> = (0..ny).map(|y| v[[z, y, x]]).collect();
            fft_y.process(&mut col);
            for (y, val) in col.into_iter().enumerate() {
                v[[z, y, x]] = val;
            }
        }
    }

    let fft_z = if forward { planner.plan_fft_forward(nz) } else { planner.plan_fft_inverse(nz) };
    for y in 0..ny {
        for x in 0..nx {
            let mut col: Vec<Complex64> = (0..nz).map(|z| v[[z, y, x]]).collect();
            fft_z.process(&mut col);
            for (z, val) in col.into_iter().enumerate() {
                v[[z, y, x]] = val;
            }
        }
    }
}

/// Real-to-complex PDF transform: taper, centred 3D FFT with `fftshift`
/// around both input and output, scaled by `1/N` (spec §4.7).
pub struct PdfEngine {
    pub tukey_alpha: f64,
}

impl PdfEngine {
    pub fn new(tukey_alpha: f64) -> Self {
        Self { tukey_alpha }
    }

    /// `volume` is the (already index-stripped) symmetrized signal volume.
    /// Returns the real part of the centred, normalised FFT.
    pub fn transform(&self, volume: &Array3<f64>) -> Array3<f64> {
        let shape = volume.dim();
        let weights = taper_weights(shape, self.tukey_alpha);
        let tapered = volume * &weights;

        let mut complex = tapered.mapv(|v| Complex64::new(v, 0.0));
        complex = fftshift(&complex);
        fft3_inplace(&mut complex, true);
        complex = fftshift(&complex);

        let n = (shape.0 * shape.1 * shape.2) as f64;
        complex.mapv(|c| c.re / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tukey_alpha_zero_is_rectangular() {
        let w = tukey_window(10, 0.0);
        assert!(w.iter().all(|&v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn tukey_alpha_one_tapers_edges_to_zero() {
        let w = tukey_window(11, 1.0);
        assert!(w[0].abs() < 1e-9);
        assert!((w[5] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fftshift_round_trips() {
        let v = Array3::from_shape_fn((4, 4, 4), |(z, y, x)| Complex64::new((z + y + x) as f64, 0.0));
        let shifted = fftshift(&v);
        let back = fftshift(&shifted);
        assert_eq!(v, back);
    }

    #[test]
    fn transform_of_constant_volume_peaks_at_center() {
        let volume = Array3::<f64>::from_elem((8, 8, 8), 1.0);
        let engine = PdfEngine::new(0.5);
        let result = engine.transform(&volume);
        let center = result[[4, 4, 4]].abs();
        let corner = result[[0, 0, 0]].abs();
        assert!(center >= corner);
    }
}
