//! 2D connected-component peak extraction per frame (spec §4.5).
//!
//! Hand-rolled union-find over 8-connected above-threshold pixels, rather
//! than pulling in an image-processing crate — the rest of this workspace
//! favors direct array manipulation over such dependencies.

use crate::peak::RawBlob;
use ndarray::ArrayView2;

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Extracts connected components above `threshold` from a single detector
/// frame, rejecting components that fail the spec's acceptance rule:
/// masked center pixel, near-zero average, or `np < min_blob_pixels`.
pub struct BlobDetector {
    pub threshold: f64,
    pub min_blob_pixels: u32,
}

impl BlobDetector {
    pub fn new(threshold: f64, min_blob_pixels: u32) -> Self {
        Self {
            threshold,
            min_blob_pixels,
        }
    }

    /// `frame` is a single `(y, x)` detector image; `mask` (if given) marks
    /// always-firing/bad pixels at the same shape. `z` is this frame's
    /// index, stamped onto every emitted blob.
    pub fn detect(&self, frame: ArrayView2<f32>, mask: Option<ArrayView2<i8>>, z: f64) -> Vec<RawBlob> {
        let (h, w) = frame.dim();
        let n = h * w;
        let idx = |y: usize, x: usize| y * w + x;

        let mut uf = UnionFind::new(n);
        let above: Vec<bool> = frame.iter().map(|&v| (v as f64) >= self.threshold).collect();

        for y in 0..h {
            for x in 0..w {
                if !above[idx(y, x)] {
                    continue;
                }
                for (dy, dx) in [(-1i32, 0i32), (-1, -1), (-1, 1), (0, -1)] {
                    let (ny, nx) = (y as i32 + dy, x as i32 + dx);
                    if ny < 0 || nx < 0 || ny as usize >= h || nx as usize >= w {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if above[idx(ny, nx)] {
                        uf.union(idx(y, x), idx(ny, nx));
                    }
                }
            }
        }

        use std::collections::HashMap;
        let mut groups: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        for y in 0..h {
            for x in 0..w {
                if above[idx(y, x)] {
                    let root = uf.find(idx(y, x));
                    groups.entry(root).or_default().push((y, x));
                }
            }
        }

        let mut blobs = Vec::new();
        for pixels in groups.into_values() {
            let np = pixels.len() as u32;
            let sum: f64 = pixels.iter().map(|&(y, x)| frame[[y, x]] as f64).sum();
            if np == 0 || sum == 0.0 {
                continue;
            }
            let average = sum / np as f64;

            let sx: f64 = pixels.iter().map(|&(y, x)| frame[[y, x]] as f64 * x as f64).sum();
            let sy: f64 = pixels.iter().map(|&(y, x)| frame[[y, x]] as f64 * y as f64).sum();
            let cx = sx / sum;
            let cy = sy / sum;

            let sxx: f64 = pixels
                .iter()
                .map(|&(y, x)| frame[[y, x]] as f64 * (x as f64 - cx).powi(2))
                .sum::<f64>()
                / sum;
            let syy: f64 = pixels
                .iter()
                .map(|&(y, x)| frame[[y, x]] as f64 * (y as f64 - cy).powi(2))
                .sum::<f64>()
                / sum;
            let sxy: f64 = pixels
                .iter()
                .map(|&(y, x)| frame[[y, x]] as f64 * (x as f64 - cx) * (y as f64 - cy))
                .sum::<f64>()
                / sum;

            let (cyi, cxi) = (cy.floor() as usize, cx.floor() as usize);
            if let Some(mask) = mask {
                if cyi < mask.dim().0 && cxi < mask.dim().1 && mask[[cyi, cxi]] != 0 {
                    continue;
                }
            }
            if average.abs() < 1e-12 || np < self.min_blob_pixels {
                continue;
            }

            blobs.push(RawBlob {
                np,
                average,
                x: cx,
                y: cy,
                z,
                sigx: sxx.sqrt(),
                sigy: syy.sqrt(),
                covxy: sxy,
            });
        }

        blobs.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap());
        blobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn single_gaussian_blob_is_detected() {
        let mut frame = Array2::<f32>::zeros((8, 8));
        frame[[4, 4]] = 10000.0;
        frame[[4, 5]] = 5000.0;
        frame[[3, 4]] = 3000.0;
        frame[[5, 4]] = 3000.0;
        frame[[4, 3]] = 3000.0;
        frame[[3, 3]] = 1000.0;
        let detector = BlobDetector::new(1000.0, 5);
        let blobs = detector.detect(frame.view(), None, 50.0);
        assert_eq!(blobs.len(), 1);
        let blob = &blobs[0];
        assert!(blob.np >= 5);
        assert!((blob.x - 4.0).abs() < 0.5);
        assert!((blob.y - 4.0).abs() < 0.5);
    }

    #[test]
    fn two_distinct_blobs_on_one_frame() {
        let mut frame = Array2::<f32>::zeros((64, 64));
        for (cy, cx) in [(4usize, 4usize), (60, 60)] {
            frame[[cy, cx]] = 10000.0;
            frame[[cy, cx + 1]] = 3000.0;
            frame[[cy + 1, cx]] = 3000.0;
            frame[[cy - 1, cx]] = 3000.0;
            frame[[cy, cx - 1]] = 3000.0;
            frame[[cy - 1, cx - 1]] = 1000.0;
        }
        let detector = BlobDetector::new(500.0, 5);
        let blobs = detector.detect(frame.view(), None, 0.0);
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn below_min_pixel_count_is_rejected() {
        let mut frame = Array2::<f32>::zeros((8, 8));
        frame[[4, 4]] = 10000.0;
        let detector = BlobDetector::new(1000.0, 5);
        let blobs = detector.detect(frame.view(), None, 0.0);
        assert!(blobs.is_empty());
    }

    #[test]
    fn masked_center_pixel_is_rejected() {
        let mut frame = Array2::<f32>::zeros((8, 8));
        frame[[4, 4]] = 10000.0;
        frame[[4, 5]] = 5000.0;
        frame[[3, 4]] = 3000.0;
        frame[[5, 4]] = 3000.0;
        frame[[4, 3]] = 3000.0;
        let mut mask = Array2::<i8>::zeros((8, 8));
        mask[[4, 4]] = 1;
        let detector = BlobDetector::new(1000.0, 3);
        let blobs = detector.detect(frame.view(), Some(mask.view()), 0.0);
        assert!(blobs.is_empty());
    }
}
