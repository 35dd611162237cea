//! Cross-frame blob coalescence (spec §4.5), grounded in
//! `NXpeak.__eq__`/`combine`/`merge` from `nxreduce.py`.
//!
//! The merge rule is accepted as non-transitive under first-match-wins
//! (spec §9, Design Notes, Open Question "Peak-merge non-transitivity").

use crate::peak::{Peak, RawBlob};

/// Merges per-frame raw blobs into 3D peaks using the first-match-wins
/// rule from spec §4.5: try the previous frame's blobs first, then scan
/// the merged list in reverse while still within `frame_tolerance`.
pub struct PeakMerger {
    pub threshold: f64,
    pub pixel_tolerance: f64,
    pub frame_tolerance: f64,
}

impl PeakMerger {
    pub fn new(threshold: f64, pixel_tolerance: f64, frame_tolerance: f64) -> Self {
        Self {
            threshold,
            pixel_tolerance,
            frame_tolerance,
        }
    }

    /// `blobs` need not be pre-sorted; this sorts by `z` internally, as
    /// spec §4.5 specifies ("sort all raw blobs by z").
    pub fn merge(&self, mut blobs: Vec<RawBlob>) -> Vec<Peak> {
        blobs.sort_by(|a, b| a.z.partial_cmp(&b.z).unwrap());

        let mut merged: Vec<Peak> = Vec::new();
        let mut prev_frame_indices: Vec<usize> = Vec::new();
        let mut this_frame_indices: Vec<usize> = Vec::new();
        let mut current_z: Option<f64> = None;

        for blob in blobs {
            if current_z != Some(blob.z) {
                prev_frame_indices = std::mem::take(&mut this_frame_indices);
                current_z = Some(blob.z);
            }

            let mut matched_idx = None;

            for &i in &prev_frame_indices {
                if merged[i].matches(&blob) {
                    matched_idx = Some(i);
                    break;
                }
            }

            if matched_idx.is_none() {
                for i in (0..merged.len()).rev() {
                    if merged[i].z < blob.z - self.frame_tolerance {
                        break;
                    }
                    if merged[i].matches(&blob) {
                        matched_idx = Some(i);
                        break;
                    }
                }
            }

            let idx = match matched_idx {
                Some(i) => {
                    merged[i].combine(blob);
                    i
                }
                None => {
                    let peak = Peak::from_blob(
                        blob,
                        self.threshold,
                        self.pixel_tolerance,
                        self.frame_tolerance,
                    );
                    merged.push(peak);
                    merged.len() - 1
                }
            };
            this_frame_indices.push(idx);
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(z: f64, x: f64, y: f64) -> RawBlob {
        RawBlob {
            np: 10,
            average: 100.0,
            x,
            y,
            z,
            sigx: 1.0,
            sigy: 1.0,
            covxy: 0.0,
        }
    }

    #[test]
    fn adjacent_frames_merge_into_one_peak() {
        let merger = PeakMerger::new(10.0, 50.0, 10.0);
        let peaks = merger.merge(vec![blob(50.0, 4.0, 4.0), blob(51.0, 4.0, 4.0)]);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].np, 20);
    }

    #[test]
    fn distant_peaks_on_same_frame_stay_separate() {
        let merger = PeakMerger::new(10.0, 50.0, 10.0);
        let peaks = merger.merge(vec![blob(0.0, 4.0, 4.0), blob(0.0, 60.0, 60.0)]);
        assert_eq!(peaks.len(), 2);
    }

    #[test]
    fn out_of_tolerance_frames_stay_separate() {
        let merger = PeakMerger::new(10.0, 50.0, 10.0);
        let peaks = merger.merge(vec![blob(0.0, 4.0, 4.0), blob(61.0, 4.0, 4.0)]);
        assert_eq!(peaks.len(), 2);
    }

    #[test]
    fn single_blob_produces_single_peak() {
        let merger = PeakMerger::new(10.0, 50.0, 10.0);
        let peaks = merger.merge(vec![blob(50.0, 4.0, 4.0)]);
        assert_eq!(peaks.len(), 1);
        assert!(!peaks[0].combined);
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let merger = PeakMerger::new(10.0, 50.0, 10.0);
        assert!(merger.merge(vec![]).is_empty());
    }
}
