//! 3D Bragg-peak mask construction (spec §4.6 `prepare`/`masked_transform`).

use crate::config::Config;
use crate::peak::RefinedReflection;
use ndarray::Array3;
use nxrefine_store::MaskPeak;

/// Per-frame brightness of the slab around a predicted peak, used to
/// decide which frames of the peak's extent actually need masking
/// (spec §4.6 `prepare`: "mask frames with brightness < 350_000").
pub fn frame_brightness(slab: &Array3<f32>) -> Vec<f64> {
    let (nz, ny, nx) = slab.dim();
    (0..nz)
        .map(|z| {
            let mut sum = 0.0f64;
            for y in 0..ny {
                for x in 0..nx {
                    sum += slab[[z, y, x]] as f64;
                }
            }
            sum
        })
        .collect()
}

/// Half-width (in frames) of the window `expand_peak` masks around a
/// predicted peak.
pub const EXPAND_HALF: i32 = 10;

/// Expand a predicted peak into one `MaskPeak` per unmasked, sufficiently
/// bright frame of its slab, with the radius model `r(f) = max(1,
/// floor(c + a·f^b))` from spec §9, and the wrap-around duplication rule
/// for `z` near the scan boundary.
///
/// `frame_brightness` holds one entry per `df` in `-EXPAND_HALF..=EXPAND_HALF`
/// (indexed by `df + EXPAND_HALF`): a frame whose brightness falls below
/// `Config::min_frame_brightness` is dropped (spec §4.6). A missing entry
/// (slice shorter than `2*EXPAND_HALF+1`) is treated as bright enough to
/// keep, so callers that don't care about the gate can pass `&[]`.
pub fn expand_peak(
    peak: &RefinedReflection,
    shape: (usize, usize, usize),
    config: &Config,
    frame_brightness: &[f64],
) -> Vec<MaskPeak> {
    let z0 = peak.z.clamp(0.0, (shape.0.saturating_sub(1)) as f64);
    let x0 = peak.x.clamp(0.0, (shape.2.saturating_sub(1)) as f64);
    let y0 = peak.y.clamp(0.0, (shape.1.saturating_sub(1)) as f64);

    let half = EXPAND_HALF;
    let mut out = Vec::new();
    for df in -half..=half {
        let frame_offset = df.unsigned_abs() as f64 + 1.0;
        let radius = config.mask_radius(frame_offset);
        let z = z0 + df as f64;
        if z < 0.0 || z >= shape.0 as f64 {
            continue;
        }
        if let Some(&brightness) = frame_brightness.get((df + half) as usize) {
            if brightness < config.min_frame_brightness {
                continue;
            }
        }
        out.push(MaskPeak {
            x: x0,
            y: y0,
            z,
            radius,
            pixel_count: peak.pixel_count,
            h: peak.h,
            k: peak.k,
            l: peak.l,
        });
    }

    // Wrap-around duplication (spec §4.6): for z >= 3600 also emit at
    // z-3600; for z < 50 also emit at z+3600.
    let extra: Vec<MaskPeak> = out
        .iter()
        .filter_map(|p| {
            if p.z >= 3600.0 {
                Some(MaskPeak { z: p.z - 3600.0, ..*p })
            } else if p.z < 50.0 {
                Some(MaskPeak { z: p.z + 3600.0, ..*p })
            } else {
                None
            }
        })
        .collect();
    out.extend(extra);
    out
}

/// Draw a filled disk of `radius` centred at `(x, y)` into `frame`,
/// OR-ing with whatever is already set.
pub fn stamp_disk(frame: &mut ndarray::ArrayViewMut2<i8>, x: f64, y: f64, radius: i32) {
    let (h, w) = frame.dim();
    let r2 = (radius * radius) as f64;
    let cx = x.round() as i32;
    let cy = y.round() as i32;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if (dx * dx + dy * dy) as f64 > r2 {
                continue;
            }
            let (py, px) = (cy + dy, cx + dx);
            if py < 0 || px < 0 || py as usize >= h || px as usize >= w {
                continue;
            }
            frame[[py as usize, px as usize]] = 1;
        }
    }
}

/// Materialise a full 3D `int8` mask volume in chunked fashion (spec
/// §4.6 `masked_transform`): for each chunk of `chunk_size` frames, OR-in
/// every peak whose `z` falls in range.
pub fn build_mask_volume(shape: (usize, usize, usize), peaks: &[MaskPeak], chunk_size: usize) -> Array3<i8> {
    let mut mask = Array3::<i8>::zeros(shape);
    let mut sorted: Vec<&MaskPeak> = peaks.iter().collect();
    sorted.sort_by(|a, b| a.z.partial_cmp(&b.z).unwrap());

    let chunk_size = chunk_size.max(1);
    let mut start = 0;
    while start < shape.0 {
        let end = (start + chunk_size).min(shape.0);
        for peak in sorted.iter() {
            let z = peak.z.round() as i64;
            if z < start as i64 || z >= end as i64 {
                continue;
            }
            let mut frame = mask.index_axis_mut(ndarray::Axis(0), z as usize);
            stamp_disk(&mut frame, peak.x, peak.y, peak.radius);
        }
        start = end;
    }
    mask
}

/// Cross-entry extras (spec §4.6): for a peak with `pixel_count < 0` in
/// this entry, look up the matching `(h,k,l)` across `other_entries` and
/// derive `radius := max(radius) + 20`, `width := ceil((max_count+2)/2)`,
/// emitting masks for `z` in `[z-width, z+width]`.
pub fn cross_entry_extras(
    needing: &RefinedReflection,
    other_entries: &[&[MaskPeak]],
) -> Vec<MaskPeak> {
    let matches: Vec<&MaskPeak> = other_entries
        .iter()
        .flat_map(|entry| entry.iter())
        .filter(|p| p.h == needing.h && p.k == needing.k && p.l == needing.l)
        .collect();
    if matches.is_empty() {
        return Vec::new();
    }

    let max_radius = matches.iter().map(|p| p.radius).max().unwrap_or(1);
    let max_count = matches.iter().map(|p| p.pixel_count.abs()).max().unwrap_or(0);
    let radius = max_radius + 20;
    let width = ((max_count + 2) as f64 / 2.0).ceil() as i64;

    let z0 = needing.z.round() as i64;
    (-width..=width)
        .map(|dz| MaskPeak {
            x: needing.x,
            y: needing.y,
            z: (z0 + dz) as f64,
            radius,
            pixel_count: needing.pixel_count,
            h: needing.h,
            k: needing.k,
            l: needing.l,
        })
        .collect()
}

/// Inputs `Reducer::masked_transform` needs to materialise this entry's
/// mask volume (spec §4.6): its own prepared peaks, any predicted
/// reflections needing a cross-entry extra (`pixel_count < 0`), and the
/// sibling entries' own prepared peaks to resolve those extras against.
pub struct MaskInputs<'a> {
    pub shape: (usize, usize, usize),
    pub own_peaks: &'a [MaskPeak],
    pub needing_cross_entry: &'a [RefinedReflection],
    pub sibling_peaks: &'a [&'a [MaskPeak]],
    pub chunk_size: usize,
}

/// Resolve every cross-entry extra `inputs.needing_cross_entry` requires
/// against `inputs.sibling_peaks`, then materialise the chunked 3D mask
/// volume over `inputs.own_peaks` plus those extras (spec §4.6,
/// `masked_transform`). Returns the extras (for `MaskFile::mask_xyz_extras`)
/// alongside the volume.
pub fn consolidate_mask_volume(inputs: &MaskInputs) -> (Vec<MaskPeak>, Array3<i8>) {
    let extras: Vec<MaskPeak> = inputs
        .needing_cross_entry
        .iter()
        .flat_map(|needing| cross_entry_extras(needing, inputs.sibling_peaks))
        .collect();

    let mut all_peaks: Vec<MaskPeak> = inputs.own_peaks.to_vec();
    all_peaks.extend(extras.iter().copied());
    let volume = build_mask_volume(inputs.shape, &all_peaks, inputs.chunk_size);
    (extras, volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_peak() -> RefinedReflection {
        RefinedReflection {
            x: 4.0,
            y: 4.0,
            z: 50.0,
            intensity: 100.0,
            pixel_count: 10,
            h: 1,
            k: 0,
            l: 0,
            radius: 1,
        }
    }

    #[test]
    fn expand_peak_spans_full_window_without_brightness_gate() {
        let peak = sample_peak();
        let masks = expand_peak(&peak, (100, 8, 8), &Config::default(), &[]);
        assert_eq!(masks.len(), (2 * EXPAND_HALF + 1) as usize);
    }

    #[test]
    fn expand_peak_drops_frames_below_brightness_floor() {
        let peak = sample_peak();
        let config = Config::default();
        let mut brightness = vec![f64::INFINITY; (2 * EXPAND_HALF + 1) as usize];
        // Dim out the z = 50 frame (df = 0).
        brightness[EXPAND_HALF as usize] = config.min_frame_brightness - 1.0;
        let masks = expand_peak(&peak, (100, 8, 8), &config, &brightness);
        assert_eq!(masks.len(), (2 * EXPAND_HALF) as usize);
        assert!(masks.iter().all(|m| (m.z - 50.0).abs() > 1e-9));
    }

    #[test]
    fn stamp_disk_marks_expected_pixel_count() {
        let mut mask = Array3::<i8>::zeros((1, 21, 21));
        {
            let mut frame = mask.index_axis_mut(ndarray::Axis(0), 0);
            stamp_disk(&mut frame, 10.0, 10.0, 3);
        }
        let set: usize = mask.iter().filter(|&&v| v != 0).count();
        assert!(set > 0 && set < 21 * 21);
    }

    #[test]
    fn build_mask_volume_respects_chunking() {
        let peaks = vec![MaskPeak {
            x: 4.0,
            y: 4.0,
            z: 55.0,
            radius: 2,
            pixel_count: 10,
            h: 1,
            k: 0,
            l: 0,
        }];
        let mask = build_mask_volume((100, 8, 8), &peaks, 50);
        assert!(mask.index_axis(ndarray::Axis(0), 55).iter().any(|&v| v != 0));
        assert!(mask.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == 0));
    }

    #[test]
    fn cross_entry_extras_empty_without_match() {
        let needing = RefinedReflection {
            x: 1.0,
            y: 1.0,
            z: 10.0,
            intensity: 1.0,
            pixel_count: -1,
            h: 1,
            k: 1,
            l: 1,
            radius: 1,
        };
        let extras = cross_entry_extras(&needing, &[]);
        assert!(extras.is_empty());
    }

    #[test]
    fn consolidate_mask_volume_materialises_own_and_cross_entry_peaks() {
        let own_peaks = vec![MaskPeak {
            x: 4.0,
            y: 4.0,
            z: 10.0,
            radius: 2,
            pixel_count: 10,
            h: 1,
            k: 0,
            l: 0,
        }];
        let sibling_peaks = vec![MaskPeak {
            x: 5.0,
            y: 5.0,
            z: 60.0,
            radius: 3,
            pixel_count: 8,
            h: 2,
            k: 0,
            l: 0,
        }];
        let needing = RefinedReflection {
            x: 5.0,
            y: 5.0,
            z: 60.0,
            intensity: 1.0,
            pixel_count: -1,
            h: 2,
            k: 0,
            l: 0,
            radius: 1,
        };
        let inputs = MaskInputs {
            shape: (100, 8, 8),
            own_peaks: &own_peaks,
            needing_cross_entry: std::slice::from_ref(&needing),
            sibling_peaks: &[&sibling_peaks],
            chunk_size: 50,
        };
        let (extras, volume) = consolidate_mask_volume(&inputs);

        assert!(!extras.is_empty(), "the needing reflection resolves against the sibling");
        assert!(volume.index_axis(ndarray::Axis(0), 10).iter().any(|&v| v != 0));
        assert!(volume.index_axis(ndarray::Axis(0), 60).iter().any(|&v| v != 0));
    }
}
