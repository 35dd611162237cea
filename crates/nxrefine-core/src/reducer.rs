//! Per-entry reduction orchestration (spec §4.6): owns one rotation scan,
//! exposes the `link, max, find, copy, refine, prepare, transform,
//! masked_transform` stages, each gated by "already complete"/`overwrite`
//! and recorded in both the wrapper file and the task database.

use crate::blob::BlobDetector;
use crate::config::Config;
use crate::error::{ReduceError, Result};
use crate::logs::{derive_monitor, parse_head_log, parse_meta_csv};
use crate::mask::{consolidate_mask_volume, expand_peak, MaskInputs, EXPAND_HALF};
use crate::merge::PeakMerger;
use crate::peak::{Peak, RefinedReflection};
use crate::prepare::{extract_slab, frame_brightness, has_gap, optimize_z};
use crate::radial::{detect_always_firing, radial_integrate};
use crate::raw::RawDataSource;
use crate::refine::{refine_three_stage, OrientationMatrix, Refiner};
use crate::transform::Transformer;
use ndarray::Array2;
use nxrefine_server::{Logger, Status, TaskDatabase};
use nxrefine_store::{Field, MaskFile, MaskPeak, ProcessRecord, Value, WrapperFile};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info_span;

pub const VERSION: &str = concat!("nxrefine v", env!("CARGO_PKG_VERSION"));

/// Stage names in the order they execute (spec §5, "Ordering").
pub const STAGE_ORDER: &[&str] = &[
    "nxlink",
    "nxmax",
    "nxfind",
    "nxcopy",
    "nxrefine",
    "nxprepare_mask",
    "nxtransform",
];

/// Owns one rotation scan at a single detector position.
pub struct Reducer {
    pub wrapper: WrapperFile,
    pub entry: String,
    pub sample: String,
    pub scan: String,
    pub directory: PathBuf,
    pub config: Config,
    db: Arc<TaskDatabase>,
    file_id: i64,
    logger: Logger,
}

fn machine_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl Reducer {
    pub fn new(
        wrapper: WrapperFile,
        entry: impl Into<String>,
        sample: impl Into<String>,
        scan: impl Into<String>,
        directory: PathBuf,
        config: Config,
        db: Arc<TaskDatabase>,
        file_id: i64,
        logger: Logger,
    ) -> Self {
        Self {
            wrapper,
            entry: entry.into(),
            sample: sample.into(),
            scan: scan.into(),
            directory,
            config,
            db,
            file_id,
            logger,
        }
    }

    /// `true` if the stage is already DONE and the caller didn't request
    /// overwrite (spec §4.9 state machine).
    fn should_skip(&mut self, stage: &'static str, overwrite: bool) -> bool {
        let complete = self.wrapper.has_process(&self.entry, stage);
        if complete && overwrite {
            self.wrapper.clear_process(&self.entry, stage);
            false
        } else {
            complete
        }
    }

    fn record_start(&self, stage: &'static str) -> Result<()> {
        self.db.queue_task(self.file_id, &self.entry, stage)?;
        self.db.start_task(self.file_id, &self.entry, stage)?;
        self.logger.info(&format!("{stage} started"));
        Ok(())
    }

    fn record_success(&mut self, stage: &'static str, parameters: BTreeMap<String, String>) -> Result<()> {
        let record = ProcessRecord {
            program: stage.to_string(),
            sequence_index: self.wrapper.sequence_index(&self.entry),
            version: VERSION.to_string(),
            machine: machine_name(),
            directory: self.directory.display().to_string(),
            parameters,
        };
        self.wrapper.record(&self.entry, record);
        self.wrapper.save()?;
        self.db.end_task(self.file_id, &self.entry, stage)?;
        self.logger.info(&format!("{stage} complete"));
        Ok(())
    }

    fn record_failure(&self, stage: &'static str, err: &ReduceError) -> Result<()> {
        self.db.fail_task(self.file_id, &self.entry, stage)?;
        self.logger.error(&format!("{stage} failed: {err}"));
        Ok(())
    }

    fn prereq(&self, stage: &'static str, prereq: &'static str) -> Result<()> {
        if !self.wrapper.has_process(&self.entry, prereq) {
            return Err(ReduceError::PrereqIncomplete {
                stage,
                prereq,
                entry: self.entry.clone(),
            });
        }
        Ok(())
    }

    fn entry_field_f64(&self, path: &str) -> Option<f64> {
        self.wrapper.float_at(&self.entry, path)
    }

    fn set_entry_field(&mut self, name: &str, value: impl Into<Value>) {
        self.wrapper
            .ensure_entry(&self.entry.clone())
            .insert_field(name, Field::new(value));
    }

    // ---- link ---------------------------------------------------------

    /// spec §4.6 `link`: construct/patch the `data` group, transfer logs,
    /// derive monitor channels, shift the acquisition epoch.
    pub fn link(
        &mut self,
        shape: (usize, usize, usize),
        raw_timestamp: f64,
        head_log: Option<&str>,
        meta_csv: Option<&str>,
        overwrite: bool,
    ) -> Result<()> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxlink").entered();
        if self.should_skip("nxlink", overwrite) {
            return Ok(());
        }
        self.record_start("nxlink")?;

        let result = (|| -> Result<BTreeMap<String, String>> {
            self.set_entry_field("frame_count", shape.0 as i64);
            self.set_entry_field("start_time", crate::logs::shift_epoch(raw_timestamp));

            let mut params = BTreeMap::new();
            match head_log {
                Some(text) => {
                    let parsed = parse_head_log(text);
                    params.insert("log_keys".to_string(), parsed.len().to_string());
                }
                None => self.logger.warn("no _head.txt metadata file found"),
            }
            if let Some(text) = meta_csv {
                let columns = parse_meta_csv(text);
                if let Some(mcs1) = columns.get("MCS1") {
                    let monitor1 = derive_monitor(mcs1, shape.0);
                    self.set_entry_field("monitor1_mean", monitor1.iter().sum::<f64>() / monitor1.len().max(1) as f64);
                }
                if let Some(mcs2) = columns.get("MCS2") {
                    let monitor2 = derive_monitor(mcs2, shape.0);
                    self.set_entry_field("monitor2_mean", monitor2.iter().sum::<f64>() / monitor2.len().max(1) as f64);
                }
            } else {
                self.logger.warn("no _meta.txt metadata file found");
            }
            Ok(params)
        })();

        match result {
            Ok(params) => self.record_success("nxlink", params),
            Err(err) => {
                self.record_failure("nxlink", &err)?;
                Err(err)
            }
        }
    }

    // ---- max ------------------------------------------------------------

    /// spec §4.6 `max`: frame-sum vector, detector-sum image, always-
    /// firing pixel augmentation, radial profile.
    pub fn max(&mut self, raw: &dyn RawDataSource, overwrite: bool) -> Result<f64> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxmax").entered();
        if self.should_skip("nxmax", overwrite) {
            return Ok(self.entry_field_f64("maximum").unwrap_or(0.0));
        }
        self.record_start("nxmax")?;

        let (nz, ny, nx) = raw.shape();
        let mut vsum = Array2::<f64>::zeros((ny, nx));
        let mut maximum = f64::MIN;
        let mut fsum = Vec::with_capacity(nz);

        for z in 0..nz {
            let frame = raw.read_frame(z);
            let sum: f64 = frame.iter().map(|&v| v as f64).sum();
            fsum.push(sum);
            for ((y, x), &v) in frame.indexed_iter() {
                vsum[[y, x]] += v as f64;
                maximum = maximum.max(v as f64);
            }
        }
        if nz == 0 {
            maximum = 0.0;
        }

        let first_ten: Vec<_> = (0..nz.min(10)).map(|z| raw.read_frame(z)).collect();
        let mut mask = ndarray::Array2::<i8>::zeros((ny, nx));
        detect_always_firing(&first_ten, &mut mask);

        let center = (ny as f64 / 2.0, nx as f64 / 2.0);
        let profile = radial_integrate(vsum.view(), center, 2048, 0.99);

        self.set_entry_field("maximum", maximum);
        self.set_entry_field("summed_frames", fsum.iter().sum::<f64>());

        let mut params = BTreeMap::new();
        params.insert("maximum".to_string(), maximum.to_string());
        params.insert("radial_bins".to_string(), profile.len().to_string());
        self.record_success("nxmax", params)?;
        Ok(maximum)
    }

    // ---- find -----------------------------------------------------------

    /// spec §4.6 `find`: `threshold = maximum/10` if not set, then run
    /// blob detection + merge over `[first, last)`.
    pub fn find(
        &mut self,
        raw: &dyn RawDataSource,
        mask: Option<&Array2<i8>>,
        first: usize,
        last: usize,
        threshold: Option<f64>,
        overwrite: bool,
    ) -> Result<Vec<Peak>> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxfind").entered();
        if self.should_skip("nxfind", overwrite) {
            return Ok(Vec::new());
        }
        self.prereq("nxfind", "nxmax")?;
        self.record_start("nxfind")?;

        let result = (|| -> Result<(f64, Vec<Peak>)> {
            let threshold = match threshold {
                Some(t) => t,
                None => {
                    let maximum = self
                        .entry_field_f64("maximum")
                        .ok_or_else(|| ReduceError::PrereqIncomplete {
                            stage: "nxfind",
                            prereq: "nxmax",
                            entry: self.entry.clone(),
                        })?;
                    maximum / 10.0
                }
            };
            if threshold <= 0.0 {
                return Err(ReduceError::InvalidGrid("threshold must be > 0".to_string()));
            }

            let detector = BlobDetector::new(threshold, self.config.min_blob_pixels);
            let mut blobs = Vec::new();
            for z in first..last {
                let frame = raw.read_frame(z);
                blobs.extend(detector.detect(frame.view(), mask.map(|m| m.view()), z as f64));
            }

            let merger = PeakMerger::new(threshold, self.config.pixel_tolerance, self.config.frame_tolerance);
            Ok((threshold, merger.merge(blobs)))
        })();

        match result {
            Ok((threshold, peaks)) => {
                let mut params = BTreeMap::new();
                params.insert("peak_count".to_string(), peaks.len().to_string());
                // Store the threshold actually used, independent of whether
                // any peak survived it (invariant (v): threshold > 0).
                self.set_entry_field("threshold", threshold);
                self.record_success("nxfind", params)?;
                Ok(peaks)
            }
            Err(err) => {
                self.record_failure("nxfind", &err)?;
                Err(err)
            }
        }
    }

    // ---- copy -----------------------------------------------------------

    const COPIED_FIELDS: &'static [&'static str] = &[
        "instrument/monochromator/wavelength",
        "instrument/detector/distance",
        "instrument/detector/pixel_size",
    ];

    /// spec §4.6 `copy`: copy sample/instrument parameters from the
    /// resolved parent entry into this entry.
    pub fn copy(&mut self, parent: &WrapperFile, parent_entry: &str, overwrite: bool) -> Result<()> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxcopy").entered();
        if self.should_skip("nxcopy", overwrite) {
            return Ok(());
        }
        self.record_start("nxcopy")?;

        let mut params = BTreeMap::new();
        for path in Self::COPIED_FIELDS {
            if let Some(group) = parent.entry(parent_entry) {
                if let Some(node) = nxrefine_store::walk(group, path) {
                    if let Some(value) = node.as_field().and_then(|f| f.value.clone()) {
                        let leaf = path.rsplit('/').next().unwrap();
                        self.wrapper
                            .ensure_entry(&self.entry.clone())
                            .insert_field(leaf, Field::new(value));
                        params.insert(leaf.to_string(), "copied".to_string());
                    }
                }
            }
        }
        self.record_success("nxcopy", params)
    }

    // ---- refine -----------------------------------------------------------

    /// spec §4.6 `refine`: three successive optimisations using the peak
    /// list from `find`.
    pub fn refine(
        &mut self,
        refiner: &dyn Refiner,
        peaks: &[Peak],
        seed: &OrientationMatrix,
        overwrite: bool,
    ) -> Result<OrientationMatrix> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxrefine").entered();
        if self.should_skip("nxrefine", overwrite) {
            return Ok(seed.clone());
        }
        self.prereq("nxrefine", "nxfind")?;
        self.record_start("nxrefine")?;

        match refine_three_stage(refiner, peaks, seed) {
            Ok(report) => {
                self.set_entry_field("a", report.orientation.a);
                self.set_entry_field("b", report.orientation.b);
                self.set_entry_field("c", report.orientation.c);
                let mut params = BTreeMap::new();
                params.insert("fit_report".to_string(), report.report.clone());
                self.record_success("nxrefine", params)?;
                Ok(report.orientation)
            }
            Err(err) => {
                self.record_failure("nxrefine", &err)?;
                Err(err)
            }
        }
    }

    // ---- prepare (mask) ---------------------------------------------------

    /// spec §4.6 `prepare`: optimise each predicted peak's `z`, mask dim
    /// frames, expand into per-frame `MaskPeak`s with the radius model.
    pub fn prepare(
        &mut self,
        raw: &dyn RawDataSource,
        predicted: &[RefinedReflection],
        overwrite: bool,
    ) -> Result<Vec<MaskPeak>> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxprepare_mask").entered();
        if self.should_skip("nxprepare_mask", overwrite) {
            return Ok(Vec::new());
        }
        self.prereq("nxprepare_mask", "nxrefine")?;
        self.record_start("nxprepare_mask")?;

        let shape = raw.shape();
        let mut all_peaks = Vec::new();
        for peak in predicted {
            // `pixel_count < 0` marks a reflection that needs a cross-entry
            // extra instead (spec §4.6): `masked_transform` resolves those
            // against the sibling entries' own prepared peaks.
            if peak.pixel_count < 0 {
                continue;
            }
            let mut slab = extract_slab(raw, peak.x, peak.y, peak.z, 10, 10);
            if has_gap(&slab) {
                slab = extract_slab(raw, peak.x, peak.y, peak.z, 30, 30);
            }
            let optimized_z = optimize_z(&slab);
            let refined = RefinedReflection {
                z: peak.z - slab.z_offset as f64 + optimized_z,
                ..*peak
            };

            // Map the slab's per-frame brightness onto the `df` window
            // `expand_peak` masks, so frames below `min_frame_brightness`
            // are dropped before any `MaskPeak` is emitted for them.
            let brightness = frame_brightness(&slab);
            let slab_start = peak.z.round() as i64 - slab.z_offset as i64;
            let refined_frame = refined.z.round() as i64;
            let mut brightness_by_df = vec![f64::INFINITY; (2 * EXPAND_HALF + 1) as usize];
            for df in -EXPAND_HALF..=EXPAND_HALF {
                let slab_index = refined_frame + df as i64 - slab_start;
                if slab_index >= 0 && (slab_index as usize) < brightness.len() {
                    brightness_by_df[(df + EXPAND_HALF) as usize] = brightness[slab_index as usize];
                }
            }

            all_peaks.extend(expand_peak(&refined, shape, &self.config, &brightness_by_df));
        }

        let mut params = BTreeMap::new();
        params.insert("peaks_inferred".to_string(), all_peaks.len().to_string());
        self.record_success("nxprepare_mask", params)?;
        Ok(all_peaks)
    }

    // ---- transform --------------------------------------------------------

    /// spec §4.6 `transform`: write the settings file and invoke the
    /// external transform subprocess.
    pub fn transform(
        &mut self,
        transformer: &dyn Transformer,
        settings: &nxrefine_store::TransformSettings,
        overwrite: bool,
    ) -> Result<()> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxtransform").entered();
        if self.should_skip("nxtransform", overwrite) {
            return Ok(());
        }
        self.prereq("nxtransform", "nxrefine")?;
        self.record_start("nxtransform")?;

        match transformer.transform(settings) {
            Ok(outcome) => {
                let mut params = BTreeMap::new();
                params.insert("command".to_string(), outcome.command_line);
                params.insert("stdout".to_string(), outcome.stdout);
                params.insert("stderr".to_string(), outcome.stderr);
                self.record_success("nxtransform", params)
            }
            Err(err) => {
                self.record_failure("nxtransform", &err)?;
                Err(err)
            }
        }
    }

    /// spec §4.6 `masked_transform`: requires all sibling entries'
    /// `prepare` to be complete. Consolidates this entry's own mask peaks
    /// with any cross-entry extras resolved against the siblings'
    /// prepared peaks, materialises the chunked 3D mask volume, and saves
    /// it to `settings.mask_file` before invoking the masked transform.
    pub fn masked_transform(
        &mut self,
        transformer: &dyn Transformer,
        settings: &nxrefine_store::TransformSettings,
        siblings_ready: bool,
        mask_inputs: &MaskInputs,
        overwrite: bool,
    ) -> Result<()> {
        let _span = info_span!("stage", sample = %self.sample, scan = %self.scan, entry = %self.entry, stage = "nxmasked_transform").entered();
        if self.should_skip("nxmasked_transform", overwrite) {
            return Ok(());
        }
        if !siblings_ready {
            return Err(ReduceError::PrereqIncomplete {
                stage: "nxmasked_transform",
                prereq: "nxprepare_mask (all entries)",
                entry: self.entry.clone(),
            });
        }
        self.record_start("nxmasked_transform")?;

        let result = (|| -> Result<(usize, String)> {
            let (extras, volume) = consolidate_mask_volume(mask_inputs);
            let peak_count = mask_inputs.own_peaks.len() + extras.len();
            if let Some(mask_path) = &settings.mask_file {
                let mut mask_file = MaskFile::new(mask_path);
                mask_file.mask_xyz = mask_inputs.own_peaks.to_vec();
                mask_file.mask_xyz_extras = extras;
                mask_file.mask = Some(volume);
                mask_file.save()?;
            }
            let outcome = transformer.transform(settings)?;
            Ok((peak_count, outcome.command_line))
        })();

        match result {
            Ok((peak_count, command_line)) => {
                let mut params = BTreeMap::new();
                params.insert("mask_peak_count".to_string(), peak_count.to_string());
                params.insert("command".to_string(), command_line);
                self.record_success("nxmasked_transform", params)
            }
            Err(err) => {
                self.record_failure("nxmasked_transform", &err)?;
                Err(err)
            }
        }
    }

    pub fn task_status(&self, stage: &str) -> Result<Option<Status>> {
        Ok(self
            .db
            .get_task(self.file_id, &self.entry, stage)?
            .map(|t| t.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::InMemoryRaw;
    use crate::refine::fakes::IdentityRefiner;
    use crate::transform::fakes::FakeTransformer;
    use ndarray::Array3;
    use nxrefine_server::Logger as Lgr;

    fn make_reducer(dir: &std::path::Path) -> Reducer {
        let wrapper = WrapperFile::new(dir.join("s_1.nxs"));
        let db = Arc::new(TaskDatabase::open_in_memory().unwrap());
        let file_id = db.register_file("s_1.nxs").unwrap();
        db.register_entry(file_id, "f1").unwrap();
        let logger = Lgr::to_file(dir.join("nxlogger.log"), "s_1['f1']", false).unwrap();
        Reducer::new(wrapper, "f1", "s", "1", dir.to_path_buf(), Config::default(), db, file_id, logger)
    }

    #[test]
    fn find_requires_max_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut reducer = make_reducer(dir.path());
        let raw = InMemoryRaw::new(Array3::<f32>::zeros((10, 8, 8)));
        let err = reducer.find(&raw, None, 0, 10, None, false).unwrap_err();
        assert!(matches!(err, ReduceError::PrereqIncomplete { .. }));
    }

    #[test]
    fn max_then_find_detects_seeded_gaussian() {
        let dir = tempfile::tempdir().unwrap();
        let mut reducer = make_reducer(dir.path());
        let mut data = Array3::<f32>::zeros((100, 8, 8));
        data[[50, 4, 4]] = 10000.0;
        data[[50, 4, 5]] = 3000.0;
        data[[50, 3, 4]] = 3000.0;
        data[[50, 5, 4]] = 3000.0;
        data[[50, 4, 3]] = 3000.0;
        let raw = InMemoryRaw::new(data);

        let maximum = reducer.max(&raw, false).unwrap();
        assert_eq!(maximum, 10000.0);

        let peaks = reducer.find(&raw, None, 0, 100, None, false).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].z - 50.0).abs() < 0.5);
        assert!((peaks[0].x - 4.0).abs() < 0.5);
    }

    #[test]
    fn stage_is_idempotent_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut reducer = make_reducer(dir.path());
        let raw = InMemoryRaw::new(Array3::<f32>::zeros((10, 8, 8)));
        reducer.max(&raw, false).unwrap();
        assert!(reducer.wrapper.has_process("f1", "nxmax"));
        // Second call should short-circuit without touching the DB again.
        let second = reducer.max(&raw, false).unwrap();
        assert_eq!(second, 0.0);
    }

    #[test]
    fn transform_failure_records_fail_and_leaves_wrapper_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut reducer = make_reducer(dir.path());
        reducer
            .wrapper
            .record(
                "f1",
                ProcessRecord {
                    program: "nxrefine".to_string(),
                    sequence_index: 1,
                    version: VERSION.to_string(),
                    machine: "h".to_string(),
                    directory: "d".to_string(),
                    parameters: BTreeMap::new(),
                },
            );
        let transformer = FakeTransformer { succeed: false };
        let axis = |name: &str| nxrefine_store::AxisSpec {
            name: name.to_string(),
            start: -1.0,
            step: 0.1,
            stop: 1.0,
        };
        let settings = nxrefine_store::TransformSettings {
            hkl_axes: [axis("H"), axis("K"), axis("L")],
            input_files: vec![],
            output_file: dir.path().join("f1_transform.nxs"),
            mask_file: None,
        };
        let err = reducer.transform(&transformer, &settings, false).unwrap_err();
        assert!(matches!(err, ReduceError::SubprocessFailed { .. }));
        assert!(!reducer.wrapper.has_process("f1", "nxtransform"));
    }

    #[test]
    fn refine_runs_identity_refiner() {
        let dir = tempfile::tempdir().unwrap();
        let mut reducer = make_reducer(dir.path());
        reducer
            .wrapper
            .record(
                "f1",
                ProcessRecord {
                    program: "nxfind".to_string(),
                    sequence_index: 1,
                    version: VERSION.to_string(),
                    machine: "h".to_string(),
                    directory: "d".to_string(),
                    parameters: BTreeMap::new(),
                },
            );
        let refiner = IdentityRefiner;
        let seed = OrientationMatrix {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            a: 5.0,
            b: 5.0,
            c: 5.0,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        };
        let result = reducer.refine(&refiner, &[], &seed, false).unwrap();
        assert_eq!(result.a, 5.0);
        assert!(reducer.wrapper.has_process("f1", "nxrefine"));
    }
}
