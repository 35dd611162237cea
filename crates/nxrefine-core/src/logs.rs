//! Metadata-log transfer for the `link` stage (spec §4.6).
//!
//! Parses the `<entry>_head.txt` (`key, value` per line) and
//! `<entry>_meta.txt` (CSV with header) sidecar files produced by the
//! detector acquisition software, and derives the `monitor1`/`monitor2`
//! channels used downstream by `nxsum`.

use std::collections::BTreeMap;

/// Raw epoch used by the acquisition timestamp attribute is 1990, not
/// 1970; shift by 20 years of seconds to get a Unix timestamp (spec
/// §4.6 `link`).
pub const EPOCH_SHIFT_SECONDS: i64 = 20 * 365 * 24 * 3600 + 5 * 24 * 3600; // +5 leap days

pub fn shift_epoch(raw_timestamp: f64) -> i64 {
    raw_timestamp as i64 + EPOCH_SHIFT_SECONDS
}

/// Parse a `<entry>_head.txt` file: one `key, value` pair per line.
/// Missing/malformed files are not fatal (spec §7): callers should log a
/// warning and continue with an empty map.
pub fn parse_head_log(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(',')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse a `<entry>_meta.txt` CSV file with a header row into named
/// columns of numeric samples.
pub fn parse_meta_csv(contents: &str) -> BTreeMap<String, Vec<f64>> {
    let mut lines = contents.lines();
    let Some(header) = lines.next() else {
        return BTreeMap::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let mut data: BTreeMap<String, Vec<f64>> =
        columns.iter().map(|c| (c.to_string(), Vec::new())).collect();

    for line in lines {
        for (col, value) in columns.iter().zip(line.split(',')) {
            if let Ok(v) = value.trim().parse::<f64>() {
                data.get_mut(*col).unwrap().push(v);
            }
        }
    }
    data
}

/// Truncate a log channel to `frames` samples, repairing the first and
/// last samples from their neighbours if they are non-finite or zero
/// (spec §4.6 `link`: "first/last sample repaired from neighbours").
pub fn derive_monitor(channel: &[f64], frames: usize) -> Vec<f64> {
    let mut values: Vec<f64> = channel.iter().take(frames).copied().collect();
    values.resize(frames, 0.0);

    if values.len() >= 2 {
        if !values[0].is_finite() || values[0] == 0.0 {
            values[0] = values[1];
        }
        let last = values.len() - 1;
        if !values[last].is_finite() || values[last] == 0.0 {
            values[last] = values[last - 1];
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_head_log() {
        let text = "Storage_Ring_Current, 102.3\nSCU_Current, 45.0\n";
        let parsed = parse_head_log(text);
        assert_eq!(parsed.get("Storage_Ring_Current").unwrap(), "102.3");
    }

    #[test]
    fn parses_csv_meta_columns() {
        let text = "MCS1,MCS2\n1.0,2.0\n3.0,4.0\n";
        let parsed = parse_meta_csv(text);
        assert_eq!(parsed["MCS1"], vec![1.0, 3.0]);
        assert_eq!(parsed["MCS2"], vec![2.0, 4.0]);
    }

    #[test]
    fn derive_monitor_repairs_zero_endpoints() {
        let channel = vec![0.0, 5.0, 6.0, 7.0, 0.0];
        let monitor = derive_monitor(&channel, 5);
        assert_eq!(monitor[0], 5.0);
        assert_eq!(monitor[4], 7.0);
    }

    #[test]
    fn derive_monitor_truncates_to_frame_count() {
        let channel = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let monitor = derive_monitor(&channel, 3);
        assert_eq!(monitor.len(), 3);
    }
}
