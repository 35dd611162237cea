//! Chunked access to the raw detector-frame volume.
//!
//! The actual hierarchical container (spec §1: "provided by an external
//! library, treated as an opaque group/field store") is out of scope; this
//! models only the read side the reduction stages need: frame-indexed
//! `(y, x)` slices of a `(frames, y, x)` volume, read in chunks sized by
//! `Config::chunk_size_floor`. Grounded in the teacher's `io_utils.rs`
//! cursor-based reader, adapted from a binary cursor to a frame cursor.

use memmap2::Mmap;
use ndarray::{Array2, Array3, ArrayView2};
use std::fs::File;
use std::path::Path;

/// Frame-indexed read access to a `(frames, y, x)` raw volume.
pub trait RawDataSource: Send + Sync {
    fn shape(&self) -> (usize, usize, usize);
    fn read_frame(&self, z: usize) -> Array2<f32>;

    /// Read `[start, end)` frames at once; default implementation reads
    /// frame-by-frame, sufficient for in-memory sources and small tests.
    fn read_chunk(&self, start: usize, end: usize) -> Array3<f32> {
        let (_, h, w) = self.shape();
        let mut out = Array3::<f32>::zeros((end - start, h, w));
        for (i, z) in (start..end).enumerate() {
            out.index_axis_mut(ndarray::Axis(0), i).assign(&self.read_frame(z));
        }
        out
    }
}

/// An in-memory raw volume, used by tests and by callers that already
/// have the whole scan resident (small synthetic scans).
pub struct InMemoryRaw {
    pub data: Array3<f32>,
}

impl InMemoryRaw {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }
}

impl RawDataSource for InMemoryRaw {
    fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    fn read_frame(&self, z: usize) -> Array2<f32> {
        self.data.index_axis(ndarray::Axis(0), z).to_owned()
    }
}

/// Memory-mapped raw volume: a flat little-endian `f32` buffer laid out
/// `(frames, y, x)` row-major, as the raw detector file would be if read
/// directly rather than through the opaque container format.
pub struct MmapRaw {
    mmap: Mmap,
    shape: (usize, usize, usize),
}

impl MmapRaw {
    pub fn open(path: impl AsRef<Path>, shape: (usize, usize, usize)) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap, shape })
    }

    fn frame_bytes(&self) -> usize {
        self.shape.1 * self.shape.2 * std::mem::size_of::<f32>()
    }
}

impl RawDataSource for MmapRaw {
    fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    fn read_frame(&self, z: usize) -> Array2<f32> {
        let frame_bytes = self.frame_bytes();
        let start = z * frame_bytes;
        let bytes = &self.mmap[start..start + frame_bytes];
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Array2::from_shape_vec((self.shape.1, self.shape.2), values).expect("frame byte length matches shape")
    }
}

pub fn frame_sum(frame: ArrayView2<f32>) -> f64 {
    frame.iter().map(|&v| v as f64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_raw_reads_frames() {
        let mut data = Array3::<f32>::zeros((4, 2, 2));
        data[[2, 0, 0]] = 7.0;
        let raw = InMemoryRaw::new(data);
        assert_eq!(raw.shape(), (4, 2, 2));
        assert_eq!(raw.read_frame(2)[[0, 0]], 7.0);
    }

    #[test]
    fn read_chunk_matches_frame_by_frame() {
        let mut data = Array3::<f32>::zeros((10, 3, 3));
        for z in 0..10 {
            data[[z, 0, 0]] = z as f32;
        }
        let raw = InMemoryRaw::new(data);
        let chunk = raw.read_chunk(2, 5);
        assert_eq!(chunk.dim(), (3, 3, 3));
        assert_eq!(chunk[[0, 0, 0]], 2.0);
        assert_eq!(chunk[[2, 0, 0]], 4.0);
    }
}
