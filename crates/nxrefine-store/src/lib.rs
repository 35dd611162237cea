//! Wrapper-file tree model and advisory file locking for nxrefine.
//!
//! This crate models the hierarchical container format (spec §1) that the
//! real diffuse-scattering reduction pipeline treats as an opaque, external
//! group/field/link store with file-level locks. It does not implement that
//! container format itself; it gives the rest of the workspace a concrete
//! tree shape and a [`FileLock`] to build against.

pub mod error;
pub mod lock;
pub mod mask_file;
pub mod settings;
pub mod tree;
pub mod wrapper;

pub use error::{Result, StoreError};
pub use lock::{FileLock, LockGuard};
pub use mask_file::{MaskFile, MaskPeak};
pub use settings::{AxisSpec, TransformSettings};
pub use tree::{walk, Field, Group, Link, Node, Value};
pub use wrapper::{ProcessRecord, WrapperFile};
