//! Peak detection, refinement orchestration, symmetrization, mask
//! construction, and PDF computation for the per-entry and multi-entry
//! reduction pipeline.
//!
//! [`reducer`] and [`multi_reducer`] are the orchestration layer; every
//! other module is a pure-compute or subprocess-contract collaborator
//! they wire together.

pub mod blob;
pub mod config;
pub mod error;
pub mod logs;
pub mod mask;
pub mod merge;
pub mod multi_reducer;
pub mod pdf;
pub mod peak;
pub mod prepare;
pub mod radial;
pub mod raw;
pub mod reducer;
pub mod refine;
pub mod sum;
pub mod symmetry;
pub mod transform;

pub use config::Config;
pub use error::{ReduceError, Result};
pub use multi_reducer::{fill, punch, MultiReducer, PunchSite};
pub use peak::{Peak, PeakArena, RawBlob, RefinedReflection};
pub use reducer::Reducer;
pub use refine::{ExternalRefiner, OrientationMatrix, Refiner};
pub use sum::{nxsum, SumInput, SumOutput};
pub use symmetry::LaueGroup;
pub use transform::{CctwMerger, CctwTransformer, Interpolator, JuliaMaternInterpolator, Merger, Transformer};
