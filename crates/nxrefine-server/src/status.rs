//! Task status lifecycle (spec §4.9).
//!
//! ```text
//!        queue()           start                success
//!  _ ───────────▶ QUEUED ─────────▶ IN_PROGRESS ─────────▶ DONE
//!                   │                    │
//!                   │                    └─── failure ───▶ FAILED
//!                   │
//!                   └─── overwrite ───▶ (reset from DONE/FAILED to QUEUED)
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Queued,
    InProgress,
    Done,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::InProgress => "IN_PROGRESS",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "QUEUED" => Some(Status::Queued),
            "IN_PROGRESS" => Some(Status::InProgress),
            "DONE" => Some(Status::Done),
            "FAILED" => Some(Status::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight task names enumerated in spec §3.
pub const TASK_NAMES: &[&str] = &[
    "nxlink",
    "nxmax",
    "nxfind",
    "nxcopy",
    "nxrefine",
    "nxprepare_mask",
    "nxtransform",
    "nxmasked_transform",
    "nxcombine",
    "nxmasked_combine",
    "nxpdf",
    "nxmasked_pdf",
    "nxsum",
];
