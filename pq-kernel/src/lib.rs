//! Numeric kernel dispatcher, CPU reference kernels, and the offload
//! backend trait (§4.J–§4.L).
//!
//! [`cpu`] defines ground truth for every kernel family. [`offload`]
//! describes the contract an offloaded (GPU-style) backend satisfies, plus
//! a same-process [`offload::ReferenceOffloadBackend`] used for tests.
//! [`dispatcher::KernelEngine`] ties the two together: threshold-based
//! routing, precision negotiation, and the validation cross-check that
//! falls back to the CPU result on any mismatch or offload failure.

pub mod config;
pub mod cpu;
pub mod dispatcher;
pub mod offload;

use serde::{Deserialize, Serialize};

pub use config::{ForceBackend, GpuConfig, KernelEngineOptions, PrecisionMode, Thresholds, ValidationConfig};
pub use cpu::{JoinKind, JOIN_SENTINEL};
pub use dispatcher::{Backend, DispatcherDiagnostics, DiagnosticsSummary, KernelEngine, MismatchRecord};
pub use offload::{OffloadBackend, ReferenceOffloadBackend};

/// The closed set of numeric primitives the dispatcher routes (§4.J).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kernel {
    Sum,
    Min,
    Max,
    Average,
    Count,
    Sumproduct,
    GroupByCount,
    GroupBySum,
    GroupByMin,
    GroupByMax,
    GroupByCount2,
    GroupBySum2,
    GroupByMin2,
    GroupByMax2,
    HashJoin,
    MMult,
    Sort,
    Histogram,
}

/// Whether a group-by kernel's 32-bit keys are to be sorted/ordered as
/// signed or unsigned integers (§9 design notes: the bit pattern is the
/// same either way, only the ordering bias differs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntKind {
    Signed,
    Unsigned,
}

/// Precision a kernel call runs at: `f32` on backends that support it, or
/// always `f64` under `excel` precision mode or for sort (§4.J: "Sort is
/// never silently demoted from f64").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuPrecision {
    F32,
    F64,
}
