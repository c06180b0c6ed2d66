//! Dispatcher configuration (§4.J): which kernels the GPU offload backend
//! is allowed to touch, the precision policy, and per-kernel size
//! thresholds that gate automatic offload routing.

use serde::{Deserialize, Serialize};

use crate::Kernel;

/// How backend selection is forced, if at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForceBackend {
    #[default]
    Auto,
    Cpu,
    Offload,
}

/// `excel` never silently drops to f32; `fast` may, subject to
/// `allow_fp32_fallback` and the caller's requested precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrecisionMode {
    #[default]
    Excel,
    Fast,
}

/// GPU-side configuration: whether offload is enabled at all, and how
/// backend routing is forced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpuConfig {
    pub enabled: bool,
    pub force_backend: ForceBackend,
    pub allow_fp32_fallback: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self { enabled: true, force_backend: ForceBackend::Auto, allow_fp32_fallback: true }
    }
}

/// Validation cross-check configuration (§4.J step 2): after a successful
/// offload run, re-run the CPU kernel and compare, subject to
/// `max_elements` to bound the extra cost.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub max_elements: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Default for ValidationConfig {
    /// Disabled by default: `KernelEngineOptions::default` is the one place
    /// that turns this on, and only because its default `precision_mode` is
    /// `Excel`. A caller building a `ValidationConfig` on its own gets the
    /// conservative (off) default.
    fn default() -> Self {
        Self { enabled: false, max_elements: 1 << 16, abs_tol: 1e-9, rel_tol: 1e-9 }
    }
}

/// Per-kernel workload-size threshold above which `auto` routing prefers
/// offload. Most kernels default to 2^15 elements; `mmult`'s workload size
/// (`aRows * aCols * bCols`) is cubic in typical matrix dimensions, so it
/// gets a much higher default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thresholds {
    pub default_threshold: usize,
    pub mmult_threshold: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { default_threshold: 1 << 15, mmult_threshold: 1 << 20 }
    }
}

impl Thresholds {
    pub fn for_kernel(&self, kernel: Kernel) -> usize {
        match kernel {
            Kernel::MMult => self.mmult_threshold,
            _ => self.default_threshold,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelEngineOptions {
    pub gpu: GpuConfig,
    pub validation: ValidationConfig,
    pub thresholds: Thresholds,
    pub precision_mode: PrecisionMode,
}

impl Default for KernelEngineOptions {
    /// Validation is disabled except in `excel` mode (the default
    /// `precision_mode`): an explicit `Fast`-mode config gets a
    /// `ValidationConfig` that also defaults to disabled.
    fn default() -> Self {
        let precision_mode = PrecisionMode::default();
        let validation = ValidationConfig { enabled: precision_mode == PrecisionMode::Excel, ..ValidationConfig::default() };
        Self { gpu: GpuConfig::default(), validation, thresholds: Thresholds::default(), precision_mode }
    }
}
