//! The kernel dispatcher (§4.J): backend selection with thresholds,
//! precision negotiation, and the validation cross-check that keeps an
//! offload backend honest by re-running the CPU kernel and comparing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{ForceBackend, KernelEngineOptions, PrecisionMode};
use crate::cpu;
use crate::offload::OffloadBackend;
use crate::{GpuPrecision, IntKind, Kernel};

/// Which backend actually served a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    Cpu,
    Offload,
}

/// A recorded validation mismatch between the CPU and offload results for
/// one kernel invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    pub kernel: Kernel,
    pub precision: GpuPrecision,
    pub workload_size: usize,
    pub abs_diff: f64,
}

#[derive(Default)]
struct Diagnostics {
    last_backend: HashMap<Kernel, Backend>,
    last_precision: HashMap<Kernel, GpuPrecision>,
    mismatches: u64,
    last_mismatch: Option<MismatchRecord>,
    gpu_errors: u64,
    last_gpu_error: Option<String>,
}

/// Snapshot of the dispatcher's diagnostics surface (§4.J "Dispatcher
/// exposes diagnostics").
#[derive(Clone, Debug, Default)]
pub struct DispatcherDiagnostics {
    pub last_kernel_backend: HashMap<Kernel, Backend>,
    pub last_kernel_precision: HashMap<Kernel, GpuPrecision>,
    pub mismatches: u64,
    pub last_mismatch: Option<MismatchRecord>,
    pub gpu_errors: u64,
    pub last_gpu_error: Option<String>,
}

/// Routes numeric primitives between the scalar CPU backend and an
/// offloaded backend, per §4.J's threshold/precision/validation policy.
pub struct KernelEngine {
    options: KernelEngineOptions,
    offload: Option<Arc<dyn OffloadBackend>>,
    diagnostics: Mutex<Diagnostics>,
}

impl KernelEngine {
    pub fn new(options: KernelEngineOptions) -> Self {
        Self { options, offload: None, diagnostics: Mutex::new(Diagnostics::default()) }
    }

    pub fn with_offload(options: KernelEngineOptions, offload: Arc<dyn OffloadBackend>) -> Self {
        Self { options, offload: Some(offload), diagnostics: Mutex::new(Diagnostics::default()) }
    }

    pub fn options(&self) -> &KernelEngineOptions {
        &self.options
    }

    /// `choose()`: picks `cpu` or `offload` for one call.
    pub fn choose(&self, kernel: Kernel, workload_size: usize, precision: GpuPrecision) -> Backend {
        let Some(offload) = &self.offload else {
            return Backend::Cpu;
        };
        match self.options.gpu.force_backend {
            ForceBackend::Cpu => Backend::Cpu,
            ForceBackend::Offload => {
                if offload.available() && offload.supports_kernel_precision(kernel, precision) {
                    Backend::Offload
                } else {
                    Backend::Cpu
                }
            }
            ForceBackend::Auto => {
                let threshold = self.options.thresholds.for_kernel(kernel);
                if self.options.gpu.enabled
                    && offload.available()
                    && workload_size >= threshold
                    && offload.supports_kernel_precision(kernel, precision)
                {
                    Backend::Offload
                } else {
                    Backend::Cpu
                }
            }
        }
    }

    /// `gpuPrecisionForValues()`: negotiates the precision a given call
    /// actually runs at, given the caller's requested precision, the
    /// dispatcher's precision mode, and whether the input is f64-valued.
    pub fn precision_for_values(&self, requested: GpuPrecision, values_are_f64: bool) -> GpuPrecision {
        if requested == GpuPrecision::F64 {
            return GpuPrecision::F64;
        }
        if self.options.precision_mode == PrecisionMode::Excel {
            return GpuPrecision::F64;
        }
        if !self.options.gpu.allow_fp32_fallback && values_are_f64 {
            return GpuPrecision::F64;
        }
        GpuPrecision::F32
    }

    pub fn diagnostics(&self) -> DispatcherDiagnostics {
        let d = self.diagnostics.lock();
        DispatcherDiagnostics {
            last_kernel_backend: d.last_backend.clone(),
            last_kernel_precision: d.last_precision.clone(),
            mismatches: d.mismatches,
            last_mismatch: d.last_mismatch.clone(),
            gpu_errors: d.gpu_errors,
            last_gpu_error: d.last_gpu_error.clone(),
        }
    }

    fn record_backend(&self, kernel: Kernel, backend: Backend, precision: GpuPrecision) {
        let mut d = self.diagnostics.lock();
        d.last_backend.insert(kernel, backend);
        d.last_precision.insert(kernel, precision);
    }

    fn record_gpu_error(&self, kernel: Kernel, err: impl std::fmt::Display) {
        let mut d = self.diagnostics.lock();
        d.gpu_errors += 1;
        let msg = format!("{kernel:?}: {err}");
        warn!(kernel = ?kernel, error = %msg, "offload kernel failed, falling back to cpu");
        d.last_gpu_error = Some(msg);
    }

    fn record_mismatch(&self, kernel: Kernel, precision: GpuPrecision, workload_size: usize, abs_diff: f64) {
        let mut d = self.diagnostics.lock();
        d.mismatches += 1;
        let record = MismatchRecord { kernel, precision, workload_size, abs_diff };
        warn!(?record, "offload validation mismatch, cpu result wins");
        d.last_mismatch = Some(record);
    }

    fn should_validate(&self, workload_size: usize) -> bool {
        self.options.validation.enabled && workload_size <= self.options.validation.max_elements
    }

    /// Shared scalar-reduction execution path: route, run, validate, record.
    fn execute_scalar(
        &self,
        kernel: Kernel,
        workload_size: usize,
        cpu_fn: impl FnOnce() -> f64,
        offload_fn: impl FnOnce(&dyn OffloadBackend, GpuPrecision) -> pq_errors::PqResult<f64>,
        object_is: bool,
    ) -> f64 {
        let requested = GpuPrecision::F64;
        let precision = self.precision_for_values(requested, true);
        let backend = self.choose(kernel, workload_size, precision);

        match backend {
            Backend::Cpu => {
                self.record_backend(kernel, Backend::Cpu, precision);
                cpu_fn()
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload_fn(offload.as_ref(), precision) {
                    Ok(gpu_result) => {
                        if self.should_validate(workload_size) {
                            let cpu_result = cpu_fn();
                            if !scalars_close(gpu_result, cpu_result, object_is, self.options.validation.abs_tol, self.options.validation.rel_tol) {
                                self.record_mismatch(kernel, precision, workload_size, (gpu_result - cpu_result).abs());
                                self.record_backend(kernel, Backend::Cpu, precision);
                                return cpu_result;
                            }
                        }
                        self.record_backend(kernel, Backend::Offload, precision);
                        gpu_result
                    }
                    Err(err) => {
                        self.record_gpu_error(kernel, err);
                        self.record_backend(kernel, Backend::Cpu, precision);
                        cpu_fn()
                    }
                }
            }
        }
    }

    pub fn sum(&self, values: &[f64]) -> f64 {
        self.execute_scalar(
            Kernel::Sum,
            values.len(),
            || cpu::sum(values),
            |b, p| b.sum(values, p),
            false,
        )
    }

    pub fn min(&self, values: &[f64]) -> f64 {
        self.execute_scalar(Kernel::Min, values.len(), || cpu::min(values), |b, p| b.min(values, p), true)
    }

    pub fn max(&self, values: &[f64]) -> f64 {
        self.execute_scalar(Kernel::Max, values.len(), || cpu::max(values), |b, p| b.max(values, p), true)
    }

    pub fn average(&self, values: &[f64]) -> f64 {
        self.execute_scalar(
            Kernel::Average,
            values.len(),
            || cpu::average(values),
            |b, p| b.average(values, p),
            false,
        )
    }

    pub fn count(&self, values: &[f64]) -> usize {
        // count never needs offload or validation: it is a length, not a reduction.
        self.record_backend(Kernel::Count, Backend::Cpu, GpuPrecision::F64);
        cpu::count(values)
    }

    pub fn sumproduct(&self, a: &[f64], b: &[f64]) -> pq_errors::PqResult<f64> {
        cpu::sumproduct(a, b)?;
        Ok(self.execute_scalar(
            Kernel::Sumproduct,
            a.len().max(b.len()),
            || cpu::sumproduct(a, b).unwrap_or(f64::NAN),
            |backend, p| backend.sumproduct(a, b, p),
            false,
        ))
    }

    pub fn mmult(
        &self,
        a: &[f64],
        b: &[f64],
        a_rows: usize,
        a_cols: usize,
        b_cols: usize,
    ) -> pq_errors::PqResult<Vec<f64>> {
        // validate shape up front so both backends see well-formed input.
        cpu::mmult(a, b, a_rows, a_cols, b_cols)?;
        let workload_size = a_rows * a_cols * b_cols;
        let precision = self.precision_for_values(GpuPrecision::F64, true);
        let backend = self.choose(Kernel::MMult, workload_size, precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(Kernel::MMult, Backend::Cpu, precision);
                cpu::mmult(a, b, a_rows, a_cols, b_cols)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.mmult(a, b, a_rows, a_cols, b_cols, precision) {
                    Ok(gpu_result) => {
                        if self.should_validate(workload_size) {
                            let cpu_result = cpu::mmult(a, b, a_rows, a_cols, b_cols)?;
                            if !arrays_close(&gpu_result, &cpu_result, self.options.validation.abs_tol, self.options.validation.rel_tol) {
                                self.record_mismatch(Kernel::MMult, precision, workload_size, max_abs_diff(&gpu_result, &cpu_result));
                                self.record_backend(Kernel::MMult, Backend::Cpu, precision);
                                return Ok(cpu_result);
                            }
                        }
                        self.record_backend(Kernel::MMult, Backend::Offload, precision);
                        Ok(gpu_result)
                    }
                    Err(err) => {
                        self.record_gpu_error(Kernel::MMult, err);
                        self.record_backend(Kernel::MMult, Backend::Cpu, precision);
                        cpu::mmult(a, b, a_rows, a_cols, b_cols)
                    }
                }
            }
        }
    }

    pub fn sort(&self, values: &[f64]) -> Vec<f64> {
        let precision = self.precision_for_values(GpuPrecision::F64, true);
        let backend = self.choose(Kernel::Sort, values.len(), precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(Kernel::Sort, Backend::Cpu, precision);
                cpu::sort(values)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.sort(values, precision) {
                    Ok(gpu_result) => {
                        if self.should_validate(values.len()) {
                            let cpu_result = cpu::sort(values);
                            // min/max-style Object.is comparison elementwise, preserving NaN position.
                            let equal = gpu_result.len() == cpu_result.len()
                                && gpu_result.iter().zip(cpu_result.iter()).all(|(g, c)| object_is(*g, *c));
                            if !equal {
                                self.record_mismatch(Kernel::Sort, precision, values.len(), f64::NAN);
                                self.record_backend(Kernel::Sort, Backend::Cpu, precision);
                                return cpu_result;
                            }
                        }
                        self.record_backend(Kernel::Sort, Backend::Offload, precision);
                        gpu_result
                    }
                    Err(err) => {
                        self.record_gpu_error(Kernel::Sort, err);
                        self.record_backend(Kernel::Sort, Backend::Cpu, precision);
                        cpu::sort(values)
                    }
                }
            }
        }
    }

    pub fn histogram(&self, values: &[f64], min: f64, max: f64, bins: u32) -> pq_errors::PqResult<Vec<u32>> {
        cpu::histogram(values, min, max, bins)?;
        let precision = GpuPrecision::F32; // histogram bins are integer counts; precision is moot.
        let backend = self.choose(Kernel::Histogram, values.len(), precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(Kernel::Histogram, Backend::Cpu, precision);
                cpu::histogram(values, min, max, bins)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.histogram(values, min, max, bins) {
                    Ok(gpu_result) => {
                        if self.should_validate(values.len()) {
                            let cpu_result = cpu::histogram(values, min, max, bins)?;
                            if gpu_result != cpu_result {
                                self.record_mismatch(Kernel::Histogram, precision, values.len(), f64::NAN);
                                self.record_backend(Kernel::Histogram, Backend::Cpu, precision);
                                return Ok(cpu_result);
                            }
                        }
                        self.record_backend(Kernel::Histogram, Backend::Offload, precision);
                        Ok(gpu_result)
                    }
                    Err(err) => {
                        self.record_gpu_error(Kernel::Histogram, err);
                        self.record_backend(Kernel::Histogram, Backend::Cpu, precision);
                        cpu::histogram(values, min, max, bins)
                    }
                }
            }
        }
    }

    /// `hashJoin`: left/right key types must match (both signed or both
    /// unsigned); routed like any other kernel, but its output is always
    /// exactly equal across backends (no tolerance concept applies to
    /// integer row indices), so a mismatch of any kind is treated as a
    /// validation failure.
    pub fn hash_join(&self, left: &[u32], right: &[u32], join: cpu::JoinKind) -> Vec<(u32, u32)> {
        let workload_size = left.len() + right.len();
        let precision = GpuPrecision::F32;
        let backend = self.choose(Kernel::HashJoin, workload_size, precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(Kernel::HashJoin, Backend::Cpu, precision);
                cpu::hash_join(left, right, join)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.hash_join(left, right, join) {
                    Ok(gpu_result) => {
                        if self.should_validate(workload_size) {
                            let cpu_result = cpu::hash_join(left, right, join);
                            if gpu_result != cpu_result {
                                self.record_mismatch(Kernel::HashJoin, precision, workload_size, f64::NAN);
                                self.record_backend(Kernel::HashJoin, Backend::Cpu, precision);
                                return cpu_result;
                            }
                        }
                        self.record_backend(Kernel::HashJoin, Backend::Offload, precision);
                        gpu_result
                    }
                    Err(err) => {
                        self.record_gpu_error(Kernel::HashJoin, err);
                        self.record_backend(Kernel::HashJoin, Backend::Cpu, precision);
                        cpu::hash_join(left, right, join)
                    }
                }
            }
        }
    }

    /// Shared single-key numeric group-by path (sum/min/max share identical
    /// routing/validation/fallback shape, differing only in which CPU/
    /// offload function each calls).
    fn group_by_numeric(
        &self,
        kernel: Kernel,
        keys: &[u32],
        cpu_result: (Vec<u32>, Vec<f64>),
        offload_fn: impl FnOnce(&dyn OffloadBackend) -> pq_errors::PqResult<(Vec<u32>, Vec<f64>)>,
    ) -> pq_errors::PqResult<(Vec<u32>, Vec<f64>)> {
        let precision = GpuPrecision::F64;
        let backend = self.choose(kernel, keys.len(), precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(kernel, Backend::Cpu, precision);
                Ok(cpu_result)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload_fn(offload.as_ref()) {
                    Ok(gpu_result) => {
                        if self.should_validate(keys.len())
                            && (gpu_result.0 != cpu_result.0
                                || !arrays_close(&gpu_result.1, &cpu_result.1, self.options.validation.abs_tol, self.options.validation.rel_tol))
                        {
                            self.record_mismatch(kernel, precision, keys.len(), f64::NAN);
                            self.record_backend(kernel, Backend::Cpu, precision);
                            return Ok(cpu_result);
                        }
                        self.record_backend(kernel, Backend::Offload, precision);
                        Ok(gpu_result)
                    }
                    Err(err) => {
                        self.record_gpu_error(kernel, err);
                        self.record_backend(kernel, Backend::Cpu, precision);
                        Ok(cpu_result)
                    }
                }
            }
        }
    }

    pub fn group_by_sum(
        &self,
        keys: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<u32>, Vec<f64>)> {
        let cpu_result = cpu::group_by_sum(keys, values, kind)?;
        self.group_by_numeric(Kernel::GroupBySum, keys, cpu_result, |b| b.group_by_sum(keys, values, kind))
    }

    pub fn group_by_min(
        &self,
        keys: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<u32>, Vec<f64>)> {
        let cpu_result = cpu::group_by_min(keys, values, kind)?;
        self.group_by_numeric(Kernel::GroupByMin, keys, cpu_result, |b| b.group_by_min(keys, values, kind))
    }

    pub fn group_by_max(
        &self,
        keys: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<u32>, Vec<f64>)> {
        let cpu_result = cpu::group_by_max(keys, values, kind)?;
        self.group_by_numeric(Kernel::GroupByMax, keys, cpu_result, |b| b.group_by_max(keys, values, kind))
    }

    /// Shared two-key numeric group-by path, mirroring
    /// [`KernelEngine::group_by_numeric`] for the packed-`u64`-ordered
    /// `…2` kernel family.
    fn group_by_numeric2(
        &self,
        kernel: Kernel,
        key_count: usize,
        cpu_result: (Vec<(u32, u32)>, Vec<f64>),
        offload_fn: impl FnOnce(&dyn OffloadBackend) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<f64>)>,
    ) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        let precision = GpuPrecision::F64;
        let backend = self.choose(kernel, key_count, precision);
        match backend {
            Backend::Cpu => {
                self.record_backend(kernel, Backend::Cpu, precision);
                Ok(cpu_result)
            }
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload_fn(offload.as_ref()) {
                    Ok(gpu_result) => {
                        if self.should_validate(key_count)
                            && (gpu_result.0 != cpu_result.0
                                || !arrays_close(&gpu_result.1, &cpu_result.1, self.options.validation.abs_tol, self.options.validation.rel_tol))
                        {
                            self.record_mismatch(kernel, precision, key_count, f64::NAN);
                            self.record_backend(kernel, Backend::Cpu, precision);
                            return Ok(cpu_result);
                        }
                        self.record_backend(kernel, Backend::Offload, precision);
                        Ok(gpu_result)
                    }
                    Err(err) => {
                        self.record_gpu_error(kernel, err);
                        self.record_backend(kernel, Backend::Cpu, precision);
                        Ok(cpu_result)
                    }
                }
            }
        }
    }

    pub fn group_by_sum2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        let cpu_result = cpu::group_by_sum2(key_a, key_b, values, kind)?;
        self.group_by_numeric2(Kernel::GroupBySum2, key_a.len(), cpu_result, |b| {
            b.group_by_sum2(key_a, key_b, values, kind)
        })
    }

    pub fn group_by_min2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        let cpu_result = cpu::group_by_min2(key_a, key_b, values, kind)?;
        self.group_by_numeric2(Kernel::GroupByMin2, key_a.len(), cpu_result, |b| {
            b.group_by_min2(key_a, key_b, values, kind)
        })
    }

    pub fn group_by_max2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        let cpu_result = cpu::group_by_max2(key_a, key_b, values, kind)?;
        self.group_by_numeric2(Kernel::GroupByMax2, key_a.len(), cpu_result, |b| {
            b.group_by_max2(key_a, key_b, values, kind)
        })
    }

    pub fn group_by_count2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        kind: IntKind,
    ) -> pq_errors::PqResult<(Vec<(u32, u32)>, Vec<u32>)> {
        let cpu_result = cpu::group_by_count2(key_a, key_b, kind)?;
        let precision = GpuPrecision::F32;
        let backend = self.choose(Kernel::GroupByCount2, key_a.len(), precision);
        self.record_backend(Kernel::GroupByCount2, backend, precision);
        match backend {
            Backend::Cpu => Ok(cpu_result),
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.group_by_count2(key_a, key_b, kind) {
                    Ok(r) => Ok(r),
                    Err(err) => {
                        self.record_gpu_error(Kernel::GroupByCount2, err);
                        Ok(cpu_result)
                    }
                }
            }
        }
    }

    /// Non-validated, CPU-or-offload passthrough used by the `count`-style
    /// group-bys, whose integer outputs make the tolerance machinery moot
    /// but which still benefit from offload for very wide key sets.
    pub fn group_by_count(&self, keys: &[u32], kind: IntKind) -> (Vec<u32>, Vec<u32>) {
        let precision = GpuPrecision::F32;
        let backend = self.choose(Kernel::GroupByCount, keys.len(), precision);
        self.record_backend(Kernel::GroupByCount, backend, precision);
        match backend {
            Backend::Cpu => cpu::group_by_count(keys, kind),
            Backend::Offload => {
                let offload = self.offload.as_ref().expect("offload chosen without a backend");
                match offload.group_by_count(keys, kind) {
                    Ok(r) => r,
                    Err(err) => {
                        self.record_gpu_error(Kernel::GroupByCount, err);
                        cpu::group_by_count(keys, kind)
                    }
                }
            }
        }
    }

    pub fn diagnostics_summary(&self) -> DiagnosticsSummary {
        DiagnosticsSummary {
            precision_mode: self.options.precision_mode,
            gpu_enabled: self.options.gpu.enabled,
            force_backend: self.options.gpu.force_backend,
            gpu_available: self.offload.as_ref().is_some_and(|o| o.available()),
        }
    }
}

/// A compact subset of the §4.J diagnostics surface used by tests and host
/// debugging panels; [`KernelEngine::diagnostics`] returns the full detail.
#[derive(Clone, Copy, Debug)]
pub struct DiagnosticsSummary {
    pub precision_mode: PrecisionMode,
    pub gpu_enabled: bool,
    pub force_backend: ForceBackend,
    pub gpu_available: bool,
}

fn object_is(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a.to_bits() == b.to_bits()
}

fn scalars_close(a: f64, b: f64, strict_object_is: bool, abs_tol: f64, rel_tol: f64) -> bool {
    if strict_object_is {
        return object_is(a, b);
    }
    if object_is(a, b) {
        return true;
    }
    // +0 and -0 compare equal under `==` (so `diff` below would be 0.0 and
    // pass any tolerance), but §4.J requires the validation cross-check to
    // treat a signed-zero divergence as a real mismatch.
    if a == 0.0 && b == 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= abs_tol || diff <= rel_tol * a.abs().max(b.abs())
}

fn arrays_close(a: &[f64], b: &[f64], abs_tol: f64, rel_tol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| scalars_close(*x, *y, false, abs_tol, rel_tol))
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::offload::ReferenceOffloadBackend;

    fn engine_with(offload: ReferenceOffloadBackend) -> KernelEngine {
        KernelEngine::with_offload(KernelEngineOptions::default(), Arc::new(offload))
    }

    #[test]
    fn cpu_only_engine_never_offloads() {
        let engine = KernelEngine::new(KernelEngineOptions::default());
        assert_eq!(engine.sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(engine.diagnostics().last_kernel_backend[&Kernel::Sum], Backend::Cpu);
    }

    #[test]
    fn force_cpu_never_offloads_even_with_backend_present() {
        let mut opts = KernelEngineOptions::default();
        opts.gpu.force_backend = ForceBackend::Cpu;
        let engine = KernelEngine::with_offload(opts, Arc::new(ReferenceOffloadBackend::new()));
        let values = vec![1.0; 1 << 16];
        engine.sum(&values);
        assert_eq!(engine.diagnostics().last_kernel_backend[&Kernel::Sum], Backend::Cpu);
    }

    #[test]
    fn auto_routes_to_offload_above_threshold() {
        let mut opts = KernelEngineOptions::default();
        opts.thresholds.default_threshold = 4;
        let engine = engine_with_opts(opts, ReferenceOffloadBackend::new());
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        engine.sum(&values);
        assert_eq!(engine.diagnostics().last_kernel_backend[&Kernel::Sum], Backend::Offload);
    }

    fn engine_with_opts(opts: KernelEngineOptions, offload: ReferenceOffloadBackend) -> KernelEngine {
        KernelEngine::with_offload(opts, Arc::new(offload))
    }

    #[test]
    fn validation_mismatch_falls_back_to_cpu_and_is_recorded() {
        let mut opts = KernelEngineOptions::default();
        opts.thresholds.default_threshold = 1;
        opts.validation.abs_tol = 1e-9;
        let backend = ReferenceOffloadBackend::new().with_bias(Kernel::Sum, 2e-9);
        let engine = engine_with_opts(opts, backend);
        let result = engine.sum(&[1.0, 2.0, 3.0]);
        assert_eq!(result, 6.0); // cpu result wins
        let diag = engine.diagnostics();
        assert_eq!(diag.mismatches, 1);
        assert_eq!(diag.last_kernel_backend[&Kernel::Sum], Backend::Cpu);
    }

    #[test]
    fn offload_error_falls_back_to_cpu() {
        let mut opts = KernelEngineOptions::default();
        opts.thresholds.default_threshold = 1;
        let backend = ReferenceOffloadBackend::new().with_failure(Kernel::Sum);
        let engine = engine_with_opts(opts, backend);
        let result = engine.sum(&[1.0, 2.0, 3.0]);
        assert_eq!(result, 6.0);
        assert_eq!(engine.diagnostics().gpu_errors, 1);
    }

    #[test]
    fn excel_mode_never_demotes_precision() {
        let engine = engine_with(ReferenceOffloadBackend::f32_only());
        assert_eq!(engine.precision_for_values(GpuPrecision::F32, true), GpuPrecision::F64);
    }

    #[test]
    fn scalars_close_treats_signed_zero_divergence_as_a_mismatch() {
        assert!(!scalars_close(0.0, -0.0, false, 1.0, 1.0));
        assert!(!scalars_close(-0.0, 0.0, false, 1.0, 1.0));
        assert!(scalars_close(0.0, 0.0, false, 1e-9, 1e-9));
        assert!(scalars_close(-0.0, -0.0, false, 1e-9, 1e-9));
    }
}
