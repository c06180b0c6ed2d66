//! The offloaded (GPU-style) kernel backend trait (§4.L) and a
//! CPU-resident reference implementation used by tests and by any host
//! that has no real compute backend wired up.
//!
//! The shader bodies themselves are explicitly out of scope (§1): what
//! matters here is the *contract* — same kernel set as [`crate::cpu`], a
//! precision-aware signature, and errors that bubble up as a thrown/
//! rejected failure the dispatcher can catch and convert into a CPU
//! fallback (§7 "Offload kernel failure").

use pq_errors::PqResult;

use crate::cpu;
use crate::{GpuPrecision, IntKind, Kernel};

/// A single left/right row index pair, as produced by [`OffloadBackend::hash_join`].
pub type JoinPair = (u32, u32);

/// The contract an offloaded compute backend satisfies. Implementors may
/// be a real GPU compute-shader dispatcher; [`ReferenceOffloadBackend`]
/// below is a same-process stand-in that reuses the CPU math (optionally
/// perturbed) so the dispatcher's validation path has something concrete
/// to exercise in tests.
pub trait OffloadBackend: Send + Sync {
    /// Whether this backend is reachable at all (device present, context
    /// created, …). A backend that is unavailable is never routed to,
    /// regardless of `forceBackend`.
    fn available(&self) -> bool;

    /// Whether this backend can run `kernel` at `precision`. Some backends
    /// only implement a subset (e.g. no f64 support on older hardware).
    fn supports_kernel_precision(&self, kernel: Kernel, precision: GpuPrecision) -> bool;

    fn sum(&self, values: &[f64], precision: GpuPrecision) -> PqResult<f64>;
    fn min(&self, values: &[f64], precision: GpuPrecision) -> PqResult<f64>;
    fn max(&self, values: &[f64], precision: GpuPrecision) -> PqResult<f64>;
    fn average(&self, values: &[f64], precision: GpuPrecision) -> PqResult<f64>;
    fn count(&self, values: &[f64]) -> PqResult<f64>;
    fn sumproduct(&self, a: &[f64], b: &[f64], precision: GpuPrecision) -> PqResult<f64>;

    fn mmult(
        &self,
        a: &[f64],
        b: &[f64],
        a_rows: usize,
        a_cols: usize,
        b_cols: usize,
        precision: GpuPrecision,
    ) -> PqResult<Vec<f64>>;

    /// Padded bitonic sort in the real backend; here, delegates straight
    /// to the CPU sort since the observable contract (stable ascending,
    /// NaN at the end) is identical.
    fn sort(&self, values: &[f64], precision: GpuPrecision) -> PqResult<Vec<f64>>;

    fn histogram(&self, values: &[f64], min: f64, max: f64, bins: u32) -> PqResult<Vec<u32>>;

    fn hash_join(&self, left: &[u32], right: &[u32], join: cpu::JoinKind) -> PqResult<Vec<JoinPair>>;

    fn group_by_count(&self, keys: &[u32], kind: IntKind) -> PqResult<(Vec<u32>, Vec<u32>)>;
    fn group_by_sum(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)>;
    fn group_by_min(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)>;
    fn group_by_max(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)>;

    fn group_by_count2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<u32>)>;
    fn group_by_sum2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)>;
    fn group_by_min2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)>;
    fn group_by_max2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)>;
}

/// An in-process stand-in for a real compute-shader backend.
///
/// By default it reproduces the CPU kernels exactly (so validation never
/// trips). Tests that need to exercise the validation-mismatch and
/// error-fallback paths (§8 scenario 6) construct one with
/// [`ReferenceOffloadBackend::with_bias`] / [`ReferenceOffloadBackend::with_failure`]
/// to perturb a specific kernel's result or make it fail outright.
pub struct ReferenceOffloadBackend {
    available: bool,
    supports_f64: bool,
    bias: Option<(Kernel, f64)>,
    fail: Option<Kernel>,
}

impl Default for ReferenceOffloadBackend {
    fn default() -> Self {
        Self { available: true, supports_f64: true, bias: None, fail: None }
    }
}

impl ReferenceOffloadBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with no device reachable at all.
    pub fn unavailable() -> Self {
        Self { available: false, ..Self::default() }
    }

    /// A backend that only supports f32, the way real GPU hardware
    /// without native double-precision units would report itself.
    pub fn f32_only() -> Self {
        Self { supports_f64: false, ..Self::default() }
    }

    /// Perturbs `kernel`'s scalar-returning result by a fixed additive
    /// bias, for exercising the dispatcher's validation-mismatch path.
    pub fn with_bias(mut self, kernel: Kernel, bias: f64) -> Self {
        self.bias = Some((kernel, bias));
        self
    }

    /// Makes `kernel` always fail, for exercising the dispatcher's
    /// error-fallback path.
    pub fn with_failure(mut self, kernel: Kernel) -> Self {
        self.fail = Some(kernel);
        self
    }

    fn check_fail(&self, kernel: Kernel) -> PqResult<()> {
        if self.fail == Some(kernel) {
            Err(pq_errors::PqError::Internal(format!("offload kernel {kernel:?} failed")))
        } else {
            Ok(())
        }
    }

    fn apply_bias(&self, kernel: Kernel, v: f64) -> f64 {
        match self.bias {
            Some((k, b)) if k == kernel => v + b,
            _ => v,
        }
    }
}

impl OffloadBackend for ReferenceOffloadBackend {
    fn available(&self) -> bool {
        self.available
    }

    fn supports_kernel_precision(&self, _kernel: Kernel, precision: GpuPrecision) -> bool {
        match precision {
            GpuPrecision::F32 => true,
            GpuPrecision::F64 => self.supports_f64,
        }
    }

    fn sum(&self, values: &[f64], _precision: GpuPrecision) -> PqResult<f64> {
        self.check_fail(Kernel::Sum)?;
        Ok(self.apply_bias(Kernel::Sum, cpu::sum(values)))
    }

    fn min(&self, values: &[f64], _precision: GpuPrecision) -> PqResult<f64> {
        self.check_fail(Kernel::Min)?;
        Ok(self.apply_bias(Kernel::Min, cpu::min(values)))
    }

    fn max(&self, values: &[f64], _precision: GpuPrecision) -> PqResult<f64> {
        self.check_fail(Kernel::Max)?;
        Ok(self.apply_bias(Kernel::Max, cpu::max(values)))
    }

    fn average(&self, values: &[f64], _precision: GpuPrecision) -> PqResult<f64> {
        self.check_fail(Kernel::Average)?;
        Ok(self.apply_bias(Kernel::Average, cpu::average(values)))
    }

    fn count(&self, values: &[f64]) -> PqResult<f64> {
        self.check_fail(Kernel::Count)?;
        Ok(self.apply_bias(Kernel::Count, cpu::count(values) as f64))
    }

    fn sumproduct(&self, a: &[f64], b: &[f64], _precision: GpuPrecision) -> PqResult<f64> {
        self.check_fail(Kernel::Sumproduct)?;
        Ok(self.apply_bias(Kernel::Sumproduct, cpu::sumproduct(a, b)?))
    }

    fn mmult(
        &self,
        a: &[f64],
        b: &[f64],
        a_rows: usize,
        a_cols: usize,
        b_cols: usize,
        _precision: GpuPrecision,
    ) -> PqResult<Vec<f64>> {
        self.check_fail(Kernel::MMult)?;
        cpu::mmult(a, b, a_rows, a_cols, b_cols)
    }

    fn sort(&self, values: &[f64], _precision: GpuPrecision) -> PqResult<Vec<f64>> {
        self.check_fail(Kernel::Sort)?;
        Ok(cpu::sort(values))
    }

    fn histogram(&self, values: &[f64], min: f64, max: f64, bins: u32) -> PqResult<Vec<u32>> {
        self.check_fail(Kernel::Histogram)?;
        cpu::histogram(values, min, max, bins)
    }

    fn hash_join(&self, left: &[u32], right: &[u32], join: cpu::JoinKind) -> PqResult<Vec<JoinPair>> {
        self.check_fail(Kernel::HashJoin)?;
        Ok(cpu::hash_join(left, right, join))
    }

    fn group_by_count(&self, keys: &[u32], kind: IntKind) -> PqResult<(Vec<u32>, Vec<u32>)> {
        self.check_fail(Kernel::GroupByCount)?;
        Ok(cpu::group_by_count(keys, kind))
    }

    fn group_by_sum(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)> {
        self.check_fail(Kernel::GroupBySum)?;
        cpu::group_by_sum(keys, values, kind)
    }

    fn group_by_min(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)> {
        self.check_fail(Kernel::GroupByMin)?;
        cpu::group_by_min(keys, values, kind)
    }

    fn group_by_max(&self, keys: &[u32], values: &[f64], kind: IntKind) -> PqResult<(Vec<u32>, Vec<f64>)> {
        self.check_fail(Kernel::GroupByMax)?;
        cpu::group_by_max(keys, values, kind)
    }

    fn group_by_count2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<u32>)> {
        self.check_fail(Kernel::GroupByCount2)?;
        cpu::group_by_count2(key_a, key_b, kind)
    }

    fn group_by_sum2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        self.check_fail(Kernel::GroupBySum2)?;
        cpu::group_by_sum2(key_a, key_b, values, kind)
    }

    fn group_by_min2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        self.check_fail(Kernel::GroupByMin2)?;
        cpu::group_by_min2(key_a, key_b, values, kind)
    }

    fn group_by_max2(
        &self,
        key_a: &[u32],
        key_b: &[u32],
        values: &[f64],
        kind: IntKind,
    ) -> PqResult<(Vec<(u32, u32)>, Vec<f64>)> {
        self.check_fail(Kernel::GroupByMax2)?;
        cpu::group_by_max2(key_a, key_b, values, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_backend_matches_cpu_by_default() {
        let backend = ReferenceOffloadBackend::new();
        let values = [1.0, 2.0, 3.0];
        assert_eq!(backend.sum(&values, GpuPrecision::F64).unwrap(), cpu::sum(&values));
    }

    #[test]
    fn biased_backend_diverges() {
        let backend = ReferenceOffloadBackend::new().with_bias(Kernel::Sum, 10.0);
        let values = [1.0, 2.0, 3.0];
        assert_eq!(backend.sum(&values, GpuPrecision::F64).unwrap(), cpu::sum(&values) + 10.0);
    }

    #[test]
    fn failing_backend_errors() {
        let backend = ReferenceOffloadBackend::new().with_failure(Kernel::Sum);
        assert!(backend.sum(&[1.0], GpuPrecision::F64).is_err());
    }
}
