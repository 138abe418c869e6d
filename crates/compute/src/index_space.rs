//! Builtin invocation identifiers for a grid dispatch.
//!
//! # Enumeration order
//!
//! Every dispatch has one total order over its invocations, and both
//! [`Dispatch::invocations`] and [`IndexSpace::delinearize`] follow it:
//!
//! * workgroups are visited x-fastest, then y, then z;
//! * within a workgroup, invocations are visited x-fastest, then y, then z,
//!   i.e. in increasing `local_invocation_index`.
//!
//! So invocation `n` of the dispatch lives in workgroup
//! `n / invocations_per_workgroup` (linearized x-fastest over
//! `workgroup_count`) and has `local_invocation_index ==
//! n % invocations_per_workgroup`.
//!
//! Hardware gives no such guarantee. The order exists so that sequential runs
//! are reproducible and comparable.

use crate::{ConfigError, AXES};
use std::fmt;

pub type Dim3 = [u32; 3];

/// A single request to execute a grid of workgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dispatch {
    /// Number of workgroups per axis. A zero component means nothing runs.
    pub workgroup_count: Dim3,
    /// Invocations per workgroup per axis. Every component must be non-zero.
    pub workgroup_size: Dim3,
}

impl Dispatch {
    #[must_use]
    pub const fn new(workgroup_count: Dim3, workgroup_size: Dim3) -> Self {
        Self { workgroup_count, workgroup_size }
    }

    /// One-dimensional dispatch of `workgroups` groups of `size` invocations.
    #[must_use]
    pub const fn linear(workgroups: u32, size: u32) -> Self {
        Self::new([workgroups, 1, 1], [size, 1, 1])
    }

    /// Checks the configuration invariants.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::ZeroWorkgroupSize`] if any size component is zero.
    /// * [`ConfigError::GlobalIdOverflow`] if `count * size` along an axis
    ///   leaves the `u32` range, so some global id would not be representable.
    /// * [`ConfigError::WorkgroupTooLarge`] if `local_invocation_index` would
    ///   not fit in `u32`.
    /// * [`ConfigError::InvocationCountOverflow`] if the invocation total does
    ///   not fit in `usize` (or even `u64`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(axis) = self.workgroup_size.iter().position(|&size| size == 0) {
            return Err(ConfigError::ZeroWorkgroupSize { axis: AXES[axis] });
        }
        let id_range = u64::from(u32::MAX) + 1;
        if let Some(axis) = self.grid_extent().iter().position(|&extent| extent > id_range) {
            return Err(ConfigError::GlobalIdOverflow { axis: AXES[axis] });
        }
        let per_group = volume(self.workgroup_size)
            .filter(|&n| n <= u64::from(u32::MAX))
            .ok_or(ConfigError::WorkgroupTooLarge(self.workgroup_size))?;
        let total = volume(self.workgroup_count)
            .and_then(|groups| groups.checked_mul(per_group))
            .ok_or(ConfigError::InvocationCountOverflow)?;
        usize::try_from(total).map_err(|_| ConfigError::InvocationCountOverflow)?;
        Ok(())
    }

    /// `workgroup_size.x * workgroup_size.y * workgroup_size.z`, saturating at
    /// `u64::MAX`.
    #[must_use]
    pub fn invocations_per_workgroup(&self) -> u64 {
        volume(self.workgroup_size).unwrap_or(u64::MAX)
    }

    /// Number of workgroups in the grid, saturating at `u64::MAX`.
    #[must_use]
    pub fn workgroup_total(&self) -> u64 {
        volume(self.workgroup_count).unwrap_or(u64::MAX)
    }

    /// Product of all six dimensions. Saturates; [`Dispatch::validate`]
    /// rejects configurations where that matters.
    #[must_use]
    pub fn invocation_count(&self) -> u64 {
        self.workgroup_total()
            .saturating_mul(self.invocations_per_workgroup())
    }

    /// Global grid extent per axis, `workgroup_count[i] * workgroup_size[i]`.
    #[must_use]
    pub fn grid_extent(&self) -> [u64; 3] {
        std::array::from_fn(|axis| {
            u64::from(self.workgroup_count[axis]) * u64::from(self.workgroup_size[axis])
        })
    }

    /// Every invocation of the dispatch, in enumeration order.
    ///
    /// A dispatch that passed [`Dispatch::validate`] yields exactly
    /// [`Dispatch::invocation_count`] items. Otherwise the iterator stops after
    /// `usize::MAX` items so that its length stays exact.
    #[must_use]
    pub fn invocations(&self) -> Invocations {
        let limit = u64::try_from(usize::MAX).unwrap_or(u64::MAX);
        Invocations { dispatch: *self, next: 0, end: self.invocation_count().min(limit) }
    }
}

/// The builtin identifiers of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId {
    pub local_invocation_id: Dim3,
    pub workgroup_id: Dim3,
    pub global_invocation_id: Dim3,
    pub local_invocation_index: u32,
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [wx, wy, wz] = self.workgroup_id;
        let [lx, ly, lz] = self.local_invocation_id;
        write!(f, "workgroup ({wx}, {wy}, {wz}) local ({lx}, {ly}, {lz})")
    }
}

/// Stateless index arithmetic.
pub struct IndexSpace;

impl IndexSpace {
    /// Derives the identifiers of the invocation at `local_id` inside
    /// workgroup `workgroup_id`.
    ///
    /// # Panics
    ///
    /// If `workgroup_id` is not below `workgroup_count` or `local_id` is not
    /// below `workgroup_size` on every axis. The engine is the only producer
    /// of these coordinates, so a violation is a bug rather than bad input.
    #[must_use]
    pub fn compute(dispatch: &Dispatch, workgroup_id: Dim3, local_id: Dim3) -> InvocationId {
        for axis in 0..3 {
            assert!(
                workgroup_id[axis] < dispatch.workgroup_count[axis],
                "workgroup id {workgroup_id:?} outside workgroup count {:?}",
                dispatch.workgroup_count
            );
            assert!(
                local_id[axis] < dispatch.workgroup_size[axis],
                "local id {local_id:?} outside workgroup size {:?}",
                dispatch.workgroup_size
            );
        }

        let size = dispatch.workgroup_size;
        let global_invocation_id =
            std::array::from_fn(|axis| workgroup_id[axis] * size[axis] + local_id[axis]);
        let local_invocation_index =
            local_id[0] + local_id[1] * size[0] + local_id[2] * size[0] * size[1];

        InvocationId {
            local_invocation_id: local_id,
            workgroup_id,
            global_invocation_id,
            local_invocation_index,
        }
    }

    /// Identifiers of the `n`-th invocation in enumeration order.
    ///
    /// # Panics
    ///
    /// If `n` is not below [`Dispatch::invocation_count`].
    #[must_use]
    pub fn delinearize(dispatch: &Dispatch, n: u64) -> InvocationId {
        assert!(
            n < dispatch.invocation_count(),
            "invocation {n} outside dispatch of {} invocations",
            dispatch.invocation_count()
        );
        let per_group = dispatch.invocations_per_workgroup();
        let workgroup_id = Self::unflatten(dispatch.workgroup_count, n / per_group);
        let local_id = Self::unflatten(dispatch.workgroup_size, n % per_group);
        Self::compute(dispatch, workgroup_id, local_id)
    }

    /// x-fastest linearization of `coord` inside a box of `extent`.
    #[must_use]
    pub fn flatten(extent: [u64; 3], coord: Dim3) -> u64 {
        u64::from(coord[0])
            + u64::from(coord[1]) * extent[0]
            + u64::from(coord[2]) * extent[0] * extent[1]
    }

    fn unflatten(extent: Dim3, linear: u64) -> Dim3 {
        let [ex, ey, _] = extent.map(u64::from);
        // Components are bounded by `extent`, which is u32.
        let narrow = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
        [
            narrow(linear % ex),
            narrow(linear / ex % ey),
            narrow(linear / (ex * ey)),
        ]
    }
}

/// Iterator over a dispatch in enumeration order. See the module docs.
#[derive(Debug, Clone)]
pub struct Invocations {
    dispatch: Dispatch,
    next: u64,
    end: u64,
}

impl Iterator for Invocations {
    type Item = InvocationId;

    fn next(&mut self) -> Option<InvocationId> {
        if self.next >= self.end {
            return None;
        }
        let id = IndexSpace::delinearize(&self.dispatch, self.next);
        self.next += 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // `end` is clamped to usize::MAX in `Dispatch::invocations`.
        let remaining = usize::try_from(self.end - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Invocations {}

/// Product of the three components, or `None` if it does not fit in `u64`.
fn volume(dims: Dim3) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(u64::from(d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn compute_matches_builtin_formulas() {
        let dispatch = Dispatch::new([3, 2, 2], [4, 3, 2]);
        let id = IndexSpace::compute(&dispatch, [2, 1, 1], [3, 2, 1]);
        assert_eq!(id.global_invocation_id, [2 * 4 + 3, 3 + 2, 2 + 1]);
        assert_eq!(id.local_invocation_index, 3 + 2 * 4 + 4 * 3);
        assert_eq!(id.workgroup_id, [2, 1, 1]);
        assert_eq!(id.local_invocation_id, [3, 2, 1]);
    }

    #[test]
    #[should_panic(expected = "outside workgroup size")]
    fn compute_rejects_local_id_past_workgroup_size() {
        let dispatch = Dispatch::linear(1, 12);
        let _ = IndexSpace::compute(&dispatch, [0, 0, 0], [12, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "outside workgroup count")]
    fn compute_rejects_workgroup_id_past_count() {
        let dispatch = Dispatch::new([2, 1, 1], [4, 1, 1]);
        let _ = IndexSpace::compute(&dispatch, [0, 1, 0], [0, 0, 0]);
    }

    #[test]
    fn local_index_is_a_bijection_within_a_workgroup() {
        let dispatch = Dispatch::new([1, 1, 1], [5, 3, 2]);
        let seen: HashSet<u32> = dispatch
            .invocations()
            .map(|id| id.local_invocation_index)
            .collect();
        assert_eq!(seen.len(), 30);
        assert!(seen.iter().all(|&i| i < 30));
    }

    #[test]
    fn enumeration_is_x_fastest_within_then_across_workgroups() {
        let dispatch = Dispatch::new([2, 1, 1], [2, 2, 1]);
        let order: Vec<(Dim3, Dim3)> = dispatch
            .invocations()
            .map(|id| (id.workgroup_id, id.local_invocation_id))
            .collect();
        assert_eq!(
            order,
            vec![
                ([0, 0, 0], [0, 0, 0]),
                ([0, 0, 0], [1, 0, 0]),
                ([0, 0, 0], [0, 1, 0]),
                ([0, 0, 0], [1, 1, 0]),
                ([1, 0, 0], [0, 0, 0]),
                ([1, 0, 0], [1, 0, 0]),
                ([1, 0, 0], [0, 1, 0]),
                ([1, 0, 0], [1, 1, 0]),
            ]
        );
    }

    #[test]
    fn invocations_reports_exact_length() {
        let dispatch = Dispatch::new([2, 3, 1], [4, 1, 2]);
        let iter = dispatch.invocations();
        assert_eq!(iter.len(), 48);
        assert_eq!(iter.count(), 48);
        assert_eq!(Dispatch::new([0, 1, 1], [12, 1, 1]).invocations().len(), 0);
    }

    #[test]
    fn validate_rejects_zero_workgroup_size() {
        let err = Dispatch::new([1, 1, 1], [4, 0, 1]).validate().unwrap_err();
        assert_eq!(err, ConfigError::ZeroWorkgroupSize { axis: 'y' });
    }

    #[test]
    fn validate_accepts_zero_workgroup_count() {
        assert!(Dispatch::new([0, 1, 1], [12, 1, 1]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_global_id_overflow() {
        let err = Dispatch::new([1, 1, 1 << 20], [1, 1, 1 << 13])
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::GlobalIdOverflow { axis: 'z' });
    }

    #[test]
    fn validate_rejects_oversized_workgroup() {
        let err = Dispatch::new([1, 1, 1], [1 << 16, 1 << 16, 2])
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::WorkgroupTooLarge([1 << 16, 1 << 16, 2]));
    }

    #[test]
    fn validate_rejects_workgroup_volume_past_u64() {
        let err = Dispatch::new([1, 1, 1], [u32::MAX; 3]).validate().unwrap_err();
        assert_eq!(err, ConfigError::WorkgroupTooLarge([u32::MAX; 3]));
    }

    #[test]
    fn validate_rejects_workgroup_total_past_u64() {
        let err = Dispatch::new([u32::MAX; 3], [1, 1, 1]).validate().unwrap_err();
        assert_eq!(err, ConfigError::InvocationCountOverflow);
    }

    #[test]
    fn validate_rejects_invocation_total_overflow() {
        // Every axis fits in u32 but the product of all six dimensions does not fit in u64.
        let err = Dispatch::new([u32::MAX, u32::MAX, 2], [1, 1, 1])
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvocationCountOverflow);

        // Workgroup total and workgroup volume each fit, their product does not.
        let err = Dispatch::new([1 << 16, 1 << 16, 1 << 16], [1 << 16, 1 << 15, 1])
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvocationCountOverflow);
    }

    #[test]
    fn counts_saturate_instead_of_overflowing() {
        let dispatch = Dispatch::new([u32::MAX; 3], [u32::MAX; 3]);
        assert_eq!(dispatch.workgroup_total(), u64::MAX);
        assert_eq!(dispatch.invocations_per_workgroup(), u64::MAX);
        assert_eq!(dispatch.invocation_count(), u64::MAX);
    }

    #[test]
    fn invocations_of_an_unvalidated_dispatch_stay_exact_size() {
        let dispatch = Dispatch::new([u32::MAX; 3], [u32::MAX; 3]);
        let mut iter = dispatch.invocations();
        let limit = usize::try_from(dispatch.invocation_count()).unwrap_or(usize::MAX);
        assert_eq!(iter.len(), limit);
        let first = iter.next().expect("first invocation");
        assert_eq!(first.global_invocation_id, [0, 0, 0]);
        assert_eq!(iter.len(), limit - 1);
    }

    #[test]
    fn flatten_is_x_fastest() {
        let extent = [4, 3, 2];
        assert_eq!(IndexSpace::flatten(extent, [0, 0, 0]), 0);
        assert_eq!(IndexSpace::flatten(extent, [1, 0, 0]), 1);
        assert_eq!(IndexSpace::flatten(extent, [0, 1, 0]), 4);
        assert_eq!(IndexSpace::flatten(extent, [0, 0, 1]), 12);
        assert_eq!(IndexSpace::flatten(extent, [3, 2, 1]), 23);
    }
}
