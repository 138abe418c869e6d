use crate::{Dispatch, IndexSpace, InvocationId, Kernel, Write};

/// Writes `local_invocation_index` at the x-fastest linearization of
/// `global_invocation_id` over the whole grid, so every invocation of a
/// dispatch owns exactly one slot.
#[derive(Debug, Clone, Copy)]
pub struct LocalInvocationIndexKernel {
    grid_extent: [u64; 3],
}

impl LocalInvocationIndexKernel {
    #[must_use]
    pub fn for_dispatch(dispatch: &Dispatch) -> Self {
        Self { grid_extent: dispatch.grid_extent() }
    }

    /// Buffer length that holds one slot per invocation of the grid,
    /// saturating at `u64::MAX`.
    #[must_use]
    pub fn output_length(&self) -> u64 {
        self.grid_extent.iter().fold(1, |acc, &extent| acc.saturating_mul(extent))
    }
}

impl Kernel for LocalInvocationIndexKernel {
    type Writes = Option<Write>;

    fn invoke(&self, id: &InvocationId) -> Option<Write> {
        let slot = IndexSpace::flatten(self.grid_extent, id.global_invocation_id);
        // A slot past usize::MAX cannot be in bounds; saturate so the engine reports it.
        let slot = usize::try_from(slot).unwrap_or(usize::MAX);
        Some(Write::new(slot, id.local_invocation_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchEngine, ExecutionMode};

    #[test]
    fn tiles_local_indices_across_a_3d_grid() {
        let dispatch = Dispatch::new([2, 1, 1], [2, 2, 1]);
        let kernel = LocalInvocationIndexKernel::for_dispatch(&dispatch);
        assert_eq!(kernel.output_length(), 8);

        let output = DispatchEngine::new().run(&dispatch, 8, &kernel).unwrap();
        // Grid is 4 wide and 2 tall; each 2x2 workgroup lays down 0 1 / 2 3.
        assert_eq!(output.buffer.as_slice(), &[0, 1, 0, 1, 2, 3, 2, 3]);
    }

    #[test]
    fn output_length_saturates_for_huge_grids() {
        let dispatch = Dispatch::new([1, 1, 1], [u32::MAX; 3]);
        let kernel = LocalInvocationIndexKernel::for_dispatch(&dispatch);
        assert_eq!(kernel.output_length(), u64::MAX);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_run_is_race_free() {
        let dispatch = Dispatch::new([2, 3, 2], [4, 2, 3]);
        let kernel = LocalInvocationIndexKernel::for_dispatch(&dispatch);
        let len = usize::try_from(kernel.output_length()).unwrap();

        let sequential = DispatchEngine::new().run(&dispatch, len, &kernel).unwrap();
        let parallel = DispatchEngine::with_mode(ExecutionMode::Parallel)
            .run(&dispatch, len, &kernel)
            .unwrap();
        assert!(!parallel.has_races());
        assert_eq!(parallel.buffer, sequential.buffer);
    }
}
