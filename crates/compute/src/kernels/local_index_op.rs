use crate::{InvocationId, Kernel, Write};

/// Writes `local_invocation_id.x` to `output[local_invocation_id.x]`.
///
/// Every workgroup targets the same indices, so dispatching more than one
/// workgroup makes this kernel race.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalIndexKernel;

impl Kernel for LocalIndexKernel {
    type Writes = Option<Write>;

    fn invoke(&self, id: &InvocationId) -> Option<Write> {
        let x = id.local_invocation_id[0];
        Some(Write::new(x as usize, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dispatch, DispatchEngine};

    #[test]
    fn writes_local_x_in_place() {
        let output = DispatchEngine::new()
            .run(&Dispatch::linear(1, 12), 12, &LocalIndexKernel)
            .unwrap();
        let expected: Vec<u32> = (0..12).collect();
        assert_eq!(output.buffer.as_slice(), expected.as_slice());
        assert_eq!(output.writes, 12);
    }

    #[test]
    fn ignores_y_and_z() {
        let output = DispatchEngine::new()
            .run(&Dispatch::new([1, 1, 1], [3, 2, 2]), 3, &LocalIndexKernel)
            .unwrap();
        assert_eq!(output.buffer.as_slice(), &[0, 1, 2]);
        assert_eq!(output.writes, 12);
    }
}
