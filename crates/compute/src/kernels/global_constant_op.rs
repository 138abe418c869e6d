use crate::{InvocationId, Kernel, Write};

/// Writes `1` to `output[global_invocation_id.x]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalConstantKernel;

impl GlobalConstantKernel {
    pub const VALUE: u32 = 1;
}

impl Kernel for GlobalConstantKernel {
    type Writes = Option<Write>;

    fn invoke(&self, id: &InvocationId) -> Option<Write> {
        Some(Write::new(id.global_invocation_id[0] as usize, Self::VALUE))
    }
}
