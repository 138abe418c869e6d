use crate::{
    BuiltinKernel, ComputeBackend, ComputeError, Dispatch, DispatchEngine, DispatchOutput,
    ExecutionMode, GlobalConstantKernel, LocalIndexKernel, LocalInvocationIndexKernel,
};

/// Runs builtin kernels on the host through a [`DispatchEngine`].
#[derive(Default, Debug, Clone)]
pub struct CpuBackend {
    engine: DispatchEngine,
}

impl CpuBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self { engine: DispatchEngine::with_mode(mode) }
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.engine.mode()
    }
}

impl ComputeBackend for CpuBackend {
    fn dispatch(
        &self,
        kernel: &BuiltinKernel,
        dispatch: &Dispatch,
        output_length: usize,
    ) -> Result<DispatchOutput, ComputeError> {
        tracing::debug!(%kernel, "CpuBackend dispatch");
        match kernel {
            BuiltinKernel::LocalIndex => self.engine.run(dispatch, output_length, &LocalIndexKernel),
            BuiltinKernel::GlobalConstant => {
                self.engine.run(dispatch, output_length, &GlobalConstantKernel)
            }
            BuiltinKernel::LocalInvocationIndex => self.engine.run(
                dispatch,
                output_length,
                &LocalInvocationIndexKernel::for_dispatch(dispatch),
            ),
        }
    }
}
