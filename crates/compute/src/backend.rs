use crate::{BuiltinKernel, ComputeError, Dispatch, DispatchOutput};

pub trait ComputeBackend: Send + Sync + 'static {
    /// Runs a named kernel over `dispatch` against a zeroed output buffer.
    ///
    /// # Arguments
    /// * `kernel`: The kernel to run.
    /// * `dispatch`: Workgroup count and workgroup size, one per axis.
    /// * `output_length`: Number of `u32` elements in the output buffer.
    ///
    /// # Returns
    ///
    /// Returns the filled buffer plus any race reports the backend collected.
    /// Returns `ComputeError::Configuration` for an invalid dispatch and
    /// `ComputeError::OutOfBoundsWrite` if the kernel writes past the buffer.
    /// May return other `ComputeError` variants depending on the backend implementation.
    fn dispatch(
        &self,
        kernel: &BuiltinKernel,
        dispatch: &Dispatch,
        output_length: usize,
    ) -> Result<DispatchOutput, ComputeError>;
}
