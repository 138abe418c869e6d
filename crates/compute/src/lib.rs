#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Backend-independent compute dispatch indexing.
//!
//! A [`Dispatch`] describes a grid of workgroups. [`IndexSpace`] derives the
//! builtin identifiers (`local_invocation_id`, `workgroup_id`,
//! `global_invocation_id`, `local_invocation_index`) of any invocation in that
//! grid, and [`DispatchEngine`] walks the whole grid in a fixed order, handing
//! each [`InvocationId`] to a [`Kernel`] and applying the writes it returns to
//! a zero-initialised [`OutputBuffer`].

use std::sync::Arc;
use thiserror::Error;

pub mod backend;
pub mod cpu_backend;
pub mod engine;
pub mod index_space;
pub mod kernels;

pub use backend::ComputeBackend;
pub use cpu_backend::CpuBackend;
pub use engine::{
    DispatchEngine, DispatchOutput, ExecutionMode, Kernel, OutputBuffer, RaceReport, Write,
};
pub use index_space::{Dim3, Dispatch, IndexSpace, InvocationId, Invocations};
pub use kernels::{
    BuiltinKernel, GlobalConstantKernel, LocalIndexKernel, LocalInvocationIndexKernel,
};

/// Axis names used in diagnostics.
pub const AXES: [char; 3] = ['x', 'y', 'z'];

/// Rejected dispatch configurations. Always reported before the first kernel call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workgroup size along {axis} is zero")]
    ZeroWorkgroupSize { axis: char },
    #[error("global invocation ids along {axis} exceed the u32 range")]
    GlobalIdOverflow { axis: char },
    #[error("workgroup size {0:?} has too many invocations to index with u32")]
    WorkgroupTooLarge(Dim3),
    #[error("total invocation count does not fit in usize")]
    InvocationCountOverflow,
    #[error("unknown execution mode `{0}` (expected `sequential` or `parallel`)")]
    UnknownExecutionMode(String),
    #[error("unknown kernel `{0}`")]
    UnknownKernel(String),
}

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("invalid dispatch configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// The dispatch was aborted. `partial` holds every write applied before the
    /// offending one and must not be treated as a valid result.
    #[error("invocation {invocation} wrote index {index} of an output buffer of length {output_length}")]
    OutOfBoundsWrite {
        index: usize,
        output_length: usize,
        invocation: InvocationId,
        partial: OutputBuffer,
    },
    #[error("{} output indices were written by more than one invocation", .0.len())]
    RaceDetected(Vec<RaceReport>),
    #[error("backend not available: {0}")]
    BackendUnavailable(&'static str),
}

/// Returns a CPU backend whose execution mode is taken from
/// [`ExecutionMode::ENV_VAR`].
#[must_use]
pub fn default_backend() -> Arc<dyn ComputeBackend> {
    let mode = ExecutionMode::from_env();
    tracing::info!(?mode, "Using CpuBackend.");
    Arc::new(CpuBackend::with_mode(mode))
}
