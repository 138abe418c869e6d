//! The dispatch loop.
//!
//! [`DispatchEngine::run`] validates a [`Dispatch`], allocates a zeroed
//! [`OutputBuffer`], calls the kernel once per invocation and applies the
//! writes it returns. Sequential mode follows the enumeration order documented
//! in [`crate::index_space`]; parallel mode spreads invocations over a rayon
//! pool with no ordering at all and reports every index that more than one
//! invocation wrote.

use crate::index_space::{Dispatch, InvocationId};
use crate::{ComputeError, ConfigError};
use std::str::FromStr;

/// A single store into the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub index: usize,
    pub value: u32,
}

impl Write {
    #[must_use]
    pub const fn new(index: usize, value: u32) -> Self {
        Self { index, value }
    }
}

impl From<(usize, u32)> for Write {
    fn from((index, value): (usize, u32)) -> Self {
        Self::new(index, value)
    }
}

/// A per-invocation program.
///
/// The kernel sees nothing but its own [`InvocationId`] and answers with the
/// stores it wants to make. Any `Fn(&InvocationId) -> impl IntoIterator<Item = Write>`
/// is a kernel, so `|id| Some(Write::new(0, id.local_invocation_index))` works.
pub trait Kernel: Sync {
    type Writes: IntoIterator<Item = Write>;

    fn invoke(&self, id: &InvocationId) -> Self::Writes;
}

impl<F, W> Kernel for F
where
    F: Fn(&InvocationId) -> W + Sync,
    W: IntoIterator<Item = Write>,
{
    type Writes = W;

    fn invoke(&self, id: &InvocationId) -> W {
        self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// One invocation at a time, in enumeration order. Reproducible.
    #[default]
    Sequential,
    /// Invocations spread across worker threads in no particular order.
    /// Indices written by more than one invocation are reported as races.
    Parallel,
}

impl ExecutionMode {
    pub const ENV_VAR: &'static str = "COMPUTE_EXECUTION_MODE";

    /// Reads [`Self::ENV_VAR`]. Missing or unparseable values yield
    /// [`ExecutionMode::Sequential`].
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!("{err}; falling back to sequential execution");
                Self::Sequential
            }),
            Err(_) => Self::Sequential,
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            _ => Err(ConfigError::UnknownExecutionMode(s.to_owned())),
        }
    }
}

/// Fixed-length, zero-initialised `u32` storage written by a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputBuffer(Vec<u32>);

impl OutputBuffer {
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// The buffer as raw bytes, as a host would read it back from a mapped
    /// storage buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

impl AsRef<[u32]> for OutputBuffer {
    fn as_ref(&self) -> &[u32] {
        &self.0
    }
}

impl From<OutputBuffer> for Vec<u32> {
    fn from(buffer: OutputBuffer) -> Self {
        buffer.0
    }
}

/// An output index written by more than one invocation in a parallel dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    pub index: usize,
    /// Every invocation that wrote `index`, in enumeration order.
    pub contenders: Vec<InvocationId>,
}

/// Result of a completed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutput {
    pub buffer: OutputBuffer,
    /// Racing indices, sorted by index. Always empty in sequential mode.
    pub races: Vec<RaceReport>,
    /// Number of kernel calls made.
    pub invocations: u64,
    /// Number of writes applied.
    pub writes: u64,
}

impl DispatchOutput {
    #[must_use]
    pub fn has_races(&self) -> bool {
        !self.races.is_empty()
    }

    /// Turns recorded races into an error, for callers that treat them as fatal.
    ///
    /// # Errors
    ///
    /// [`ComputeError::RaceDetected`] if any index had more than one writer.
    pub fn check_races(self) -> Result<OutputBuffer, ComputeError> {
        if self.races.is_empty() {
            Ok(self.buffer)
        } else {
            Err(ComputeError::RaceDetected(self.races))
        }
    }
}

/// Drives a kernel over every invocation of a dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchEngine {
    mode: ExecutionMode,
}

impl DispatchEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Runs `kernel` once for every invocation of `dispatch` against a zeroed
    /// buffer of `output_length` elements and hands the buffer back.
    ///
    /// A dispatch with a zero workgroup count returns the zeroed buffer
    /// without calling the kernel.
    ///
    /// # Errors
    ///
    /// * [`ComputeError::Configuration`] if the dispatch is invalid. Nothing
    ///   has run at that point.
    /// * [`ComputeError::OutOfBoundsWrite`] on the first write past the end of
    ///   the buffer. The dispatch stops and the error carries the partial
    ///   buffer.
    /// * [`ComputeError::BackendUnavailable`] if parallel mode was requested
    ///   but the `parallel` feature is disabled.
    pub fn run<K: Kernel>(
        &self,
        dispatch: &Dispatch,
        output_length: usize,
        kernel: &K,
    ) -> Result<DispatchOutput, ComputeError> {
        dispatch.validate()?;
        let total = dispatch.invocation_count();
        tracing::debug!(
            workgroup_count = ?dispatch.workgroup_count,
            workgroup_size = ?dispatch.workgroup_size,
            output_length,
            total,
            mode = ?self.mode,
            "dispatch"
        );

        if total == 0 {
            return Ok(DispatchOutput {
                buffer: OutputBuffer::zeroed(output_length),
                races: Vec::new(),
                invocations: 0,
                writes: 0,
            });
        }

        match self.mode {
            ExecutionMode::Sequential => run_sequential(dispatch, output_length, kernel),
            #[cfg(feature = "parallel")]
            ExecutionMode::Parallel => parallel::run(dispatch, output_length, kernel),
            #[cfg(not(feature = "parallel"))]
            ExecutionMode::Parallel => Err(ComputeError::BackendUnavailable(
                "parallel execution requires the `parallel` feature",
            )),
        }
    }
}

fn run_sequential<K: Kernel>(
    dispatch: &Dispatch,
    output_length: usize,
    kernel: &K,
) -> Result<DispatchOutput, ComputeError> {
    let mut buffer = vec![0u32; output_length];
    let mut invocations = 0u64;
    let mut writes = 0u64;

    for id in dispatch.invocations() {
        invocations += 1;
        for write in kernel.invoke(&id) {
            if write.index >= output_length {
                return Err(out_of_bounds(write.index, id, OutputBuffer(buffer)));
            }
            tracing::trace!(index = write.index, value = write.value, invocation = %id, "write");
            buffer[write.index] = write.value;
            writes += 1;
        }
    }

    Ok(DispatchOutput {
        buffer: OutputBuffer(buffer),
        races: Vec::new(),
        invocations,
        writes,
    })
}

fn out_of_bounds(index: usize, invocation: InvocationId, partial: OutputBuffer) -> ComputeError {
    let output_length = partial.len();
    tracing::warn!(index, output_length, %invocation, "out-of-bounds write, aborting dispatch");
    ComputeError::OutOfBoundsWrite { index, output_length, invocation, partial }
}

/// Groups a write log of `(index, invocation number)` pairs into race reports.
#[cfg(feature = "parallel")]
fn collect_races(dispatch: &Dispatch, mut log: Vec<(usize, u64)>) -> Vec<RaceReport> {
    use crate::index_space::IndexSpace;

    log.sort_unstable();
    log.dedup();

    let mut races = Vec::new();
    for group in log.chunk_by(|a, b| a.0 == b.0) {
        if group.len() < 2 {
            continue;
        }
        let index = group[0].0;
        let contenders = group
            .iter()
            .map(|&(_, n)| IndexSpace::delinearize(dispatch, n))
            .collect::<Vec<_>>();
        tracing::warn!(index, writers = contenders.len(), "racing writes");
        races.push(RaceReport { index, contenders });
    }
    races
}

#[cfg(feature = "parallel")]
mod parallel {
    use super::{collect_races, out_of_bounds, DispatchOutput, Kernel, OutputBuffer};
    use crate::index_space::{Dispatch, IndexSpace, InvocationId};
    use crate::ComputeError;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StrayWrite {
        index: usize,
        invocation: InvocationId,
    }

    pub(super) fn run<K: Kernel>(
        dispatch: &Dispatch,
        output_length: usize,
        kernel: &K,
    ) -> Result<DispatchOutput, ComputeError> {
        let cells: Vec<AtomicU32> = (0..output_length).map(|_| AtomicU32::new(0)).collect();
        let aborted = AtomicBool::new(false);

        let outcome = (0..dispatch.invocation_count())
            .into_par_iter()
            .try_fold(Vec::new, |mut log, n| {
                if aborted.load(Ordering::Relaxed) {
                    return Ok(log);
                }
                let id = IndexSpace::delinearize(dispatch, n);
                for write in kernel.invoke(&id) {
                    let Some(cell) = cells.get(write.index) else {
                        aborted.store(true, Ordering::Relaxed);
                        return Err(StrayWrite { index: write.index, invocation: id });
                    };
                    cell.store(write.value, Ordering::Relaxed);
                    log.push((write.index, n));
                }
                Ok(log)
            })
            .try_reduce(Vec::new, |mut left, mut right| {
                left.append(&mut right);
                Ok(left)
            });

        let buffer = OutputBuffer(cells.into_iter().map(AtomicU32::into_inner).collect());
        let log = match outcome {
            Ok(log) => log,
            Err(StrayWrite { index, invocation }) => {
                return Err(out_of_bounds(index, invocation, buffer));
            }
        };

        let writes = log.len() as u64;
        Ok(DispatchOutput {
            buffer,
            races: collect_races(dispatch, log),
            invocations: dispatch.invocation_count(),
            writes,
        })
    }
}
