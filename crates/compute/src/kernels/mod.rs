// Canonical conformance kernels. Each one only reads the InvocationId it is handed.

pub mod global_constant_op;
pub use global_constant_op::GlobalConstantKernel;
pub mod local_index_op;
pub use local_index_op::LocalIndexKernel;
pub mod local_invocation_index_op;
pub use local_invocation_index_op::LocalInvocationIndexKernel;

use crate::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Named kernels a [`crate::ComputeBackend`] knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKernel {
    /// `output[local_invocation_id.x] = local_invocation_id.x`
    LocalIndex,
    /// `output[global_invocation_id.x] = 1`
    GlobalConstant,
    /// `output[flatten(global_invocation_id)] = local_invocation_index`
    LocalInvocationIndex,
}

impl BuiltinKernel {
    pub const ALL: [Self; 3] = [Self::LocalIndex, Self::GlobalConstant, Self::LocalInvocationIndex];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LocalIndex => "local-index",
            Self::GlobalConstant => "global-constant",
            Self::LocalInvocationIndex => "local-invocation-index",
        }
    }
}

impl fmt::Display for BuiltinKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinKernel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kernel| kernel.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownKernel(s.to_owned()))
    }
}
