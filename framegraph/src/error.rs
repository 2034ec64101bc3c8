//! Frame graph error types.
//!
//! Errors are grouped by the stage that detects them:
//!
//! - [`DeclarationError`]: rejected while the caller declares passes; the
//!   builder is poisoned and nothing is compiled.
//! - [`CompileError`]: invariant violations or memory exhaustion found while
//!   compiling; any previously cached graph stays resident.
//! - [`AcquireError`]: the presentation surface could not be acquired or
//!   presented. Recoverable: only the current frame is skipped.
//! - [`BackendError`]: failures reported by the backend while executing.
//!
//! [`FrameGraphError`] wraps all of them and [`ErrorKind`] classifies them.

use thiserror::Error;

use crate::graph::{AccessType, GroupId, PassId, PassKind, ResourceId};

/// Errors detected while declaring a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error(
        "resource {resource:?} is written by {first:?} and {second:?} with no ordering between them"
    )]
    AmbiguousWrite {
        resource: ResourceId,
        first: PassId,
        second: PassId,
    },
    #[error("pass '{pass}' ended without a task")]
    MissingTask { pass: String },
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),
    #[error("unknown resource group {0:?}")]
    UnknownGroup(GroupId),
    #[error("unknown pass {0:?}")]
    UnknownPass(PassId),
    #[error("pass '{pass}' cannot declare {access:?} in a {kind} pass")]
    AccessNotAllowed {
        pass: String,
        access: AccessType,
        kind: PassKind,
    },
    #[error("pass '{pass}' connects {access:?} on the wrong side in a {kind} pass")]
    AccessDirection {
        pass: String,
        access: AccessType,
        kind: PassKind,
    },
    #[error("{access:?} cannot be applied to resource '{resource}'")]
    AccessKindMismatch { resource: String, access: AccessType },
    #[error("imported resource '{resource}' was not declared with the usage {access:?} needs")]
    UsageNotDeclared { resource: String, access: AccessType },
    #[error("resource '{resource}' belongs to group '{group}' and must be written through it")]
    GroupBypass { resource: String, group: String },
    #[error("pass '{pass}' needs two different layouts for resource '{resource}'")]
    LayoutConflict { pass: String, resource: String },
    #[error("resource group '{0}' has no members")]
    EmptyGroup(String),
    #[error("resource '{resource}' is already a member of group '{group}'")]
    AlreadyGrouped { resource: String, group: String },
    #[error("pass {0:?} cannot depend on itself")]
    SelfDependency(PassId),
}

/// Errors detected while compiling a declared graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("frame graph contains a dependency cycle through passes {passes:?}")]
    CyclicDependency { passes: Vec<String> },
    #[error("pass '{pass}' reads transient resource '{resource}' that no live pass produces")]
    MissingProducer { resource: String, pass: String },
    #[error("transient resources need {required} bytes but the budget is {budget} bytes")]
    TransientExhaustion { required: u64, budget: u64 },
}

/// Presentation surface failures. Recoverable by skipping the frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    #[error("surface is out of date and must be reconfigured")]
    OutOfDate,
    #[error("surface was lost")]
    SurfaceLost,
    #[error("timed out waiting for a surface image")]
    Timeout,
}

/// Backend failures during execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to allocate memory: {0}")]
    AllocationFailed(String),
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Failed to submit commands: {0}")]
    SubmissionFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

/// Any frame graph error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameGraphError {
    #[error("declaration error: {0}")]
    Declaration(#[from] DeclarationError),
    #[error("compilation error: {0}")]
    Compilation(#[from] CompileError),
    #[error("surface acquisition failed: {0}")]
    Acquisition(#[from] AcquireError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Coarse classification of the last error a context observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The declaration was rejected.
    Declaration,
    /// Compilation found a cycle or an unproduced resource.
    CompilationInvariant,
    /// Transient resources did not fit the configured limits.
    TransientExhaustion,
    /// The surface could not be acquired or presented; the frame was skipped.
    Acquisition,
    /// The backend failed.
    Backend,
}

impl ErrorKind {
    /// Check if the caller can simply try again next frame.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Acquisition)
    }
}

impl FrameGraphError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Declaration(_) => ErrorKind::Declaration,
            Self::Compilation(CompileError::TransientExhaustion { .. }) => {
                ErrorKind::TransientExhaustion
            }
            Self::Compilation(_) => ErrorKind::CompilationInvariant,
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }
}

/// Result alias used throughout the crate.
pub type FrameGraphResult<T> = Result<T, FrameGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeclarationError::MissingTask {
            pass: "gbuffer".to_string(),
        };
        assert_eq!(err.to_string(), "pass 'gbuffer' ended without a task");

        let err = FrameGraphError::from(CompileError::TransientExhaustion {
            required: 2048,
            budget: 1024,
        });
        assert_eq!(
            err.to_string(),
            "compilation error: transient resources need 2048 bytes but the budget is 1024 bytes"
        );
    }

    #[test]
    fn test_error_kind() {
        let cycle = FrameGraphError::from(CompileError::CyclicDependency { passes: vec![] });
        assert_eq!(cycle.kind(), ErrorKind::CompilationInvariant);

        let exhausted = FrameGraphError::from(CompileError::TransientExhaustion {
            required: 1,
            budget: 0,
        });
        assert_eq!(exhausted.kind(), ErrorKind::TransientExhaustion);

        let acquire = FrameGraphError::from(AcquireError::OutOfDate);
        assert_eq!(acquire.kind(), ErrorKind::Acquisition);
        assert!(acquire.kind().is_recoverable());
        assert!(!ErrorKind::Backend.is_recoverable());
    }
}
