//! # RedLilium Frame Graph
//!
//! Declarative per-frame GPU work scheduling for RedLilium.
//!
//! ## Overview
//!
//! A frame is declared as passes connected to resources. The crate derives
//! everything else:
//! - [`FrameGraphBuilder`] - Declaration session: transient and imported
//!   resources, resource groups, passes and their tasks
//! - [`compiler`] - Culling, scheduling, queue partitioning, transient memory
//!   aliasing and the synchronization plan, producing a [`CompiledGraph`]
//! - [`GraphCache`] - One resident compiled graph per slot, keyed by a
//!   byte-exact [`CacheKey`]
//! - [`FrameExecutor`] - Replays a compiled graph against a [`GraphBackend`]
//!
//! ## Example
//!
//! ```
//! use redlilium_framegraph::{
//!     AccessType, BufferDescriptor, BufferUsage, CacheKey, DummyBackend, ExternalHandle,
//!     FrameGraphConfig, FrameGraphContext, FrameStatus, GraphBegin, PassContext, PassKind,
//!     TextureFormat,
//! };
//!
//! let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
//! let mut backend = DummyBackend::new();
//!
//! let GraphBegin::Declare(mut builder) = ctx.begin_graph("main", CacheKey::from("frame")) else {
//!     unreachable!()
//! };
//! let desc = BufferDescriptor::new(4096, BufferUsage::empty());
//! let vertices = builder.declare_buffer("vertices", desc);
//! let format = TextureFormat::Bgra8Unorm;
//! let surface = builder.import_swapchain("surface", ExternalHandle(1), format, 800, 600);
//!
//! let mut upload = builder.begin_pass(PassKind::Transfer, "upload");
//! upload.connect_output(vertices, AccessType::TransferWrite).unwrap();
//! upload.set_task(|ctx: &mut PassContext<'_>| ctx.encoder().marker("upload"));
//! upload.end_pass().unwrap();
//!
//! let mut draw = builder.begin_pass(PassKind::Render, "draw");
//! draw.connect_input(vertices, AccessType::VertexBuffer).unwrap();
//! draw.connect_output(surface, AccessType::ColorAttachmentWrite).unwrap();
//! draw.set_task(|ctx: &mut PassContext<'_>| ctx.encoder().marker("draw"));
//! draw.end_pass().unwrap();
//!
//! let graph = builder.end_graph().unwrap();
//! assert_eq!(graph.pass_names(), vec!["upload", "draw"]);
//!
//! let status = ctx.execute(&mut backend, &graph, &()).unwrap();
//! assert_eq!(status, FrameStatus::Presented);
//! ```

pub mod backend;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod profiling;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "dummy")]
pub use backend::dummy::{DummyBackend, DummyEncoder, DummyEvent};
pub use backend::{
    CommandEncoder, GraphBackend, MemoryHandle, PhysicalHandle, ResolvedBarrier,
    ResolvedTransfer, ResourcePlacement, Submission,
};
pub use cache::{CacheKey, CacheKeyBuilder, CacheStats, GraphCache};
pub use compiler::{CompiledGraph, SemaphoreRef, SubmissionBatch, SyncPlan};
pub use config::{FrameGraphConfig, QueueSupport, TransientLimits};
pub use context::{FrameGraphContext, GraphBegin};
pub use error::{
    AcquireError, BackendError, CompileError, DeclarationError, ErrorKind, FrameGraphError,
    FrameGraphResult,
};
pub use executor::{Fence, FenceStatus, FrameExecutor, FrameStatus, PassContext};
pub use graph::{
    AccessType, ExternalHandle, FrameGraphBuilder, GroupId, ImageLayout, PassBuilder, PassId,
    PassKind, QueueType, ResourceId, ResourceState,
};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_context_starts_clean() {
        let ctx = FrameGraphContext::new(FrameGraphConfig::default());
        assert!(ctx.cache().is_empty());
        assert_eq!(ctx.last_error(), None);
        assert_eq!(ctx.frame_index(), 0);
    }
}
