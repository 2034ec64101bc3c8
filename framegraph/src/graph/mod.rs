//! Frame graph declaration model.
//!
//! A frame is described as passes connected to resources. The declaration is
//! built through a [`FrameGraphBuilder`] session and handed to the compiler
//! as a [`GraphDeclaration`].
//!
//! | Type | Role |
//! |------|------|
//! | [`ResourceNode`] | A transient or imported texture, buffer or surface |
//! | [`ResourceGroup`] | Ordered resources written through one binding contract |
//! | [`PassNode`] | Render, compute or transfer work with inputs, outputs and a task |
//! | [`DependencyEdge`] | Hazard between two passes, derived from their accesses |
//! | [`Journey`] | Per-resource state history, filled in by the compiler |
//!
//! # Example
//!
//! ```ignore
//! let hdr = builder.declare_texture("hdr", TextureDescriptor::new_2d(w, h, Rgba16Float, empty));
//!
//! let mut pass = builder.begin_pass(PassKind::Render, "lighting");
//! pass.connect_output(hdr, AccessType::ColorAttachmentWrite)?;
//! pass.set_task(|ctx| ctx.encoder().marker("lighting"));
//! pass.end_pass()?;
//! ```

mod access;
mod builder;
mod dependency;
mod pass;
mod resource;

pub use access::{AccessFlags, AccessTarget, AccessType, ImageLayout, PipelineStages, ResourceState};
pub use builder::{FrameGraphBuilder, PassBuilder};
pub use dependency::{DependencyBuilder, DependencyEdge, Hazard, PassAccess, SyncKind};
pub use pass::{Connection, ConnectionTarget, PassId, PassKind, PassNode, PassTask, QueueType};
pub use resource::{
    BUFFER_ALIGNMENT, ExternalHandle, GroupId, IMAGE_ALIGNMENT, Journey, JourneyStep,
    MemoryClass, MemoryRequirements, ResourceGroup, ResourceId, ResourceKind, ResourceNode,
    ResourceOrigin, ResourceUsage,
};

use crate::cache::CacheKey;

/// A complete, validated graph declaration, ready to compile.
#[derive(Debug)]
pub struct GraphDeclaration {
    pub(crate) name: String,
    pub(crate) key: CacheKey,
    pub(crate) resources: Vec<ResourceNode>,
    pub(crate) groups: Vec<ResourceGroup>,
    pub(crate) passes: Vec<PassNode>,
    pub(crate) edges: Vec<DependencyEdge>,
}

impl GraphDeclaration {
    /// Graph name (also its cache slot).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key the graph was declared under.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Declared resources.
    pub fn resources(&self) -> &[ResourceNode] {
        &self.resources
    }

    /// Declared groups.
    pub fn groups(&self) -> &[ResourceGroup] {
        &self.groups
    }

    /// Declared passes, in declaration order.
    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    /// Derived and explicit dependency edges.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }
}

/// Expand a pass's connections into per-resource accesses.
pub(crate) fn expand_connections(groups: &[ResourceGroup], pass: &PassNode) -> Vec<PassAccess> {
    let mut accesses = Vec::new();
    for connection in pass.inputs.iter().chain(pass.outputs.iter()) {
        match connection.target {
            ConnectionTarget::Resource(resource) => accesses.push(PassAccess {
                resource,
                access: connection.access,
                via_group: None,
            }),
            ConnectionTarget::Group(group) => {
                if let Some(group) = groups.get(group.index()) {
                    accesses.extend(group.members().iter().map(|&resource| PassAccess {
                        resource,
                        access: connection.access,
                        via_group: Some(group.id()),
                    }));
                }
            }
        }
    }
    accesses
}
