//! Physical backing of transient resources.

use crate::backend::{GraphBackend, MemoryHandle, PhysicalHandle, ResourcePlacement};
use crate::compiler::{CompiledGraph, Placement};
use crate::error::BackendError;
use crate::graph::{ResourceId, ResourceKind};

/// Memory blocks and resources created for one compiled graph's transients.
///
/// Owned by the executor until a different graph is executed.
#[derive(Debug)]
pub(crate) struct RealizedTransients {
    graph_id: u64,
    memory: Vec<MemoryHandle>,
    handles: Vec<Option<PhysicalHandle>>,
}

impl RealizedTransients {
    /// Allocate every block of the aliasing plan and create every transient in it.
    ///
    /// On failure whatever was already created is destroyed again.
    pub fn realize(
        backend: &mut dyn GraphBackend,
        graph: &CompiledGraph,
    ) -> Result<Self, BackendError> {
        crate::profile_scope!("realize_transients");

        let mut realized = Self {
            graph_id: graph.id(),
            memory: Vec::with_capacity(graph.aliasing().blocks().len()),
            handles: vec![None; graph.resources().len()],
        };
        if let Err(error) = realized.create_all(backend, graph) {
            log::error!(
                "FrameGraph '{}': failed to realize transients: {error}",
                graph.name()
            );
            realized.destroy(backend);
            return Err(error);
        }

        log::debug!(
            "FrameGraph '{}': realized {} transients in {} blocks ({} bytes)",
            graph.name(),
            realized.resource_count(),
            realized.memory.len(),
            graph.aliasing().total_bytes()
        );
        Ok(realized)
    }

    fn create_all(
        &mut self,
        backend: &mut dyn GraphBackend,
        graph: &CompiledGraph,
    ) -> Result<(), BackendError> {
        let plan = graph.aliasing();
        for block in plan.blocks() {
            let memory = backend.allocate_memory(block.class, block.size, block.alignment)?;
            self.memory.push(memory);
        }

        for resource in graph.resources() {
            let Some(placement) = plan.placement(resource.id()) else {
                continue;
            };
            let placement = match placement {
                Placement::Aliased { block } => ResourcePlacement::Aliased {
                    memory: self.memory[block],
                    offset: 0,
                },
                Placement::Dedicated => ResourcePlacement::Dedicated,
            };
            let handle = match resource.kind() {
                ResourceKind::Texture(desc) if desc.label.is_none() => backend.create_texture(
                    &desc.clone().with_label(resource.name()),
                    placement,
                )?,
                ResourceKind::Texture(desc) => backend.create_texture(desc, placement)?,
                ResourceKind::Buffer(desc) if desc.label.is_none() => backend.create_buffer(
                    &desc.clone().with_label(resource.name()),
                    placement,
                )?,
                ResourceKind::Buffer(desc) => backend.create_buffer(desc, placement)?,
                ResourceKind::Swapchain { .. } => continue,
            };
            self.handles[resource.id().index()] = Some(handle);
        }
        Ok(())
    }

    /// Destroy every resource, then free the memory blocks.
    pub fn destroy(self, backend: &mut dyn GraphBackend) {
        log::trace!(
            "FrameGraph: destroying {} transients of graph {}",
            self.resource_count(),
            self.graph_id
        );
        for handle in self.handles.into_iter().flatten() {
            backend.destroy_resource(handle);
        }
        for memory in self.memory {
            backend.free_memory(memory);
        }
    }

    /// Id of the compiled graph these transients belong to.
    pub fn graph_id(&self) -> u64 {
        self.graph_id
    }

    pub fn handle(&self, resource: ResourceId) -> Option<PhysicalHandle> {
        self.handles.get(resource.index()).copied().flatten()
    }

    pub fn resource_count(&self) -> usize {
        self.handles.iter().flatten().count()
    }
}
