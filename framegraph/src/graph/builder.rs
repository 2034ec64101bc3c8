//! Declaration sessions.
//!
//! A [`FrameGraphBuilder`] is handed out by
//! [`FrameGraphContext::begin_graph`](crate::FrameGraphContext::begin_graph) when
//! the cache cannot serve the requested key. Passes are declared one at a time
//! through [`PassBuilder`], which stands in for the "current pass": it exists
//! from `begin_pass` to `end_pass` and nothing else can be declared meanwhile.
//!
//! Declaration errors are reported immediately. The first one also poisons the
//! builder, so [`FrameGraphBuilder::end_graph`] refuses to compile a graph
//! that was only partially accepted.

use std::collections::HashMap;
use std::sync::Arc;

use super::access::{AccessType, ResourceState};
use super::dependency::{DependencyBuilder, PassAccess};
use super::pass::{Connection, ConnectionTarget, PassId, PassKind, PassNode};
use super::resource::{
    ExternalHandle, GroupId, ResourceGroup, ResourceId, ResourceKind, ResourceNode,
    ResourceOrigin, ResourceUsage,
};
use super::{GraphDeclaration, expand_connections};
use crate::cache::CacheKey;
use crate::compiler::{self, CompiledGraph};
use crate::context::FrameGraphContext;
use crate::error::{DeclarationError, ErrorKind, FrameGraphError};
use crate::executor::PassContext;
use crate::profile_scope;
use crate::types::{BufferDescriptor, TextureDescriptor, TextureFormat};

/// Declaration session for one graph.
pub struct FrameGraphBuilder<'ctx> {
    ctx: &'ctx mut FrameGraphContext,
    name: String,
    key: CacheKey,
    resources: Vec<ResourceNode>,
    groups: Vec<ResourceGroup>,
    passes: Vec<PassNode>,
    deps: DependencyBuilder,
    error: Option<DeclarationError>,
}

impl<'ctx> FrameGraphBuilder<'ctx> {
    pub(crate) fn new(ctx: &'ctx mut FrameGraphContext, name: &str, key: CacheKey) -> Self {
        Self {
            ctx,
            name: name.to_string(),
            key,
            resources: Vec::new(),
            groups: Vec::new(),
            passes: Vec::new(),
            deps: DependencyBuilder::new(),
            error: None,
        }
    }

    /// Name of the graph being declared.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a transient texture owned by the graph.
    ///
    /// Usage flags implied by the accesses declared later are added to the
    /// descriptor automatically.
    pub fn declare_texture(&mut self, name: &str, descriptor: TextureDescriptor) -> ResourceId {
        let usage = ResourceUsage::from_texture(&descriptor);
        self.push_resource(
            name,
            ResourceKind::Texture(descriptor),
            ResourceOrigin::Transient,
            usage,
        )
    }

    /// Declare a transient buffer owned by the graph.
    pub fn declare_buffer(&mut self, name: &str, descriptor: BufferDescriptor) -> ResourceId {
        let usage = ResourceUsage::from_buffer(&descriptor);
        self.push_resource(
            name,
            ResourceKind::Buffer(descriptor),
            ResourceOrigin::Transient,
            usage,
        )
    }

    /// Import a caller-owned texture.
    ///
    /// `initial` is the state the texture is in when the frame starts. Only
    /// accesses covered by the descriptor's usage flags may be declared on it.
    pub fn import_texture(
        &mut self,
        name: &str,
        handle: ExternalHandle,
        descriptor: TextureDescriptor,
        initial: ResourceState,
    ) -> ResourceId {
        let usage = ResourceUsage::from_texture(&descriptor);
        self.push_resource(
            name,
            ResourceKind::Texture(descriptor),
            ResourceOrigin::Imported { handle, initial },
            usage,
        )
    }

    /// Import a caller-owned buffer.
    pub fn import_buffer(
        &mut self,
        name: &str,
        handle: ExternalHandle,
        descriptor: BufferDescriptor,
        initial: ResourceState,
    ) -> ResourceId {
        let usage = ResourceUsage::from_buffer(&descriptor);
        self.push_resource(
            name,
            ResourceKind::Buffer(descriptor),
            ResourceOrigin::Imported { handle, initial },
            usage,
        )
    }

    /// Import a presentation surface.
    ///
    /// The surface image is acquired at execution time and presented after the
    /// frame's last submission. Some live pass must write it; otherwise the
    /// compiler substitutes a pass that clears it.
    pub fn import_swapchain(
        &mut self,
        name: &str,
        surface: ExternalHandle,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> ResourceId {
        self.push_resource(
            name,
            ResourceKind::Swapchain {
                format,
                width,
                height,
            },
            ResourceOrigin::Imported {
                handle: surface,
                initial: ResourceState::ACQUIRED,
            },
            ResourceUsage::RENDER_TARGET
                | ResourceUsage::COPY_DST
                | ResourceUsage::STORAGE
                | ResourceUsage::PRESENT,
        )
    }

    /// Create a group from resources that are written together.
    pub fn create_group(
        &mut self,
        name: &str,
        members: &[ResourceId],
    ) -> Result<GroupId, DeclarationError> {
        if members.is_empty() {
            return Err(self.fail(DeclarationError::EmptyGroup(name.to_string())));
        }
        let id = GroupId::new(self.groups.len() as u32);
        for &member in members {
            self.check_groupable(member)?;
        }
        for &member in members {
            self.resources[member.index()].set_group(id);
        }
        self.groups
            .push(ResourceGroup::new(id, name, members.to_vec()));
        log::trace!("FrameGraph '{}': group '{name}' with {} members", self.name, members.len());
        Ok(id)
    }

    /// Append a resource to an existing group.
    ///
    /// Only passes declared afterwards see the new member.
    pub fn extend_group(
        &mut self,
        group: GroupId,
        resource: ResourceId,
    ) -> Result<(), DeclarationError> {
        if group.index() >= self.groups.len() {
            return Err(self.fail(DeclarationError::UnknownGroup(group)));
        }
        self.check_groupable(resource)?;
        self.resources[resource.index()].set_group(group);
        self.groups[group.index()].push(resource);
        Ok(())
    }

    /// Start declaring a pass.
    pub fn begin_pass(&mut self, kind: PassKind, name: &str) -> PassBuilder<'_, 'ctx> {
        let id = PassId::new(self.passes.len() as u32);
        PassBuilder {
            node: Some(PassNode::new(id, kind, name)),
            after: Vec::new(),
            graph: self,
        }
    }

    /// Order `dependent` after `dependency` without any resource between them.
    ///
    /// Both passes must already be declared. Unlike resource-derived edges, an
    /// explicit dependency may point backwards and so can introduce a cycle,
    /// which compilation reports.
    pub fn add_dependency(
        &mut self,
        dependent: PassId,
        dependency: PassId,
    ) -> Result<(), DeclarationError> {
        for pass in [dependent, dependency] {
            if pass.index() >= self.passes.len() {
                return Err(self.fail(DeclarationError::UnknownPass(pass)));
            }
        }
        if dependent == dependency {
            return Err(self.fail(DeclarationError::SelfDependency(dependent)));
        }
        self.deps.add_ordering(dependency, dependent);
        Ok(())
    }

    /// A declared resource.
    pub fn resource(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.resources.get(id.index())
    }

    /// A declared group.
    pub fn group(&self, id: GroupId) -> Option<&ResourceGroup> {
        self.groups.get(id.index())
    }

    /// Number of passes declared so far.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// The first declaration error, if any.
    pub fn error(&self) -> Option<&DeclarationError> {
        self.error.as_ref()
    }

    /// Finish the declaration, compile it and make it the resident graph of its
    /// cache slot.
    ///
    /// Fails with the first declaration error if any was reported. A failed
    /// compilation leaves the previously cached graph in place.
    pub fn end_graph(self) -> Result<Arc<CompiledGraph>, FrameGraphError> {
        profile_scope!("frame_graph_end");

        let Self {
            ctx,
            name,
            key,
            resources,
            groups,
            passes,
            deps,
            error,
        } = self;

        if let Some(error) = error {
            log::error!("FrameGraph '{name}': not compiled, declaration was rejected: {error}");
            return Err(error.into());
        }

        let declaration = GraphDeclaration {
            name,
            key,
            resources,
            groups,
            passes,
            edges: deps.into_edges(),
        };
        let id = ctx.next_graph_id();
        match compiler::compile(declaration, &ctx.config, id) {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                ctx.cache.store(
                    compiled.name(),
                    compiled.key().clone(),
                    Arc::clone(&compiled),
                );
                Ok(compiled)
            }
            Err(error) => {
                let error = FrameGraphError::from(error);
                log::error!("FrameGraph compilation failed: {error}");
                ctx.record_error(error.kind());
                Err(error)
            }
        }
    }

    fn push_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        origin: ResourceOrigin,
        usage: ResourceUsage,
    ) -> ResourceId {
        let id = ResourceId::new(self.resources.len() as u32);
        self.resources
            .push(ResourceNode::new(id, name, kind, origin, usage));
        id
    }

    fn check_groupable(&mut self, resource: ResourceId) -> Result<(), DeclarationError> {
        let Some(node) = self.resources.get(resource.index()) else {
            return Err(self.fail(DeclarationError::UnknownResource(resource)));
        };
        if let Some(group) = node.group() {
            let error = DeclarationError::AlreadyGrouped {
                resource: node.name().to_string(),
                group: self.groups[group.index()].name().to_string(),
            };
            return Err(self.fail(error));
        }
        Ok(())
    }

    /// Record a declaration error, poisoning the builder.
    fn fail(&mut self, error: DeclarationError) -> DeclarationError {
        log::error!("FrameGraph '{}': {error}", self.name);
        if self.error.is_none() {
            self.error = Some(error.clone());
        }
        self.ctx.record_error(ErrorKind::Declaration);
        error
    }

    /// Validate one connection and widen transient usage to cover it.
    fn validate_connection(
        &mut self,
        pass: &PassNode,
        target: ConnectionTarget,
        access: AccessType,
    ) -> Result<(), DeclarationError> {
        if !access.allowed_in(pass.kind) {
            return Err(self.fail(DeclarationError::AccessNotAllowed {
                pass: pass.name.clone(),
                access,
                kind: pass.kind,
            }));
        }

        let members = match target {
            ConnectionTarget::Resource(resource) => {
                let Some(node) = self.resources.get(resource.index()) else {
                    return Err(self.fail(DeclarationError::UnknownResource(resource)));
                };
                if access.is_write()
                    && let Some(group) = node.group()
                {
                    let error = DeclarationError::GroupBypass {
                        resource: node.name().to_string(),
                        group: self.groups[group.index()].name().to_string(),
                    };
                    return Err(self.fail(error));
                }
                vec![resource]
            }
            ConnectionTarget::Group(group) => match self.groups.get(group.index()) {
                Some(group) => group.members().to_vec(),
                None => return Err(self.fail(DeclarationError::UnknownGroup(group))),
            },
        };

        for resource in &members {
            let node = &self.resources[resource.index()];
            if !node.kind().accepts(access.target()) {
                let error = DeclarationError::AccessKindMismatch {
                    resource: node.name().to_string(),
                    access,
                };
                return Err(self.fail(error));
            }
            if !node.is_transient() && !node.usage().contains(access.required_usage()) {
                let error = DeclarationError::UsageNotDeclared {
                    resource: node.name().to_string(),
                    access,
                };
                return Err(self.fail(error));
            }
        }

        for resource in members {
            let node = &mut self.resources[resource.index()];
            if node.is_transient() {
                node.add_usage(access.required_usage());
            }
        }
        Ok(())
    }

    /// Check that no resource needs two layouts within the pass.
    fn check_layouts(&mut self, pass: &PassNode) -> Result<(), DeclarationError> {
        let mut states: HashMap<ResourceId, ResourceState> = HashMap::new();
        for access in &pass.accesses {
            let node = &self.resources[access.resource.index()];
            let state = access.access.state(pass.kind, node.kind().is_image());
            let merged = match states.get(&access.resource) {
                Some(previous) => previous.merge(state),
                None => Some(state),
            };
            match merged {
                Some(merged) => {
                    states.insert(access.resource, merged);
                }
                None => {
                    let error = DeclarationError::LayoutConflict {
                        pass: pass.name.clone(),
                        resource: node.name().to_string(),
                    };
                    return Err(self.fail(error));
                }
            }
        }
        Ok(())
    }

    fn finish_pass(
        &mut self,
        mut node: PassNode,
        after: &[PassId],
    ) -> Result<PassId, DeclarationError> {
        if node.task.is_none() {
            return Err(self.fail(DeclarationError::MissingTask { pass: node.name }));
        }

        node.accesses = expand_connections(&self.groups, &node);
        self.check_layouts(&node)?;

        let (reads, writes) = split_accesses(&node.accesses);
        for &dependency in after {
            self.deps.add_ordering(dependency, node.id);
        }
        if let Err(error) = self.deps.add_pass(node.id, &reads, &writes) {
            if let DeclarationError::AmbiguousWrite { resource, first, .. } = &error {
                log::error!(
                    "FrameGraph '{}': pass '{}' writes '{}' already written by '{}'",
                    self.name,
                    node.name,
                    self.resources[resource.index()].name(),
                    self.passes[first.index()].name(),
                );
            }
            return Err(self.fail(error));
        }

        log::trace!(
            "FrameGraph '{}': declared {} pass '{}' ({} reads, {} writes)",
            self.name,
            node.kind,
            node.name,
            reads.len(),
            writes.len()
        );
        let id = node.id;
        self.passes.push(node);
        Ok(id)
    }
}

/// Split accesses into reads and writes, one entry per resource on each side.
fn split_accesses(accesses: &[PassAccess]) -> (Vec<PassAccess>, Vec<PassAccess>) {
    let mut reads: Vec<PassAccess> = Vec::new();
    let mut writes: Vec<PassAccess> = Vec::new();
    for access in accesses {
        if access.access.is_read() && !reads.iter().any(|r| r.resource == access.resource) {
            reads.push(*access);
        }
        if access.access.is_write() && !writes.iter().any(|w| w.resource == access.resource) {
            writes.push(*access);
        }
    }
    (reads, writes)
}

/// Declaration of a single pass.
///
/// Dropping the builder without calling [`PassBuilder::end_pass`] discards
/// the pass.
pub struct PassBuilder<'b, 'ctx> {
    graph: &'b mut FrameGraphBuilder<'ctx>,
    node: Option<PassNode>,
    after: Vec<PassId>,
}

impl std::fmt::Debug for PassBuilder<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassBuilder")
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

impl PassBuilder<'_, '_> {
    /// Handle the pass will have once ended.
    pub fn id(&self) -> PassId {
        PassId::new(self.graph.passes.len() as u32)
    }

    /// Declare a read of a resource or group.
    pub fn connect_input(
        &mut self,
        target: impl Into<ConnectionTarget>,
        access: AccessType,
    ) -> Result<&mut Self, DeclarationError> {
        let target = target.into();
        if !access.is_read() {
            return Err(self.wrong_side(access));
        }
        self.connect(target, access)?;
        if let Some(node) = &mut self.node {
            node.inputs.push(Connection { target, access });
        }
        Ok(self)
    }

    /// Declare a write of a resource or group.
    pub fn connect_output(
        &mut self,
        target: impl Into<ConnectionTarget>,
        access: AccessType,
    ) -> Result<&mut Self, DeclarationError> {
        let target = target.into();
        if !access.is_write() {
            return Err(self.wrong_side(access));
        }
        self.connect(target, access)?;
        if let Some(node) = &mut self.node {
            node.outputs.push(Connection { target, access });
        }
        Ok(self)
    }

    /// Attach the callback that records the pass's commands.
    pub fn set_task<F>(&mut self, task: F) -> &mut Self
    where
        F: Fn(&mut PassContext<'_>) + Send + Sync + 'static,
    {
        if let Some(node) = &mut self.node {
            node.task = Some(Box::new(task));
        }
        self
    }

    /// Include or exclude the pass from this frame. Disabled passes are culled.
    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        if let Some(node) = &mut self.node {
            node.enabled = enabled;
        }
        self
    }

    /// Keep the pass even if nothing consumes its outputs.
    pub fn mark_side_effect(&mut self) -> &mut Self {
        if let Some(node) = &mut self.node {
            node.side_effect = true;
        }
        self
    }

    /// Order this pass after an already declared pass.
    pub fn depends_on(&mut self, pass: PassId) -> Result<&mut Self, DeclarationError> {
        if pass.index() >= self.graph.passes.len() {
            return Err(self.graph.fail(DeclarationError::UnknownPass(pass)));
        }
        if !self.after.contains(&pass) {
            self.after.push(pass);
        }
        Ok(self)
    }

    /// Finish the pass and feed its accesses to dependency analysis.
    pub fn end_pass(mut self) -> Result<PassId, DeclarationError> {
        let Some(node) = self.node.take() else {
            return Err(DeclarationError::UnknownPass(self.id()));
        };
        let after = std::mem::take(&mut self.after);
        self.graph.finish_pass(node, &after)
    }

    fn connect(
        &mut self,
        target: ConnectionTarget,
        access: AccessType,
    ) -> Result<(), DeclarationError> {
        let Some(node) = self.node.take() else {
            return Err(DeclarationError::UnknownPass(self.id()));
        };
        let result = self.graph.validate_connection(&node, target, access);
        self.node = Some(node);
        result
    }

    fn wrong_side(&mut self, access: AccessType) -> DeclarationError {
        let (pass, kind) = match &self.node {
            Some(node) => (node.name.clone(), node.kind),
            None => (String::new(), PassKind::Render),
        };
        self.graph.fail(DeclarationError::AccessDirection { pass, access, kind })
    }
}

impl Drop for PassBuilder<'_, '_> {
    fn drop(&mut self) {
        if let Some(node) = &self.node {
            log::warn!(
                "FrameGraph '{}': pass '{}' dropped without end_pass, discarded",
                self.graph.name,
                node.name
            );
        }
    }
}
