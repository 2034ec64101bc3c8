//! Resource nodes, groups and per-resource journeys.

use bitflags::bitflags;

use super::access::{AccessTarget, ResourceState};
use super::pass::{PassId, QueueType};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};

/// Alignment of transient image placements in aliased memory blocks.
pub const IMAGE_ALIGNMENT: u64 = 64 * 1024;

/// Alignment of transient buffer placements in aliased memory blocks.
pub const BUFFER_ALIGNMENT: u64 = 256;

/// Handle to a resource declared in a frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

impl ResourceId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index of the resource in declaration order.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Handle to a resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u32);

impl GroupId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index of the group in declaration order.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Opaque handle to a resource owned outside the frame graph.
///
/// Its meaning is defined by the backend that executes the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalHandle(pub u64);

bitflags! {
    /// Declared usage of a resource node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const VERTEX = 1 << 4;
        const INDEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const INDIRECT = 1 << 7;
        const COPY_SRC = 1 << 8;
        const COPY_DST = 1 << 9;
        const PRESENT = 1 << 10;
    }
}

impl ResourceUsage {
    /// Usage declared by a texture descriptor.
    pub fn from_texture(desc: &TextureDescriptor) -> Self {
        let mut usage = Self::empty();
        if desc.usage.contains(TextureUsage::COPY_SRC) {
            usage |= Self::COPY_SRC;
        }
        if desc.usage.contains(TextureUsage::COPY_DST) {
            usage |= Self::COPY_DST;
        }
        if desc.usage.contains(TextureUsage::TEXTURE_BINDING) {
            usage |= Self::SAMPLED;
        }
        if desc.usage.contains(TextureUsage::STORAGE_BINDING) {
            usage |= Self::STORAGE;
        }
        if desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            usage |= if desc.format.is_depth_stencil() {
                Self::DEPTH_STENCIL
            } else {
                Self::RENDER_TARGET
            };
        }
        usage
    }

    /// Usage declared by a buffer descriptor.
    pub fn from_buffer(desc: &BufferDescriptor) -> Self {
        let pairs = [
            (BufferUsage::VERTEX, Self::VERTEX),
            (BufferUsage::INDEX, Self::INDEX),
            (BufferUsage::UNIFORM, Self::UNIFORM),
            (BufferUsage::STORAGE, Self::STORAGE),
            (BufferUsage::INDIRECT, Self::INDIRECT),
            (BufferUsage::COPY_SRC, Self::COPY_SRC),
            (BufferUsage::COPY_DST, Self::COPY_DST),
        ];
        pairs
            .iter()
            .filter(|(buffer, _)| desc.usage.contains(*buffer))
            .fold(Self::empty(), |acc, (_, usage)| acc | *usage)
    }

    /// Texture usage flags needed to create a texture with this usage.
    pub fn texture_usage(self) -> TextureUsage {
        let mut usage = TextureUsage::empty();
        if self.contains(Self::COPY_SRC) {
            usage |= TextureUsage::COPY_SRC;
        }
        if self.contains(Self::COPY_DST) {
            usage |= TextureUsage::COPY_DST;
        }
        if self.contains(Self::SAMPLED) {
            usage |= TextureUsage::TEXTURE_BINDING;
        }
        if self.contains(Self::STORAGE) {
            usage |= TextureUsage::STORAGE_BINDING;
        }
        if self.intersects(Self::RENDER_TARGET | Self::DEPTH_STENCIL) {
            usage |= TextureUsage::RENDER_ATTACHMENT;
        }
        usage
    }

    /// Buffer usage flags needed to create a buffer with this usage.
    pub fn buffer_usage(self) -> BufferUsage {
        let mut usage = BufferUsage::empty();
        for (flag, buffer) in [
            (Self::VERTEX, BufferUsage::VERTEX),
            (Self::INDEX, BufferUsage::INDEX),
            (Self::UNIFORM, BufferUsage::UNIFORM),
            (Self::STORAGE, BufferUsage::STORAGE),
            (Self::INDIRECT, BufferUsage::INDIRECT),
            (Self::COPY_SRC, BufferUsage::COPY_SRC),
            (Self::COPY_DST, BufferUsage::COPY_DST),
        ] {
            if self.contains(flag) {
                usage |= buffer;
            }
        }
        usage
    }
}

/// What kind of GPU object a resource node stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A texture.
    Texture(TextureDescriptor),
    /// A buffer.
    Buffer(BufferDescriptor),
    /// A presentation surface image, acquired every frame.
    Swapchain {
        format: TextureFormat,
        width: u32,
        height: u32,
    },
}

impl ResourceKind {
    /// Check if the resource is an image (has layouts).
    pub fn is_image(&self) -> bool {
        !matches!(self, Self::Buffer(_))
    }

    /// Check if an access aimed at `target` can be applied to this resource.
    pub fn accepts(&self, target: AccessTarget) -> bool {
        match target {
            AccessTarget::Any => true,
            AccessTarget::Image => self.is_image(),
            AccessTarget::Buffer => !self.is_image(),
        }
    }

    fn memory_requirements(&self) -> Option<MemoryRequirements> {
        match self {
            Self::Texture(desc) => Some(MemoryRequirements {
                size: align_up(desc.byte_size(), IMAGE_ALIGNMENT),
                alignment: IMAGE_ALIGNMENT,
                class: if desc.format.is_depth_stencil() {
                    MemoryClass::DepthStencilImage
                } else {
                    MemoryClass::ColorImage
                },
            }),
            Self::Buffer(desc) => Some(MemoryRequirements {
                size: align_up(desc.size.max(1), BUFFER_ALIGNMENT),
                alignment: BUFFER_ALIGNMENT,
                class: MemoryClass::Buffer,
            }),
            Self::Swapchain { .. } => None,
        }
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Memory heap class; only resources of the same class may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryClass {
    /// Buffers.
    Buffer,
    /// Color and storage images.
    ColorImage,
    /// Depth/stencil images.
    DepthStencilImage,
}

/// Backing memory a transient resource needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Size in bytes, already aligned.
    pub size: u64,
    /// Placement alignment in bytes.
    pub alignment: u64,
    /// Heap class.
    pub class: MemoryClass,
}

impl MemoryRequirements {
    /// The size class: the next power of two of the aligned size.
    pub fn size_class(&self) -> u64 {
        self.size.next_power_of_two()
    }
}

/// Where a resource node comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// Created and owned by the frame graph for the duration of the frame.
    Transient,
    /// Owned by the caller; the graph only observes and transitions it.
    Imported {
        handle: ExternalHandle,
        initial: ResourceState,
    },
}

/// One recorded state of a resource: which pass touched it, on which queue, how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JourneyStep {
    /// The pass accessing the resource.
    pub pass: PassId,
    /// Queue the pass runs on.
    pub queue: QueueType,
    /// Combined state of all of the pass's accesses to the resource.
    pub state: ResourceState,
}

/// The sequence of states a resource goes through during a frame.
///
/// Steps are stored in an arena indexed by scheduled pass position, so the
/// state at any point of the schedule is a direct lookup. Steps are only ever
/// appended at increasing positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journey {
    initial: ResourceState,
    steps: Vec<Option<JourneyStep>>,
    last: Option<usize>,
    final_state: Option<ResourceState>,
}

impl Journey {
    pub(crate) fn new(initial: ResourceState) -> Self {
        Self {
            initial,
            steps: Vec::new(),
            last: None,
            final_state: None,
        }
    }

    /// Clear all steps and size the arena for a schedule of `pass_count` passes.
    pub(crate) fn reset(&mut self, pass_count: usize) {
        self.steps.clear();
        self.steps.resize(pass_count, None);
        self.last = None;
        self.final_state = None;
    }

    /// Append a step at scheduled position `index`.
    pub(crate) fn record(&mut self, index: usize, step: JourneyStep) {
        debug_assert!(
            self.last.is_none_or(|last| last < index),
            "journey steps must be appended in schedule order"
        );
        if index >= self.steps.len() {
            self.steps.resize(index + 1, None);
        }
        self.steps[index] = Some(step);
        self.last = Some(index);
    }

    pub(crate) fn set_final_state(&mut self, state: ResourceState) {
        self.final_state = Some(state);
    }

    /// State before the first pass of the frame.
    pub fn initial(&self) -> ResourceState {
        self.initial
    }

    /// Step at the given scheduled position, if the pass there touches the resource.
    pub fn get(&self, index: usize) -> Option<&JourneyStep> {
        self.steps.get(index).and_then(Option::as_ref)
    }

    /// The last step strictly before scheduled position `index`.
    pub fn previous(&self, index: usize) -> Option<(usize, &JourneyStep)> {
        let end = index.min(self.steps.len());
        self.steps[..end]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, step)| step.as_ref().map(|s| (i, s)))
    }

    /// The first recorded step.
    pub fn first(&self) -> Option<(usize, &JourneyStep)> {
        self.steps().next()
    }

    /// The last recorded step.
    pub fn last(&self) -> Option<(usize, &JourneyStep)> {
        self.last
            .and_then(|index| self.steps[index].as_ref().map(|step| (index, step)))
    }

    /// All recorded steps with their scheduled positions.
    pub fn steps(&self) -> impl Iterator<Item = (usize, &JourneyStep)> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(i, step)| step.as_ref().map(|s| (i, s)))
    }

    /// State after the frame's trailing transition, if one is planned.
    pub fn final_state(&self) -> Option<ResourceState> {
        self.final_state
    }

    /// State the resource is left in at the end of the frame.
    pub fn end_state(&self) -> ResourceState {
        self.final_state
            .or_else(|| self.last().map(|(_, step)| step.state))
            .unwrap_or(self.initial)
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps().count()
    }

    /// Check if no step was recorded.
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }
}

/// A resource in a frame graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    id: ResourceId,
    name: String,
    kind: ResourceKind,
    origin: ResourceOrigin,
    usage: ResourceUsage,
    group: Option<GroupId>,
    journey: Journey,
}

impl ResourceNode {
    pub(crate) fn new(
        id: ResourceId,
        name: impl Into<String>,
        kind: ResourceKind,
        origin: ResourceOrigin,
        usage: ResourceUsage,
    ) -> Self {
        let initial = match origin {
            ResourceOrigin::Transient => ResourceState::UNDEFINED,
            ResourceOrigin::Imported { initial, .. } => initial,
        };
        Self {
            id,
            name: name.into(),
            kind,
            origin,
            usage,
            group: None,
            journey: Journey::new(initial),
        }
    }

    /// Resource handle.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource kind and descriptor.
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Where the resource comes from.
    pub fn origin(&self) -> ResourceOrigin {
        self.origin
    }

    /// Declared usage. For transients this is the union of all declared accesses.
    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    /// The group the resource belongs to, if any.
    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// The resource's state history.
    pub fn journey(&self) -> &Journey {
        &self.journey
    }

    /// Check if the resource is owned by the graph.
    pub fn is_transient(&self) -> bool {
        matches!(self.origin, ResourceOrigin::Transient)
    }

    /// Check if the resource is a presentation surface.
    pub fn is_swapchain(&self) -> bool {
        matches!(self.kind, ResourceKind::Swapchain { .. })
    }

    /// External handle of an imported resource.
    pub fn external_handle(&self) -> Option<ExternalHandle> {
        match self.origin {
            ResourceOrigin::Imported { handle, .. } => Some(handle),
            ResourceOrigin::Transient => None,
        }
    }

    /// Backing memory needed, for transient resources only.
    pub fn memory_requirements(&self) -> Option<MemoryRequirements> {
        if self.is_transient() {
            self.kind.memory_requirements()
        } else {
            None
        }
    }

    pub(crate) fn add_usage(&mut self, usage: ResourceUsage) {
        self.usage |= usage;
        match &mut self.kind {
            ResourceKind::Texture(desc) => desc.usage |= usage.texture_usage(),
            ResourceKind::Buffer(desc) => desc.usage |= usage.buffer_usage(),
            ResourceKind::Swapchain { .. } => {}
        }
    }

    pub(crate) fn set_group(&mut self, group: GroupId) {
        self.group = Some(group);
    }

    pub(crate) fn journey_mut(&mut self) -> &mut Journey {
        &mut self.journey
    }
}

/// An ordered set of resources written together through one binding contract,
/// such as the color targets of a G-buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    id: GroupId,
    name: String,
    members: Vec<ResourceId>,
}

impl ResourceGroup {
    pub(crate) fn new(id: GroupId, name: impl Into<String>, members: Vec<ResourceId>) -> Self {
        Self {
            id,
            name: name.into(),
            members,
        }
    }

    /// Group handle.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in binding order.
    pub fn members(&self) -> &[ResourceId] {
        &self.members
    }

    pub(crate) fn push(&mut self, resource: ResourceId) {
        self.members.push(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::access::{AccessFlags, ImageLayout, PipelineStages};

    fn step(pass: u32) -> JourneyStep {
        JourneyStep {
            pass: PassId::new(pass),
            queue: QueueType::Graphics,
            state: ResourceState::new(
                AccessFlags::SHADER_READ,
                PipelineStages::FRAGMENT_SHADER,
                ImageLayout::ShaderReadOnly,
            ),
        }
    }

    #[test]
    fn test_journey_lookup() {
        let mut journey = Journey::new(ResourceState::UNDEFINED);
        journey.reset(5);
        journey.record(1, step(7));
        journey.record(3, step(9));

        assert!(journey.get(0).is_none());
        assert_eq!(journey.get(1).map(|s| s.pass), Some(PassId::new(7)));
        assert_eq!(journey.previous(3).map(|(i, _)| i), Some(1));
        assert_eq!(journey.previous(1), None);
        assert_eq!(journey.previous(10).map(|(i, _)| i), Some(3));
        assert_eq!(journey.last().map(|(i, _)| i), Some(3));
        assert_eq!(journey.first().map(|(i, _)| i), Some(1));
        assert_eq!(journey.len(), 2);
    }

    #[test]
    fn test_journey_end_state() {
        let mut journey = Journey::new(ResourceState::ACQUIRED);
        journey.reset(2);
        assert_eq!(journey.end_state(), ResourceState::ACQUIRED);
        journey.record(0, step(0));
        assert_eq!(journey.end_state().layout, ImageLayout::ShaderReadOnly);
        journey.set_final_state(ResourceState::PRESENT);
        assert_eq!(journey.end_state(), ResourceState::PRESENT);
    }

    #[test]
    fn test_usage_round_trip_through_texture_flags() {
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        let usage = ResourceUsage::from_texture(&desc);
        assert_eq!(usage, ResourceUsage::DEPTH_STENCIL | ResourceUsage::SAMPLED);
        assert_eq!(usage.texture_usage(), desc.usage);
    }

    #[test]
    fn test_memory_requirements() {
        let texture = ResourceNode::new(
            ResourceId::new(0),
            "color",
            ResourceKind::Texture(TextureDescriptor::new_2d(
                16,
                16,
                TextureFormat::Rgba8Unorm,
                TextureUsage::empty(),
            )),
            ResourceOrigin::Transient,
            ResourceUsage::empty(),
        );
        let req = texture.memory_requirements().unwrap();
        assert_eq!(req.size, IMAGE_ALIGNMENT);
        assert_eq!(req.class, MemoryClass::ColorImage);
        assert_eq!(req.size_class(), IMAGE_ALIGNMENT);

        let buffer = ResourceNode::new(
            ResourceId::new(1),
            "buffer",
            ResourceKind::Buffer(BufferDescriptor::new(1000, BufferUsage::STORAGE)),
            ResourceOrigin::Transient,
            ResourceUsage::STORAGE,
        );
        let req = buffer.memory_requirements().unwrap();
        assert_eq!(req.size, 1024);
        assert_eq!(req.size_class(), 1024);
    }

    #[test]
    fn test_imported_has_no_memory_requirements() {
        let node = ResourceNode::new(
            ResourceId::new(0),
            "history",
            ResourceKind::Buffer(BufferDescriptor::new(64, BufferUsage::STORAGE)),
            ResourceOrigin::Imported {
                handle: ExternalHandle(42),
                initial: ResourceState::UNDEFINED,
            },
            ResourceUsage::STORAGE,
        );
        assert!(node.memory_requirements().is_none());
        assert_eq!(node.external_handle(), Some(ExternalHandle(42)));
    }
}
