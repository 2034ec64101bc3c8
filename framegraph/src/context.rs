//! The frame graph context: cache, executor and error state of one renderer.

use std::any::Any;
use std::sync::Arc;

use crate::backend::GraphBackend;
use crate::cache::{CacheKey, GraphCache};
use crate::compiler::CompiledGraph;
use crate::config::FrameGraphConfig;
use crate::error::{BackendError, ErrorKind, FrameGraphError};
use crate::executor::{FrameExecutor, FrameStatus};
use crate::graph::FrameGraphBuilder;

/// Result of [`FrameGraphContext::begin_graph`].
pub enum GraphBegin<'ctx> {
    /// The resident graph was compiled under the same key; declaration is skipped.
    Cached(Arc<CompiledGraph>),
    /// The key changed or the slot is empty; declare the graph and end it.
    Declare(FrameGraphBuilder<'ctx>),
}

impl<'ctx> GraphBegin<'ctx> {
    /// Check if the caller has to declare the graph (false = served from cache).
    pub fn needs_declaration(&self) -> bool {
        matches!(self, Self::Declare(_))
    }

    /// The cached graph, if the lookup hit.
    pub fn cached(&self) -> Option<&Arc<CompiledGraph>> {
        match self {
            Self::Cached(graph) => Some(graph),
            Self::Declare(_) => None,
        }
    }

    /// The builder, if the graph must be declared.
    pub fn into_builder(self) -> Option<FrameGraphBuilder<'ctx>> {
        match self {
            Self::Declare(builder) => Some(builder),
            Self::Cached(_) => None,
        }
    }
}

/// Owns everything that outlives a single frame: the configuration, the
/// compiled graph cache, the executor with its realized transients and the
/// last error observed.
///
/// # Example
///
/// ```
/// use redlilium_framegraph::{
///     AccessType, CacheKey, DummyBackend, FrameGraphConfig, FrameGraphContext, GraphBegin,
///     PassContext, PassKind, TextureDescriptor, TextureFormat, TextureUsage,
/// };
///
/// let mut ctx = FrameGraphContext::new(FrameGraphConfig::default());
/// let mut backend = DummyBackend::new();
///
/// for _ in 0..2 {
///     let graph = match ctx.begin_graph("main", CacheKey::from("1280x720")) {
///         GraphBegin::Cached(graph) => graph,
///         GraphBegin::Declare(mut builder) => {
///             let format = TextureFormat::Rgba8Unorm;
///             let desc = TextureDescriptor::new_2d(1280, 720, format, TextureUsage::empty());
///             let color = builder.declare_texture("color", desc);
///             let mut pass = builder.begin_pass(PassKind::Render, "draw");
///             pass.connect_output(color, AccessType::ColorAttachmentWrite).unwrap();
///             pass.mark_side_effect();
///             pass.set_task(|ctx: &mut PassContext<'_>| ctx.encoder().marker("draw"));
///             pass.end_pass().unwrap();
///             builder.end_graph().unwrap()
///         }
///     };
///     ctx.execute(&mut backend, &graph, &()).unwrap();
/// }
/// assert_eq!(ctx.cache().stats().hits, 1);
/// ```
#[derive(Debug)]
pub struct FrameGraphContext {
    pub(crate) config: FrameGraphConfig,
    pub(crate) cache: GraphCache,
    executor: FrameExecutor,
    next_graph_id: u64,
    last_error: Option<ErrorKind>,
}

impl FrameGraphContext {
    /// Create a context.
    pub fn new(config: FrameGraphConfig) -> Self {
        crate::profiling::init();
        log::debug!(
            "FrameGraphContext: created ({:?}, {} frames in flight)",
            config.queues,
            config.frames_in_flight
        );
        Self {
            executor: FrameExecutor::new(config.frames_in_flight),
            config,
            cache: GraphCache::new(),
            next_graph_id: 1,
            last_error: None,
        }
    }

    /// Start a frame's graph.
    ///
    /// `name` selects the cache slot. If the slot's resident graph was compiled
    /// under `key`, it is returned as is; otherwise a builder is returned and
    /// [`FrameGraphBuilder::end_graph`] compiles and caches the new graph.
    pub fn begin_graph(&mut self, name: &str, key: CacheKey) -> GraphBegin<'_> {
        if let Some(graph) = self.cache.lookup(name, &key) {
            return GraphBegin::Cached(graph);
        }
        GraphBegin::Declare(FrameGraphBuilder::new(self, name, key))
    }

    /// Execute one frame of a compiled graph.
    ///
    /// `payload` is handed to every pass task through
    /// [`PassContext::payload`](crate::PassContext::payload) and is not
    /// retained past this call. A surface that cannot be acquired skips the
    /// frame: the returned status says so, the cache is untouched and
    /// [`last_error`](Self::last_error) reports [`ErrorKind::Acquisition`].
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphBackend,
        graph: &CompiledGraph,
        payload: &dyn Any,
    ) -> Result<FrameStatus, FrameGraphError> {
        match self.executor.execute(backend, graph, payload) {
            Ok(status) => {
                if status.acquire_error().is_some() {
                    self.record_error(ErrorKind::Acquisition);
                }
                Ok(status)
            }
            Err(error) => {
                log::error!("FrameGraph '{}': execution failed: {error}", graph.name());
                self.record_error(error.kind());
                Err(error)
            }
        }
    }

    /// Classification of the most recent error, if any.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Forget the last error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// The compiled graph cache.
    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    /// Mutable access to the cache, for eviction.
    pub fn cache_mut(&mut self) -> &mut GraphCache {
        &mut self.cache
    }

    /// The configuration.
    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    /// Number of frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.executor.frame_index()
    }

    /// Wait until every submitted frame has completed.
    pub fn wait_idle(&mut self, backend: &mut dyn GraphBackend) -> Result<(), BackendError> {
        self.executor.wait_idle(backend)
    }

    /// Destroy the transient resources realized for the last executed graph.
    ///
    /// Call before dropping the backend.
    pub fn release(&mut self, backend: &mut dyn GraphBackend) {
        self.executor.release(backend);
    }

    pub(crate) fn next_graph_id(&mut self) -> u64 {
        let id = self.next_graph_id;
        self.next_graph_id += 1;
        id
    }

    pub(crate) fn record_error(&mut self, kind: ErrorKind) {
        self.last_error = Some(kind);
    }
}
