//! Dead pass elimination and producer validation.
//!
//! Sinks are enabled passes with effects visible outside the graph: they write
//! an imported resource (the presentation surface included) or were marked as
//! side-effecting. Liveness flows backwards from the sinks along edges whose
//! consumer needs the producer's results; a pass no sink depends on is culled.

use std::collections::VecDeque;

use crate::error::CompileError;
use crate::graph::{
    AccessType, Connection, ConnectionTarget, DependencyEdge, Hazard, PassAccess, PassId,
    PassKind, PassNode, ResourceNode,
};

/// Mark the passes that survive culling.
pub(crate) fn live_passes(
    resources: &[ResourceNode],
    passes: &[PassNode],
    edges: &[DependencyEdge],
) -> Vec<bool> {
    let mut producers: Vec<Vec<PassId>> = vec![Vec::new(); passes.len()];
    for edge in edges.iter().filter(|e| e.hazard.carries_data()) {
        producers[edge.consumer.index()].push(edge.producer);
    }

    let mut live = vec![false; passes.len()];
    let mut queue = VecDeque::new();
    for pass in passes.iter().filter(|p| p.enabled && is_sink(resources, p)) {
        live[pass.id.index()] = true;
        queue.push_back(pass.id);
    }

    while let Some(pass) = queue.pop_front() {
        for &producer in &producers[pass.index()] {
            if !live[producer.index()] && passes[producer.index()].enabled {
                live[producer.index()] = true;
                queue.push_back(producer);
            }
        }
    }

    for pass in passes.iter().filter(|p| !live[p.id.index()]) {
        let reason = if pass.enabled {
            "outputs never consumed"
        } else {
            "disabled"
        };
        log::debug!("FrameGraph: culled pass '{}' ({reason})", pass.name);
    }

    live
}

fn is_sink(resources: &[ResourceNode], pass: &PassNode) -> bool {
    pass.side_effect
        || pass
            .accesses
            .iter()
            .any(|a| a.access.is_write() && !resources[a.resource.index()].is_transient())
}

/// Check that every transient read by a live pass has a live producer.
pub(crate) fn check_producers(
    resources: &[ResourceNode],
    passes: &[PassNode],
    edges: &[DependencyEdge],
    live: &[bool],
) -> Result<(), CompileError> {
    for pass in passes.iter().filter(|p| live[p.id.index()]) {
        for access in pass.accesses.iter().filter(|a| a.access.is_read()) {
            let resource = &resources[access.resource.index()];
            if !resource.is_transient() {
                continue;
            }
            let produced = edges.iter().any(|e| {
                e.hazard == Hazard::ReadAfterWrite
                    && e.consumer == pass.id
                    && e.resource == Some(access.resource)
                    && live[e.producer.index()]
            });
            if !produced {
                return Err(CompileError::MissingProducer {
                    resource: resource.name().to_string(),
                    pass: pass.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Append a clearing pass for every presentation surface no live pass writes.
///
/// Live readers of such a surface are ordered after the substitute.
pub(crate) fn substitute_surface_writers(
    resources: &[ResourceNode],
    passes: &mut Vec<PassNode>,
    edges: &mut Vec<DependencyEdge>,
    live: &mut Vec<bool>,
) {
    for resource in resources.iter().filter(|r| r.is_swapchain()) {
        let written = passes.iter().any(|p| {
            live[p.id.index()]
                && p.accesses
                    .iter()
                    .any(|a| a.resource == resource.id() && a.access.is_write())
        });
        if written {
            continue;
        }

        let id = PassId::new(passes.len() as u32);
        let access = AccessType::ColorAttachmentWrite;
        let mut node = PassNode::new(id, PassKind::Render, format!("clear {}", resource.name()));
        node.outputs.push(Connection {
            target: ConnectionTarget::Resource(resource.id()),
            access,
        });
        node.accesses.push(PassAccess {
            resource: resource.id(),
            access,
            via_group: None,
        });
        node.substitute = true;
        node.side_effect = true;

        let readers: Vec<(PassId, AccessType)> = passes
            .iter()
            .filter(|p| live[p.id.index()])
            .filter_map(|p| {
                p.accesses
                    .iter()
                    .find(|a| a.resource == resource.id() && a.access.is_read())
                    .map(|a| (p.id, a.access))
            })
            .collect();
        for (reader, reader_access) in readers {
            edges.push(DependencyEdge {
                producer: id,
                consumer: reader,
                resource: Some(resource.id()),
                hazard: Hazard::ReadAfterWrite,
                producer_access: Some(access),
                consumer_access: Some(reader_access),
                sync: Default::default(),
            });
        }

        log::debug!(
            "FrameGraph: no live pass writes surface '{}', substituting a clear pass",
            resource.name()
        );
        passes.push(node);
        live.push(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        DependencyBuilder, ExternalHandle, ResourceId, ResourceKind, ResourceOrigin,
        ResourceState, ResourceUsage,
    };
    use crate::types::{BufferDescriptor, BufferUsage, TextureFormat};

    fn transient(id: u32) -> ResourceNode {
        ResourceNode::new(
            ResourceId::new(id),
            format!("r{id}"),
            ResourceKind::Buffer(BufferDescriptor::new(64, BufferUsage::STORAGE)),
            ResourceOrigin::Transient,
            ResourceUsage::STORAGE,
        )
    }

    fn surface(id: u32) -> ResourceNode {
        ResourceNode::new(
            ResourceId::new(id),
            "surface",
            ResourceKind::Swapchain {
                format: TextureFormat::Bgra8UnormSrgb,
                width: 8,
                height: 8,
            },
            ResourceOrigin::Imported {
                handle: ExternalHandle(1),
                initial: ResourceState::ACQUIRED,
            },
            ResourceUsage::RENDER_TARGET | ResourceUsage::PRESENT,
        )
    }

    fn pass(id: u32, kind: PassKind, accesses: &[(u32, AccessType)]) -> PassNode {
        let mut node = PassNode::new(PassId::new(id), kind, format!("p{id}"));
        node.accesses = accesses
            .iter()
            .map(|&(resource, access)| PassAccess {
                resource: ResourceId::new(resource),
                access,
                via_group: None,
            })
            .collect();
        node
    }

    fn edges_for(passes: &[PassNode]) -> Vec<DependencyEdge> {
        let mut deps = DependencyBuilder::new();
        for p in passes {
            let reads: Vec<_> = p
                .accesses
                .iter()
                .filter(|a| a.access.is_read())
                .copied()
                .collect();
            let writes: Vec<_> = p
                .accesses
                .iter()
                .filter(|a| a.access.is_write())
                .copied()
                .collect();
            deps.add_pass(p.id, &reads, &writes).unwrap();
        }
        deps.into_edges()
    }

    #[test]
    fn test_unconsumed_pass_culled() {
        let resources = vec![transient(0), transient(1), surface(2)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(1, PassKind::Compute, &[(1, AccessType::StorageWrite)]),
            pass(
                2,
                PassKind::Render,
                &[
                    (0, AccessType::StorageRead),
                    (2, AccessType::ColorAttachmentWrite),
                ],
            ),
        ];
        let edges = edges_for(&passes);
        let live = live_passes(&resources, &passes, &edges);
        assert_eq!(live, vec![true, false, true]);
    }

    #[test]
    fn test_side_effect_keeps_pass() {
        let resources = vec![transient(0)];
        let mut passes = vec![pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)])];
        assert_eq!(live_passes(&resources, &passes, &[]), vec![false]);
        passes[0].side_effect = true;
        assert_eq!(live_passes(&resources, &passes, &[]), vec![true]);
    }

    #[test]
    fn test_war_edge_does_not_keep_reader_alive() {
        let resources = vec![transient(0), surface(1)];
        let passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(1, PassKind::Compute, &[(0, AccessType::StorageRead)]),
            pass(
                2,
                PassKind::Render,
                &[
                    (0, AccessType::StorageReadWrite),
                    (1, AccessType::ColorAttachmentWrite),
                ],
            ),
        ];
        let edges = edges_for(&passes);
        let live = live_passes(&resources, &passes, &edges);
        assert_eq!(live, vec![true, false, true]);
    }

    #[test]
    fn test_disabled_producer_reported_missing() {
        let resources = vec![transient(0), surface(1)];
        let mut passes = vec![
            pass(0, PassKind::Compute, &[(0, AccessType::StorageWrite)]),
            pass(
                1,
                PassKind::Render,
                &[
                    (0, AccessType::StorageRead),
                    (1, AccessType::ColorAttachmentWrite),
                ],
            ),
        ];
        passes[0].enabled = false;
        let edges = edges_for(&passes);
        let live = live_passes(&resources, &passes, &edges);
        assert_eq!(live, vec![false, true]);

        let err = check_producers(&resources, &passes, &edges, &live).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingProducer {
                resource: "r0".to_string(),
                pass: "p1".to_string(),
            }
        );
    }

    #[test]
    fn test_surface_substitute() {
        let resources = vec![surface(0)];
        let mut passes = vec![pass(0, PassKind::Render, &[(0, AccessType::ColorAttachmentWrite)])];
        passes[0].enabled = false;
        let mut edges = Vec::new();
        let mut live = live_passes(&resources, &passes, &edges);

        substitute_surface_writers(&resources, &mut passes, &mut edges, &mut live);

        assert_eq!(passes.len(), 2);
        assert!(passes[1].substitute);
        assert!(passes[1].task.is_none());
        assert_eq!(live, vec![false, true]);
    }
}
