//! Hazard analysis between passes.
//!
//! The [`DependencyBuilder`] is fed one pass at a time, in declaration order,
//! and derives [`DependencyEdge`]s from the resource accesses it sees:
//!
//! | Access sequence         | Edge                                   |
//! |-------------------------|----------------------------------------|
//! | write, then read        | RAW from the last writer               |
//! | read(s), then write     | WAR from every reader since that write |
//! | write, then write       | WAW from the prior writer              |
//!
//! A WAW edge is only added when no reader sits between the two writes; the
//! readers already order the second write after the first.
//!
//! Two writers of the same resource must be ordered by something the caller
//! declared: the second pass also reads the resource, both write through the
//! same group, or a chain of edges leads from the first to the second.
//! Anything else is rejected as an ambiguous write.

use super::access::AccessType;
use super::pass::PassId;
use super::resource::{GroupId, ResourceId};
use crate::error::DeclarationError;

/// The hazard an edge protects against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hazard {
    /// Consumer reads what the producer wrote.
    ReadAfterWrite,
    /// Consumer overwrites what the producer wrote.
    WriteAfterWrite,
    /// Consumer overwrites what the producer read.
    WriteAfterRead,
    /// Explicit ordering with no resource involved.
    Ordering,
}

impl Hazard {
    /// Check if the consumer needs the producer's results to exist.
    ///
    /// Only these edges keep a producer alive during culling.
    pub fn carries_data(self) -> bool {
        matches!(self, Self::ReadAfterWrite | Self::Ordering)
    }
}

/// How an edge is synchronized once queues are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncKind {
    /// Both passes run on the same queue; a pipeline barrier suffices.
    #[default]
    Barrier,
    /// The passes run on different queues; ownership transfer plus semaphore.
    QueueTransfer,
}

/// A dependency between two passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Pass that must run first.
    pub producer: PassId,
    /// Pass that must run after.
    pub consumer: PassId,
    /// Resource the hazard is about; `None` for explicit ordering.
    pub resource: Option<ResourceId>,
    /// Hazard classification.
    pub hazard: Hazard,
    /// Producer's access to the resource.
    pub producer_access: Option<AccessType>,
    /// Consumer's access to the resource.
    pub consumer_access: Option<AccessType>,
    /// Synchronization kind, resolved during compilation.
    pub sync: SyncKind,
}

impl DependencyEdge {
    fn on_resource(
        producer: PassId,
        consumer: PassId,
        resource: ResourceId,
        hazard: Hazard,
        producer_access: AccessType,
        consumer_access: AccessType,
    ) -> Self {
        Self {
            producer,
            consumer,
            resource: Some(resource),
            hazard,
            producer_access: Some(producer_access),
            consumer_access: Some(consumer_access),
            sync: SyncKind::Barrier,
        }
    }

    fn ordering(producer: PassId, consumer: PassId) -> Self {
        Self {
            producer,
            consumer,
            resource: None,
            hazard: Hazard::Ordering,
            producer_access: None,
            consumer_access: None,
            sync: SyncKind::Barrier,
        }
    }
}

/// One access of a pass, with group connections already expanded to members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassAccess {
    /// Accessed resource.
    pub resource: ResourceId,
    /// Access type.
    pub access: AccessType,
    /// Group the access went through, if any.
    pub via_group: Option<GroupId>,
}

#[derive(Debug, Clone, Copy)]
struct Writer {
    pass: PassId,
    access: AccessType,
    group: Option<GroupId>,
}

#[derive(Debug, Default)]
struct ResourceTracker {
    last_writer: Option<Writer>,
    readers: Vec<(PassId, AccessType)>,
}

/// Incremental hazard analysis over passes in declaration order.
#[derive(Debug, Default)]
pub struct DependencyBuilder {
    trackers: Vec<ResourceTracker>,
    edges: Vec<DependencyEdge>,
    successors: Vec<Vec<PassId>>,
}

impl DependencyBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the accesses of the next pass.
    ///
    /// `reads` and `writes` must each mention a resource at most once. A
    /// resource that is read and written by the pass appears in both. On error
    /// the builder is left exactly as it was before the call.
    pub fn add_pass(
        &mut self,
        pass: PassId,
        reads: &[PassAccess],
        writes: &[PassAccess],
    ) -> Result<(), DeclarationError> {
        let mut pending = Vec::new();

        for read in reads {
            if let Some(writer) = self.tracker(read.resource).and_then(|t| t.last_writer)
                && writer.pass != pass
            {
                pending.push(DependencyEdge::on_resource(
                    writer.pass,
                    pass,
                    read.resource,
                    Hazard::ReadAfterWrite,
                    writer.access,
                    read.access,
                ));
            }
        }

        for write in writes {
            let Some(tracker) = self.tracker(write.resource) else {
                continue;
            };

            let mut has_readers = false;
            for &(reader, reader_access) in &tracker.readers {
                if reader == pass {
                    continue;
                }
                has_readers = true;
                pending.push(DependencyEdge::on_resource(
                    reader,
                    pass,
                    write.resource,
                    Hazard::WriteAfterRead,
                    reader_access,
                    write.access,
                ));
            }

            // The readers above follow the prior writer, so their WAR edges order this write.
            if let Some(writer) = tracker.last_writer
                && writer.pass != pass
            {
                let reads_it = reads.iter().any(|r| r.resource == write.resource);
                let shared_group = write.via_group.is_some() && write.via_group == writer.group;
                if !reads_it && !shared_group && !self.ordered_before(writer.pass, pass, &pending) {
                    return Err(DeclarationError::AmbiguousWrite {
                        resource: write.resource,
                        first: writer.pass,
                        second: pass,
                    });
                }
            }

            if !has_readers
                && let Some(writer) = tracker.last_writer
                && writer.pass != pass
            {
                pending.push(DependencyEdge::on_resource(
                    writer.pass,
                    pass,
                    write.resource,
                    Hazard::WriteAfterWrite,
                    writer.access,
                    write.access,
                ));
            }
        }

        for edge in pending {
            self.push_edge(edge);
        }
        for read in reads {
            let tracker = self.tracker_mut(read.resource);
            if !tracker.readers.iter().any(|(p, _)| *p == pass) {
                tracker.readers.push((pass, read.access));
            }
        }
        for write in writes {
            let tracker = self.tracker_mut(write.resource);
            tracker.last_writer = Some(Writer {
                pass,
                access: write.access,
                group: write.via_group,
            });
            tracker.readers.clear();
        }

        Ok(())
    }

    /// Add an explicit ordering edge: `before` runs before `after`.
    pub fn add_ordering(&mut self, before: PassId, after: PassId) {
        let exists = self.edges.iter().any(|e| {
            e.producer == before && e.consumer == after && e.hazard == Hazard::Ordering
        });
        if !exists {
            self.push_edge(DependencyEdge::ordering(before, after));
        }
    }

    /// Check if a chain of edges leads from `from` to `to`.
    pub fn reaches(&self, from: PassId, to: PassId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.successors.len()];
        let mut stack = vec![from];
        while let Some(pass) = stack.pop() {
            let Some(next) = self.successors.get(pass.index()) else {
                continue;
            };
            for &succ in next {
                if succ == to {
                    return true;
                }
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push(succ);
                }
            }
        }
        false
    }

    /// Edges derived so far.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Consume the builder, returning the edges.
    pub fn into_edges(self) -> Vec<DependencyEdge> {
        self.edges
    }

    /// Check if `earlier` is ordered before `pass`, whose new incoming edges are `pending`.
    fn ordered_before(&self, earlier: PassId, pass: PassId, pending: &[DependencyEdge]) -> bool {
        self.reaches(earlier, pass)
            || pending
                .iter()
                .any(|edge| edge.producer == earlier || self.reaches(earlier, edge.producer))
    }

    fn push_edge(&mut self, edge: DependencyEdge) {
        let needed = edge.producer.index().max(edge.consumer.index()) + 1;
        if self.successors.len() < needed {
            self.successors.resize_with(needed, Vec::new);
        }
        let succ = &mut self.successors[edge.producer.index()];
        if !succ.contains(&edge.consumer) {
            succ.push(edge.consumer);
        }
        self.edges.push(edge);
    }

    fn tracker(&self, resource: ResourceId) -> Option<&ResourceTracker> {
        self.trackers.get(resource.index())
    }

    fn tracker_mut(&mut self, resource: ResourceId) -> &mut ResourceTracker {
        if self.trackers.len() <= resource.index() {
            self.trackers
                .resize_with(resource.index() + 1, ResourceTracker::default);
        }
        &mut self.trackers[resource.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(i: u32) -> PassId {
        PassId::new(i)
    }

    fn res(i: u32) -> ResourceId {
        ResourceId::new(i)
    }

    fn access(resource: ResourceId, access: AccessType) -> PassAccess {
        PassAccess {
            resource,
            access,
            via_group: None,
        }
    }

    fn grouped(resource: ResourceId, access: AccessType, group: u32) -> PassAccess {
        PassAccess {
            resource,
            access,
            via_group: Some(GroupId::new(group)),
        }
    }

    #[test]
    fn test_read_after_write() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::TransferWrite)])
            .unwrap();
        deps.add_pass(pass(1), &[access(res(0), AccessType::SampledRead)], &[])
            .unwrap();

        assert_eq!(deps.edges().len(), 1);
        let edge = deps.edges()[0];
        assert_eq!(edge.producer, pass(0));
        assert_eq!(edge.consumer, pass(1));
        assert_eq!(edge.resource, Some(res(0)));
        assert_eq!(edge.hazard, Hazard::ReadAfterWrite);
        assert_eq!(edge.producer_access, Some(AccessType::TransferWrite));
        assert_eq!(edge.consumer_access, Some(AccessType::SampledRead));
    }

    #[test]
    fn test_write_after_read_from_every_reader() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::StorageWrite)])
            .unwrap();
        deps.add_pass(pass(1), &[access(res(0), AccessType::StorageRead)], &[])
            .unwrap();
        deps.add_pass(pass(2), &[access(res(0), AccessType::StorageRead)], &[])
            .unwrap();
        deps.add_pass(
            pass(3),
            &[access(res(0), AccessType::StorageRead)],
            &[access(res(0), AccessType::StorageWrite)],
        )
        .unwrap();

        let war: Vec<_> = deps
            .edges()
            .iter()
            .filter(|e| e.hazard == Hazard::WriteAfterRead)
            .map(|e| (e.producer, e.consumer))
            .collect();
        assert_eq!(war, vec![(pass(1), pass(3)), (pass(2), pass(3))]);
        // Readers supersede the WAW edge.
        assert!(
            deps.edges()
                .iter()
                .all(|e| e.hazard != Hazard::WriteAfterWrite)
        );
    }

    #[test]
    fn test_write_after_write_when_ordered() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::ColorAttachmentWrite)])
            .unwrap();
        deps.add_pass(
            pass(1),
            &[access(res(0), AccessType::ColorAttachmentReadWrite)],
            &[access(res(0), AccessType::ColorAttachmentReadWrite)],
        )
        .unwrap();

        let hazards: Vec<_> = deps.edges().iter().map(|e| e.hazard).collect();
        assert_eq!(
            hazards,
            vec![Hazard::ReadAfterWrite, Hazard::WriteAfterWrite]
        );
    }

    #[test]
    fn test_ambiguous_write_rejected() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::StorageWrite)])
            .unwrap();
        let err = deps
            .add_pass(pass(1), &[], &[access(res(0), AccessType::TransferWrite)])
            .unwrap_err();

        assert_eq!(
            err,
            DeclarationError::AmbiguousWrite {
                resource: res(0),
                first: pass(0),
                second: pass(1),
            }
        );
        // Rejected pass leaves no trace.
        assert!(deps.edges().is_empty());
    }

    #[test]
    fn test_write_ordered_through_intermediate_reader() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::StorageWrite)])
            .unwrap();
        deps.add_pass(pass(1), &[access(res(0), AccessType::SampledRead)], &[])
            .unwrap();
        deps.add_pass(pass(2), &[], &[access(res(0), AccessType::TransferWrite)])
            .unwrap();

        let edges: Vec<_> = deps
            .edges()
            .iter()
            .map(|e| (e.producer, e.consumer, e.hazard))
            .collect();
        assert_eq!(
            edges,
            vec![
                (pass(0), pass(1), Hazard::ReadAfterWrite),
                (pass(1), pass(2), Hazard::WriteAfterRead),
            ]
        );
        assert!(deps.reaches(pass(0), pass(2)));
    }

    #[test]
    fn test_write_ordered_through_other_resource() {
        let mut deps = DependencyBuilder::new();
        // Pass 0 writes A and B, pass 1 reads B and overwrites A.
        deps.add_pass(
            pass(0),
            &[],
            &[
                access(res(0), AccessType::StorageWrite),
                access(res(1), AccessType::StorageWrite),
            ],
        )
        .unwrap();
        deps.add_pass(
            pass(1),
            &[access(res(1), AccessType::StorageRead)],
            &[access(res(0), AccessType::StorageWrite)],
        )
        .unwrap();

        assert!(
            deps.edges()
                .iter()
                .any(|e| e.hazard == Hazard::WriteAfterWrite && e.resource == Some(res(0)))
        );
    }

    #[test]
    fn test_write_ordered_through_explicit_dependency() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[], &[access(res(0), AccessType::StorageWrite)])
            .unwrap();
        deps.add_pass(pass(1), &[], &[]).unwrap();
        deps.add_ordering(pass(0), pass(1));
        deps.add_ordering(pass(1), pass(2));
        deps.add_pass(pass(2), &[], &[access(res(0), AccessType::StorageWrite)])
            .unwrap();

        assert!(deps.reaches(pass(0), pass(2)));
    }

    #[test]
    fn test_shared_group_orders_writers() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(
            pass(0),
            &[],
            &[grouped(res(0), AccessType::ColorAttachmentWrite, 0)],
        )
        .unwrap();
        deps.add_pass(
            pass(1),
            &[],
            &[grouped(res(0), AccessType::ColorAttachmentWrite, 0)],
        )
        .unwrap();

        assert_eq!(deps.edges().len(), 1);
        assert_eq!(deps.edges()[0].hazard, Hazard::WriteAfterWrite);
    }

    #[test]
    fn test_different_groups_are_ambiguous() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(
            pass(0),
            &[],
            &[grouped(res(0), AccessType::ColorAttachmentWrite, 0)],
        )
        .unwrap();
        let result = deps.add_pass(
            pass(1),
            &[],
            &[grouped(res(0), AccessType::ColorAttachmentWrite, 1)],
        );
        assert!(matches!(
            result,
            Err(DeclarationError::AmbiguousWrite { .. })
        ));
    }

    #[test]
    fn test_reaches() {
        let mut deps = DependencyBuilder::new();
        deps.add_ordering(pass(0), pass(1));
        deps.add_ordering(pass(1), pass(2));
        deps.add_ordering(pass(0), pass(1));

        assert_eq!(deps.edges().len(), 2);
        assert!(deps.reaches(pass(0), pass(2)));
        assert!(!deps.reaches(pass(2), pass(0)));
        assert!(deps.reaches(pass(3), pass(3)));
        assert!(!deps.reaches(pass(3), pass(0)));
    }

    #[test]
    fn test_read_of_unwritten_resource_adds_no_edge() {
        let mut deps = DependencyBuilder::new();
        deps.add_pass(pass(0), &[access(res(0), AccessType::SampledRead)], &[])
            .unwrap();
        assert!(deps.edges().is_empty());
    }
}
