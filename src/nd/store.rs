//! The node store: typed node allocation over a [`Database`], relationship
//! bookkeeping, and two-phase deletion.
//!
//! Deletion is split in two. [`Nd::delete`] only flags the node and queues
//! it; [`Nd::process_deletions`] later repairs every relationship the node
//! takes part in, cascades through owning fields, and releases storage.
//! Until the batch runs a marked node stays fully readable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::layout::{Relation, Schema, NODE_STRUCT};
use super::node::{
    NodeHandle, NodeKind, NodeState, FLAG_MARKED_FOR_DELETION, NODE_FLAGS_OFFSET,
    NODE_TYPE_OFFSET,
};
use crate::primitives::concurrency::{ExclusiveLock, LockSnapshot, WriteGuard};
use crate::storage::{Database, DatabaseOptions};
use crate::types::{Address, NdError, Result, StructId, TypeTag};

/// Counts from one [`Nd::process_deletions`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionStats {
    /// Nodes whose storage was released.
    pub nodes_deleted: u64,
    /// Nodes queued by owning relationships during the batch.
    pub cascaded: u64,
    /// Forward pointers of surviving nodes set to null.
    pub references_cleared: u64,
    /// Entries removed from inverse collections of surviving nodes.
    pub back_pointers_removed: u64,
}

/// Node store over a single database image.
pub struct Nd {
    db: Database,
    schema: Arc<Schema>,
    pending: VecDeque<Address>,
}

impl Nd {
    /// Creates an empty store.
    pub fn create(schema: Arc<Schema>, options: DatabaseOptions) -> Result<Self> {
        Ok(Self::with_database(schema, Database::create(options)?))
    }

    /// Opens a flushed store. The deletion queue starts empty.
    pub fn open(schema: Arc<Schema>, options: DatabaseOptions) -> Result<Self> {
        Ok(Self::with_database(schema, Database::open(options)?))
    }

    /// Wraps an existing database.
    pub fn with_database(schema: Arc<Schema>, db: Database) -> Self {
        Self {
            db,
            schema,
            pending: VecDeque::new(),
        }
    }

    /// Underlying storage medium.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Mutable storage medium, for node types that manage raw fields.
    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Schema shared by every accessor.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Writes the image to the backing file. The deletion queue lives in
    /// memory only, so run [`process_deletions`](Nd::process_deletions)
    /// first.
    pub fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "nd.flush with queued deletions");
        }
        self.db.flush()
    }

    /// Allocates a zeroed record for the type registered under `tag` and
    /// stamps the tag into its header.
    pub fn allocate_node(&mut self, tag: TypeTag) -> Result<Address> {
        let s = self.schema.struct_for_tag(tag)?;
        let size = self.schema.size_of(s)?;
        let address = self.db.malloc(size as usize)?;
        self.db
            .write_u16(address.offset(NODE_TYPE_OFFSET as u64), tag.0)?;
        trace!(%address, %tag, size, "nd.allocate_node");
        Ok(address)
    }

    /// Allocates a node and wraps it in a typed handle.
    pub fn create_node<N: NodeHandle>(&mut self, tag: TypeTag) -> Result<N> {
        Ok(N::from_address(self.allocate_node(tag)?))
    }

    /// Stored type tag of the node at `address`.
    pub fn type_tag(&self, address: Address) -> Result<TypeTag> {
        if !self.db.is_allocated(address) {
            return Err(NdError::Layout(format!("{address} is not a live node")));
        }
        Ok(TypeTag(
            self.db.read_u16(address.offset(NODE_TYPE_OFFSET as u64))?,
        ))
    }

    /// Rebuilds the node variant stored at `address`; `None` for null.
    pub fn resolve<N: NodeKind>(&self, address: Address) -> Result<Option<N>> {
        if address.is_null() {
            return Ok(None);
        }
        if !self.db.is_allocated(address) {
            return Err(NdError::Consistency(format!(
                "{address} does not name a live node"
            )));
        }
        let tag = self.type_tag(address)?;
        self.schema.struct_for_tag(tag)?;
        N::from_tag(tag, address)
            .map(Some)
            .ok_or_else(|| NdError::Layout(format!("tag {tag} has no matching node kind")))
    }

    /// Lifecycle state of the node at `address`.
    pub fn node_state(&self, address: Address) -> Result<NodeState> {
        if !self.db.is_allocated(address) {
            return Ok(NodeState::Deleted);
        }
        if self.flags(address)? & FLAG_MARKED_FOR_DELETION != 0 {
            Ok(NodeState::MarkedForDeletion)
        } else {
            Ok(NodeState::Live)
        }
    }

    /// Marks the node for deletion and queues it. Nodes already marked or
    /// released are left alone.
    pub fn delete(&mut self, address: Address) -> Result<()> {
        if !self.db.is_allocated(address) {
            return Ok(());
        }
        self.check_record(address, NODE_STRUCT)?;
        self.mark(address)?;
        Ok(())
    }

    /// Nodes queued and not yet processed.
    pub fn pending_deletions(&self) -> usize {
        self.pending.len()
    }

    /// Runs the deletion batch until the queue, including nodes reached
    /// through owning relationships, is empty.
    ///
    /// On a consistency failure the failing node is dropped from the queue
    /// and its mark is cleared, so it can be deleted again once repaired.
    /// The remaining entries stay queued and the error is returned.
    pub fn process_deletions(&mut self) -> Result<DeletionStats> {
        let mut stats = DeletionStats::default();
        while let Some(address) = self.pending.pop_front() {
            if !self.db.is_allocated(address) {
                continue;
            }
            if let Err(err) = self.delete_one(address, &mut stats) {
                if self.db.is_allocated(address) {
                    self.unmark(address)?;
                }
                warn!(
                    %address,
                    remaining = self.pending.len(),
                    error = %err,
                    "nd.process_deletions aborted"
                );
                return Err(err);
            }
        }
        debug!(
            deleted = stats.nodes_deleted,
            cascaded = stats.cascaded,
            references_cleared = stats.references_cleared,
            back_pointers_removed = stats.back_pointers_removed,
            "nd.process_deletions"
        );
        Ok(stats)
    }

    /// Checks that every relationship of the node at `address` agrees with
    /// its inverse.
    pub fn verify_node(&self, address: Address) -> Result<()> {
        let s = self.struct_of(address)?;
        let layout = self.schema.layout(s)?;
        for &id in layout.many_to_one() {
            let Relation::ManyToOne {
                offset,
                target: expected,
                ..
            } = self.schema.relation(id)?.relation
            else {
                continue;
            };
            let target = self.db.read_address(address.offset(offset as u64))?;
            if target.is_null() {
                continue;
            }
            if !self.db.is_allocated(target) {
                return Err(NdError::Consistency(format!(
                    "{address} points at released record {target}"
                )));
            }
            self.check_record(target, expected)?;
            let inverse = self.schema.inverse_array(id)?;
            let hits = inverse
                .as_list(&self.db, target)?
                .into_iter()
                .filter(|raw| *raw == address.0)
                .count();
            if hits != 1 {
                return Err(NdError::Consistency(format!(
                    "{address} appears {hits} times in the inverse collection of {target}"
                )));
            }
        }
        for &id in layout.one_to_many() {
            let Relation::OneToMany { array } = self.schema.relation(id)?.relation else {
                continue;
            };
            let (forward, _) = self.schema.forward_slot(id)?;
            for raw in array.as_list(&self.db, address)? {
                let member = Address(raw);
                if !self.db.is_allocated(member) {
                    return Err(NdError::Consistency(format!(
                        "{address} lists released record {member}"
                    )));
                }
                let back = self.db.read_address(member.offset(forward as u64))?;
                if back != address {
                    return Err(NdError::Consistency(format!(
                        "{member} is listed by {address} but points at {back}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Confirms `record` is a live node whose type is `expected` or extends it.
    pub(crate) fn check_record(&self, record: Address, expected: StructId) -> Result<()> {
        let s = self.struct_of(record)?;
        if self.schema.is_subtype(s, expected) {
            return Ok(());
        }
        Err(NdError::Layout(format!(
            "field of {} used on {record}, a {}",
            self.schema.layout(expected)?.name(),
            self.schema.layout(s)?.name()
        )))
    }

    fn struct_of(&self, address: Address) -> Result<StructId> {
        let tag = self.type_tag(address)?;
        self.schema.struct_for_tag(tag)
    }

    fn flags(&self, address: Address) -> Result<u8> {
        self.db.read_u8(address.offset(NODE_FLAGS_OFFSET as u64))
    }

    /// Sets the mark and queues the node. Returns false when already marked.
    fn mark(&mut self, address: Address) -> Result<bool> {
        let flags = self.flags(address)?;
        if flags & FLAG_MARKED_FOR_DELETION != 0 {
            return Ok(false);
        }
        self.db.write_u8(
            address.offset(NODE_FLAGS_OFFSET as u64),
            flags | FLAG_MARKED_FOR_DELETION,
        )?;
        self.pending.push_back(address);
        trace!(%address, pending = self.pending.len(), "nd.mark");
        Ok(true)
    }

    fn unmark(&mut self, address: Address) -> Result<()> {
        let flags = self.flags(address)?;
        self.db.write_u8(
            address.offset(NODE_FLAGS_OFFSET as u64),
            flags & !FLAG_MARKED_FOR_DELETION,
        )
    }

    fn delete_one(&mut self, address: Address, stats: &mut DeletionStats) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let layout = schema.layout(self.struct_of(address)?)?;

        for &id in layout.many_to_one() {
            let Relation::ManyToOne { offset, .. } = schema.relation(id)?.relation else {
                continue;
            };
            let slot = address.offset(offset as u64);
            let target = self.db.read_address(slot)?;
            if target.is_null() {
                continue;
            }
            if !self.db.is_allocated(target) {
                return Err(NdError::Consistency(format!(
                    "{address} points at released record {target}"
                )));
            }
            let inverse = schema.inverse_array(id)?;
            if !inverse.remove(&mut self.db, target, address.0)? {
                return Err(NdError::Consistency(format!(
                    "{address} missing from the inverse collection of {target}"
                )));
            }
            self.db.write_address(slot, Address::NULL)?;
            stats.back_pointers_removed += 1;
        }

        for &id in layout.one_to_many() {
            let Relation::OneToMany { array } = schema.relation(id)?.relation else {
                continue;
            };
            let (forward, owning) = schema.forward_slot(id)?;
            for raw in array.as_list(&self.db, address)? {
                let member = Address(raw);
                if !self.db.is_allocated(member) {
                    return Err(NdError::Consistency(format!(
                        "{address} lists released record {member}"
                    )));
                }
                let slot = member.offset(forward as u64);
                if self.db.read_address(slot)? != address {
                    return Err(NdError::Consistency(format!(
                        "{member} is listed by {address} but points elsewhere"
                    )));
                }
                self.db.write_address(slot, Address::NULL)?;
                stats.references_cleared += 1;
                if owning && self.mark(member)? {
                    stats.cascaded += 1;
                }
            }
            array.release(&mut self.db, address)?;
        }

        for array in layout.embedded_arrays() {
            array.release(&mut self.db, address)?;
        }

        self.db.free(address)?;
        self.db.metrics().node_deleted();
        stats.nodes_deleted += 1;
        trace!(%address, "nd.node_deleted");
        Ok(())
    }
}

impl Drop for Nd {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "nd dropped with queued deletions");
        }
    }
}

/// [`Nd`] behind the single-writer lock, for sharing across threads.
pub struct NdStore {
    inner: ExclusiveLock<Nd>,
}

impl NdStore {
    /// Wraps a store.
    pub fn new(nd: Nd) -> Self {
        Self {
            inner: ExclusiveLock::new(nd),
        }
    }

    /// Creates an empty store behind the lock.
    pub fn create(schema: Arc<Schema>, options: DatabaseOptions) -> Result<Self> {
        Ok(Self::new(Nd::create(schema, options)?))
    }

    /// Blocks until exclusive access is available.
    pub fn write(&self) -> WriteGuard<'_, Nd> {
        self.inner.acquire()
    }

    /// Waits up to `timeout` for exclusive access.
    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_, Nd>> {
        self.inner.try_acquire_for(timeout)
    }

    /// Current lock state.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.inner.snapshot()
    }

    /// Releases the lock wrapper.
    pub fn into_inner(self) -> Nd {
        self.inner.into_inner()
    }
}
