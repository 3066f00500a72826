//! Persisted object graph: struct layouts, growable arrays, relationship
//! fields, and the node store.
//!
//! A schema is declared once with a [`SchemaBuilder`]: each node type gets a
//! layout extending the node header, its fields are appended in order, and
//! relationship fields are paired so that every forward pointer has an
//! inverse collection on the target. The resulting [`Schema`] is shared by
//! an [`Nd`] store, which allocates node records and keeps both sides of
//! every relationship consistent through writes and deletions.

mod field;
mod growable;
mod layout;
mod node;
mod store;

pub use field::{
    FieldByte, FieldInt, FieldLong, FieldManyToOne, FieldOneToMany, FieldPointer, FieldShort,
};
pub use growable::{
    growable_capacity_for, max_block_elements, max_growable_block_size, max_metablock_entries,
    metablock_shrink_target, RawGrowableArray, GROWABLE_BLOCK_HEADER_SIZE,
    MIN_GROWABLE_CAPACITY,
};
pub use layout::{FieldEntry, FieldKind, Schema, SchemaBuilder, StructLayout, NODE_STRUCT};
pub use node::{
    NodeHandle, NodeKind, NodeRef, NodeState, FLAG_MARKED_FOR_DELETION, NODE_FLAGS_OFFSET,
    NODE_HEADER_SIZE, NODE_TYPE_OFFSET,
};
pub use store::{DeletionStats, Nd, NdStore};
