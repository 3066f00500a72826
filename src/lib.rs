//! ndstore: an embedded object-graph store.
//!
//! Typed node records live in a single byte-addressable image. Node types
//! declare fixed layouts, and bidirectional relationship fields keep forward
//! pointers and inverse collections in step, including through cascading
//! two-phase deletion.

#![warn(missing_docs)]

pub mod nd;
pub mod primitives;
pub mod storage;
pub mod types;

pub use nd::{Nd, NdStore, Schema, SchemaBuilder};
pub use storage::{Database, DatabaseOptions};
pub use types::{Address, NdError, Result, TypeTag};
