//! Node handles and the header every node record starts with.

use std::fmt::Debug;
use std::hash::Hash;

use crate::types::{Address, TypeTag};

/// Offset of the u16 type tag in every node record.
pub const NODE_TYPE_OFFSET: u32 = 0;
/// Offset of the flag byte in every node record.
pub const NODE_FLAGS_OFFSET: u32 = 2;
/// Bytes taken by the node header.
pub const NODE_HEADER_SIZE: u32 = 3;
/// Set once the node is queued for deletion.
pub const FLAG_MARKED_FOR_DELETION: u8 = 0b0000_0001;

/// Typed reference to a node record. Handles are plain addresses; they carry
/// no borrow of the store.
pub trait NodeHandle: Copy + Eq + Hash + Debug + 'static {
    /// Record address.
    fn address(&self) -> Address;
    /// Wraps an address without validation.
    fn from_address(address: Address) -> Self;
}

/// Closed set of node types an application stores, rebuilt from the stored
/// tag when loading an untyped address.
pub trait NodeKind: Sized {
    /// Builds the variant for `tag`, or `None` when the tag is unknown.
    fn from_tag(tag: TypeTag, address: Address) -> Option<Self>;
}

/// Lifecycle of a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Allocated and reachable.
    Live,
    /// Queued; still readable until the batch runs.
    MarkedForDeletion,
    /// Storage has been released.
    Deleted,
}

/// Untyped node reference carrying its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// Record address.
    pub address: Address,
    /// Stored type tag.
    pub tag: TypeTag,
}

impl NodeKind for NodeRef {
    fn from_tag(tag: TypeTag, address: Address) -> Option<Self> {
        Some(Self { address, tag })
    }
}

/// Declares a newtype node handle over [`Address`].
///
/// ```
/// ndstore::node_handle!(pub struct FileNode;);
/// ```
#[macro_export]
macro_rules! node_handle {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        $vis struct $name($crate::types::Address);

        impl $crate::nd::NodeHandle for $name {
            fn address(&self) -> $crate::types::Address {
                self.0
            }

            fn from_address(address: $crate::types::Address) -> Self {
                Self(address)
            }
        }
    };
}
