//! Field descriptors. Each descriptor is a small copyable value produced by
//! the [`SchemaBuilder`] and used to read or write one field of any record
//! whose type is the declaring layout or extends it.

use std::marker::PhantomData;

use tracing::trace;

use super::growable::RawGrowableArray;
use super::layout::{Marker, SchemaBuilder};
use super::node::NodeHandle;
use super::store::Nd;
use crate::types::{Address, FieldId, NdError, Result, StructId};

macro_rules! scalar_field {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $width:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            owner: StructId,
            offset: u32,
        }

        impl $name {
            pub(crate) fn new(owner: StructId, offset: u32) -> Self {
                Self { owner, offset }
            }

            /// Byte offset inside the record.
            pub fn offset(&self) -> u32 {
                self.offset
            }

            /// Reads the field of `record`.
            pub fn get(&self, nd: &Nd, record: Address) -> Result<$ty> {
                nd.check_record(record, self.owner)?;
                Ok(nd.db().read_uint(record.offset(self.offset as u64), $width)? as $ty)
            }

            /// Writes the field of `record`.
            pub fn put(&self, nd: &mut Nd, record: Address, value: $ty) -> Result<()> {
                nd.check_record(record, self.owner)?;
                nd.db_mut()
                    .write_uint(record.offset(self.offset as u64), $width, value as u64)
            }
        }
    };
}

scalar_field!(
    /// One-byte unsigned field.
    FieldByte, u8, 1
);
scalar_field!(
    /// Two-byte unsigned field.
    FieldShort, u16, 2
);
scalar_field!(
    /// Four-byte unsigned field.
    FieldInt, u32, 4
);
scalar_field!(
    /// Eight-byte unsigned field.
    FieldLong, u64, 8
);

/// Raw address field. Writing it maintains no inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPointer {
    owner: StructId,
    offset: u32,
}

impl FieldPointer {
    pub(crate) fn new(owner: StructId, offset: u32) -> Self {
        Self { owner, offset }
    }

    /// Byte offset inside the record.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Reads the stored address.
    pub fn get(&self, nd: &Nd, record: Address) -> Result<Address> {
        nd.check_record(record, self.owner)?;
        nd.db().read_address(record.offset(self.offset as u64))
    }

    /// Stores `value`.
    pub fn put(&self, nd: &mut Nd, record: Address, value: Address) -> Result<()> {
        nd.check_record(record, self.owner)?;
        nd.db_mut()
            .write_address(record.offset(self.offset as u64), value)
    }
}

/// Forward side of a relationship: a record points at one target of type `T`.
///
/// Every write keeps the target's paired [`FieldOneToMany`] in step: the
/// record is removed from the old target's collection and appended to the
/// new one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldManyToOne<T: NodeHandle> {
    id: FieldId,
    owner: StructId,
    offset: u32,
    target: StructId,
    owning: bool,
    _marker: Marker<T>,
}

impl<T: NodeHandle> FieldManyToOne<T> {
    pub(crate) fn new(
        id: FieldId,
        owner: StructId,
        offset: u32,
        target: StructId,
        owning: bool,
    ) -> Self {
        Self {
            id,
            owner,
            offset,
            target,
            owning,
            _marker: PhantomData,
        }
    }

    /// Declares a plain many-to-one field on `s` paired with `inverse`.
    pub fn create<A: NodeHandle>(
        builder: &mut SchemaBuilder,
        s: StructId,
        inverse: &FieldOneToMany<A>,
    ) -> Result<Self> {
        builder.add_many_to_one(s, inverse)
    }

    /// Declares an owning many-to-one field on `s` paired with `inverse`.
    pub fn create_owner<A: NodeHandle>(
        builder: &mut SchemaBuilder,
        s: StructId,
        inverse: &FieldOneToMany<A>,
    ) -> Result<Self> {
        builder.add_owner(s, inverse)
    }

    pub(crate) fn id(&self) -> FieldId {
        self.id
    }

    /// Byte offset inside the record.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Whether deleting the target deletes the records pointing at it.
    pub fn is_owner(&self) -> bool {
        self.owning
    }

    /// Current target of `record`, `None` when null.
    pub fn get(&self, nd: &Nd, record: Address) -> Result<Option<T>> {
        nd.check_record(record, self.owner)?;
        let target = nd.db().read_address(record.offset(self.offset as u64))?;
        if target.is_null() {
            return Ok(None);
        }
        if !nd.db().is_allocated(target) {
            return Err(NdError::Consistency(format!(
                "{record} points at released record {target}"
            )));
        }
        nd.check_record(target, self.target)?;
        Ok(Some(T::from_address(target)))
    }

    /// Points `record` at `value`, updating both inverse collections.
    /// Storing the current value again changes nothing.
    pub fn put(&self, nd: &mut Nd, record: Address, value: Option<T>) -> Result<()> {
        nd.check_record(record, self.owner)?;
        let slot = record.offset(self.offset as u64);
        let old = nd.db().read_address(slot)?;
        let new = value.map_or(Address::NULL, |v| v.address());
        if old == new {
            return Ok(());
        }
        if !new.is_null() {
            nd.check_record(new, self.target)?;
        }
        let inverse = nd.schema().inverse_array(self.id)?;
        if !old.is_null() && !inverse.remove(nd.db_mut(), old, record.0)? {
            return Err(NdError::Consistency(format!(
                "{record} missing from the inverse collection of {old}"
            )));
        }
        nd.db_mut().write_address(slot, new)?;
        if !new.is_null() {
            inverse.add(nd.db_mut(), new, record.0)?;
        }
        trace!(%record, %old, %new, offset = self.offset, "many_to_one.put");
        Ok(())
    }
}

/// Inverse side of a relationship: the ordered collection of records of type
/// `A` whose paired [`FieldManyToOne`] points here. The collection is only
/// changed through the forward field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOneToMany<A: NodeHandle> {
    id: FieldId,
    owner: StructId,
    array: RawGrowableArray,
    _marker: Marker<A>,
}

impl<A: NodeHandle> FieldOneToMany<A> {
    pub(crate) fn new(id: FieldId, owner: StructId, array: RawGrowableArray) -> Self {
        Self {
            id,
            owner,
            array,
            _marker: PhantomData,
        }
    }

    /// Declares a one-to-many field on `s` with `inline_count` inline slots.
    pub fn create(builder: &mut SchemaBuilder, s: StructId, inline_count: u32) -> Result<Self> {
        builder.add_one_to_many(s, inline_count)
    }

    pub(crate) fn id(&self) -> FieldId {
        self.id
    }

    /// Underlying array descriptor.
    pub fn array(&self) -> RawGrowableArray {
        self.array
    }

    /// Pre-sizes the collection of `record` for `count` members.
    pub fn ensure_capacity(&self, nd: &mut Nd, record: Address, count: usize) -> Result<()> {
        nd.check_record(record, self.owner)?;
        self.array.ensure_capacity(nd.db_mut(), record, count)
    }

    /// Members that fit without reallocating.
    pub fn capacity(&self, nd: &Nd, record: Address) -> Result<usize> {
        nd.check_record(record, self.owner)?;
        self.array.capacity(nd.db(), record)
    }

    /// Member count.
    pub fn size(&self, nd: &Nd, record: Address) -> Result<usize> {
        nd.check_record(record, self.owner)?;
        self.array.size(nd.db(), record)
    }

    /// Returns true without members.
    pub fn is_empty(&self, nd: &Nd, record: Address) -> Result<bool> {
        Ok(self.size(nd, record)? == 0)
    }

    /// Member at `index`, in insertion order.
    pub fn get(&self, nd: &Nd, record: Address, index: usize) -> Result<A> {
        nd.check_record(record, self.owner)?;
        let raw = self.array.get(nd.db(), record, index)?;
        Ok(A::from_address(Address(raw)))
    }

    /// Snapshot of every member, in insertion order.
    pub fn as_list(&self, nd: &Nd, record: Address) -> Result<Vec<A>> {
        nd.check_record(record, self.owner)?;
        Ok(self
            .array
            .as_list(nd.db(), record)?
            .into_iter()
            .map(|raw| A::from_address(Address(raw)))
            .collect())
    }
}
