//! Struct layouts: per-type field offsets and frozen record sizes, plus the
//! tag registry and the relationship pairing table.

use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::field::{
    FieldByte, FieldInt, FieldLong, FieldManyToOne, FieldOneToMany, FieldPointer, FieldShort,
};
use super::growable::RawGrowableArray;
use super::node::{NodeHandle, NODE_FLAGS_OFFSET, NODE_HEADER_SIZE, NODE_TYPE_OFFSET};
use crate::primitives::bytes::le;
use crate::storage::PTR_SIZE;
use crate::types::{FieldId, NdError, Result, StructId, TypeTag};

/// The layout every node type extends: type tag then flags.
pub const NODE_STRUCT: StructId = StructId(0);

/// What a reserved byte range holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned integer of the given width.
    Scalar(u32),
    /// Raw address without relationship bookkeeping.
    Pointer,
    /// Growable array header plus inline slots.
    EmbeddedArray,
    /// Forward side of a relationship.
    ManyToOne,
    /// Inverse side of a relationship.
    OneToMany,
}

/// One reserved range inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEntry {
    /// Byte offset from the record address.
    pub offset: u32,
    /// Byte length.
    pub size: u32,
    /// Contents.
    pub kind: FieldKind,
}

/// Frozen (or in-progress) layout of one record type.
#[derive(Debug, Clone)]
pub struct StructLayout {
    name: &'static str,
    parent: Option<StructId>,
    size: u32,
    done: bool,
    fields: Vec<FieldEntry>,
    many_to_one: Vec<FieldId>,
    one_to_many: Vec<FieldId>,
    embedded: Vec<RawGrowableArray>,
}

impl StructLayout {
    /// Type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Supertype layout, `None` only for the node header itself.
    pub fn parent(&self) -> Option<StructId> {
        self.parent
    }

    /// Record size in bytes; fixed once the layout is done.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the layout is frozen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fields declared directly on this type, in declaration order.
    pub fn own_fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub(crate) fn many_to_one(&self) -> &[FieldId] {
        &self.many_to_one
    }

    pub(crate) fn one_to_many(&self) -> &[FieldId] {
        &self.one_to_many
    }

    /// Embedded arrays of this type and its supertypes.
    pub(crate) fn embedded_arrays(&self) -> &[RawGrowableArray] {
        &self.embedded
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Relation {
    ManyToOne {
        offset: u32,
        target: StructId,
        owning: bool,
    },
    OneToMany {
        array: RawGrowableArray,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RelationDecl {
    pub(crate) owner: StructId,
    pub(crate) relation: Relation,
    pub(crate) pair: Option<FieldId>,
}

/// Mutable schema under construction. Layouts are opened with
/// [`create`](SchemaBuilder::create), filled with `add_*` calls, frozen with
/// [`done`](SchemaBuilder::done) and the whole set is validated by
/// [`build`](SchemaBuilder::build).
#[derive(Debug)]
pub struct SchemaBuilder {
    structs: Vec<StructLayout>,
    relations: Vec<RelationDecl>,
    tags: FxHashMap<TypeTag, StructId>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// Starts a schema holding only the frozen node header layout.
    pub fn new() -> Self {
        let header = StructLayout {
            name: "Node",
            parent: None,
            size: NODE_HEADER_SIZE,
            done: true,
            fields: vec![
                FieldEntry {
                    offset: NODE_TYPE_OFFSET,
                    size: 2,
                    kind: FieldKind::Scalar(2),
                },
                FieldEntry {
                    offset: NODE_FLAGS_OFFSET,
                    size: 1,
                    kind: FieldKind::Scalar(1),
                },
            ],
            many_to_one: Vec::new(),
            one_to_many: Vec::new(),
            embedded: Vec::new(),
        };
        Self {
            structs: vec![header],
            relations: Vec::new(),
            tags: FxHashMap::default(),
        }
    }

    /// Layout of the node header every record starts with.
    pub fn node_base(&self) -> StructId {
        NODE_STRUCT
    }

    /// Opens a layout extending `parent`, or the node header when `None`.
    /// The parent must already be done.
    pub fn create(&mut self, name: &'static str, parent: Option<StructId>) -> Result<StructId> {
        let parent = parent.unwrap_or(NODE_STRUCT);
        let base = self.layout(parent)?;
        if !base.done {
            return Err(NdError::Layout(format!(
                "cannot extend {} before it is done",
                base.name
            )));
        }
        let layout = StructLayout {
            name,
            parent: Some(parent),
            size: base.size,
            done: false,
            fields: Vec::new(),
            many_to_one: base.many_to_one.clone(),
            one_to_many: base.one_to_many.clone(),
            embedded: base.embedded.clone(),
        };
        let id = StructId(self.structs.len() as u32);
        self.structs.push(layout);
        Ok(id)
    }

    /// Appends a one-byte field.
    pub fn add_byte(&mut self, s: StructId) -> Result<FieldByte> {
        let offset = self.reserve(s, 1, 1, FieldKind::Scalar(1))?;
        Ok(FieldByte::new(s, offset))
    }

    /// Appends a two-byte field.
    pub fn add_short(&mut self, s: StructId) -> Result<FieldShort> {
        let offset = self.reserve(s, 2, 2, FieldKind::Scalar(2))?;
        Ok(FieldShort::new(s, offset))
    }

    /// Appends a four-byte field.
    pub fn add_int(&mut self, s: StructId) -> Result<FieldInt> {
        let offset = self.reserve(s, 4, 4, FieldKind::Scalar(4))?;
        Ok(FieldInt::new(s, offset))
    }

    /// Appends an eight-byte field.
    pub fn add_long(&mut self, s: StructId) -> Result<FieldLong> {
        let offset = self.reserve(s, 8, 8, FieldKind::Scalar(8))?;
        Ok(FieldLong::new(s, offset))
    }

    /// Appends a raw address field with no relationship bookkeeping.
    pub fn add_pointer(&mut self, s: StructId) -> Result<FieldPointer> {
        let offset = self.reserve(s, PTR_SIZE as u32, PTR_SIZE as u32, FieldKind::Pointer)?;
        Ok(FieldPointer::new(s, offset))
    }

    /// Appends a growable array holding `inline_count` elements of
    /// `element_size` bytes inside the record before spilling to external
    /// blocks.
    pub fn add_embedded_array(
        &mut self,
        s: StructId,
        inline_count: u32,
        element_size: u32,
    ) -> Result<RawGrowableArray> {
        if !le::is_valid_width(element_size as usize) {
            return Err(NdError::Layout(format!(
                "unsupported array element size {element_size}"
            )));
        }
        let bytes = RawGrowableArray::record_size(inline_count, element_size)?;
        let offset = self.reserve(s, bytes, PTR_SIZE as u32, FieldKind::EmbeddedArray)?;
        let array = RawGrowableArray::new(offset, inline_count, element_size);
        self.structs[s.0 as usize].embedded.push(array);
        Ok(array)
    }

    /// Appends the inverse side of a relationship. It stays unpaired until a
    /// many-to-one field naming it is declared on the member type.
    pub fn add_one_to_many<A: NodeHandle>(
        &mut self,
        s: StructId,
        inline_count: u32,
    ) -> Result<FieldOneToMany<A>> {
        let bytes = RawGrowableArray::record_size(inline_count, PTR_SIZE as u32)?;
        let offset = self.reserve(s, bytes, PTR_SIZE as u32, FieldKind::OneToMany)?;
        let array = RawGrowableArray::new(offset, inline_count, PTR_SIZE as u32);
        let id = self.push_relation(RelationDecl {
            owner: s,
            relation: Relation::OneToMany { array },
            pair: None,
        });
        self.structs[s.0 as usize].one_to_many.push(id);
        Ok(FieldOneToMany::new(id, s, array))
    }

    /// Appends a many-to-one field paired with `inverse`.
    pub fn add_many_to_one<T: NodeHandle, A: NodeHandle>(
        &mut self,
        s: StructId,
        inverse: &FieldOneToMany<A>,
    ) -> Result<FieldManyToOne<T>> {
        self.add_forward(s, inverse, false)
    }

    /// Appends a many-to-one field that points at this record's owner:
    /// deleting the owner deletes every record pointing at it through this
    /// field.
    pub fn add_owner<T: NodeHandle, A: NodeHandle>(
        &mut self,
        s: StructId,
        inverse: &FieldOneToMany<A>,
    ) -> Result<FieldManyToOne<T>> {
        self.add_forward(s, inverse, true)
    }

    /// Freezes the layout and returns its record size.
    pub fn done(&mut self, s: StructId) -> Result<u32> {
        let layout = self.layout_mut(s)?;
        if layout.done {
            return Err(NdError::Layout(format!("{} is already done", layout.name)));
        }
        layout.done = true;
        debug!(name = layout.name, size = layout.size, "layout.done");
        Ok(layout.size)
    }

    /// Binds a stored type tag to a layout.
    pub fn register(&mut self, tag: TypeTag, s: StructId) -> Result<()> {
        self.layout(s)?;
        if s == NODE_STRUCT {
            return Err(NdError::Layout(
                "the bare node header cannot be registered".into(),
            ));
        }
        if let Some(existing) = self.tags.get(&tag) {
            return Err(NdError::Layout(format!(
                "tag {tag} already registered to {}",
                self.structs[existing.0 as usize].name
            )));
        }
        self.tags.insert(tag, s);
        Ok(())
    }

    /// Validates the schema: every layout done, every one-to-many paired.
    pub fn build(self) -> Result<Schema> {
        if let Some(open) = self.structs.iter().find(|layout| !layout.done) {
            return Err(NdError::Layout(format!("{} was never marked done", open.name)));
        }
        for (idx, decl) in self.relations.iter().enumerate() {
            let Some(pair) = decl.pair else {
                return Err(NdError::Layout(format!(
                    "relationship field {idx} on {} has no inverse",
                    self.structs[decl.owner.0 as usize].name
                )));
            };
            let back = self.relations[pair.0 as usize].pair;
            if back != Some(FieldId(idx as u32)) {
                return Err(NdError::Layout(format!(
                    "relationship field {idx} is not paired symmetrically"
                )));
            }
        }
        debug!(
            structs = self.structs.len(),
            relations = self.relations.len(),
            tags = self.tags.len(),
            "schema.build"
        );
        Ok(Schema {
            structs: self.structs,
            relations: self.relations,
            tags: self.tags,
        })
    }

    fn add_forward<T: NodeHandle, A: NodeHandle>(
        &mut self,
        s: StructId,
        inverse: &FieldOneToMany<A>,
        owning: bool,
    ) -> Result<FieldManyToOne<T>> {
        let inverse_id = inverse.id();
        let inverse_decl = self
            .relations
            .get(inverse_id.0 as usize)
            .copied()
            .ok_or_else(|| NdError::Layout(format!("unknown relationship field {inverse_id:?}")))?;
        if !matches!(inverse_decl.relation, Relation::OneToMany { .. }) {
            return Err(NdError::Layout(
                "many-to-one fields must pair with a one-to-many field".into(),
            ));
        }
        if inverse_decl.pair.is_some() {
            return Err(NdError::Layout(format!(
                "one-to-many field on {} is already paired",
                self.structs[inverse_decl.owner.0 as usize].name
            )));
        }
        let offset = self.reserve(s, PTR_SIZE as u32, PTR_SIZE as u32, FieldKind::ManyToOne)?;
        let target = inverse_decl.owner;
        let id = self.push_relation(RelationDecl {
            owner: s,
            relation: Relation::ManyToOne {
                offset,
                target,
                owning,
            },
            pair: Some(inverse_id),
        });
        self.relations[inverse_id.0 as usize].pair = Some(id);
        self.structs[s.0 as usize].many_to_one.push(id);
        Ok(FieldManyToOne::new(id, s, offset, target, owning))
    }

    fn push_relation(&mut self, decl: RelationDecl) -> FieldId {
        let id = FieldId(self.relations.len() as u32);
        self.relations.push(decl);
        id
    }

    fn reserve(&mut self, s: StructId, size: u32, align: u32, kind: FieldKind) -> Result<u32> {
        let layout = self.layout_mut(s)?;
        if layout.done {
            return Err(NdError::Layout(format!(
                "cannot add fields to {} after it is done",
                layout.name
            )));
        }
        let offset = layout
            .size
            .checked_add(align - 1)
            .map(|end| end / align * align)
            .ok_or_else(|| NdError::Capacity("record layout overflow".into()))?;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| NdError::Capacity("record layout overflow".into()))?;
        layout.fields.push(FieldEntry { offset, size, kind });
        layout.size = end;
        Ok(offset)
    }

    fn layout(&self, s: StructId) -> Result<&StructLayout> {
        self.structs
            .get(s.0 as usize)
            .ok_or_else(|| NdError::Layout(format!("unknown struct {s:?}")))
    }

    fn layout_mut(&mut self, s: StructId) -> Result<&mut StructLayout> {
        self.structs
            .get_mut(s.0 as usize)
            .ok_or_else(|| NdError::Layout(format!("unknown struct {s:?}")))
    }
}

/// Validated, immutable schema shared by every node accessor.
#[derive(Debug)]
pub struct Schema {
    structs: Vec<StructLayout>,
    relations: Vec<RelationDecl>,
    tags: FxHashMap<TypeTag, StructId>,
}

impl Schema {
    /// Starts a new schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Returns the layout for `s`.
    pub fn layout(&self, s: StructId) -> Result<&StructLayout> {
        self.structs
            .get(s.0 as usize)
            .ok_or_else(|| NdError::Layout(format!("unknown struct {s:?}")))
    }

    /// Frozen record size for `s`.
    pub fn size_of(&self, s: StructId) -> Result<u32> {
        Ok(self.layout(s)?.size)
    }

    /// Layout registered for `tag`.
    pub fn struct_for_tag(&self, tag: TypeTag) -> Result<StructId> {
        self.tags
            .get(&tag)
            .copied()
            .ok_or_else(|| NdError::Layout(format!("type tag {tag} is not registered")))
    }

    /// Tag registered for `s`, if any.
    pub fn tag_for(&self, s: StructId) -> Option<TypeTag> {
        self.tags
            .iter()
            .find_map(|(tag, id)| (*id == s).then_some(*tag))
    }

    /// Returns true when `s` is `ancestor` or extends it.
    pub fn is_subtype(&self, s: StructId, ancestor: StructId) -> bool {
        let mut cursor = Some(s);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.structs.get(id.0 as usize).and_then(|l| l.parent);
        }
        false
    }

    pub(crate) fn relation(&self, id: FieldId) -> Result<&RelationDecl> {
        self.relations
            .get(id.0 as usize)
            .ok_or_else(|| NdError::Layout(format!("unknown relationship field {id:?}")))
    }

    /// The inverse array paired with a many-to-one field.
    pub(crate) fn inverse_array(&self, id: FieldId) -> Result<RawGrowableArray> {
        let pair = self
            .relation(id)?
            .pair
            .ok_or_else(|| NdError::Layout(format!("field {id:?} is unpaired")))?;
        match self.relation(pair)?.relation {
            Relation::OneToMany { array } => Ok(array),
            Relation::ManyToOne { .. } => Err(NdError::Layout(format!(
                "field {id:?} is paired with another many-to-one"
            ))),
        }
    }

    /// The forward slot offset and ownership flag paired with a one-to-many field.
    pub(crate) fn forward_slot(&self, id: FieldId) -> Result<(u32, bool)> {
        let pair = self
            .relation(id)?
            .pair
            .ok_or_else(|| NdError::Layout(format!("field {id:?} is unpaired")))?;
        match self.relation(pair)?.relation {
            Relation::ManyToOne { offset, owning, .. } => Ok((offset, owning)),
            Relation::OneToMany { .. } => Err(NdError::Layout(format!(
                "field {id:?} is paired with another one-to-many"
            ))),
        }
    }
}

/// Marker kept on typed field descriptors.
pub(crate) type Marker<T> = PhantomData<fn() -> T>;
