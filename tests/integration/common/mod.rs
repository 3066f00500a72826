#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use ndstore::{
    nd::{FieldInt, FieldManyToOne, FieldOneToMany, Nd, NodeHandle, NodeKind, Schema, SchemaBuilder},
    node_handle,
    storage::DatabaseOptions,
    types::{Address, Result, TypeTag},
};

pub const BACK: TypeTag = TypeTag(0);
pub const FORWARD: TypeTag = TypeTag(1);
pub const SOME_INT_STAMP: u32 = 0xf0f0_f0f0;

node_handle!(pub struct BackNode;);
node_handle!(pub struct ForwardNode;);

pub struct Fixture {
    pub schema: Arc<Schema>,
    pub back: FieldOneToMany<ForwardNode>,
    pub owned: FieldOneToMany<ForwardNode>,
    pub some_int: FieldInt,
    pub forward: FieldManyToOne<BackNode>,
    pub owner: FieldManyToOne<BackNode>,
}

fn build() -> Result<Fixture> {
    let mut b = SchemaBuilder::new();
    let back_struct = b.create("BackPointerStruct", None)?;
    let back = FieldOneToMany::create(&mut b, back_struct, 2)?;
    let owned = FieldOneToMany::create(&mut b, back_struct, 0)?;
    let some_int = b.add_int(back_struct)?;
    b.done(back_struct)?;

    let forward_struct = b.create("ForwardPointerStruct", None)?;
    let forward = FieldManyToOne::create(&mut b, forward_struct, &back)?;
    let owner = FieldManyToOne::create_owner(&mut b, forward_struct, &owned)?;
    b.done(forward_struct)?;

    b.register(BACK, back_struct)?;
    b.register(FORWARD, forward_struct)?;
    Ok(Fixture {
        schema: Arc::new(b.build()?),
        back,
        owned,
        some_int,
        forward,
        owner,
    })
}

pub fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| build().expect("test schema builds"))
}

pub fn new_store() -> Result<Nd> {
    Nd::create(fixture().schema.clone(), DatabaseOptions::new())
}

pub fn store_with(options: DatabaseOptions) -> Result<Nd> {
    Nd::create(fixture().schema.clone(), options)
}

impl BackNode {
    pub fn create(nd: &mut Nd) -> Result<Self> {
        let node: Self = nd.create_node(BACK)?;
        fixture().some_int.put(nd, node.address(), SOME_INT_STAMP)?;
        Ok(node)
    }

    pub fn some_int(self, nd: &Nd) -> Result<u32> {
        fixture().some_int.get(nd, self.address())
    }

    pub fn ensure_back_capacity(self, nd: &mut Nd, count: usize) -> Result<()> {
        fixture().back.ensure_capacity(nd, self.address(), count)
    }

    pub fn back_capacity(self, nd: &Nd) -> Result<usize> {
        fixture().back.capacity(nd, self.address())
    }

    pub fn back_pointers(self, nd: &Nd) -> Result<Vec<ForwardNode>> {
        fixture().back.as_list(nd, self.address())
    }

    pub fn back_pointer(self, nd: &Nd, index: usize) -> Result<ForwardNode> {
        fixture().back.get(nd, self.address(), index)
    }

    pub fn back_size(self, nd: &Nd) -> Result<usize> {
        fixture().back.size(nd, self.address())
    }

    pub fn back_is_empty(self, nd: &Nd) -> Result<bool> {
        fixture().back.is_empty(nd, self.address())
    }

    pub fn owned(self, nd: &Nd) -> Result<Vec<ForwardNode>> {
        fixture().owned.as_list(nd, self.address())
    }

    pub fn owned_is_empty(self, nd: &Nd) -> Result<bool> {
        fixture().owned.is_empty(nd, self.address())
    }
}

impl ForwardNode {
    pub fn create(nd: &mut Nd) -> Result<Self> {
        nd.create_node(FORWARD)
    }

    pub fn set_bp(self, nd: &mut Nd, target: Option<BackNode>) -> Result<()> {
        fixture().forward.put(nd, self.address(), target)
    }

    pub fn bp(self, nd: &Nd) -> Result<Option<BackNode>> {
        fixture().forward.get(nd, self.address())
    }

    pub fn set_owner(self, nd: &mut Nd, owner: Option<BackNode>) -> Result<()> {
        fixture().owner.put(nd, self.address(), owner)
    }

    pub fn owner(self, nd: &Nd) -> Result<Option<BackNode>> {
        fixture().owner.get(nd, self.address())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestNode {
    Back(BackNode),
    Forward(ForwardNode),
}

impl NodeKind for TestNode {
    fn from_tag(tag: TypeTag, address: Address) -> Option<Self> {
        match tag {
            BACK => Some(Self::Back(BackNode::from_address(address))),
            FORWARD => Some(Self::Forward(ForwardNode::from_address(address))),
            _ => None,
        }
    }
}
