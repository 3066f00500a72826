#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{fixture, new_store, BackNode, ForwardNode, TestNode, BACK, FORWARD};
use ndstore::{
    nd::{FieldManyToOne, FieldOneToMany, Nd, NodeHandle, NodeRef, NodeState, SchemaBuilder},
    node_handle,
    storage::DatabaseOptions,
    types::{Address, NdError, Result, TypeTag},
};

node_handle!(struct Folder;);

const FOLDER: TypeTag = TypeTag(10);

struct Tree {
    nd: Nd,
    children: FieldOneToMany<Folder>,
    parent: FieldManyToOne<Folder>,
}

fn tree() -> Result<Tree> {
    let mut b = SchemaBuilder::new();
    let folder = b.create("Folder", None)?;
    let children = b.add_one_to_many(folder, 1)?;
    let parent = b.add_owner(folder, &children)?;
    b.done(folder)?;
    b.register(FOLDER, folder)?;
    let nd = Nd::create(Arc::new(b.build()?), DatabaseOptions::new())?;
    Ok(Tree {
        nd,
        children,
        parent,
    })
}

#[test]
fn marked_node_stays_readable_until_processed() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    fa.set_bp(&mut nd, Some(ba))?;

    nd.delete(ba.address())?;
    assert_eq!(nd.node_state(ba.address())?, NodeState::MarkedForDeletion);
    assert_eq!(fa.bp(&nd)?, Some(ba));
    assert_eq!(ba.back_pointers(&nd)?, vec![fa]);

    nd.process_deletions()?;
    assert_eq!(nd.node_state(ba.address())?, NodeState::Deleted);
    assert_eq!(nd.node_state(fa.address())?, NodeState::Live);
    assert_eq!(fa.bp(&nd)?, None);
    Ok(())
}

#[test]
fn non_owning_inverse_does_not_cascade() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    let fb = ForwardNode::create(&mut nd)?;
    fa.set_bp(&mut nd, Some(ba))?;
    fb.set_bp(&mut nd, Some(ba))?;

    nd.delete(ba.address())?;
    let stats = nd.process_deletions()?;
    assert_eq!(stats.nodes_deleted, 1);
    assert_eq!(stats.cascaded, 0);
    assert_eq!(stats.references_cleared, 2);
    assert_eq!(nd.node_state(fa.address())?, NodeState::Live);
    assert_eq!(nd.node_state(fb.address())?, NodeState::Live);
    Ok(())
}

#[test]
fn owned_node_leaves_every_collection_it_was_in() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let bb = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    fa.set_bp(&mut nd, Some(ba))?;
    fa.set_owner(&mut nd, Some(bb))?;

    nd.delete(fa.address())?;
    let stats = nd.process_deletions()?;
    assert_eq!(stats.back_pointers_removed, 2);
    assert!(ba.back_is_empty(&nd)?);
    assert!(bb.owned_is_empty(&nd)?);
    nd.verify_node(ba.address())?;
    nd.verify_node(bb.address())?;
    Ok(())
}

#[test]
fn deleting_twice_queues_once() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    nd.delete(ba.address())?;
    nd.delete(ba.address())?;
    assert_eq!(nd.pending_deletions(), 1);
    assert_eq!(nd.process_deletions()?.nodes_deleted, 1);
    nd.delete(ba.address())?;
    assert_eq!(nd.pending_deletions(), 0);
    Ok(())
}

#[test]
fn cascade_runs_through_nested_owners() -> Result<()> {
    let mut t = tree()?;
    let root: Folder = t.nd.create_node(FOLDER)?;
    let mid: Folder = t.nd.create_node(FOLDER)?;
    let leaf_a: Folder = t.nd.create_node(FOLDER)?;
    let leaf_b: Folder = t.nd.create_node(FOLDER)?;
    let survivor: Folder = t.nd.create_node(FOLDER)?;
    t.parent.put(&mut t.nd, mid.address(), Some(root))?;
    t.parent.put(&mut t.nd, leaf_a.address(), Some(mid))?;
    t.parent.put(&mut t.nd, leaf_b.address(), Some(mid))?;
    assert_eq!(t.children.as_list(&t.nd, mid.address())?, vec![leaf_a, leaf_b]);

    t.nd.delete(root.address())?;
    let stats = t.nd.process_deletions()?;

    assert_eq!(stats.nodes_deleted, 4);
    assert_eq!(stats.cascaded, 3);
    for gone in [root, mid, leaf_a, leaf_b] {
        assert_eq!(t.nd.node_state(gone.address())?, NodeState::Deleted);
    }
    assert_eq!(t.nd.node_state(survivor.address())?, NodeState::Live);
    assert_eq!(t.nd.db().stats().live_blocks, 1);
    Ok(())
}

#[test]
fn deleting_a_child_first_detaches_it_from_the_parent() -> Result<()> {
    let mut t = tree()?;
    let root: Folder = t.nd.create_node(FOLDER)?;
    let a: Folder = t.nd.create_node(FOLDER)?;
    let b: Folder = t.nd.create_node(FOLDER)?;
    t.parent.put(&mut t.nd, a.address(), Some(root))?;
    t.parent.put(&mut t.nd, b.address(), Some(root))?;

    t.nd.delete(a.address())?;
    t.nd.delete(root.address())?;
    let stats = t.nd.process_deletions()?;
    assert_eq!(stats.nodes_deleted, 3);
    assert_eq!(t.nd.node_state(b.address())?, NodeState::Deleted);
    Ok(())
}

#[test]
fn self_reference_is_repaired() -> Result<()> {
    let mut t = tree()?;
    let folder: Folder = t.nd.create_node(FOLDER)?;
    t.parent.put(&mut t.nd, folder.address(), Some(folder))?;
    assert_eq!(t.children.as_list(&t.nd, folder.address())?, vec![folder]);
    t.nd.delete(folder.address())?;
    assert_eq!(t.nd.process_deletions()?.nodes_deleted, 1);
    assert_eq!(t.nd.db().stats().live_blocks, 0);
    Ok(())
}

#[test]
fn inconsistent_back_pointer_aborts_and_keeps_the_rest_queued() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let bb = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    fa.set_bp(&mut nd, Some(ba))?;

    let slot = fa.address().offset(fixture().forward.offset() as u64);
    nd.db_mut().write_address(slot, Address::NULL)?;
    assert!(matches!(nd.verify_node(ba.address()), Err(NdError::Consistency(_))));

    nd.delete(ba.address())?;
    nd.delete(bb.address())?;
    let err = nd.process_deletions().unwrap_err();
    assert!(matches!(err, NdError::Consistency(_)));
    assert_eq!(nd.pending_deletions(), 1);

    assert_eq!(nd.process_deletions()?.nodes_deleted, 1);
    assert_eq!(nd.node_state(bb.address())?, NodeState::Deleted);
    Ok(())
}

#[test]
fn failed_deletion_can_be_retried_after_repair() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    fa.set_bp(&mut nd, Some(ba))?;

    let slot = fa.address().offset(fixture().forward.offset() as u64);
    nd.db_mut().write_address(slot, Address::NULL)?;
    nd.delete(ba.address())?;
    assert!(matches!(
        nd.process_deletions(),
        Err(NdError::Consistency(_))
    ));
    assert_eq!(nd.pending_deletions(), 0);
    assert_eq!(nd.node_state(ba.address())?, NodeState::Live);

    nd.db_mut().write_address(slot, ba.address())?;
    nd.verify_node(ba.address())?;
    nd.delete(ba.address())?;
    assert_eq!(nd.pending_deletions(), 1);
    assert_eq!(nd.process_deletions()?.nodes_deleted, 1);
    assert_eq!(nd.node_state(ba.address())?, NodeState::Deleted);
    assert_eq!(fa.bp(&nd)?, None);
    Ok(())
}

#[test]
fn forward_pointer_missing_from_inverse_is_reported() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    let slot = fa.address().offset(fixture().forward.offset() as u64);
    nd.db_mut().write_address(slot, ba.address())?;

    assert!(matches!(nd.verify_node(fa.address()), Err(NdError::Consistency(_))));
    assert!(matches!(fa.set_bp(&mut nd, None), Err(NdError::Consistency(_))));
    Ok(())
}

#[test]
fn fields_reject_records_of_other_types() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    let err = fixture().forward.get(&nd, ba.address()).unwrap_err();
    assert!(matches!(err, NdError::Layout(_)));
    let err = fixture().back.size(&nd, fa.address()).unwrap_err();
    assert!(matches!(err, NdError::Layout(_)));
    Ok(())
}

#[test]
fn resolve_rebuilds_the_stored_variant() -> Result<()> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    assert_eq!(nd.resolve::<TestNode>(ba.address())?, Some(TestNode::Back(ba)));
    assert_eq!(nd.resolve::<TestNode>(fa.address())?, Some(TestNode::Forward(fa)));
    assert_eq!(nd.resolve::<TestNode>(Address::NULL)?, None);
    let untyped: NodeRef = nd.resolve(fa.address())?.expect("live node");
    assert_eq!(untyped.tag, FORWARD);
    assert_eq!(nd.type_tag(ba.address())?, BACK);

    nd.delete(fa.address())?;
    nd.process_deletions()?;
    assert!(matches!(
        nd.resolve::<TestNode>(fa.address()),
        Err(NdError::Consistency(_))
    ));
    Ok(())
}
