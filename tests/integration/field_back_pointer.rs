#![allow(missing_docs)]

mod common;

use std::collections::HashSet;

use common::{new_store, BackNode, ForwardNode, SOME_INT_STAMP};
use ndstore::{
    nd::{max_growable_block_size, Nd, NodeHandle},
    types::Result,
};

struct Graph {
    nd: Nd,
    ba: BackNode,
    bb: BackNode,
    fa: ForwardNode,
    fb: ForwardNode,
    fc: ForwardNode,
    fd: ForwardNode,
}

fn setup() -> Result<Graph> {
    let mut nd = new_store()?;
    let ba = BackNode::create(&mut nd)?;
    let bb = BackNode::create(&mut nd)?;
    let fa = ForwardNode::create(&mut nd)?;
    let fb = ForwardNode::create(&mut nd)?;
    let fc = ForwardNode::create(&mut nd)?;
    let fd = ForwardNode::create(&mut nd)?;
    Ok(Graph {
        nd,
        ba,
        bb,
        fa,
        fb,
        fc,
        fd,
    })
}

fn assert_back_pointers(nd: &Nd, bp: BackNode, expected: &[ForwardNode]) -> Result<()> {
    let actual: HashSet<_> = bp.back_pointers(nd)?.into_iter().collect();
    let desired: HashSet<_> = expected.iter().copied().collect();
    assert_eq!(actual, desired);
    Ok(())
}

fn point_all_at_ba(g: &mut Graph) -> Result<()> {
    for f in [g.fa, g.fb, g.fc, g.fd] {
        f.set_bp(&mut g.nd, Some(g.ba))?;
    }
    Ok(())
}

#[test]
fn write_followed_by_read_returns_same_thing() -> Result<()> {
    let mut g = setup()?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    assert_eq!(g.fa.bp(&g.nd)?, Some(g.ba));
    assert_eq!(g.ba.some_int(&g.nd)?, SOME_INT_STAMP);
    Ok(())
}

#[test]
fn list_without_inline_elements_can_be_empty() -> Result<()> {
    let g = setup()?;
    assert!(g.ba.owned_is_empty(&g.nd)?);
    Ok(())
}

#[test]
fn read_null() -> Result<()> {
    let g = setup()?;
    assert_eq!(g.fa.bp(&g.nd)?, None);
    Ok(())
}

#[test]
fn assigning_the_same_pointer_twice_is_a_noop() -> Result<()> {
    let mut g = setup()?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    assert_back_pointers(&g.nd, g.ba, &[g.fa])?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    assert_back_pointers(&g.nd, g.ba, &[g.fa])?;
    assert_eq!(g.ba.back_size(&g.nd)?, 1);
    Ok(())
}

#[test]
fn assigning_forward_pointer_inserts_back_pointer() -> Result<()> {
    let mut g = setup()?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    assert_eq!(g.ba.back_pointers(&g.nd)?, vec![g.fa]);
    assert_eq!(g.ba.back_size(&g.nd)?, 1);
    Ok(())
}

#[test]
fn retargeting_moves_the_back_pointer() -> Result<()> {
    let mut g = setup()?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    g.fa.set_bp(&mut g.nd, Some(g.bb))?;
    assert!(g.ba.back_is_empty(&g.nd)?);
    assert_eq!(g.bb.back_pointers(&g.nd)?, vec![g.fa]);
    Ok(())
}

#[test]
fn removes_inline_element() -> Result<()> {
    let mut g = setup()?;
    point_all_at_ba(&mut g)?;
    assert_eq!(g.ba.back_size(&g.nd)?, 4);
    g.fb.set_bp(&mut g.nd, None)?;
    assert_eq!(g.ba.back_size(&g.nd)?, 3);
    assert_back_pointers(&g.nd, g.ba, &[g.fa, g.fc, g.fd])?;
    Ok(())
}

#[test]
fn removes_element_from_growable_block() -> Result<()> {
    let mut g = setup()?;
    point_all_at_ba(&mut g)?;
    assert_eq!(g.ba.back_size(&g.nd)?, 4);
    g.fc.set_bp(&mut g.nd, None)?;
    assert_eq!(g.ba.back_size(&g.nd)?, 3);
    assert_back_pointers(&g.nd, g.ba, &[g.fa, g.fb, g.fd])?;
    Ok(())
}

#[test]
fn removal_keeps_remaining_order() -> Result<()> {
    let mut g = setup()?;
    point_all_at_ba(&mut g)?;
    g.fb.set_bp(&mut g.nd, None)?;
    assert_eq!(g.ba.back_pointers(&g.nd)?, vec![g.fa, g.fc, g.fd]);
    Ok(())
}

#[test]
fn destructing_forward_pointer_removes_back_pointer() -> Result<()> {
    let mut g = setup()?;
    for f in [g.fa, g.fb, g.fc] {
        f.set_bp(&mut g.nd, Some(g.ba))?;
    }
    g.nd.delete(g.fb.address())?;
    g.nd.process_deletions()?;
    assert_back_pointers(&g.nd, g.ba, &[g.fa, g.fc])?;
    Ok(())
}

#[test]
fn destructing_back_pointer_clears_forward_pointers() -> Result<()> {
    let mut g = setup()?;
    for f in [g.fa, g.fb, g.fc] {
        f.set_bp(&mut g.nd, Some(g.ba))?;
    }
    g.nd.delete(g.ba.address())?;
    g.nd.process_deletions()?;
    assert_eq!(g.fa.bp(&g.nd)?, None);
    assert_eq!(g.fb.bp(&g.nd)?, None);
    assert_eq!(g.fc.bp(&g.nd)?, None);
    Ok(())
}

#[test]
fn elements_remain_in_insertion_order_if_no_removals() -> Result<()> {
    let mut g = setup()?;
    point_all_at_ba(&mut g)?;
    assert_eq!(g.ba.back_pointers(&g.nd)?, vec![g.fa, g.fb, g.fc, g.fd]);
    Ok(())
}

#[test]
fn deleting_owner_deletes_owned() -> Result<()> {
    let mut g = setup()?;
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    g.fa.set_owner(&mut g.nd, Some(g.bb))?;
    g.fb.set_bp(&mut g.nd, Some(g.ba))?;
    g.fb.set_owner(&mut g.nd, Some(g.bb))?;
    g.fc.set_bp(&mut g.nd, Some(g.ba))?;
    assert_eq!(g.bb.owned(&g.nd)?, vec![g.fa, g.fb]);

    g.nd.delete(g.bb.address())?;
    let stats = g.nd.process_deletions()?;

    assert_back_pointers(&g.nd, g.ba, &[g.fc])?;
    assert_eq!(stats.nodes_deleted, 3);
    assert_eq!(stats.cascaded, 2);
    Ok(())
}

#[test]
fn ensure_capacity_does_nothing_if_less_than_inline_elements() -> Result<()> {
    let mut g = setup()?;
    g.ba.ensure_back_capacity(&mut g.nd, 1)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 2);
    Ok(())
}

#[test]
fn ensure_capacity_allocates_powers_of_two_plus_inline_size() -> Result<()> {
    let mut g = setup()?;
    g.ba.ensure_back_capacity(&mut g.nd, 60)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 66);
    Ok(())
}

#[test]
fn ensure_capacity_allocates_minimum_size() -> Result<()> {
    let mut g = setup()?;
    g.ba.ensure_back_capacity(&mut g.nd, 3)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 4);
    Ok(())
}

#[test]
fn ensure_capacity_clamps_to_chunk_size() -> Result<()> {
    let mut g = setup()?;
    let max = max_growable_block_size();
    g.ba.ensure_back_capacity(&mut g.nd, max - 40)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, max + 2);
    Ok(())
}

#[test]
fn ensure_capacity_grows_by_multiples_of_max_block_size_once_metablock_in_use() -> Result<()> {
    let mut g = setup()?;
    let max = max_growable_block_size();
    g.ba.ensure_back_capacity(&mut g.nd, max * 3 - 100)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, max * 3 + 2);
    Ok(())
}

#[test]
fn additions_wont_reduce_capacity() -> Result<()> {
    let mut g = setup()?;
    let max = max_growable_block_size();
    g.ba.ensure_back_capacity(&mut g.nd, max)?;
    point_all_at_ba(&mut g)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, max + 2);
    Ok(())
}

#[test]
fn is_empty() -> Result<()> {
    let mut g = setup()?;
    assert!(g.ba.back_is_empty(&g.nd)?);
    g.fa.set_bp(&mut g.nd, Some(g.ba))?;
    assert!(!g.ba.back_is_empty(&g.nd)?);
    for f in [g.fb, g.fc, g.fd] {
        f.set_bp(&mut g.nd, Some(g.ba))?;
    }
    assert!(!g.ba.back_is_empty(&g.nd)?);
    Ok(())
}

#[test]
fn removals_reduce_capacity() -> Result<()> {
    let mut g = setup()?;
    let max = max_growable_block_size();
    g.ba.ensure_back_capacity(&mut g.nd, max)?;
    for f in [g.fa, g.fb, g.fc] {
        f.set_bp(&mut g.nd, Some(g.ba))?;
    }
    assert_eq!(g.ba.back_capacity(&g.nd)?, max + 2);
    g.fb.set_bp(&mut g.nd, None)?;
    g.fc.set_bp(&mut g.nd, None)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 2);
    Ok(())
}

#[test]
fn insert_enough_to_use_metablock() -> Result<()> {
    let mut g = setup()?;
    let total = max_growable_block_size() * 4 + 1;
    let mut allocated = Vec::with_capacity(total);
    for count in 0..total {
        let next = ForwardNode::create(&mut g.nd)?;
        next.set_bp(&mut g.nd, Some(g.ba))?;
        assert_eq!(g.ba.back_pointer(&g.nd, count)?, next);
        assert_eq!(g.ba.back_size(&g.nd)?, count + 1);
        allocated.push(next);
    }
    assert_eq!(g.ba.back_pointer(&g.nd, total - 1)?, allocated[total - 1]);
    assert_eq!(g.ba.back_size(&g.nd)?, total);

    let mut remaining = total;
    for next in allocated {
        next.set_bp(&mut g.nd, None)?;
        remaining -= 1;
        assert_eq!(g.ba.back_size(&g.nd)?, remaining);
    }
    assert_eq!(g.ba.back_size(&g.nd)?, 0);
    assert_eq!(g.ba.back_capacity(&g.nd)?, 2);
    Ok(())
}

#[test]
fn grow_existing_metablock() -> Result<()> {
    let mut g = setup()?;
    let max = max_growable_block_size();
    g.ba.ensure_back_capacity(&mut g.nd, 2 * max)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 2 * max + 2);
    g.ba.ensure_back_capacity(&mut g.nd, 6 * max)?;
    assert_eq!(g.ba.back_capacity(&g.nd)?, 6 * max + 2);
    Ok(())
}
