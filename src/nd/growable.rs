#![forbid(unsafe_code)]
//! Raw growable array: a size-tracked list of fixed-width elements stored
//! partly inline in its owning record and partly in external blocks.
//!
//! Record header (at the field offset):
//!
//! | offset | bytes | contents                         |
//! |-------:|------:|----------------------------------|
//! | 0      | 4     | element count                    |
//! | 4      | 4     | reserved                         |
//! | 8      | 8     | external storage address or null |
//! | 16     | n·w   | inline slots                     |
//!
//! External storage is either a single *growable block* holding up to `M`
//! elements, or a *metablock* whose directory points at full blocks of `M`
//! elements each. `M` is the largest power of two whose block still fits in
//! a single allocation. Both kinds start with an 8-byte header: capacity
//! (elements, or directory entries in use) then a kind word.

use smallvec::SmallVec;
use tracing::debug;

use crate::primitives::bytes::le;
use crate::storage::{Database, MAX_MALLOC_SIZE, PTR_SIZE};
use crate::types::{Address, NdError, Result};

const SIZE_OFFSET: u64 = 0;
const EXTERNAL_OFFSET: u64 = 8;
const INLINE_OFFSET: u64 = 16;

/// Bytes in front of the payload of every external growable block.
pub const GROWABLE_BLOCK_HEADER_SIZE: usize = 8;
/// Smallest external capacity ever allocated.
pub const MIN_GROWABLE_CAPACITY: usize = 2;

const KIND_BLOCK: u32 = 1;
const KIND_METABLOCK: u32 = 2;

/// Largest power-of-two element count whose growable block fits in one
/// allocation, for elements of `element_size` bytes.
pub const fn max_block_elements(element_size: usize) -> usize {
    let fit = (MAX_MALLOC_SIZE - GROWABLE_BLOCK_HEADER_SIZE) / element_size;
    if fit == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - fit.leading_zeros())
    }
}

/// Largest single growable block for pointer-sized elements.
pub const fn max_growable_block_size() -> usize {
    max_block_elements(PTR_SIZE)
}

/// Number of data blocks a metablock directory can reference.
pub const fn max_metablock_entries() -> usize {
    max_block_elements(PTR_SIZE)
}

/// External capacity to allocate for `extra` elements beyond the inline
/// slots.
///
/// * `0` needs no external storage.
/// * Up to `max_block` rounds up to a power of two, never below
///   [`MIN_GROWABLE_CAPACITY`].
/// * Beyond that, a metablock of whole blocks: the smallest multiple of
///   `max_block` covering `extra`.
pub fn growable_capacity_for(extra: usize, max_block: usize, max_blocks: usize) -> Result<usize> {
    if extra == 0 {
        return Ok(0);
    }
    if extra <= max_block {
        return Ok(extra
            .next_power_of_two()
            .max(MIN_GROWABLE_CAPACITY)
            .min(max_block));
    }
    let blocks = extra.div_ceil(max_block);
    if blocks > max_blocks {
        return Err(NdError::Capacity(format!(
            "{extra} external elements need {blocks} blocks, limit is {max_blocks}"
        )));
    }
    blocks
        .checked_mul(max_block)
        .ok_or_else(|| NdError::Capacity("growable capacity overflow".into()))
}

/// Block count a metablock holding `blocks` blocks should shrink to when
/// `used` external elements remain, or `None` to leave it alone. Trailing
/// blocks are released once two or more are empty, keeping one spare.
pub fn metablock_shrink_target(used: usize, blocks: usize, max_block: usize) -> Option<usize> {
    let needed = used.div_ceil(max_block);
    (blocks >= needed + 2).then_some(needed + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum External {
    None,
    Block { address: Address, capacity: usize },
    Metablock { address: Address, blocks: usize },
}

/// Descriptor of a growable array embedded at a fixed offset of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawGrowableArray {
    offset: u32,
    inline_count: u32,
    element_size: u32,
}

impl RawGrowableArray {
    pub(crate) fn new(offset: u32, inline_count: u32, element_size: u32) -> Self {
        Self {
            offset,
            inline_count,
            element_size,
        }
    }

    /// Bytes the array occupies inside its record.
    pub fn record_size(inline_count: u32, element_size: u32) -> Result<u32> {
        inline_count
            .checked_mul(element_size)
            .and_then(|slots| slots.checked_add(INLINE_OFFSET as u32))
            .ok_or_else(|| NdError::Capacity("inline slots overflow the record".into()))
    }

    /// Offset of the array header inside its record.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Inline slot count.
    pub fn inline_count(&self) -> usize {
        self.inline_count as usize
    }

    /// Element width in bytes.
    pub fn element_size(&self) -> usize {
        self.element_size as usize
    }

    /// Elements per full external block for this element width.
    pub fn max_block_elements(&self) -> usize {
        max_block_elements(self.element_size())
    }

    /// Number of elements stored.
    pub fn size(&self, db: &Database, record: Address) -> Result<usize> {
        let (size, _) = self.header(db, record)?;
        Ok(size)
    }

    /// Returns true when the array holds no elements.
    pub fn is_empty(&self, db: &Database, record: Address) -> Result<bool> {
        Ok(self.size(db, record)? == 0)
    }

    /// Elements that fit without reallocating.
    pub fn capacity(&self, db: &Database, record: Address) -> Result<usize> {
        let external = self.external(db, record)?;
        Ok(self.inline_count() + self.external_capacity(external))
    }

    /// Grows storage so at least `requested` elements fit. Never shrinks.
    pub fn ensure_capacity(
        &self,
        db: &mut Database,
        record: Address,
        requested: usize,
    ) -> Result<()> {
        let (size, external) = self.header(db, record)?;
        let current = self.inline_count() + self.external_capacity(external);
        if requested <= current {
            return Ok(());
        }
        let max_block = self.max_block_elements();
        let target = growable_capacity_for(
            requested - self.inline_count(),
            max_block,
            max_metablock_entries(),
        )?;
        self.resize_external(db, record, size, external, target)
    }

    /// Element at `index`.
    pub fn get(&self, db: &Database, record: Address, index: usize) -> Result<u64> {
        let (size, external) = self.header(db, record)?;
        if index >= size {
            return Err(NdError::Layout(format!(
                "index {index} out of bounds for array of size {size}"
            )));
        }
        let slot = self.slot_address(db, record, external, index)?;
        db.read_uint(slot, self.element_size())
    }

    /// Appends `value`, growing storage when full. Returns its index.
    pub fn add(&self, db: &mut Database, record: Address, value: u64) -> Result<usize> {
        let (size, mut external) = self.header(db, record)?;
        let capacity = self.inline_count() + self.external_capacity(external);
        if size == capacity {
            self.ensure_capacity(db, record, size + 1)?;
            external = self.external(db, record)?;
        }
        let slot = self.slot_address(db, record, external, size)?;
        db.write_uint(slot, self.element_size(), value)?;
        self.write_size(db, record, size + 1)?;
        Ok(size)
    }

    /// Position of the first element equal to `value`.
    pub fn index_of(&self, db: &Database, record: Address, value: u64) -> Result<Option<usize>> {
        let (size, external) = self.header(db, record)?;
        let elem = self.element_size();
        let mut index = 0;
        for (base, len) in self.segments(db, record, external)? {
            for i in 0..len {
                if index >= size {
                    return Ok(None);
                }
                if db.read_uint(base.offset((i * elem) as u64), elem)? == value {
                    return Ok(Some(index));
                }
                index += 1;
            }
        }
        Ok(None)
    }

    /// Removes the first element equal to `value`, preserving the order of
    /// the rest. Returns false when absent.
    pub fn remove(&self, db: &mut Database, record: Address, value: u64) -> Result<bool> {
        match self.index_of(db, record, value)? {
            Some(index) => {
                self.remove_at(db, record, index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes the element at `index`, shifting later elements down, and
    /// releases external storage the smaller size no longer needs.
    pub fn remove_at(&self, db: &mut Database, record: Address, index: usize) -> Result<u64> {
        let (size, external) = self.header(db, record)?;
        if index >= size {
            return Err(NdError::Layout(format!(
                "index {index} out of bounds for array of size {size}"
            )));
        }
        let removed = db.read_uint(
            self.slot_address(db, record, external, index)?,
            self.element_size(),
        )?;
        self.shift_down(db, record, external, index, size)?;
        let size = size - 1;
        self.write_size(db, record, size)?;
        self.shrink(db, record, size, external)?;
        Ok(removed)
    }

    /// Snapshot of every element in order.
    pub fn as_list(&self, db: &Database, record: Address) -> Result<Vec<u64>> {
        let (size, external) = self.header(db, record)?;
        let elem = self.element_size();
        let mut out = Vec::with_capacity(size);
        for (base, len) in self.segments(db, record, external)? {
            let take = len.min(size - out.len());
            for i in 0..take {
                out.push(db.read_uint(base.offset((i * elem) as u64), elem)?);
            }
            if out.len() == size {
                break;
            }
        }
        Ok(out)
    }

    /// Frees all external storage and empties the array.
    pub fn release(&self, db: &mut Database, record: Address) -> Result<()> {
        let external = self.external(db, record)?;
        self.free_external(db, external)?;
        db.write_address(record.offset(self.offset as u64 + EXTERNAL_OFFSET), Address::NULL)?;
        self.write_size(db, record, 0)
    }

    fn header(&self, db: &Database, record: Address) -> Result<(usize, External)> {
        let size = db.read_u32(record.offset(self.offset as u64 + SIZE_OFFSET))? as usize;
        let external = self.external(db, record)?;
        let capacity = self.inline_count() + self.external_capacity(external);
        if size > capacity {
            return Err(NdError::Consistency(format!(
                "array at {record}+{} holds {size} elements but capacity is {capacity}",
                self.offset
            )));
        }
        Ok((size, external))
    }

    fn write_size(&self, db: &mut Database, record: Address, size: usize) -> Result<()> {
        let size = u32::try_from(size)
            .map_err(|_| NdError::Capacity("array size exceeds u32".into()))?;
        db.write_u32(record.offset(self.offset as u64 + SIZE_OFFSET), size)
    }

    fn external(&self, db: &Database, record: Address) -> Result<External> {
        let address = db.read_address(record.offset(self.offset as u64 + EXTERNAL_OFFSET))?;
        if address.is_null() {
            return Ok(External::None);
        }
        let capacity = db.read_u32(address)? as usize;
        match db.read_u32(address.offset(4))? {
            KIND_BLOCK if (1..=self.max_block_elements()).contains(&capacity) => {
                Ok(External::Block { address, capacity })
            }
            KIND_METABLOCK if (1..=max_metablock_entries()).contains(&capacity) => {
                Ok(External::Metablock {
                    address,
                    blocks: capacity,
                })
            }
            KIND_BLOCK | KIND_METABLOCK => Err(NdError::Corruption(
                "growable block capacity out of range",
            )),
            _ => Err(NdError::Corruption("unknown growable block kind")),
        }
    }

    fn external_capacity(&self, external: External) -> usize {
        match external {
            External::None => 0,
            External::Block { capacity, .. } => capacity,
            External::Metablock { blocks, .. } => blocks * self.max_block_elements(),
        }
    }

    fn slot_address(
        &self,
        db: &Database,
        record: Address,
        external: External,
        index: usize,
    ) -> Result<Address> {
        let elem = self.element_size() as u64;
        if index < self.inline_count() {
            return Ok(record.offset(self.offset as u64 + INLINE_OFFSET + index as u64 * elem));
        }
        let g = index - self.inline_count();
        match external {
            External::Block { address, .. } => Ok(data_start(address).offset(g as u64 * elem)),
            External::Metablock { address, .. } => {
                let max_block = self.max_block_elements();
                let block = directory_entry(db, address, g / max_block)?;
                Ok(data_start(block).offset((g % max_block) as u64 * elem))
            }
            External::None => Err(NdError::Consistency(format!(
                "array at {record}+{} has no storage for index {index}",
                self.offset
            ))),
        }
    }

    /// Contiguous runs of slots covering the whole capacity, in order.
    fn segments(
        &self,
        db: &Database,
        record: Address,
        external: External,
    ) -> Result<SmallVec<[(Address, usize); 4]>> {
        let mut out = SmallVec::new();
        if self.inline_count > 0 {
            out.push((
                record.offset(self.offset as u64 + INLINE_OFFSET),
                self.inline_count(),
            ));
        }
        match external {
            External::None => {}
            External::Block { address, capacity } => out.push((data_start(address), capacity)),
            External::Metablock { address, blocks } => {
                for i in 0..blocks {
                    let block = directory_entry(db, address, i)?;
                    out.push((data_start(block), self.max_block_elements()));
                }
            }
        }
        Ok(out)
    }

    fn shift_down(
        &self,
        db: &mut Database,
        record: Address,
        external: External,
        index: usize,
        size: usize,
    ) -> Result<()> {
        let elem = self.element_size();
        let mut seg_start = 0usize;
        let mut prev_last: Option<Address> = None;
        for (base, len) in self.segments(db, record, external)? {
            let seg_end = seg_start + len;
            if seg_start >= size {
                break;
            }
            if seg_end <= index {
                seg_start = seg_end;
                continue;
            }
            if seg_start > index {
                if let Some(last) = prev_last {
                    let carried = db.read_uint(base, elem)?;
                    db.write_uint(last, elem, carried)?;
                }
            }
            let from = index.max(seg_start);
            let upto = size.min(seg_end);
            let count = upto - from - 1;
            if count > 0 {
                let dst = base.offset(((from - seg_start) * elem) as u64);
                db.copy_within(dst.offset(elem as u64), dst, count * elem)?;
            }
            prev_last = Some(base.offset(((len - 1) * elem) as u64));
            seg_start = seg_end;
        }
        Ok(())
    }

    fn shrink(
        &self,
        db: &mut Database,
        record: Address,
        size: usize,
        external: External,
    ) -> Result<()> {
        let used = size.saturating_sub(self.inline_count());
        match external {
            External::None => Ok(()),
            _ if used == 0 => self.resize_external(db, record, size, external, 0),
            External::Block { .. } => Ok(()),
            External::Metablock { blocks, .. } => {
                let max_block = self.max_block_elements();
                match metablock_shrink_target(used, blocks, max_block) {
                    Some(keep) => {
                        self.resize_external(db, record, size, external, keep * max_block)
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Moves the external part to storage of `target` elements, keeping the
    /// first `size` elements intact.
    fn resize_external(
        &self,
        db: &mut Database,
        record: Address,
        size: usize,
        external: External,
        target: usize,
    ) -> Result<()> {
        let used = size.saturating_sub(self.inline_count());
        let old_capacity = self.external_capacity(external);
        let elem = self.element_size();
        let max_block = self.max_block_elements();
        let slot = record.offset(self.offset as u64 + EXTERNAL_OFFSET);
        debug_assert!(used <= target);

        let replacement = if target == 0 {
            self.free_external(db, external)?;
            Address::NULL
        } else if target <= max_block {
            let block = alloc_block(db, KIND_BLOCK, target, elem)?;
            let source = match external {
                External::None => None,
                External::Block { address, .. } => Some(data_start(address)),
                External::Metablock { address, .. } => {
                    Some(data_start(directory_entry(db, address, 0)?))
                }
            };
            if let Some(source) = source {
                if used > 0 {
                    db.copy_within(source, data_start(block), used * elem)?;
                }
            }
            self.free_external(db, external)?;
            block
        } else {
            let blocks = target / max_block;
            match external {
                External::Metablock {
                    address,
                    blocks: current,
                } => {
                    for i in current..blocks {
                        let block = alloc_block(db, KIND_BLOCK, max_block, elem)?;
                        set_directory_entry(db, address, i, block)?;
                    }
                    for i in blocks..current {
                        let block = directory_entry(db, address, i)?;
                        db.free(block)?;
                        set_directory_entry(db, address, i, Address::NULL)?;
                    }
                    db.write_u32(address, blocks as u32)?;
                    address
                }
                External::None | External::Block { .. } => {
                    let meta = alloc_block(db, KIND_METABLOCK, max_metablock_entries(), PTR_SIZE)?;
                    for i in 0..blocks {
                        let block = alloc_block(db, KIND_BLOCK, max_block, elem)?;
                        set_directory_entry(db, meta, i, block)?;
                    }
                    db.write_u32(meta, blocks as u32)?;
                    if let External::Block { address, .. } = external {
                        if used > 0 {
                            let first = directory_entry(db, meta, 0)?;
                            db.copy_within(data_start(address), data_start(first), used * elem)?;
                        }
                    }
                    self.free_external(db, external)?;
                    meta
                }
            }
        };
        db.write_address(slot, replacement)?;
        db.metrics().growable_resized(
            (self.inline_count() + old_capacity) as u64,
            (self.inline_count() + target) as u64,
        );
        debug!(
            %record,
            offset = self.offset,
            size,
            old_capacity = self.inline_count() + old_capacity,
            new_capacity = self.inline_count() + target,
            "growable.resize"
        );
        Ok(())
    }

    fn free_external(&self, db: &mut Database, external: External) -> Result<()> {
        match external {
            External::None => Ok(()),
            External::Block { address, .. } => db.free(address),
            External::Metablock { address, blocks } => {
                for i in 0..blocks {
                    let block = directory_entry(db, address, i)?;
                    db.free(block)?;
                }
                db.free(address)
            }
        }
    }
}

fn data_start(block: Address) -> Address {
    block.offset(GROWABLE_BLOCK_HEADER_SIZE as u64)
}

fn directory_entry(db: &Database, meta: Address, index: usize) -> Result<Address> {
    let entry = db.read_address(data_start(meta).offset((index * PTR_SIZE) as u64))?;
    if entry.is_null() {
        return Err(NdError::Corruption("metablock directory entry is null"));
    }
    Ok(entry)
}

fn set_directory_entry(db: &mut Database, meta: Address, index: usize, block: Address) -> Result<()> {
    db.write_address(data_start(meta).offset((index * PTR_SIZE) as u64), block)
}

fn alloc_block(db: &mut Database, kind: u32, capacity: usize, elem: usize) -> Result<Address> {
    debug_assert!(le::is_valid_width(elem));
    let address = db.malloc(GROWABLE_BLOCK_HEADER_SIZE + capacity * elem)?;
    db.write_u32(address, capacity as u32)?;
    db.write_u32(address.offset(4), kind)?;
    Ok(address)
}
