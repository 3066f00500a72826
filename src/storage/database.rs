use std::ops::Range;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, error, trace};

use super::metrics::{default_metrics, StorageMetrics};
use super::options::DatabaseOptions;
use crate::primitives::bytes::{buf::Cursor, le};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::checksum::image_crc32;
use crate::types::{Address, NdError, Result};

/// Size in bytes of a stored address.
pub const PTR_SIZE: usize = 8;
/// Bytes preceding every allocation: block length (u32) then allocation tag (u32).
pub const BLOCK_HEADER_SIZE: usize = 8;
/// Every block length is a multiple of this.
pub const BLOCK_ALIGN: usize = 8;
/// Smallest block the allocator hands out, header included.
pub const MIN_BLOCK_SIZE: usize = 16;
/// Largest payload a single `malloc` can return.
pub const MAX_MALLOC_SIZE: usize = 16 * 1024 - BLOCK_HEADER_SIZE;
/// Number of root pointer slots kept in the image prefix.
pub const ROOT_SLOTS: usize = 4;
/// Image prefix reserved for root slots; no block ever starts below it.
pub const IMAGE_PREFIX_SIZE: usize = 64;

const TAG_ALLOCATED: u32 = 0x4E44_A11C;
const TAG_FREE: u32 = 0x4E44_F4EE;

const FILE_MAGIC: [u8; 4] = *b"NDB1";
const FILE_VERSION: u32 = 1;
const FILE_HEADER_LEN: usize = 24;

/// Allocator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Total bytes in the image, prefix included.
    pub image_bytes: u64,
    /// Allocated blocks.
    pub live_blocks: u64,
    /// Bytes held by allocated blocks, headers included.
    pub live_bytes: u64,
    /// Blocks sitting on free lists.
    pub free_blocks: u64,
    /// Bytes held by free blocks, headers included.
    pub free_bytes: u64,
}

/// Byte-addressable storage medium: a single growable image carved into
/// blocks by a size-class allocator. Addresses handed out by [`malloc`]
/// point just past the block header and stay valid until [`free`].
///
/// [`malloc`]: Database::malloc
/// [`free`]: Database::free
pub struct Database {
    image: Vec<u8>,
    free_lists: FxHashMap<u32, Vec<u64>>,
    live_blocks: u64,
    live_bytes: u64,
    scrub_freed: bool,
    metrics: Arc<dyn StorageMetrics>,
    io: Option<StdFileIo>,
}

impl Database {
    /// Creates an empty database. When `options.path` is set the backing file
    /// is created (or truncated) and receives the image on [`flush`].
    ///
    /// [`flush`]: Database::flush
    pub fn create(options: DatabaseOptions) -> Result<Self> {
        let io = match options.path.as_ref() {
            Some(path) => {
                let io = StdFileIo::open(path)?;
                io.truncate(0)?;
                Some(io)
            }
            None => None,
        };
        let mut image = Vec::with_capacity(options.initial_capacity.max(IMAGE_PREFIX_SIZE));
        image.resize(IMAGE_PREFIX_SIZE, 0);
        debug!(path = ?options.path, "database.create");
        Ok(Self {
            image,
            free_lists: FxHashMap::default(),
            live_blocks: 0,
            live_bytes: 0,
            scrub_freed: options.scrub_freed,
            metrics: options.metrics.unwrap_or_else(default_metrics),
            io,
        })
    }

    /// Opens a previously flushed image from `options.path`.
    pub fn open(options: DatabaseOptions) -> Result<Self> {
        let path = options
            .path
            .as_ref()
            .ok_or_else(|| NdError::Config("open requires a backing file path".into()))?;
        let io = StdFileIo::open_existing(path)?;
        let file_len = io.len()?;
        if file_len < FILE_HEADER_LEN as u64 {
            return Err(NdError::Corruption("database file shorter than header"));
        }
        let mut header = [0u8; FILE_HEADER_LEN];
        io.read_at(0, &mut header)?;
        let mut cur = Cursor::new(&header);
        if cur.take(4) != FILE_MAGIC {
            return Err(NdError::Corruption("invalid database magic"));
        }
        let version = cur.u32_le();
        if version != FILE_VERSION {
            return Err(NdError::Corruption("unsupported database format version"));
        }
        let image_len = cur.u64_le();
        let stored_crc = cur.u32_le();
        if image_len < IMAGE_PREFIX_SIZE as u64
            || image_len > file_len - FILE_HEADER_LEN as u64
        {
            return Err(NdError::Corruption("database image length out of range"));
        }
        let image_len = usize::try_from(image_len)
            .map_err(|_| NdError::Corruption("database image length out of range"))?;
        let mut image = vec![0u8; image_len];
        io.read_at(FILE_HEADER_LEN as u64, &mut image)?;
        if image_crc32(version, &image) != stored_crc {
            error!(path = ?path, "database image checksum mismatch");
            return Err(NdError::Corruption("database image checksum mismatch"));
        }
        let mut db = Self {
            image,
            free_lists: FxHashMap::default(),
            live_blocks: 0,
            live_bytes: 0,
            scrub_freed: options.scrub_freed,
            metrics: options.metrics.clone().unwrap_or_else(default_metrics),
            io: Some(io),
        };
        db.rebuild_free_lists()?;
        debug!(path = ?path, image_len, live_blocks = db.live_blocks, "database.open");
        Ok(db)
    }

    /// Writes the image to the backing file and syncs it. In-memory databases
    /// accept the call and do nothing.
    pub fn flush(&mut self) -> Result<()> {
        let Some(io) = self.io.as_ref() else {
            return Ok(());
        };
        let mut header = [0u8; FILE_HEADER_LEN];
        header[..4].copy_from_slice(&FILE_MAGIC);
        le::put_u32(&mut header[4..8], FILE_VERSION);
        le::put_u64(&mut header[8..16], self.image.len() as u64);
        le::put_u32(&mut header[16..20], image_crc32(FILE_VERSION, &self.image));
        io.write_at(FILE_HEADER_LEN as u64, &self.image)?;
        io.write_at(0, &header)?;
        io.truncate((FILE_HEADER_LEN + self.image.len()) as u64)?;
        io.sync_all()?;
        debug!(image_len = self.image.len(), "database.flush");
        Ok(())
    }

    /// Allocates a zero-filled block able to hold `size` bytes.
    pub fn malloc(&mut self, size: usize) -> Result<Address> {
        if size > MAX_MALLOC_SIZE {
            return Err(NdError::Capacity(format!(
                "allocation of {size} bytes exceeds the single block limit of {MAX_MALLOC_SIZE}"
            )));
        }
        let block_len = block_len_for(size);
        let reused = self
            .free_lists
            .get_mut(&(block_len as u32))
            .and_then(|list| list.pop());
        let start = match reused {
            Some(start) => start as usize,
            None => {
                let start = self.image.len();
                let end = start
                    .checked_add(block_len)
                    .ok_or_else(|| NdError::Capacity("database image overflow".into()))?;
                self.image.resize(end, 0);
                start
            }
        };
        le::put_u32(&mut self.image[start..start + 4], block_len as u32);
        le::put_u32(&mut self.image[start + 4..start + 8], TAG_ALLOCATED);
        self.image[start + BLOCK_HEADER_SIZE..start + block_len].fill(0);
        self.live_blocks += 1;
        self.live_bytes += block_len as u64;
        self.metrics.record_allocated(block_len as u64);
        let address = Address((start + BLOCK_HEADER_SIZE) as u64);
        trace!(%address, size, block_len, reused = reused.is_some(), "database.malloc");
        Ok(address)
    }

    /// Releases the block at `address`. Releasing anything that is not a live
    /// block is reported as corruption.
    pub fn free(&mut self, address: Address) -> Result<()> {
        let start = self.block_start(address)?;
        let block_len = le::get_u32(&self.image[start..start + 4]) as usize;
        le::put_u32(&mut self.image[start + 4..start + 8], TAG_FREE);
        if self.scrub_freed {
            self.image[start + BLOCK_HEADER_SIZE..start + block_len].fill(0);
        }
        self.free_lists
            .entry(block_len as u32)
            .or_default()
            .push(start as u64);
        self.live_blocks -= 1;
        self.live_bytes -= block_len as u64;
        self.metrics.record_freed(block_len as u64);
        trace!(%address, block_len, "database.free");
        Ok(())
    }

    /// Returns true when `address` is the start of a live block.
    pub fn is_allocated(&self, address: Address) -> bool {
        self.block_start(address).is_ok()
    }

    /// Usable payload bytes of the live block at `address`.
    pub fn block_size(&self, address: Address) -> Result<usize> {
        let start = self.block_start(address)?;
        Ok(le::get_u32(&self.image[start..start + 4]) as usize - BLOCK_HEADER_SIZE)
    }

    /// Reads an unsigned integer of `width` bytes (1, 2, 4 or 8).
    pub fn read_uint(&self, address: Address, width: usize) -> Result<u64> {
        let range = self.range(address, width)?;
        Ok(le::get_uint(&self.image[range], width))
    }

    /// Writes the low `width` bytes of `value`.
    pub fn write_uint(&mut self, address: Address, width: usize, value: u64) -> Result<()> {
        let range = self.range(address, width)?;
        le::put_uint(&mut self.image[range], width, value);
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&self, address: Address) -> Result<u8> {
        Ok(self.read_uint(address, 1)? as u8)
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, address: Address, value: u8) -> Result<()> {
        self.write_uint(address, 1, value as u64)
    }

    /// Reads a u16.
    pub fn read_u16(&self, address: Address) -> Result<u16> {
        Ok(self.read_uint(address, 2)? as u16)
    }

    /// Writes a u16.
    pub fn write_u16(&mut self, address: Address, value: u16) -> Result<()> {
        self.write_uint(address, 2, value as u64)
    }

    /// Reads a u32.
    pub fn read_u32(&self, address: Address) -> Result<u32> {
        Ok(self.read_uint(address, 4)? as u32)
    }

    /// Writes a u32.
    pub fn write_u32(&mut self, address: Address, value: u32) -> Result<()> {
        self.write_uint(address, 4, value as u64)
    }

    /// Reads a u64.
    pub fn read_u64(&self, address: Address) -> Result<u64> {
        self.read_uint(address, 8)
    }

    /// Writes a u64.
    pub fn write_u64(&mut self, address: Address, value: u64) -> Result<()> {
        self.write_uint(address, 8, value)
    }

    /// Reads a stored address.
    pub fn read_address(&self, address: Address) -> Result<Address> {
        Ok(Address(self.read_uint(address, PTR_SIZE)?))
    }

    /// Writes an address.
    pub fn write_address(&mut self, address: Address, value: Address) -> Result<()> {
        self.write_uint(address, PTR_SIZE, value.0)
    }

    /// Moves `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy_within(&mut self, src: Address, dst: Address, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.image.copy_within(from, to.start);
        Ok(())
    }

    /// Returns the root pointer stored in `slot`.
    pub fn root(&self, slot: usize) -> Result<Address> {
        let off = root_offset(slot)?;
        Ok(Address(le::get_u64(&self.image[off..off + PTR_SIZE])))
    }

    /// Stores a root pointer in `slot`.
    pub fn set_root(&mut self, slot: usize, value: Address) -> Result<()> {
        let off = root_offset(slot)?;
        le::put_u64(&mut self.image[off..off + PTR_SIZE], value.0);
        Ok(())
    }

    /// Metrics sink shared with the layers above.
    pub fn metrics(&self) -> &Arc<dyn StorageMetrics> {
        &self.metrics
    }

    /// Returns allocator statistics.
    pub fn stats(&self) -> DatabaseStats {
        let (free_blocks, free_bytes) = self
            .free_lists
            .iter()
            .fold((0u64, 0u64), |(blocks, bytes), (len, list)| {
                (
                    blocks + list.len() as u64,
                    bytes + *len as u64 * list.len() as u64,
                )
            });
        DatabaseStats {
            image_bytes: self.image.len() as u64,
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            free_blocks,
            free_bytes,
        }
    }

    fn range(&self, address: Address, len: usize) -> Result<Range<usize>> {
        let start = usize::try_from(address.0)
            .map_err(|_| NdError::Corruption("address out of bounds"))?;
        if start < IMAGE_PREFIX_SIZE {
            return Err(NdError::Corruption("address inside reserved image prefix"));
        }
        let end = start
            .checked_add(len)
            .ok_or(NdError::Corruption("address out of bounds"))?;
        if end > self.image.len() {
            return Err(NdError::Corruption("address out of bounds"));
        }
        Ok(start..end)
    }

    fn block_start(&self, address: Address) -> Result<usize> {
        let addr = usize::try_from(address.0)
            .map_err(|_| NdError::Corruption("address out of bounds"))?;
        if addr < IMAGE_PREFIX_SIZE + BLOCK_HEADER_SIZE || addr % BLOCK_ALIGN != 0 {
            return Err(NdError::Corruption("address is not a block start"));
        }
        let start = addr - BLOCK_HEADER_SIZE;
        if addr > self.image.len() {
            return Err(NdError::Corruption("address out of bounds"));
        }
        let block_len = le::get_u32(&self.image[start..start + 4]) as usize;
        let tag = le::get_u32(&self.image[start + 4..start + 8]);
        if tag != TAG_ALLOCATED {
            return Err(NdError::Corruption("address does not name a live block"));
        }
        if block_len < MIN_BLOCK_SIZE || start + block_len > self.image.len() {
            return Err(NdError::Corruption("block header length out of range"));
        }
        Ok(start)
    }

    fn rebuild_free_lists(&mut self) -> Result<()> {
        let mut off = IMAGE_PREFIX_SIZE;
        while off < self.image.len() {
            if off + BLOCK_HEADER_SIZE > self.image.len() {
                return Err(NdError::Corruption("truncated block header"));
            }
            let block_len = le::get_u32(&self.image[off..off + 4]) as usize;
            let tag = le::get_u32(&self.image[off + 4..off + 8]);
            if block_len < MIN_BLOCK_SIZE
                || block_len % BLOCK_ALIGN != 0
                || off + block_len > self.image.len()
            {
                return Err(NdError::Corruption("block header length out of range"));
            }
            match tag {
                TAG_ALLOCATED => {
                    self.live_blocks += 1;
                    self.live_bytes += block_len as u64;
                }
                TAG_FREE => self
                    .free_lists
                    .entry(block_len as u32)
                    .or_default()
                    .push(off as u64),
                _ => return Err(NdError::Corruption("unknown block tag")),
            }
            off += block_len;
        }
        Ok(())
    }
}

fn block_len_for(size: usize) -> usize {
    let raw = size + BLOCK_HEADER_SIZE;
    let aligned = (raw + BLOCK_ALIGN - 1) / BLOCK_ALIGN * BLOCK_ALIGN;
    aligned.max(MIN_BLOCK_SIZE)
}

fn root_offset(slot: usize) -> Result<usize> {
    if slot >= ROOT_SLOTS {
        return Err(NdError::Layout(format!(
            "root slot {slot} out of range (have {ROOT_SLOTS})"
        )));
    }
    Ok(slot * PTR_SIZE)
}
