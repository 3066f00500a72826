#![forbid(unsafe_code)]
//! Fixed-width little-endian encoders and a slice cursor used by the storage
//! medium and the image header.

pub mod le {
    //! Little-endian integers of 1, 2, 4 or 8 bytes.

    use core::convert::TryInto;

    /// Returns true when `width` is a supported integer width.
    pub const fn is_valid_width(width: usize) -> bool {
        matches!(width, 1 | 2 | 4 | 8)
    }

    /// Decodes an unsigned integer of `width` bytes.
    pub fn get_uint(src: &[u8], width: usize) -> u64 {
        assert!(
            src.len() >= width,
            "uint source shorter than {} bytes (have {})",
            width,
            src.len()
        );
        match width {
            1 => src[0] as u64,
            2 => u16::from_le_bytes(src[..2].try_into().unwrap()) as u64,
            4 => u32::from_le_bytes(src[..4].try_into().unwrap()) as u64,
            8 => u64::from_le_bytes(src[..8].try_into().unwrap()),
            other => panic!("unsupported integer width {other}"),
        }
    }

    /// Encodes the low `width` bytes of `v`. Higher bits are dropped.
    pub fn put_uint(dst: &mut [u8], width: usize, v: u64) {
        assert!(dst.len() >= width, "destination too small");
        match width {
            1 => dst[0] = v as u8,
            2 => dst[..2].copy_from_slice(&(v as u16).to_le_bytes()),
            4 => dst[..4].copy_from_slice(&(v as u32).to_le_bytes()),
            8 => dst[..8].copy_from_slice(&v.to_le_bytes()),
            other => panic!("unsupported integer width {other}"),
        }
    }

    /// Decodes a u32.
    pub fn get_u32(src: &[u8]) -> u32 {
        get_uint(src, 4) as u32
    }

    /// Encodes a u32.
    pub fn put_u32(dst: &mut [u8], v: u32) {
        put_uint(dst, 4, v as u64)
    }

    /// Decodes a u64.
    pub fn get_u64(src: &[u8]) -> u64 {
        get_uint(src, 8)
    }

    /// Encodes a u64.
    pub fn put_u64(dst: &mut [u8], v: u64) {
        put_uint(dst, 8, v)
    }
}

pub mod buf {
    //! A simple slice-backed cursor for ergonomic parsing.

    use core::fmt;

    use super::le;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> &'a [u8] {
            let end = self
                .off
                .checked_add(n)
                .expect("cursor offset overflow during take");
            if end > self.buf.len() {
                panic!(
                    "cursor take beyond buffer: need {}, remaining {}",
                    n,
                    self.remaining()
                );
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            slice
        }

        /// Reads a little-endian u32.
        pub fn u32_le(&mut self) -> u32 {
            le::get_u32(self.take(4))
        }

        /// Reads a little-endian u64.
        pub fn u64_le(&mut self) -> u64 {
            le::get_u64(self.take(8))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
