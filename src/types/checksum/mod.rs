#![forbid(unsafe_code)]

/// Incremental 32-bit checksum.
pub trait Checksum {
    /// Discards everything fed so far.
    fn reset(&mut self);
    /// Feeds `bytes` into the running checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of the bytes fed since the last reset. Does not reset.
    fn finalize(&self) -> u32;
}

/// CRC-32 backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC over a persisted image, salted with its format version and length so a
/// truncated or mislabeled image does not validate.
pub fn image_crc32(version: u32, image: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&version.to_le_bytes());
    hasher.update(&(image.len() as u64).to_le_bytes());
    hasher.update(image);
    hasher.finalize()
}
