//! Low-level primitives for building the record store.
//!
//! Includes byte utilities, positioned file I/O and the single-writer lock.

/// Byte-level utilities and encoding/decoding.
///
/// Fixed-width little-endian integers and a slice cursor.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// The exclusive writer lock that scopes every mutating sequence.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;
