//! Byte-level I/O helpers shared by the store backends.

pub mod compression;
