//! Pluggable compression for state files.
//!
//! State files are written with the codec named in the batch configuration
//! (`state.compression.codec`), so the codec is looked up **by name** once per
//! query rather than detected per file. The store backends only ever see an
//! already-decompressed byte stream.
//!
//! ## Built-in Codecs
//!
//! When enabled via feature flags, the following codecs are available:
//! - **gzip** via `flate2` (feature: `compression-gzip`)
//! - **zstd** via `zstd` (feature: `compression-zstd`)
//! - **bzip2** via `bzip2` (feature: `compression-bzip2`)
//! - **xz** via `xz2` (feature: `compression-xz`)
//!
//! ## Custom Codec Implementation
//! ```
//! use ironstate::io::compression::{register_codec, CompressionCodec};
//! use std::io::{Read, Write, Result};
//! use std::sync::Arc;
//!
//! struct Identity;
//!
//! impl CompressionCodec for Identity {
//!     fn name(&self) -> &str { "identity" }
//!
//!     fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
//!         Ok(reader)
//!     }
//!
//!     fn wrap_writer_dyn(&self, writer: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>> {
//!         Ok(writer)
//!     }
//! }
//!
//! register_codec(Arc::new(Identity));
//! ```

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::{Arc, PoisonError, RwLock};

/// Codec name meaning "stored uncompressed".
pub const NO_CODEC: &str = "none";

/// Global codec registry for pluggable compression support.
static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

/// Initialize the codec registry with built-in codecs.
fn init_registry() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

/// Get or initialize the global codec registry.
fn get_registry() -> Vec<Arc<dyn CompressionCodec>> {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).clone()
}

/// Register a custom compression codec globally.
///
/// A codec registered under an existing name shadows the earlier one.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).insert(0, codec);
}

/// Pluggable compression codec trait.
///
/// Implementations must be `Send + Sync`: they live in a global registry and
/// are shared by partition reads running on different threads.
pub trait CompressionCodec: Send + Sync {
    /// Codec name as written in the batch configuration (e.g. "zstd").
    fn name(&self) -> &str;

    /// Other accepted spellings of the name.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>>;

    /// Wrap a writer with compression.
    fn wrap_writer_dyn(
        &self,
        writer: Box<dyn Write + Send>,
    ) -> std::io::Result<Box<dyn Write + Send>>;
}

/// Look up a codec by its configured name.
///
/// Returns `Ok(None)` for [`NO_CODEC`] and `Err(name)` when no registered
/// codec answers to the name. Matching is case-insensitive.
pub fn codec_by_name(name: &str) -> Result<Option<Arc<dyn CompressionCodec>>, String> {
    let wanted = name.trim().to_lowercase();
    if wanted == NO_CODEC || wanted.is_empty() {
        return Ok(None);
    }
    get_registry()
        .into_iter()
        .find(|codec| codec.name() == wanted || codec.aliases().contains(&wanted.as_str()))
        .map(Some)
        .ok_or_else(|| name.to_string())
}

/// Wrap a raw file reader with the query's codec (if any) and a buffer.
///
/// # Errors
/// Propagates codec initialization failures.
pub fn wrap_reader<R: Read + Send + 'static>(
    reader: R,
    codec: Option<&Arc<dyn CompressionCodec>>,
) -> std::io::Result<Box<dyn Read + Send>> {
    match codec {
        Some(codec) => {
            let inner = codec.wrap_reader_dyn(Box::new(BufReader::new(reader)))?;
            Ok(Box::new(BufReader::new(inner)))
        }
        None => Ok(Box::new(BufReader::new(reader))),
    }
}

/// Wrap a raw file writer with the codec (if any) and a buffer.
///
/// # Errors
/// Propagates codec initialization failures.
pub fn wrap_writer<W: Write + Send + 'static>(
    writer: W,
    codec: Option<&Arc<dyn CompressionCodec>>,
) -> std::io::Result<Box<dyn Write + Send>> {
    match codec {
        Some(codec) => codec.wrap_writer_dyn(Box::new(BufWriter::new(writer))),
        None => Ok(Box::new(BufWriter::new(writer))),
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn aliases(&self) -> &[&str] {
        &["gz"]
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        use flate2::read::GzDecoder;
        Ok(Box::new(GzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(
        &self,
        writer: Box<dyn Write + Send>,
    ) -> std::io::Result<Box<dyn Write + Send>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn aliases(&self) -> &[&str] {
        &["zst"]
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
    }

    fn wrap_writer_dyn(
        &self,
        writer: Box<dyn Write + Send>,
    ) -> std::io::Result<Box<dyn Write + Send>> {
        zstd::stream::write::Encoder::new(writer, 3)
            .map(|e| Box::new(e.auto_finish()) as Box<dyn Write + Send>)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn aliases(&self) -> &[&str] {
        &["bz2"]
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        use bzip2::read::BzDecoder;
        Ok(Box::new(BzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(
        &self,
        writer: Box<dyn Write + Send>,
    ) -> std::io::Result<Box<dyn Write + Send>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        Ok(Box::new(BzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        use xz2::read::XzDecoder;
        Ok(Box::new(XzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(
        &self,
        writer: Box<dyn Write + Send>,
    ) -> std::io::Result<Box<dyn Write + Send>> {
        use xz2::write::XzEncoder;
        Ok(Box::new(XzEncoder::new(writer, 6)))
    }
}
