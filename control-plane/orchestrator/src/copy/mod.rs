//! Backend-agnostic movement of a volume's bytes between two locations.
//!
//! When both ends are plain paths the copy is delegated to the system block
//! copy utility with computed `bs`/`count` parameters; when either end is an
//! already-open byte stream, a chunked read/write loop is used instead.

mod blkcopy;
mod stream;

use snafu::Snafu;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bytes in a KiB.
const KIB: u128 = 1024;
/// Bytes in a MiB.
const MIB: u128 = KIB * KIB;

/// All errors that can be returned by the copy engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum CopyError {
    /// The copy utility could not be spawned.
    #[snafu(display("Failed to spawn '{}'. Error {}", command, source))]
    CopySpawn {
        command: String,
        source: std::io::Error,
    },
    /// The copy utility ran but reported failure.
    #[snafu(display(
        "Copy command '{}' failed with status {:?}: {}",
        command,
        code,
        stderr
    ))]
    CopyProcess {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// The stream copy loop failed part way.
    #[snafu(display("Stream copy failed after {} bytes. Error {}", bytes, source))]
    StreamCopy {
        bytes: u64,
        source: std::io::Error,
    },
}

/// A duplex byte stream over an attached volume.
pub trait VolumeStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> VolumeStream for T {}

/// Where a backend exposes a volume's bytes for host access: either a block
/// device like path, or an already-open byte stream.
pub enum VolumeHandle {
    /// A local block device or file path.
    Path(PathBuf),
    /// An open duplex byte stream.
    Stream(Box<dyn VolumeStream>),
}

impl std::fmt::Debug for VolumeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// An argv prefix which wraps the copy utility for I/O throttling,
/// eg: a cgroup execution wrapper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Throttle {
    prefix: Vec<String>,
}

impl Throttle {
    /// Build a throttle from the wrapper argv.
    pub fn new(prefix: Vec<String>) -> Self {
        Self { prefix }
    }
    /// The wrapper argv.
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }
}

/// Parameters of a single volume copy.
#[derive(Debug, Clone)]
pub struct CopyParams {
    /// Total amount of data to move, in MiB.
    pub size_mb: u64,
    /// Requested human block size, eg `"1M"`.
    pub block_size: String,
    /// Flush the destination before declaring success.
    pub sync: bool,
    /// ionice class arguments for the copy utility, eg `"-c3"`.
    pub ionice: Option<String>,
    /// Optional throttling wrapper.
    pub throttle: Option<Throttle>,
    /// Skip zero extents when the destination supports it.
    pub sparse: bool,
}

impl CopyParams {
    /// Copy parameters with the given size and block size and conservative
    /// defaults: synchronous flush, no throttling, dense copy.
    pub fn new(size_mb: u64, block_size: impl Into<String>) -> Self {
        Self {
            size_mb,
            block_size: block_size.into(),
            sync: true,
            ionice: None,
            throttle: None,
            sparse: false,
        }
    }
    /// Set the sparse flag.
    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }
    /// Set the throttling wrapper.
    pub fn with_throttle(mut self, throttle: Option<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }
    /// Set the ionice class.
    pub fn with_ionice(mut self, ionice: Option<String>) -> Self {
        self.ionice = ionice;
        self
    }
}

/// Move the bytes of a volume from `source` to `target`.
///
/// A failed copy leaves the target in an indeterminate state: the caller must
/// not mark the destination volume available.
pub async fn copy_volume(
    source: VolumeHandle,
    target: VolumeHandle,
    params: &CopyParams,
) -> Result<(), CopyError> {
    match (source, target) {
        (VolumeHandle::Path(source), VolumeHandle::Path(target)) => {
            blkcopy::copy_path(&source, &target, params).await
        }
        (source, target) => stream::copy_handles(source, target, params).await,
    }
}

/// Normalize a human block size against a total size in MiB, returning the
/// block size to use and the number of blocks which cover the size:
/// `count * block_size >= size`.
///
/// Malformed or non-positive block sizes fall back to a 1 MiB block size with
/// one block per MiB.
pub fn calculate_count(size_in_m: u64, blocksize: &str) -> (String, u64) {
    match parse_blocksize(blocksize) {
        Some(bs) if bs > 0 => {
            let size = size_in_m as u128 * MIB;
            let count = size.div_ceil(bs);
            (blocksize.to_string(), count as u64)
        }
        _ => ("1M".to_string(), size_in_m),
    }
}

/// Parse a human block size string (`"512"`, `"64K"`, `"10M"`, `"1G"`) into
/// bytes. Returns `None` for anything malformed.
pub(crate) fn parse_blocksize(blocksize: &str) -> Option<u128> {
    let digits = blocksize
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(blocksize.len());
    let number: u128 = blocksize.get(.. digits)?.parse().ok()?;
    let multiplier = match blocksize.get(digits ..)? {
        "" => 1,
        "K" | "k" => KIB,
        "M" | "m" => MIB,
        "G" | "g" => KIB * MIB,
        "T" | "t" => MIB * MIB,
        _ => return None,
    };
    Some(number * multiplier)
}
