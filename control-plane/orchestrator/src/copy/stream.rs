//! Chunked stream copy, used whenever either end of a copy is an open byte
//! stream rather than a plain path.

use super::{parse_blocksize, CopyError, CopyParams, StreamCopy, VolumeHandle};
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Ceiling for the in-memory copy buffer, regardless of the requested block
/// size.
const MAX_BUFFER: usize = 64 * 1024 * 1024;

/// Read fixed-size chunks from `reader` and write them to `writer` until EOF,
/// returning the number of bytes moved.
pub(super) async fn copy_streams<R, W>(
    reader: &mut R,
    writer: &mut W,
    block_size: usize,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; block_size.clamp(1, MAX_BUFFER)];
    let mut bytes = 0u64;
    loop {
        let read = reader.read(&mut buffer).await.context(StreamCopy { bytes })?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[.. read])
            .await
            .context(StreamCopy { bytes })?;
        bytes += read as u64;
    }
    writer.flush().await.context(StreamCopy { bytes })?;
    Ok(bytes)
}

/// Copy between two handles, opening files for any plain path end.
pub(super) async fn copy_handles(
    source: VolumeHandle,
    target: VolumeHandle,
    params: &CopyParams,
) -> Result<(), CopyError> {
    let block_size = parse_blocksize(&params.block_size)
        .filter(|bs| *bs > 0)
        .unwrap_or(1024 * 1024) as usize;

    let mut reader: Box<dyn AsyncRead + Send + Unpin> = match source {
        VolumeHandle::Path(path) => Box::new(
            tokio::fs::File::open(&path)
                .await
                .context(StreamCopy { bytes: 0u64 })?,
        ),
        VolumeHandle::Stream(stream) => Box::new(stream),
    };
    let mut writer: Box<dyn AsyncWrite + Send + Unpin> = match target {
        VolumeHandle::Path(path) => Box::new(
            tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .open(&path)
                .await
                .context(StreamCopy { bytes: 0u64 })?,
        ),
        VolumeHandle::Stream(stream) => Box::new(stream),
    };

    let bytes = copy_streams(reader.as_mut(), writer.as_mut(), block_size).await?;
    tracing::debug!(bytes, "Stream copy complete");
    Ok(())
}
