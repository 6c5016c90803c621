//! Artifact upload over the session's SFTP channel
//!
//! Files are streamed in fixed chunks with a progress callback on every
//! chunk boundary. After the stream completes, one remote stat call
//! compares the reported size to the local size; byte-exact equality is
//! the sole correctness check (no content hashing), so a mismatch is a
//! terminal `TransferError` and the upload is not retried.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use capstan_core::error::TransferError;
use capstan_core::types::{Artifact, TransferProgress};

use crate::session::Session;

/// Chunk size for streaming uploads
const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Sink for transfer progress.
///
/// Callbacks must be fast and non-blocking; the transfer loop invokes
/// them inline on every chunk boundary.
pub trait TransferObserver: Send + Sync {
    /// Called after each chunk is written
    fn on_progress(&self, progress: TransferProgress);
}

/// Observer that discards progress
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _progress: TransferProgress) {}
}

/// Proof of a completed, size-verified upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Absolute remote path written
    pub remote_path: String,
    /// Bytes streamed
    pub bytes_sent: u64,
    /// Size the remote filesystem reported after the transfer
    pub remote_size: u64,
}

/// Upload one artifact under the resolved root and verify its size.
pub async fn upload(
    session: &Session,
    artifact: &Artifact,
    root: &str,
    observer: &dyn TransferObserver,
) -> Result<TransferReceipt, TransferError> {
    let remote_path = artifact.remote_path(root);

    let local_size = tokio::fs::metadata(&artifact.local_path)
        .await
        .map_err(|e| TransferError::LocalRead {
            path: artifact.local_path.clone(),
            detail: e.to_string(),
        })?
        .len();

    let local_file =
        tokio::fs::File::open(&artifact.local_path)
            .await
            .map_err(|e| TransferError::LocalRead {
                path: artifact.local_path.clone(),
                detail: e.to_string(),
            })?;

    let sftp = session.sftp().map_err(|e| TransferError::Transport {
        remote_path: remote_path.clone(),
        detail: e.to_string(),
    })?;

    tracing::debug!(
        "Uploading {} ({} bytes) to {}",
        artifact.local_path.display(),
        local_size,
        remote_path
    );

    let mut remote_file =
        sftp.create(&remote_path)
            .await
            .map_err(|e| TransferError::Transport {
                remote_path: remote_path.clone(),
                detail: e.to_string(),
            })?;

    let bytes_sent = stream_with_progress(local_file, &mut remote_file, local_size, observer)
        .await
        .map_err(|e| TransferError::Transport {
            remote_path: remote_path.clone(),
            detail: e.to_string(),
        })?;

    remote_file
        .shutdown()
        .await
        .map_err(|e| TransferError::Transport {
            remote_path: remote_path.clone(),
            detail: e.to_string(),
        })?;

    let remote_size = sftp
        .metadata(&remote_path)
        .await
        .map_err(|e| TransferError::Transport {
            remote_path: remote_path.clone(),
            detail: e.to_string(),
        })?
        .size
        .unwrap_or(0);

    if remote_size != local_size {
        return Err(TransferError::SizeMismatch {
            remote_path,
            local_size,
            remote_size,
        });
    }

    tracing::info!("Uploaded {} ({} bytes, verified)", remote_path, remote_size);
    Ok(TransferReceipt {
        remote_path,
        bytes_sent,
        remote_size,
    })
}

/// Copy `reader` into `writer` in fixed chunks, reporting progress on
/// every chunk boundary. Returns the total bytes written.
async fn stream_with_progress<R, W>(
    mut reader: R,
    writer: &mut W,
    total_bytes: u64,
    observer: &dyn TransferObserver,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
    let mut bytes_transferred = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        bytes_transferred += n as u64;
        observer.on_progress(TransferProgress {
            bytes_transferred,
            total_bytes,
        });
    }

    writer.flush().await?;
    Ok(bytes_transferred)
}
