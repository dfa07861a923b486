//! File transfer codec.
//!
//! A file stream is an entry count followed, per file, by its byte length,
//! its wire path and exactly that many body bytes:
//!
//! ```text
//! count:i32 | (len:i64 | path:u16+utf8 | body[len])*
//! ```
//!
//! Senders enumerate files up front and re-open each one while streaming. A
//! file that shrank in between fails the exchange instead of producing a
//! short body the receiver would misparse.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use walkdir::WalkDir;

use crate::frame::{copy_exact, read_count, read_len, read_string, write_count, write_len, write_string};
use crate::path::{resolve_wire_path, to_wire_path};
use crate::WireError;

/// A file as described on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Wire-relative path.
    pub path: String,
    /// Body length in bytes.
    pub len: u64,
}

/// A local file scheduled for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// How the file is announced on the wire.
    pub entry: FileEntry,
    /// Where the body is read from.
    pub source: PathBuf,
}

/// Enumerate regular files under `start` with wire paths relative to `root`.
///
/// `start` may be a single file or a directory (walked recursively). A
/// missing `start` yields an empty list.
pub fn collect_files(root: &Path, start: &Path) -> Result<Vec<OutgoingFile>, WireError> {
    if std::fs::symlink_metadata(start).is_err() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(start).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            // Removed while walking
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                continue
            }
            Err(e) => return Err(std::io::Error::from(e).into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let len = entry.metadata().map_err(std::io::Error::from)?.len();
        let path = to_wire_path(root, entry.path())?;
        files.push(OutgoingFile {
            entry: FileEntry { path, len },
            source: entry.into_path(),
        });
    }
    Ok(files)
}

/// Stream `files` to `writer`. Returns the number of body bytes sent.
pub async fn send_files<W>(writer: &mut W, files: &[OutgoingFile]) -> Result<u64, WireError>
where
    W: AsyncWrite + Unpin,
{
    write_count(writer, files.len()).await?;

    let mut total = 0u64;
    for file in files {
        let mut source = tokio::fs::File::open(&file.source).await?;
        let current = source.metadata().await?.len();
        if current < file.entry.len {
            return Err(WireError::SourceChanged(file.entry.path.clone()));
        }

        write_len(writer, file.entry.len).await?;
        write_string(writer, &file.entry.path).await?;
        match copy_exact(&mut source, writer, file.entry.len).await {
            Ok(n) => total += n,
            Err(WireError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(WireError::SourceChanged(file.entry.path.clone()))
            }
            Err(e) => return Err(e),
        }
        tracing::debug!("Sent {} ({} bytes)", file.entry.path, file.entry.len);
    }

    writer.flush().await?;
    Ok(total)
}

/// Receive a file stream into `root`, creating parent directories on demand.
pub async fn receive_files<R>(reader: &mut R, root: &Path) -> Result<Vec<FileEntry>, WireError>
where
    R: AsyncRead + Unpin,
{
    let count = read_count(reader).await?;
    let mut received = Vec::with_capacity(count.min(1024));

    for _ in 0..count {
        let len = read_len(reader).await?;
        let path = read_string(reader).await?;
        let target = resolve_wire_path(root, &path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        copy_exact(reader, &mut file, len).await?;
        file.flush().await?;

        tracing::debug!("Received {} ({} bytes)", path, len);
        received.push(FileEntry { path, len });
    }
    Ok(received)
}
