use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::torrent_parser::torrent::Torrent;

/// Possible `FileStore` errors.
#[derive(Debug)]
pub enum StorageError {
    CreateDir(io::Error),
    Open(io::Error),
    Read(io::Error),
    Write(io::Error),
    SetLen(io::Error),
    Flush(io::Error),
}

struct StoreFile {
    path: PathBuf,
    /// Offset of this file's first byte in the torrent's virtual stream.
    start: u64,
    length: u64,
    handle: Option<File>,
    /// The cached handle may have been opened read-only by the verifier;
    /// the first write swaps it for a read-write one.
    writable: bool,
}

/// Maps the torrent's virtual byte stream onto one or more files under the
/// download directory.
///
/// Files are created lazily on first write and sized to their declared
/// length at allocation. The owner wraps the store in a single async mutex;
/// that lock is what keeps piece validation from racing late block writes,
/// so every mutation goes through `&mut self` here.
pub struct FileStore {
    files: Vec<StoreFile>,
    total_length: u64,
}

impl FileStore {
    /// Lays out the store for `torrent` under `download_dir`. Nothing is
    /// touched on disk until the first write.
    pub fn new(torrent: &Torrent, download_dir: &Path) -> Self {
        let mut files = Vec::with_capacity(torrent.info.files.len());
        let mut start = 0;

        for entry in &torrent.info.files {
            let mut path = download_dir.join(&torrent.info.name);
            for component in &entry.path {
                path.push(component);
            }
            files.push(StoreFile {
                path,
                start,
                length: entry.length,
                handle: None,
                writable: false,
            });
            start += entry.length;
        }

        Self {
            files,
            total_length: start,
        }
    }

    /// Reads up to `length` bytes at the virtual `offset`.
    ///
    /// A missing or truncated file ends the read early: the returned buffer
    /// is then shorter than requested, which callers treat as "content not
    /// present yet".
    pub async fn read(&mut self, offset: u64, length: u32) -> Result<Vec<u8>, StorageError> {
        let mut buffer = Vec::with_capacity(length as usize);

        for (index, file_offset, span) in self.map_range(offset, u64::from(length)) {
            let file = &mut self.files[index];
            if file.handle.is_none() {
                match File::open(&file.path).await {
                    Ok(handle) => file.handle = Some(handle),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(buffer),
                    Err(e) => return Err(StorageError::Open(e)),
                }
            }
            let handle = file.handle.as_mut().expect("handle was just opened");

            handle
                .seek(SeekFrom::Start(file_offset))
                .await
                .map_err(StorageError::Read)?;

            let mut chunk = vec![0; span as usize];
            let mut filled = 0;
            while filled < chunk.len() {
                let n = handle
                    .read(&mut chunk[filled..])
                    .await
                    .map_err(StorageError::Read)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buffer.extend_from_slice(&chunk[..filled]);
            if filled < span as usize {
                return Ok(buffer);
            }
        }

        Ok(buffer)
    }

    /// Writes `data` at the virtual `offset`, allocating files on the way.
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let mut written = 0usize;

        for (index, file_offset, span) in self.map_range(offset, data.len() as u64) {
            self.allocate(index).await?;
            let file = &mut self.files[index];
            let handle = file.handle.as_mut().expect("file was just allocated");

            handle
                .seek(SeekFrom::Start(file_offset))
                .await
                .map_err(StorageError::Write)?;
            handle
                .write_all(&data[written..written + span as usize])
                .await
                .map_err(StorageError::Write)?;
            written += span as usize;
        }

        Ok(())
    }

    /// Flushes every open file; called on shutdown.
    pub async fn flush(&mut self) -> Result<(), StorageError> {
        for file in &mut self.files {
            if let Some(handle) = file.handle.as_mut() {
                handle.flush().await.map_err(StorageError::Flush)?;
                handle.sync_all().await.map_err(StorageError::Flush)?;
            }
        }
        Ok(())
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Opens the file with read/write access, creating parents and sizing
    /// it to its declared length the first time.
    async fn allocate(&mut self, index: usize) -> Result<(), StorageError> {
        let file = &mut self.files[index];
        if file.handle.is_some() && file.writable {
            return Ok(());
        }

        if let Some(parent) = file.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(StorageError::CreateDir)?;
        }

        let existed = fs::metadata(&file.path).await.is_ok();
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&file.path)
            .await
            .map_err(StorageError::Open)?;
        if !existed {
            handle
                .set_len(file.length)
                .await
                .map_err(StorageError::SetLen)?;
        }
        file.handle = Some(handle);
        file.writable = true;
        Ok(())
    }

    /// Splits `[offset, offset + length)` into per-file spans of
    /// `(file index, offset within file, span length)`.
    fn map_range(&self, offset: u64, length: u64) -> Vec<(usize, u64, u64)> {
        let end = (offset + length).min(self.total_length);
        let mut spans = Vec::new();

        for (index, file) in self.files.iter().enumerate() {
            let file_end = file.start + file.length;
            if file_end <= offset {
                continue;
            }
            if file.start >= end {
                break;
            }
            let span_start = offset.max(file.start);
            let span_end = end.min(file_end);
            spans.push((index, span_start - file.start, span_end - span_start));
        }

        spans
    }
}
