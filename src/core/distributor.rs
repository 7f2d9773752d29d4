//! Copies cached files into project directories.
//!
//! A file fetched once is copied to `<data>/<project>/<repo_id>/<path>`
//! for every requested project. Existing destinations are replaced, so
//! re-running the same prefetch is idempotent. Copies keep the source's
//! permissions and timestamps.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::DistributeError;

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct Distributor {
    data_root: PathBuf,
    /// Whether to fsync each file after writing (safer but slower)
    sync_files: bool,
    /// Re-read each destination and compare its BLAKE3 hash
    verify: bool,
}

impl Distributor {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            sync_files: true,
            verify: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            data_root: config.data_directory.clone(),
            sync_files: config.sync_files,
            verify: config.verify_copies,
        }
    }

    pub fn with_sync(mut self, sync_files: bool) -> Self {
        self.sync_files = sync_files;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Where `relative_path` of `repo_id` lands for `project`.
    pub fn destination(&self, project: &str, repo_id: &str, relative_path: &str) -> PathBuf {
        self.data_root.join(project).join(repo_id).join(relative_path)
    }

    /// Copy `cached` into every project, in order.
    ///
    /// The first failing project aborts the remaining copies of this file;
    /// earlier copies are left in place.
    pub async fn distribute(
        &self,
        cached: &Path,
        relative_path: &str,
        repo_id: &str,
        projects: &[String],
    ) -> Result<Vec<PathBuf>, DistributeError> {
        let source = cached.to_path_buf();
        let destinations: Vec<PathBuf> = projects
            .iter()
            .map(|p| self.destination(p, repo_id, relative_path))
            .collect();
        let sync_files = self.sync_files;
        let verify = self.verify;

        tokio::task::spawn_blocking(move || {
            for dest in &destinations {
                copy_to(&source, dest, sync_files, verify)?;
            }
            Ok::<_, DistributeError>(destinations)
        })
        .await
        .map_err(|e| DistributeError::Task(e.to_string()))?
    }
}

/// Copy one file into place, creating parent directories as needed.
fn copy_to(
    source: &Path,
    dest: &Path,
    sync_files: bool,
    verify: bool,
) -> Result<(), DistributeError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DistributeError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let copy_err = |e: io::Error| DistributeError::Copy {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    };

    // A previous copy may carry read-only permissions from its source
    match fs::remove_file(dest) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(copy_err(e)),
        _ => {}
    }

    let (bytes, hash) = copy_single_file(source, dest, sync_files).map_err(copy_err)?;

    if verify {
        let copied = hash_file(dest).map_err(copy_err)?;
        if copied != hash {
            return Err(DistributeError::VerifyMismatch {
                path: dest.to_path_buf(),
            });
        }
    }

    debug!(dest = %dest.display(), bytes, "Copied file");
    Ok(())
}

/// Stream `source` into `dest`, hashing the bytes as they are written.
fn copy_single_file(source: &Path, dest: &Path, sync_file: bool) -> io::Result<(u64, blake3::Hash)> {
    let source_metadata = fs::metadata(source)?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(dest)?);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        hasher.update(&buffer[..bytes_read]);
        bytes_written += bytes_read as u64;
    }

    writer.flush()?;

    if sync_file {
        let inner = writer.into_inner().map_err(|e| e.into_error())?;
        inner.sync_all()?;
    }

    // Metadata is best effort; some filesystems refuse it
    if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
        debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
    }

    let atime = filetime::FileTime::from_last_access_time(&source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);
    if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok((bytes_written, hasher.finalize()))
}

/// Hash a file using BLAKE3, streaming in chunks.
fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(path)?);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}
