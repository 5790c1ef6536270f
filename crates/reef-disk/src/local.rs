//! Filesystem-backed disk implementation.
//!
//! One [`LocalDisk`] is rooted at an export path; volumes are top-level
//! directories, files live at volume-relative paths. The disk can be
//! flipped offline, after which every call reports
//! [`DiskError::DiskNotFound`] until it is flipped back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reef_types::checksum::HashAlgorithm;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::api::{DiskApi, DiskInfo, FileInfo, VolumeInfo};
use crate::error::DiskError;

/// Read buffer size for streaming hashes.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// A disk backed by a local filesystem directory.
pub struct LocalDisk {
    root: PathBuf,
    online: AtomicBool,
}

impl LocalDisk {
    /// Open a disk rooted at `root`, creating the directory if missing.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, DiskError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            online: AtomicBool::new(true),
        })
    }

    /// Flip the disk online or offline. While offline, every operation
    /// fails with [`DiskError::DiskNotFound`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether the disk currently answers calls.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), DiskError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(DiskError::DiskNotFound)
        }
    }

    fn volume_path(&self, volume: &str) -> Result<PathBuf, DiskError> {
        check_volume_name(volume)?;
        Ok(self.root.join(volume))
    }

    fn file_path(&self, volume: &str, path: &str) -> Result<PathBuf, DiskError> {
        let vol = self.volume_path(volume)?;
        check_relative_path(path)?;
        Ok(vol.join(path.trim_end_matches('/')))
    }
}

/// Reject volume names that would escape the export root.
fn check_volume_name(volume: &str) -> Result<(), DiskError> {
    if volume.is_empty() || volume == "." || volume == ".." || volume.contains('/') {
        return Err(DiskError::InvalidArgument(format!("volume: {volume:?}")));
    }
    Ok(())
}

/// Reject paths that are absolute or contain traversal components.
fn check_relative_path(path: &str) -> Result<(), DiskError> {
    if path.is_empty() || path.starts_with('/') {
        return Err(DiskError::InvalidArgument(format!("path: {path:?}")));
    }
    if path.split('/').any(|c| c == ".." || c == ".") {
        return Err(DiskError::InvalidArgument(format!("path: {path:?}")));
    }
    Ok(())
}

/// Map an I/O failure onto the disk error taxonomy.
fn map_io(err: std::io::Error, what: &str) -> DiskError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => DiskError::NotFound(what.to_string()),
        ErrorKind::AlreadyExists => DiskError::AlreadyExists(what.to_string()),
        ErrorKind::PermissionDenied => DiskError::PermissionDenied(what.to_string()),
        _ => {
            #[cfg(unix)]
            if err.raw_os_error() == Some(libc::ENOSPC) {
                return DiskError::DiskFull;
            }
            DiskError::Io(err)
        }
    }
}

fn mod_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait::async_trait]
impl DiskApi for LocalDisk {
    fn endpoint(&self) -> String {
        self.root.display().to_string()
    }

    async fn disk_info(&self) -> Result<DiskInfo, DiskError> {
        self.check_online()?;
        let path = self.root.clone();
        tokio::task::spawn_blocking(move || statvfs(&path))
            .await
            .map_err(|e| DiskError::Io(std::io::Error::other(e)))?
    }

    async fn make_volume(&self, volume: &str) -> Result<(), DiskError> {
        self.check_online()?;
        let path = self.volume_path(volume)?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| map_io(e, volume))?;
        debug!(disk = %self.endpoint(), volume, "created volume");
        Ok(())
    }

    async fn delete_volume(&self, volume: &str) -> Result<(), DiskError> {
        self.check_online()?;
        let path = self.volume_path(volume)?;
        tokio::fs::remove_dir(&path)
            .await
            .map_err(|e| map_io(e, volume))?;
        debug!(disk = %self.endpoint(), volume, "deleted volume");
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DiskError> {
        self.check_online()?;
        let mut volumes = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(DiskError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(DiskError::Io)? {
            let meta = entry.metadata().await.map_err(DiskError::Io)?;
            if !meta.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            volumes.push(VolumeInfo {
                name,
                created: mod_time(&meta),
            });
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo, DiskError> {
        self.check_online()?;
        let path = self.volume_path(volume)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(e, volume))?;
        if !meta.is_dir() {
            return Err(DiskError::NotFound(volume.to_string()));
        }
        Ok(VolumeInfo {
            name: volume.to_string(),
            created: mod_time(&meta),
        })
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> Result<Vec<String>, DiskError> {
        self.check_online()?;
        let path = if dir_path.is_empty() {
            self.volume_path(volume)?
        } else {
            self.file_path(volume, dir_path)?
        };
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| map_io(e, dir_path))?;
        while let Some(entry) = entries.next_entry().await.map_err(DiskError::Io)? {
            let meta = entry.metadata().await.map_err(DiskError::Io)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if meta.is_dir() {
                out.push(format!("{name}/"));
            } else {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError> {
        self.check_online()?;
        let file_path = self.file_path(volume, path)?;
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, path))?;
        }
        tokio::fs::write(&file_path, &data)
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(())
    }

    async fn append_file(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError> {
        self.check_online()?;
        let file_path = self.file_path(volume, path)?;
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, path))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        file.write_all(&data).await.map_err(|e| map_io(e, path))?;
        Ok(())
    }

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes, DiskError> {
        self.check_online()?;
        let file_path = self.file_path(volume, path)?;
        let data = tokio::fs::read(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(Bytes::from(data))
    }

    async fn read_at(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, DiskError> {
        self.check_online()?;
        let file_path = self.file_path(volume, path)?;
        let mut file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io(e, path))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(Bytes::from(buf))
    }

    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileInfo, DiskError> {
        self.check_online()?;
        // Volume must exist for a meaningful answer.
        self.stat_volume(volume).await?;
        let file_path = self.file_path(volume, path)?;
        let meta = tokio::fs::metadata(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        if meta.is_dir() {
            return Err(DiskError::NotFound(path.to_string()));
        }
        Ok(FileInfo {
            volume: volume.to_string(),
            name: path.to_string(),
            size: meta.len(),
            mod_time: mod_time(&meta),
        })
    }

    async fn delete_file(&self, volume: &str, path: &str) -> Result<(), DiskError> {
        self.check_online()?;
        let vol_path = self.volume_path(volume)?;
        let file_path = self.file_path(volume, path)?;
        tokio::fs::remove_file(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        // Prune parents left empty so deleted objects don't linger as
        // phantom prefixes in listings.
        let mut parent = file_path.parent().map(Path::to_path_buf);
        while let Some(dir) = parent {
            if dir == vol_path || tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            parent = dir.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<(), DiskError> {
        self.check_online()?;
        let is_dir_rename = src_path.ends_with('/') && dst_path.ends_with('/');
        let src = self.file_path(src_volume, src_path)?;
        let dst = self.file_path(dst_volume, dst_path)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, dst_path))?;
        }
        if is_dir_rename {
            // Last writer wins: replace any existing destination tree.
            match tokio::fs::remove_dir_all(&dst).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(map_io(e, dst_path)),
            }
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| map_io(e, src_path))?;
        debug!(
            disk = %self.endpoint(),
            src = %format!("{src_volume}/{src_path}"),
            dst = %format!("{dst_volume}/{dst_path}"),
            "renamed"
        );
        Ok(())
    }

    async fn hash_file(
        &self,
        volume: &str,
        path: &str,
        algorithm: HashAlgorithm,
    ) -> Result<String, DiskError> {
        self.check_online()?;
        let file_path = self.file_path(volume, path)?;
        let mut file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| map_io(e, path))?;
        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf).await.map_err(|e| map_io(e, path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    }
}

/// Get filesystem capacity information using `libc::statvfs`.
#[cfg(unix)]
fn statvfs(path: &Path) -> Result<DiskInfo, DiskError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid null-terminated C string pointing to an
    // existing directory. `stat` is zero-initialized and used only as an
    // out-parameter for the duration of the call.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(DiskError::Io(std::io::Error::last_os_error()));
        }
        let block_size = stat.f_frsize as u64;
        Ok(DiskInfo {
            total: stat.f_blocks as u64 * block_size,
            free: stat.f_bavail as u64 * block_size,
        })
    }
}

#[cfg(not(unix))]
fn statvfs(_path: &Path) -> Result<DiskInfo, DiskError> {
    Ok(DiskInfo { total: 0, free: 0 })
}
