//! In-memory disk implementation.
//!
//! Volatile [`DiskApi`] backend used by tests and single-process
//! experiments. Directories are implicit: they exist exactly while a
//! file lives under them, which also mirrors the filesystem backend's
//! pruning of emptied parents.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reef_types::checksum::HashAlgorithm;

use crate::api::{DiskApi, DiskInfo, FileInfo, VolumeInfo};
use crate::error::DiskError;

struct MemFile {
    data: Vec<u8>,
    mod_time: DateTime<Utc>,
}

struct MemInner {
    volumes: HashMap<String, DateTime<Utc>>,
    /// Keyed by (volume, path); ordered so directory listings fall out
    /// of a range scan.
    files: BTreeMap<(String, String), MemFile>,
    used_bytes: u64,
}

/// A volatile in-memory disk with a fixed advertised capacity.
pub struct MemDisk {
    name: String,
    capacity: u64,
    online: AtomicBool,
    inner: Mutex<MemInner>,
}

impl MemDisk {
    /// Create a disk advertising `capacity` bytes.
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            online: AtomicBool::new(true),
            inner: Mutex::new(MemInner {
                volumes: HashMap::new(),
                files: BTreeMap::new(),
                used_bytes: 0,
            }),
        }
    }

    /// Flip the disk online or offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), DiskError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DiskError::DiskNotFound)
        }
    }
}

fn check_volume_name(volume: &str) -> Result<(), DiskError> {
    if volume.is_empty() || volume == "." || volume == ".." || volume.contains('/') {
        return Err(DiskError::InvalidArgument(format!("volume: {volume:?}")));
    }
    Ok(())
}

fn check_relative_path(path: &str) -> Result<(), DiskError> {
    if path.is_empty() || path.starts_with('/') {
        return Err(DiskError::InvalidArgument(format!("path: {path:?}")));
    }
    if path.split('/').any(|c| c == ".." || c == ".") {
        return Err(DiskError::InvalidArgument(format!("path: {path:?}")));
    }
    Ok(())
}

fn norm_file_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

impl MemInner {
    fn require_volume(&self, volume: &str) -> Result<(), DiskError> {
        if self.volumes.contains_key(volume) {
            Ok(())
        } else {
            Err(DiskError::NotFound(volume.to_string()))
        }
    }

    /// Immediate children of a directory, dirs suffixed with `/`.
    /// `NotFound` when the directory has no presence at all.
    fn list_dir(&self, volume: &str, dir_path: &str) -> Result<Vec<String>, DiskError> {
        self.require_volume(volume)?;
        let prefix = if dir_path.is_empty() {
            String::new()
        } else {
            format!("{}/", norm_file_path(dir_path))
        };

        let mut out: Vec<String> = Vec::new();
        let mut seen = false;
        for (vol, path) in self.files.keys() {
            if vol != volume || !path.starts_with(&prefix) {
                continue;
            }
            seen = true;
            let rest = &path[prefix.len()..];
            let child = match rest.find('/') {
                Some(idx) => format!("{}/", &rest[..idx]),
                None => rest.to_string(),
            };
            if out.last() != Some(&child) {
                out.push(child);
            }
        }
        if !seen && !prefix.is_empty() {
            return Err(DiskError::NotFound(dir_path.to_string()));
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

#[async_trait::async_trait]
impl DiskApi for MemDisk {
    fn endpoint(&self) -> String {
        self.name.clone()
    }

    async fn disk_info(&self) -> Result<DiskInfo, DiskError> {
        self.check_online()?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        Ok(DiskInfo {
            total: self.capacity,
            free: self.capacity.saturating_sub(inner.used_bytes),
        })
    }

    async fn make_volume(&self, volume: &str) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        if inner.volumes.contains_key(volume) {
            return Err(DiskError::AlreadyExists(volume.to_string()));
        }
        inner.volumes.insert(volume.to_string(), Utc::now());
        Ok(())
    }

    async fn delete_volume(&self, volume: &str) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        if inner.files.keys().any(|(vol, _)| vol == volume) {
            return Err(DiskError::Io(std::io::Error::other("volume not empty")));
        }
        inner.volumes.remove(volume);
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DiskError> {
        self.check_online()?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        let mut volumes: Vec<VolumeInfo> = inner
            .volumes
            .iter()
            .map(|(name, created)| VolumeInfo {
                name: name.clone(),
                created: *created,
            })
            .collect();
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo, DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        match inner.volumes.get(volume) {
            Some(created) => Ok(VolumeInfo {
                name: volume.to_string(),
                created: *created,
            }),
            None => Err(DiskError::NotFound(volume.to_string())),
        }
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> Result<Vec<String>, DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        if !dir_path.is_empty() {
            check_relative_path(dir_path)?;
        }
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.list_dir(volume, dir_path)
    }

    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        if let Some(old) = inner.files.remove(&key) {
            inner.used_bytes -= old.data.len() as u64;
        }
        inner.used_bytes += data.len() as u64;
        inner.files.insert(
            key,
            MemFile {
                data: data.to_vec(),
                mod_time: Utc::now(),
            },
        );
        Ok(())
    }

    async fn append_file(&self, volume: &str, path: &str, data: Bytes) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        inner.used_bytes += data.len() as u64;
        match inner.files.get_mut(&key) {
            Some(file) => {
                file.data.extend_from_slice(&data);
                file.mod_time = Utc::now();
            }
            None => {
                inner.files.insert(
                    key,
                    MemFile {
                        data: data.to_vec(),
                        mod_time: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes, DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        match inner.files.get(&key) {
            Some(file) => Ok(Bytes::from(file.data.clone())),
            None => Err(DiskError::NotFound(path.to_string())),
        }
    }

    async fn read_at(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        let file = inner
            .files
            .get(&key)
            .ok_or_else(|| DiskError::NotFound(path.to_string()))?;
        let start = offset as usize;
        let end = start + length as usize;
        if end > file.data.len() {
            return Err(DiskError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of file",
            )));
        }
        Ok(Bytes::from(file.data[start..end].to_vec()))
    }

    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileInfo, DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        match inner.files.get(&key) {
            Some(file) => Ok(FileInfo {
                volume: volume.to_string(),
                name: path.to_string(),
                size: file.data.len() as u64,
                mod_time: file.mod_time,
            }),
            None => Err(DiskError::NotFound(path.to_string())),
        }
    }

    async fn delete_file(&self, volume: &str, path: &str) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(volume)?;
        check_relative_path(path)?;
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(volume)?;
        let key = (volume.to_string(), norm_file_path(path).to_string());
        match inner.files.remove(&key) {
            Some(old) => {
                inner.used_bytes -= old.data.len() as u64;
                Ok(())
            }
            None => Err(DiskError::NotFound(path.to_string())),
        }
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<(), DiskError> {
        self.check_online()?;
        check_volume_name(src_volume)?;
        check_volume_name(dst_volume)?;
        check_relative_path(src_path)?;
        check_relative_path(dst_path)?;
        let is_dir_rename = src_path.ends_with('/') && dst_path.ends_with('/');
        let mut inner = self.inner.lock().expect("mem disk lock poisoned");
        inner.require_volume(src_volume)?;
        inner.require_volume(dst_volume)?;

        if is_dir_rename {
            let src_prefix = format!("{}/", norm_file_path(src_path));
            let dst_prefix = format!("{}/", norm_file_path(dst_path));
            // Last writer wins: drop any existing destination subtree.
            let stale: Vec<_> = inner
                .files
                .keys()
                .filter(|(vol, path)| vol == dst_volume && path.starts_with(&dst_prefix))
                .cloned()
                .collect();
            for key in stale {
                if let Some(old) = inner.files.remove(&key) {
                    inner.used_bytes -= old.data.len() as u64;
                }
            }
            let moved: Vec<_> = inner
                .files
                .keys()
                .filter(|(vol, path)| vol == src_volume && path.starts_with(&src_prefix))
                .cloned()
                .collect();
            if moved.is_empty() {
                return Err(DiskError::NotFound(src_path.to_string()));
            }
            for key in moved {
                if let Some(file) = inner.files.remove(&key) {
                    let new_path = format!("{}{}", dst_prefix, &key.1[src_prefix.len()..]);
                    inner.files.insert((dst_volume.to_string(), new_path), file);
                }
            }
        } else {
            let src_key = (src_volume.to_string(), norm_file_path(src_path).to_string());
            let file = inner
                .files
                .remove(&src_key)
                .ok_or_else(|| DiskError::NotFound(src_path.to_string()))?;
            if let Some(old) = inner.files.insert(
                (dst_volume.to_string(), norm_file_path(dst_path).to_string()),
                file,
            ) {
                inner.used_bytes -= old.data.len() as u64;
            }
        }
        Ok(())
    }

    async fn hash_file(
        &self,
        volume: &str,
        path: &str,
        algorithm: HashAlgorithm,
    ) -> Result<String, DiskError> {
        let data = self.read_all(volume, path).await?;
        Ok(algorithm.digest_hex(&data))
    }
}
