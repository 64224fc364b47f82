use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    sync::Arc,
};
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Lazy, Mutex, RwLock};

mod fd;
mod root;
pub mod types;

pub use types::*;

use fd::FdTable;
use root::RootFs;

pub type VfsIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MountPrefix {
    Default,
    Path(String),
    Ignored,
}

impl MountPrefix {
    fn base_path(&self) -> &str {
        match self {
            MountPrefix::Path(prefix) => prefix,
            MountPrefix::Default | MountPrefix::Ignored => "",
        }
    }
}

pub(crate) struct VfsEntry {
    pub(crate) fs: Arc<dyn Filesystem>,
    pub(crate) prefix: MountPrefix,
    pub(crate) index: usize,
}

pub(crate) type MountTable = RwLock<[Option<Arc<VfsEntry>>; VFS_MAX_COUNT]>;

pub trait VfsEvents: Send + Sync {
    fn mount_registered(&self, _base_path: &str) {}
    fn mount_deregistered(&self, _base_path: &str) {}
}

/// Directory handle. Carries the slot of the mount that produced it so every
/// later call can re-validate the mount before touching the stream.
pub struct Dir {
    vfs_index: usize,
    stream: Box<dyn DirStream>,
}

pub struct Vfs {
    mounts: Arc<MountTable>,
    fds: FdTable,
    events: Mutex<Option<Arc<dyn VfsEvents>>>,
    initialised: AtomicBool,
}

impl Vfs {
    pub fn new() -> Self {
        const EMPTY: Option<Arc<VfsEntry>> = None;
        Self {
            mounts: Arc::new(RwLock::new([EMPTY; VFS_MAX_COUNT])),
            fds: FdTable::new(),
            events: Mutex::new(None),
            initialised: AtomicBool::new(false),
        }
    }

    /// One-shot setup: installs the synthetic root mount (empty prefix) and
    /// returns its slot. A second call reports `Busy`.
    pub fn init(&self) -> VfsResult<VfsIndex> {
        if self.initialised.swap(true, Ordering::AcqRel) {
            return Err(VfsError::Busy);
        }
        let root = RootFs::new(Arc::downgrade(&self.mounts));
        self.register_common(MountPrefix::Default, Arc::new(root))
    }

    pub fn set_events(&self, events: Option<Arc<dyn VfsEvents>>) {
        *self.events.lock() = events;
    }

    pub fn register(&self, base_path: &str, fs: Arc<dyn Filesystem>) -> VfsResult<VfsIndex> {
        let prefix = parse_prefix(base_path)?;
        let index = self.register_common(prefix, fs)?;
        log::info!("mounted vfs {index} at '{base_path}'");
        self.fire_registered(base_path);
        Ok(index)
    }

    /// Binds a driver to a span of permanent descriptors instead of a path.
    /// The entry never matches path lookups. A failed reservation releases
    /// the slot again.
    pub fn register_fd_range(
        &self,
        fs: Arc<dyn Filesystem>,
        min_fd: usize,
        max_fd: usize,
    ) -> VfsResult<VfsIndex> {
        if min_fd > max_fd || max_fd >= MAX_FDS {
            return Err(VfsError::InvalidArgument);
        }
        let index = self.register_common(MountPrefix::Ignored, fs)?;
        if let Err(err) = self.fds.reserve_range(index, min_fd, max_fd) {
            self.mounts.write()[index] = None;
            return Err(err);
        }
        Ok(index)
    }

    pub fn register_fd_range_for_index(
        &self,
        index: VfsIndex,
        min_fd: usize,
        max_fd: usize,
    ) -> VfsResult<()> {
        if index >= VFS_MAX_COUNT {
            return Err(VfsError::InvalidArgument);
        }
        self.fds.reserve_range(index, min_fd, max_fd)
    }

    pub fn unregister(&self, index: VfsIndex) -> VfsResult<()> {
        let entry = {
            let mut slots = self.mounts.write();
            slots
                .get_mut(index)
                .ok_or(VfsError::InvalidArgument)?
                .take()
                .ok_or(VfsError::InvalidArgument)?
        };
        let base_path = entry.prefix.base_path().to_string();
        log::info!("unmounted vfs {index} ('{base_path}')");
        self.fire_deregistered(&base_path);
        Ok(())
    }

    pub fn driver_for_index(&self, index: VfsIndex) -> Option<Arc<dyn Filesystem>> {
        self.mounts
            .read()
            .get(index)?
            .as_ref()
            .map(|entry| Arc::clone(&entry.fs))
    }

    fn register_common(
        &self,
        prefix: MountPrefix,
        fs: Arc<dyn Filesystem>,
    ) -> VfsResult<VfsIndex> {
        let mut slots = self.mounts.write();
        let index = slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(VfsError::OutOfMemory)?;
        slots[index] = Some(Arc::new(VfsEntry { fs, prefix, index }));
        Ok(index)
    }

    fn entry_for_index(&self, index: usize) -> Option<Arc<VfsEntry>> {
        self.mounts.read().get(index)?.clone()
    }

    fn entry_for_path(&self, path: &str) -> Option<Arc<VfsEntry>> {
        let slots = self.mounts.read();
        let mut best: Option<&Arc<VfsEntry>> = None;
        let mut best_len: Option<usize> = None;
        for slot in slots.iter() {
            let Some(entry) = slot.as_ref() else {
                continue;
            };
            match &entry.prefix {
                MountPrefix::Ignored => continue,
                // The default mount matches anything but loses to any
                // prefixed match.
                MountPrefix::Default => {
                    if best.is_none() {
                        best = Some(entry);
                    }
                }
                MountPrefix::Path(prefix) => {
                    if !path.starts_with(prefix.as_str()) {
                        continue;
                    }
                    if path.len() > prefix.len() && path.as_bytes()[prefix.len()] != b'/' {
                        continue;
                    }
                    if best_len.is_none_or(|len| prefix.len() > len) {
                        best_len = Some(prefix.len());
                        best = Some(entry);
                    }
                }
            }
        }
        best.cloned()
    }

    fn with_fd<R>(
        &self,
        fd: usize,
        op: impl FnOnce(&dyn Filesystem, LocalFd) -> VfsResult<R>,
    ) -> VfsResult<R> {
        let (index, local_fd) = self.fds.get(fd)?;
        let entry = self
            .entry_for_index(index)
            .ok_or(VfsError::BadDescriptor)?;
        op(entry.fs.as_ref(), local_fd)
    }

    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> VfsResult<usize> {
        let entry = self.entry_for_path(path).ok_or(VfsError::NotFound)?;
        let local_fd = entry.fs.open(translate_path(&entry, path), flags, mode)?;
        match self.fds.alloc(entry.index, local_fd) {
            Ok(fd) => Ok(fd),
            Err(err) => {
                let _ = entry.fs.close(local_fd);
                Err(err)
            }
        }
    }

    pub fn close(&self, fd: usize) -> VfsResult<()> {
        let (index, local_fd) = self.fds.get(fd)?;
        let entry = self
            .entry_for_index(index)
            .ok_or(VfsError::BadDescriptor)?;
        entry.fs.close(local_fd)?;
        self.fds.release(fd);
        Ok(())
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> VfsResult<usize> {
        self.with_fd(fd, |fs, local_fd| fs.read(local_fd, buf))
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> VfsResult<usize> {
        self.with_fd(fd, |fs, local_fd| fs.write(local_fd, buf))
    }

    pub fn pread(&self, fd: usize, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.with_fd(fd, |fs, local_fd| fs.pread(local_fd, buf, offset))
    }

    pub fn pwrite(&self, fd: usize, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.with_fd(fd, |fs, local_fd| fs.pwrite(local_fd, buf, offset))
    }

    pub fn lseek(&self, fd: usize, pos: SeekFrom) -> VfsResult<u64> {
        self.with_fd(fd, |fs, local_fd| fs.lseek(local_fd, pos))
    }

    pub fn fcntl(&self, fd: usize, cmd: i32, arg: i32) -> VfsResult<i32> {
        self.with_fd(fd, |fs, local_fd| fs.fcntl(local_fd, cmd, arg))
    }

    pub fn fstat(&self, fd: usize) -> VfsResult<Metadata> {
        self.with_fd(fd, |fs, local_fd| fs.fstat(local_fd))
    }

    pub fn stat(&self, path: &str) -> VfsResult<Metadata> {
        let entry = self.entry_for_path(path).ok_or(VfsError::NotFound)?;
        entry.fs.stat(translate_path(&entry, path))
    }

    pub fn fsync(&self, fd: usize) -> VfsResult<()> {
        self.with_fd(fd, |fs, local_fd| fs.fsync(local_fd))
    }

    pub fn ioctl(&self, fd: usize, cmd: i32, arg: usize) -> VfsResult<i32> {
        self.with_fd(fd, |fs, local_fd| fs.ioctl(local_fd, cmd, arg))
    }

    pub fn opendir(&self, path: &str) -> VfsResult<Dir> {
        let entry = self.entry_for_path(path).ok_or(VfsError::NotFound)?;
        let stream = entry.fs.opendir(translate_path(&entry, path))?;
        Ok(Dir {
            vfs_index: entry.index,
            stream,
        })
    }

    pub fn readdir(&self, dir: &mut Dir) -> VfsResult<Option<DirEntry>> {
        self.entry_for_index(dir.vfs_index)
            .ok_or(VfsError::BadDescriptor)?;
        dir.stream.read_entry()
    }

    pub fn closedir(&self, dir: Dir) -> VfsResult<()> {
        self.entry_for_index(dir.vfs_index)
            .ok_or(VfsError::BadDescriptor)?;
        drop(dir);
        Ok(())
    }

    pub fn telldir(&self, dir: &Dir) -> VfsResult<i64> {
        self.entry_for_index(dir.vfs_index)
            .ok_or(VfsError::BadDescriptor)?;
        Ok(dir.stream.tell())
    }

    pub fn seekdir(&self, dir: &mut Dir, loc: i64) {
        if self.entry_for_index(dir.vfs_index).is_some() {
            dir.stream.seek(loc);
        }
    }

    fn fire_registered(&self, base_path: &str) {
        let hook = self.events.lock().clone();
        if let Some(hook) = hook {
            hook.mount_registered(base_path);
        }
    }

    fn fire_deregistered(&self, base_path: &str) {
        let hook = self.events.lock().clone();
        if let Some(hook) = hook {
            hook.mount_deregistered(base_path);
        }
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_prefix(base_path: &str) -> VfsResult<MountPrefix> {
    if base_path.is_empty() {
        return Ok(MountPrefix::Default);
    }
    let len = base_path.len();
    if len < 2 || len > BASE_PATH_MAX {
        return Err(VfsError::InvalidPath);
    }
    if !base_path.starts_with('/') || base_path.ends_with('/') {
        return Err(VfsError::InvalidPath);
    }
    Ok(MountPrefix::Path(base_path.to_string()))
}

fn translate_path<'a>(entry: &VfsEntry, path: &'a str) -> &'a str {
    match &entry.prefix {
        MountPrefix::Path(prefix) if path.len() == prefix.len() => "/",
        MountPrefix::Path(prefix) => &path[prefix.len()..],
        MountPrefix::Default | MountPrefix::Ignored => path,
    }
}

pub fn join_path(base: &str, name: &str) -> String {
    let base = if base == "/" { "" } else { base };
    format!("{base}/{name}")
}

static VFS: Lazy<Vfs> = Lazy::new(Vfs::new);

pub fn init() -> VfsResult<VfsIndex> {
    VFS.init()
}

pub fn set_events(events: Option<Arc<dyn VfsEvents>>) {
    VFS.set_events(events)
}

pub fn register(base_path: &str, fs: Arc<dyn Filesystem>) -> VfsResult<VfsIndex> {
    VFS.register(base_path, fs)
}

pub fn register_fd_range(
    fs: Arc<dyn Filesystem>,
    min_fd: usize,
    max_fd: usize,
) -> VfsResult<VfsIndex> {
    VFS.register_fd_range(fs, min_fd, max_fd)
}

pub fn register_fd_range_for_index(
    index: VfsIndex,
    min_fd: usize,
    max_fd: usize,
) -> VfsResult<()> {
    VFS.register_fd_range_for_index(index, min_fd, max_fd)
}

pub fn unregister(index: VfsIndex) -> VfsResult<()> {
    VFS.unregister(index)
}

pub fn driver_for_index(index: VfsIndex) -> Option<Arc<dyn Filesystem>> {
    VFS.driver_for_index(index)
}

pub fn open(path: &str, flags: OpenFlags, mode: u32) -> VfsResult<usize> {
    VFS.open(path, flags, mode)
}

pub fn close(fd: usize) -> VfsResult<()> {
    VFS.close(fd)
}

pub fn read(fd: usize, buf: &mut [u8]) -> VfsResult<usize> {
    VFS.read(fd, buf)
}

pub fn write(fd: usize, buf: &[u8]) -> VfsResult<usize> {
    VFS.write(fd, buf)
}

pub fn pread(fd: usize, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
    VFS.pread(fd, buf, offset)
}

pub fn pwrite(fd: usize, buf: &[u8], offset: u64) -> VfsResult<usize> {
    VFS.pwrite(fd, buf, offset)
}

pub fn lseek(fd: usize, pos: SeekFrom) -> VfsResult<u64> {
    VFS.lseek(fd, pos)
}

pub fn fcntl(fd: usize, cmd: i32, arg: i32) -> VfsResult<i32> {
    VFS.fcntl(fd, cmd, arg)
}

pub fn fstat(fd: usize) -> VfsResult<Metadata> {
    VFS.fstat(fd)
}

pub fn stat(path: &str) -> VfsResult<Metadata> {
    VFS.stat(path)
}

pub fn fsync(fd: usize) -> VfsResult<()> {
    VFS.fsync(fd)
}

pub fn ioctl(fd: usize, cmd: i32, arg: usize) -> VfsResult<i32> {
    VFS.ioctl(fd, cmd, arg)
}

pub fn opendir(path: &str) -> VfsResult<Dir> {
    VFS.opendir(path)
}

pub fn readdir(dir: &mut Dir) -> VfsResult<Option<DirEntry>> {
    VFS.readdir(dir)
}

pub fn closedir(dir: Dir) -> VfsResult<()> {
    VFS.closedir(dir)
}

pub fn telldir(dir: &Dir) -> VfsResult<i64> {
    VFS.telldir(dir)
}

pub fn seekdir(dir: &mut Dir, loc: i64) {
    VFS.seekdir(dir, loc)
}
