use alloc::{boxed::Box, string::ToString, sync::Weak};

use super::types::{
    DirEntry, DirStream, FileType, Metadata, VFS_MAX_COUNT, VfsError, VfsResult,
};
use super::{Filesystem, MountPrefix, MountTable};

/// Synthetic driver behind the default mount: the only thing it serves is
/// the root directory itself, listing every named mount point.
pub(crate) struct RootFs {
    mounts: Weak<MountTable>,
}

impl RootFs {
    pub(crate) fn new(mounts: Weak<MountTable>) -> Self {
        Self { mounts }
    }
}

impl Filesystem for RootFs {
    fn stat(&self, path: &str) -> VfsResult<Metadata> {
        if path == "/" {
            Ok(Metadata {
                file_type: FileType::Directory,
                size: 0,
            })
        } else {
            Err(VfsError::NotFound)
        }
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirStream>> {
        if path != "/" {
            return Err(VfsError::NotFound);
        }
        Ok(Box::new(RootDir {
            mounts: self.mounts.clone(),
            d_off: 0,
        }))
    }
}

struct RootDir {
    mounts: Weak<MountTable>,
    d_off: usize,
}

impl DirStream for RootDir {
    fn read_entry(&mut self) -> VfsResult<Option<DirEntry>> {
        let mounts = self.mounts.upgrade().ok_or(VfsError::BadDescriptor)?;
        let slots = mounts.read();
        while self.d_off < VFS_MAX_COUNT {
            let slot = self.d_off;
            self.d_off += 1;
            if let Some(entry) = slots[slot].as_ref() {
                if let MountPrefix::Path(prefix) = &entry.prefix {
                    return Ok(Some(DirEntry {
                        name: prefix.trim_start_matches('/').to_string(),
                        file_type: FileType::Directory,
                    }));
                }
            }
        }
        Ok(None)
    }

    fn tell(&self) -> i64 {
        self.d_off as i64
    }

    fn seek(&mut self, loc: i64) {
        if loc >= 0 && loc <= VFS_MAX_COUNT as i64 {
            self.d_off = loc as usize;
        }
    }
}
