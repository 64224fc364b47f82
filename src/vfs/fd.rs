use spin::Mutex;

use super::types::{LocalFd, MAX_FDS, VfsError, VfsResult};

#[derive(Debug, Clone, Copy)]
pub(crate) struct FdEntry {
    vfs_index: i8,
    local_fd: LocalFd,
    permanent: bool,
}

impl FdEntry {
    const UNUSED: FdEntry = FdEntry {
        vfs_index: -1,
        local_fd: LocalFd(-1),
        permanent: false,
    };

    fn is_unused(&self) -> bool {
        self.vfs_index < 0
    }
}

/// Process-wide table mapping global fds to `(mount slot, driver fd)`.
/// Entries reserved through `reserve_range` are permanent: `close` invokes
/// the driver but leaves the binding in place.
pub(crate) struct FdTable {
    entries: Mutex<[FdEntry; MAX_FDS]>,
}

impl FdTable {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new([FdEntry::UNUSED; MAX_FDS]),
        }
    }

    pub(crate) fn alloc(&self, vfs_index: usize, local_fd: LocalFd) -> VfsResult<usize> {
        let mut entries = self.entries.lock();
        for (fd, entry) in entries.iter_mut().enumerate() {
            if entry.is_unused() {
                *entry = FdEntry {
                    vfs_index: vfs_index as i8,
                    local_fd,
                    permanent: false,
                };
                return Ok(fd);
            }
        }
        Err(VfsError::TooManyOpenFiles)
    }

    pub(crate) fn get(&self, fd: usize) -> VfsResult<(usize, LocalFd)> {
        let entries = self.entries.lock();
        let entry = entries.get(fd).ok_or(VfsError::BadDescriptor)?;
        if entry.is_unused() {
            return Err(VfsError::BadDescriptor);
        }
        Ok((entry.vfs_index as usize, entry.local_fd))
    }

    pub(crate) fn release(&self, fd: usize) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(fd) {
            if !entry.permanent {
                *entry = FdEntry::UNUSED;
            }
        }
    }

    pub(crate) fn reserve_range(
        &self,
        vfs_index: usize,
        min_fd: usize,
        max_fd: usize,
    ) -> VfsResult<()> {
        if min_fd > max_fd || max_fd >= MAX_FDS {
            return Err(VfsError::InvalidArgument);
        }
        let mut entries = self.entries.lock();
        for fd in min_fd..=max_fd {
            if !entries[fd].is_unused() {
                for taken in min_fd..fd {
                    if entries[taken].vfs_index == vfs_index as i8 {
                        entries[taken] = FdEntry::UNUSED;
                    }
                }
                return Err(VfsError::InvalidArgument);
            }
            entries[fd] = FdEntry {
                vfs_index: vfs_index as i8,
                local_fd: LocalFd(fd as i32),
                permanent: true,
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_first_fit_and_unique() {
        let table = FdTable::new();
        let a = table.alloc(0, LocalFd(10)).unwrap();
        let b = table.alloc(1, LocalFd(11)).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(table.get(a).unwrap(), (0, LocalFd(10)));
        assert_eq!(table.get(b).unwrap(), (1, LocalFd(11)));
    }

    #[test]
    fn released_slot_is_reused() {
        let table = FdTable::new();
        let a = table.alloc(0, LocalFd(1)).unwrap();
        let _b = table.alloc(0, LocalFd(2)).unwrap();
        table.release(a);
        assert_eq!(table.get(a), Err(VfsError::BadDescriptor));
        let c = table.alloc(0, LocalFd(3)).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn full_table_reports_too_many_open_files() {
        let table = FdTable::new();
        for _ in 0..MAX_FDS {
            table.alloc(0, LocalFd(0)).unwrap();
        }
        assert_eq!(
            table.alloc(0, LocalFd(0)),
            Err(VfsError::TooManyOpenFiles)
        );
    }

    #[test]
    fn permanent_entries_survive_release() {
        let table = FdTable::new();
        table.reserve_range(2, 0, 1).unwrap();
        table.release(0);
        assert_eq!(table.get(0).unwrap(), (2, LocalFd(0)));
        let fd = table.alloc(0, LocalFd(7)).unwrap();
        assert_eq!(fd, 2);
    }

    #[test]
    fn reserve_range_rejects_bound_slot_and_rolls_back() {
        let table = FdTable::new();
        table.reserve_range(3, 2, 2).unwrap();
        assert_eq!(
            table.reserve_range(2, 0, 3),
            Err(VfsError::InvalidArgument)
        );
        // fds 0 and 1 were bound earlier in the failed call and must be free again
        assert_eq!(table.get(0), Err(VfsError::BadDescriptor));
        assert_eq!(table.get(1), Err(VfsError::BadDescriptor));
        assert_eq!(table.get(2).unwrap(), (3, LocalFd(2)));
    }

    #[test]
    fn reserve_range_validates_bounds() {
        let table = FdTable::new();
        assert_eq!(
            table.reserve_range(0, 2, 1),
            Err(VfsError::InvalidArgument)
        );
        assert_eq!(
            table.reserve_range(0, 0, MAX_FDS),
            Err(VfsError::InvalidArgument)
        );
    }
}
