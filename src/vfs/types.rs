use alloc::{boxed::Box, string::String};

pub const MAX_FDS: usize = 16;
pub const VFS_MAX_COUNT: usize = 4;
pub const BASE_PATH_MAX: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    NotSupported,
    BadDescriptor,
    InvalidPath,
    InvalidArgument,
    OutOfMemory,
    TooManyOpenFiles,
    Busy,
    IoError,
}

impl VfsError {
    pub fn to_errno(self) -> i32 {
        match self {
            VfsError::NotFound => -2,          // ENOENT
            VfsError::IoError => -5,           // EIO
            VfsError::BadDescriptor => -9,     // EBADF
            VfsError::OutOfMemory => -12,      // ENOMEM
            VfsError::Busy => -16,             // EBUSY
            VfsError::InvalidPath => -22,      // EINVAL
            VfsError::InvalidArgument => -22,  // EINVAL
            VfsError::TooManyOpenFiles => -23, // ENFILE
            VfsError::NotSupported => -38,     // ENOSYS
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Driver-scoped descriptor; the multiplexer never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalFd(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
    };

    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
    };

    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };
}

/// Back-end operation table. Every method defaults to `NotSupported`, so a
/// driver only implements the calls it can actually serve.
pub trait Filesystem: Send + Sync {
    fn open(&self, _path: &str, _flags: OpenFlags, _mode: u32) -> VfsResult<LocalFd> {
        Err(VfsError::NotSupported)
    }

    fn close(&self, _fd: LocalFd) -> VfsResult<()> {
        Err(VfsError::NotSupported)
    }

    fn read(&self, _fd: LocalFd, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::NotSupported)
    }

    fn write(&self, _fd: LocalFd, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::NotSupported)
    }

    fn pread(&self, _fd: LocalFd, _buf: &mut [u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::NotSupported)
    }

    fn pwrite(&self, _fd: LocalFd, _buf: &[u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::NotSupported)
    }

    fn lseek(&self, _fd: LocalFd, _pos: SeekFrom) -> VfsResult<u64> {
        Err(VfsError::NotSupported)
    }

    fn fcntl(&self, _fd: LocalFd, _cmd: i32, _arg: i32) -> VfsResult<i32> {
        Err(VfsError::NotSupported)
    }

    fn fstat(&self, _fd: LocalFd) -> VfsResult<Metadata> {
        Err(VfsError::NotSupported)
    }

    fn stat(&self, _path: &str) -> VfsResult<Metadata> {
        Err(VfsError::NotSupported)
    }

    fn fsync(&self, _fd: LocalFd) -> VfsResult<()> {
        Err(VfsError::NotSupported)
    }

    fn ioctl(&self, _fd: LocalFd, _cmd: i32, _arg: usize) -> VfsResult<i32> {
        Err(VfsError::NotSupported)
    }

    fn opendir(&self, _path: &str) -> VfsResult<Box<dyn DirStream>> {
        Err(VfsError::NotSupported)
    }
}

pub trait DirStream: Send {
    fn read_entry(&mut self) -> VfsResult<Option<DirEntry>>;
    fn tell(&self) -> i64;
    fn seek(&mut self, loc: i64);
}
