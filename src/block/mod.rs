pub mod partition;

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};
use spin::Mutex;

pub use partition::PartitionDriver;

pub const SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    NotSupported,
    AlreadyAttached,
    InvalidSector,
    ReadOnly,
    IoError,
}

pub type BlockResult<T> = Result<T, BlockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCtl {
    GetSize,
    GetSectorSize,
    GetReadOnly,
    Flush,
    GetGeometry,
}

impl BlockCtl {
    pub const fn code(self) -> u8 {
        match self {
            BlockCtl::GetSize => 0,
            BlockCtl::GetSectorSize => 1,
            BlockCtl::GetReadOnly => 2,
            BlockCtl::Flush => 3,
            BlockCtl::GetGeometry => 4,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BlockCtl::GetSize),
            1 => Some(BlockCtl::GetSectorSize),
            2 => Some(BlockCtl::GetReadOnly),
            3 => Some(BlockCtl::Flush),
            4 => Some(BlockCtl::GetGeometry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChsGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlReply {
    Size(u32),
    SectorSize(u32),
    ReadOnly(bool),
    Geometry(ChsGeometry),
    Done,
}

/// Driver operation table. Missing operations report `NotSupported`;
/// `destroy` fires exactly once, when the last reference to the owning
/// device is released.
pub trait BlockDriver: Send + Sync {
    fn init(&self) -> BlockResult<()> {
        Ok(())
    }

    fn read_sector(&self, _buf: &mut [u8], _start_sector: u32, _count: usize) -> BlockResult<usize> {
        Err(BlockError::NotSupported)
    }

    fn write_sector(&self, _buf: &[u8], _start_sector: u32, _count: usize) -> BlockResult<usize> {
        Err(BlockError::NotSupported)
    }

    fn ioctl(&self, _cmd: BlockCtl) -> BlockResult<CtlReply> {
        Err(BlockError::NotSupported)
    }

    fn destroy(&self) {}
}

pub trait DeviceEvents: Send + Sync {
    fn device_registered(&self, _dev: &Arc<BlockDev>) {}
    fn device_unregistered(&self, _dev: &Arc<BlockDev>) {}
}

static DEVICE_EVENTS: Mutex<Option<Arc<dyn DeviceEvents>>> = Mutex::new(None);

pub fn set_device_events(events: Option<Arc<dyn DeviceEvents>>) {
    *DEVICE_EVENTS.lock() = events;
}

fn fire_registered(dev: &Arc<BlockDev>) {
    let hook = DEVICE_EVENTS.lock().clone();
    if let Some(hook) = hook {
        hook.device_registered(dev);
    }
}

fn fire_unregistered(dev: &Arc<BlockDev>) {
    let hook = DEVICE_EVENTS.lock().clone();
    if let Some(hook) = hook {
        hook.device_unregistered(dev);
    }
}

/// A node in the device tree. Children are owning links inserted at the
/// head of the list; the parent link is weak (partitions keep their parent
/// alive through a strong reference of their own, released on destroy).
pub struct BlockDev {
    driver: Box<dyn BlockDriver>,
    parent: Mutex<Option<Weak<BlockDev>>>,
    children: Mutex<Vec<Arc<BlockDev>>>,
}

impl BlockDev {
    pub fn new(driver: Box<dyn BlockDriver>) -> BlockResult<Arc<Self>> {
        driver.init()?;
        Ok(Arc::new(Self {
            driver,
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }))
    }

    pub fn read_sector(&self, buf: &mut [u8], start_sector: u32, count: usize) -> BlockResult<usize> {
        self.driver.read_sector(buf, start_sector, count)
    }

    pub fn write_sector(&self, buf: &[u8], start_sector: u32, count: usize) -> BlockResult<usize> {
        self.driver.write_sector(buf, start_sector, count)
    }

    pub fn ioctl(&self, cmd: BlockCtl) -> BlockResult<CtlReply> {
        self.driver.ioctl(cmd)
    }

    pub fn parent(&self) -> Option<Arc<BlockDev>> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    fn has_parent(&self) -> bool {
        self.parent.lock().is_some()
    }

    pub fn has_children(&self) -> bool {
        !self.children.lock().is_empty()
    }

    pub fn add_child(self: &Arc<Self>, child: &Arc<BlockDev>) -> BlockResult<()> {
        let mut parent_slot = child.parent.lock();
        if parent_slot.is_some() {
            return Err(BlockError::AlreadyAttached);
        }
        let mut children = self.children.lock();
        children.insert(0, Arc::clone(child));
        *parent_slot = Some(Arc::downgrade(self));
        Ok(())
    }
}

impl Drop for BlockDev {
    fn drop(&mut self) {
        self.driver.destroy();
    }
}

/// Registers a device, consuming the caller's reference: the tree (and any
/// event hook that clones the handle) owns whatever keeps the device alive
/// afterwards. Parentless devices are scanned for partitions first.
pub fn register(dev: Arc<BlockDev>) {
    if !dev.has_parent() {
        partition::scan(&dev);
    }
    fire_registered(&dev);
}

/// Tears a device tree down: every child is detached and unregistered
/// (deepest first) before the device's own deregister event fires.
pub fn unregister(dev: &Arc<BlockDev>) {
    loop {
        let child = {
            let mut children = dev.children.lock();
            if children.is_empty() {
                None
            } else {
                Some(children.remove(0))
            }
        };
        match child {
            Some(child) => unregister(&child),
            None => break,
        }
    }
    fire_unregistered(dev);
}
