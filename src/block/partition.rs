use alloc::{boxed::Box, sync::Arc};

use super::{
    BlockCtl, BlockDev, BlockDriver, BlockResult, CtlReply, SECTOR_SIZE, register,
};

const PARTITION_TABLE_OFFSET: usize = 0x1BE;
const ENTRY_SIZE: usize = 16;

struct MbrEntry {
    sys_ind: u8,
    start_sect: u32,
    nr_sects: u32,
}

impl MbrEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            sys_ind: raw[4],
            start_sect: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            nr_sects: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    fn is_used(&self) -> bool {
        self.sys_ind != 0
    }
}

/// A sector-offset window onto a parent device. Holds a strong reference on
/// the parent for as long as the partition exists; the surrounding tree is
/// what makes the resulting cycle collapsible (unregister drains it).
pub struct PartitionDriver {
    parent: Arc<BlockDev>,
    start_sector: u32,
    num_sectors: u32,
}

impl PartitionDriver {
    pub fn new(parent: Arc<BlockDev>, start_sector: u32, num_sectors: u32) -> Self {
        Self {
            parent,
            start_sector,
            num_sectors,
        }
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    pub fn num_sectors(&self) -> u32 {
        self.num_sectors
    }
}

impl BlockDriver for PartitionDriver {
    fn read_sector(&self, buf: &mut [u8], start_sector: u32, count: usize) -> BlockResult<usize> {
        self.parent
            .read_sector(buf, start_sector + self.start_sector, count)
    }

    fn write_sector(&self, buf: &[u8], start_sector: u32, count: usize) -> BlockResult<usize> {
        self.parent
            .write_sector(buf, start_sector + self.start_sector, count)
    }

    fn ioctl(&self, cmd: BlockCtl) -> BlockResult<CtlReply> {
        match cmd {
            BlockCtl::GetSize => Ok(CtlReply::Size(self.num_sectors)),
            other => self.parent.ioctl(other),
        }
    }
}

// TODO: walk EBR chains instead of exposing 0x05/0x0F extended entries as
// plain partitions.
pub(crate) fn scan(dev: &Arc<BlockDev>) {
    let mut sector = [0u8; SECTOR_SIZE];
    match dev.read_sector(&mut sector, 0, 1) {
        Ok(1) => {}
        Ok(n) => {
            log::error!("partition scan: short read of sector 0 ({n} sectors)");
            return;
        }
        Err(err) => {
            log::error!("partition scan: cannot read sector 0: {err:?}");
            return;
        }
    }
    if sector[510] != 0x55 || sector[511] != 0xAA {
        return;
    }
    log::debug!("found MBR partition table, scanning partitions");

    for index in 0..4 {
        let offset = PARTITION_TABLE_OFFSET + index * ENTRY_SIZE;
        let entry = MbrEntry::parse(&sector[offset..offset + ENTRY_SIZE]);
        if !entry.is_used() {
            continue;
        }
        let driver = PartitionDriver::new(Arc::clone(dev), entry.start_sect, entry.nr_sects);
        let child = match BlockDev::new(Box::new(driver)) {
            Ok(child) => child,
            Err(err) => {
                log::error!("partition {index}: init failed: {err:?}");
                continue;
            }
        };
        match dev.add_child(&child) {
            Ok(()) => {
                log::info!(
                    "new partition found start {} sectors={}",
                    entry.start_sect,
                    entry.nr_sects
                );
                register(child);
            }
            Err(err) => log::error!("cannot add partition {index}: {err:?}"),
        }
    }
}
