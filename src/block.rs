// Raw block devices.
//
// The filesystem talks to storage through the `BlockDevice` trait:
// synchronous whole-sector reads and writes against a fixed-size device.
// `MemDisk` backs tests, `FileDisk` backs disk images built by mkfs.

use crate::error::{Error, Result};
use crate::param::SECTOR_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

pub trait BlockDevice: Send + Sync {
    /// Total number of sectors on the device.
    fn sector_count(&self) -> u32;

    /// Copy sector `sector` into `buf`.
    fn read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()>;

    /// Replace sector `sector` with `buf`.
    fn write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()>;
}

fn bad_sector(sector: u32) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("sector {} out of range", sector),
    ))
}

/// Memory-backed device. Every test owns its own instance; the
/// read/write counters let tests observe write-back traffic.
pub struct MemDisk {
    sectors: u32,
    data: Mutex<Vec<u8>>,
    reads: Mutex<u64>,
    writes: Mutex<u64>,
}

impl MemDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            sectors,
            data: Mutex::new(vec![0; sectors as usize * SECTOR_SIZE]),
            reads: Mutex::new(0),
            writes: Mutex::new(0),
        }
    }

    pub fn read_count(&self) -> u64 {
        *self.reads.lock().unwrap()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }
}

impl BlockDevice for MemDisk {
    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        if sector >= self.sectors {
            return Err(bad_sector(sector));
        }
        let data = self.data.lock().unwrap();
        let base = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[base..base + SECTOR_SIZE]);
        *self.reads.lock().unwrap() += 1;
        Ok(())
    }

    fn write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        if sector >= self.sectors {
            return Err(bad_sector(sector));
        }
        let mut data = self.data.lock().unwrap();
        let base = sector as usize * SECTOR_SIZE;
        data[base..base + SECTOR_SIZE].copy_from_slice(buf);
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

/// File-backed device over a disk image.
pub struct FileDisk {
    sectors: u32,
    img: Mutex<File>,
}

impl FileDisk {
    /// Create (or truncate) an image file spanning `sectors` sectors.
    pub fn create<P: AsRef<Path>>(path: P, sectors: u32) -> Result<Self> {
        let img = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        img.set_len(sectors as u64 * SECTOR_SIZE as u64)?;
        Ok(Self {
            sectors,
            img: Mutex::new(img),
        })
    }

    /// Open an existing image file; its length fixes the sector count.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = OpenOptions::new().read(true).write(true).open(path)?;
        let len = img.metadata()?.len();
        let sectors = (len / SECTOR_SIZE as u64) as u32;
        Ok(Self {
            sectors,
            img: Mutex::new(img),
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.img.lock().unwrap().sync_all()?;
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn read(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        if sector >= self.sectors {
            return Err(bad_sector(sector));
        }
        let mut img = self.img.lock().unwrap();
        img.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        img.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        if sector >= self.sectors {
            return Err(bad_sector(sector));
        }
        let mut img = self.img.lock().unwrap();
        img.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        img.write_all(buf)?;
        Ok(())
    }
}
