// Filesystem facade.
//
// A Filesys owns one mounted volume: the buffer cache over its device,
// the free map, and the open-inode table. Formatting lays down the free
// map and a root directory whose parent is itself. Path-level calls take
// the caller's working directory so relative names resolve against it;
// chdir swaps that handle in place.

use crate::bio::Bcache;
use crate::block::BlockDevice;
use crate::dir::{self, Dir};
use crate::error::{Error, Result};
use crate::file::File;
use crate::freemap::FreeMap;
use crate::inode::{InodeHandle, ITable};
use crate::param::{ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR};
use crate::path;
use log::info;
use std::sync::Arc;

pub(crate) struct FsCore {
    pub(crate) cache: Bcache,
    pub(crate) freemap: FreeMap,
    pub(crate) itable: ITable,
}

pub struct Filesys {
    pub(crate) core: Arc<FsCore>,
}

impl Filesys {
    /// Lay a fresh filesystem down on `dev` and mount it.
    pub fn format(dev: Arc<dyn BlockDevice>) -> Result<Filesys> {
        info!("formatting volume, {} sectors", dev.sector_count());
        let core = Arc::new(FsCore {
            cache: Bcache::new(dev.clone()),
            freemap: FreeMap::create(dev),
            itable: ITable::new(),
        });
        dir::create_on(&core, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES)?;
        let root = core.inode_open(ROOT_DIR_SECTOR)?;
        root.set_parent(ROOT_DIR_SECTOR)?;
        drop(root);
        let fs = Filesys { core };
        fs.flush()?;
        Ok(fs)
    }

    /// Mount a previously formatted volume.
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Filesys> {
        let freemap = FreeMap::open(dev.clone())?;
        info!("mounted volume, {} sectors", dev.sector_count());
        Ok(Filesys {
            core: Arc::new(FsCore {
                cache: Bcache::new(dev),
                freemap,
                itable: ITable::new(),
            }),
        })
    }

    /// Write every dirty cache entry and the free map back to the
    /// device.
    pub fn flush(&self) -> Result<()> {
        self.core.cache.flush()?;
        self.core.freemap.flush()
    }

    pub fn open_root(&self) -> Result<Dir> {
        Dir::open(self.core.inode_open(ROOT_DIR_SECTOR)?)
    }

    /// Create a file or directory at `path`, backed by `initial_size`
    /// zeroed bytes. The inode sector comes from the free map and goes
    /// back on any failure.
    pub fn create(&self, cwd: &Dir, path: &str, initial_size: u32, is_dir: bool) -> Result<()> {
        let (parent, base) = path::resolve_parent(&self.core, cwd, path)?;
        if base == "." || base == ".." {
            return Err(Error::AlreadyExists);
        }
        let sector = self
            .core
            .freemap
            .allocate(1)
            .ok_or(Error::AllocationExhausted)?;
        if let Err(e) = self.core.inode_create(sector, initial_size, is_dir) {
            self.core.freemap.release(sector, 1);
            return Err(e);
        }
        if let Err(e) = parent.add(base, sector) {
            if let Ok(image) = self.core.read_image(sector) {
                let _ = self.core.dealloc_image(&image);
            }
            self.core.freemap.release(sector, 1);
            return Err(e);
        }
        Ok(())
    }

    /// Resolve `path` to an inode handle.
    pub fn open(&self, cwd: &Dir, path: &str) -> Result<InodeHandle> {
        path::resolve(&self.core, cwd, path)
    }

    /// Resolve `path` and wrap it as a byte-stream file.
    pub fn open_file(&self, cwd: &Dir, path: &str) -> Result<File> {
        Ok(File::open(self.open(cwd, path)?))
    }

    /// Resolve `path`, which must name a directory.
    pub fn open_dir(&self, cwd: &Dir, path: &str) -> Result<Dir> {
        Dir::open(self.open(cwd, path)?)
    }

    /// Delete the entry at `path`. An open file lives on until its last
    /// handle closes; a directory must be empty and otherwise unopened.
    pub fn remove(&self, cwd: &Dir, path: &str) -> Result<()> {
        let (parent, base) = path::resolve_parent(&self.core, cwd, path)?;
        parent.remove(base)
    }

    /// Re-point the caller's working directory at `path`, closing the
    /// previous handle.
    pub fn chdir(&self, cwd: &mut Dir, path: &str) -> Result<()> {
        let next = self.open_dir(cwd, path)?;
        *cwd = next;
        Ok(())
    }

    pub fn hit_count(&self) -> u64 {
        self.core.cache.hit_count()
    }

    pub fn miss_count(&self) -> u64 {
        self.core.cache.miss_count()
    }

    pub fn reset_cache_stats(&self) {
        self.core.cache.reset_stats()
    }

    /// Free sectors left on the volume.
    pub fn free_sectors(&self) -> usize {
        self.core.freemap.free_sectors()
    }
}

impl Drop for Filesys {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
