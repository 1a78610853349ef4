// Indexed inode store.
//
// An inode describes a single unnamed file. Its on-disk image is exactly
// one sector: 122 direct sector pointers, one singly-indirect pointer
// and one doubly-indirect pointer (each pointer block holds 128 more
// pointers), a directory flag, the parent directory's sector, the byte
// length, and a magic constant.
//
// The in-memory side keeps a table of open inodes so that opening the
// same sector twice yields the same canonical handle. An entry in the
// table is shared by all openers through its open count; a handle clone
// reopens, a handle drop closes. Removal is deferred: remove() only
// marks the inode, and the backing sectors go back to the free map when
// the last opener closes.
//
// Growth is sparse. Writing past end-of-file allocates and zero-fills
// every new data sector through the buffer cache, fills the pointer
// structure front to back, and only then bumps the length and writes the
// inode image. A reader can therefore never observe a half-built
// extension, and holes always read as zeros.
//
// All inode I/O, including pointer blocks, goes through the buffer
// cache. Fresh pointer blocks for both indirect levels are allocated at
// create time, so extension never has to conjure them.

use crate::error::{Error, Result};
use crate::fs::FsCore;
use crate::param::{
    DIRECT_PTRS, INDIRECT_PTRS, INODE_MAGIC, MAX_BLOCKS, MAX_LENGTH, NINODE, ROOT_DIR_SECTOR,
    SECTOR_SIZE,
};
use crate::sleeplock::SleepLock;
use array_macro::array;
use log::{debug, trace, warn};
use static_assertions::const_assert_eq;
use std::convert::TryInto;
use std::mem;
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

/// Highest block index reachable through the singly-indirect pointer.
const IND_LIMIT: usize = DIRECT_PTRS + INDIRECT_PTRS;

static ZEROS: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

/// On-disk inode image. Must be exactly one sector.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub(crate) struct DiskInode {
    pub direct: [u32; DIRECT_PTRS],
    pub indirect: u32,
    pub doubly_indirect: u32,
    pub is_dir: u8,
    pad: [u8; 3],
    pub parent: u32,
    pub length: u32,
    pub magic: u32,
}
const_assert_eq!(mem::size_of::<DiskInode>(), SECTOR_SIZE);

/// A sector's worth of sector pointers, pointed at by the indirect and
/// doubly-indirect fields.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub(crate) struct PtrBlock {
    pub ptrs: [u32; INDIRECT_PTRS],
}
const_assert_eq!(mem::size_of::<PtrBlock>(), SECTOR_SIZE);

/// Sectors needed to back `length` bytes.
pub(crate) fn sectors_for(length: u32) -> usize {
    (length as usize + SECTOR_SIZE - 1) / SECTOR_SIZE
}

pub(crate) struct Idata {
    pub removed: bool,
    pub deny_write_cnt: u32,
    pub disk: DiskInode,
}

/// Canonical in-memory inode, one per open sector.
pub(crate) struct Inode {
    pub sector: u32,
    pub data: SleepLock<Idata>,
}

pub(crate) struct Slot {
    pub sector: u32,
    pub open_cnt: u32,
    pub ip: Arc<Inode>,
}

/// Open-inode table. The slot array is the arena; open_cnt in each slot
/// is the number of live handles for that sector.
pub(crate) struct ITable {
    pub slots: SleepLock<[Option<Slot>; NINODE]>,
}

impl ITable {
    pub fn new() -> Self {
        Self {
            slots: SleepLock::new(array![_ => None; NINODE], "itable"),
        }
    }
}

impl FsCore {
    /// Return the canonical handle for the inode at `sector`, reading
    /// its image through the cache on first open.
    pub(crate) fn inode_open(self: &Arc<Self>, sector: u32) -> Result<InodeHandle> {
        let mut slots = self.itable.slots.lock();
        for slot in slots.iter_mut().flatten() {
            if slot.sector == sector {
                slot.open_cnt += 1;
                let ip = slot.ip.clone();
                return Ok(InodeHandle {
                    fs: self.clone(),
                    ip,
                });
            }
        }
        let image = self.read_image(sector)?;
        assert_eq!(
            image.magic, INODE_MAGIC,
            "bad inode magic at sector {}",
            sector
        );
        let ip = Arc::new(Inode {
            sector,
            data: SleepLock::new(
                Idata {
                    removed: false,
                    deny_write_cnt: 0,
                    disk: image,
                },
                "inode",
            ),
        });
        match slots.iter_mut().find(|s| s.is_none()) {
            Some(empty) => {
                *empty = Some(Slot {
                    sector,
                    open_cnt: 1,
                    ip: ip.clone(),
                })
            }
            None => panic!("itable: out of slots"),
        }
        Ok(InodeHandle {
            fs: self.clone(),
            ip,
        })
    }

    /// Format a fresh inode at `sector` backing `length` zeroed bytes.
    /// Both pointer blocks are allocated up front; a failure part way
    /// through releases everything this call allocated.
    pub(crate) fn inode_create(&self, sector: u32, length: u32, is_dir: bool) -> Result<()> {
        let mut d = DiskInode::new_zeroed();
        d.magic = INODE_MAGIC;
        d.is_dir = is_dir as u8;
        d.parent = ROOT_DIR_SECTOR;
        d.indirect = self.alloc_zeroed()?;
        d.doubly_indirect = match self.alloc_zeroed() {
            Ok(s) => s,
            Err(e) => {
                self.freemap.release(d.indirect, 1);
                return Err(e);
            }
        };
        if let Err(e) = self.extend_image(&mut d, length) {
            let _ = self.dealloc_image(&d);
            return Err(e);
        }
        if let Err(e) = self.write_image(sector, &d) {
            let _ = self.dealloc_image(&d);
            return Err(e);
        }
        Ok(())
    }

    /// Live handle count for `sector`, zero when not open.
    pub(crate) fn open_count(&self, sector: u32) -> u32 {
        self.itable
            .slots
            .lock()
            .iter()
            .flatten()
            .find(|s| s.sector == sector)
            .map_or(0, |s| s.open_cnt)
    }

    pub(crate) fn read_image(&self, sector: u32) -> Result<DiskInode> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.cache.read(sector, &mut buf)?;
        Ok(DiskInode::read_from(&buf[..]).unwrap())
    }

    pub(crate) fn write_image(&self, sector: u32, image: &DiskInode) -> Result<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        buf.copy_from_slice(image.as_bytes());
        self.cache.write(sector, &buf)
    }

    fn read_ptr_block(&self, sector: u32) -> Result<PtrBlock> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.cache.read(sector, &mut buf)?;
        Ok(PtrBlock::read_from(&buf[..]).unwrap())
    }

    fn write_ptr_block(&self, sector: u32, block: &PtrBlock) -> Result<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        buf.copy_from_slice(block.as_bytes());
        self.cache.write(sector, &buf)
    }

    /// Allocate one sector from the free map and zero it through the
    /// cache.
    fn alloc_zeroed(&self) -> Result<u32> {
        let s = self
            .freemap
            .allocate(1)
            .ok_or(Error::AllocationExhausted)?;
        self.cache.write(s, &ZEROS)?;
        Ok(s)
    }

    /// Sector backing byte offset `pos` of the file described by `d`.
    pub(crate) fn byte_to_sector(&self, d: &DiskInode, pos: u32) -> Result<u32> {
        if pos >= d.length {
            return Err(Error::OutOfRange);
        }
        let b = pos as usize / SECTOR_SIZE;
        if b < DIRECT_PTRS {
            return Ok(d.direct[b]);
        }
        if b < IND_LIMIT {
            let blk = self.read_ptr_block(d.indirect)?;
            return Ok(blk.ptrs[b - DIRECT_PTRS]);
        }
        if b < MAX_BLOCKS {
            let dbl = self.read_ptr_block(d.doubly_indirect)?;
            let rel = b - IND_LIMIT;
            let inner = self.read_ptr_block(dbl.ptrs[rel / INDIRECT_PTRS])?;
            return Ok(inner.ptrs[rel % INDIRECT_PTRS]);
        }
        Err(Error::OutOfRange)
    }

    /// Grow the image to back `new_length` bytes, zero-filling every new
    /// data sector. The length is only bumped once every allocation and
    /// zero-fill succeeded; on failure the pointers placed so far stay
    /// in the structure and the length is untouched.
    pub(crate) fn extend_image(&self, d: &mut DiskInode, new_length: u32) -> Result<()> {
        if new_length > MAX_LENGTH {
            return Err(Error::OutOfRange);
        }
        debug_assert!(new_length >= d.length, "extension cannot shrink");
        let new_blocks = sectors_for(new_length);
        let mut cur = sectors_for(d.length);
        if new_blocks == cur {
            d.length = new_length;
            return Ok(());
        }
        trace!(
            "inode: extending from {} to {} sectors",
            cur,
            new_blocks
        );
        let mut result = Ok(());

        while cur < new_blocks.min(DIRECT_PTRS) {
            match self.alloc_zeroed() {
                Ok(s) => {
                    d.direct[cur] = s;
                    cur += 1;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if result.is_ok() && cur < new_blocks && cur < IND_LIMIT {
            let mut blk = self.read_ptr_block(d.indirect)?;
            while cur < new_blocks.min(IND_LIMIT) {
                match self.alloc_zeroed() {
                    Ok(s) => {
                        blk.ptrs[cur - DIRECT_PTRS] = s;
                        cur += 1;
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            // Keep whatever was placed, even on failure.
            let wb = self.write_ptr_block(d.indirect, &blk);
            if result.is_ok() {
                result = wb;
            }
        }

        if result.is_ok() && cur < new_blocks {
            let mut dbl = self.read_ptr_block(d.doubly_indirect)?;
            let mut dbl_dirty = false;
            while result.is_ok() && cur < new_blocks {
                let outer = (cur - IND_LIMIT) / INDIRECT_PTRS;
                if dbl.ptrs[outer] == 0 {
                    match self.alloc_zeroed() {
                        Ok(s) => {
                            dbl.ptrs[outer] = s;
                            dbl_dirty = true;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                let inner_sector = dbl.ptrs[outer];
                let mut inner = match self.read_ptr_block(inner_sector) {
                    Ok(b) => b,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                };
                let stop = new_blocks.min(IND_LIMIT + (outer + 1) * INDIRECT_PTRS);
                while cur < stop {
                    match self.alloc_zeroed() {
                        Ok(s) => {
                            inner.ptrs[cur - IND_LIMIT - outer * INDIRECT_PTRS] = s;
                            cur += 1;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                let wb = self.write_ptr_block(inner_sector, &inner);
                if result.is_ok() {
                    result = wb;
                }
            }
            if dbl_dirty {
                let wb = self.write_ptr_block(d.doubly_indirect, &dbl);
                if result.is_ok() {
                    result = wb;
                }
            }
        }

        result?;
        d.length = new_length;
        Ok(())
    }

    /// Release every sector reachable from `d`: data sectors, inner
    /// indirect blocks, both pointer blocks. The inode's own sector is
    /// the caller's to release.
    pub(crate) fn dealloc_image(&self, d: &DiskInode) -> Result<()> {
        for &p in d.direct.iter() {
            if p != 0 {
                self.freemap.release(p, 1);
            }
        }
        if d.indirect != 0 {
            let blk = self.read_ptr_block(d.indirect)?;
            for &p in blk.ptrs.iter() {
                if p != 0 {
                    self.freemap.release(p, 1);
                }
            }
            self.freemap.release(d.indirect, 1);
        }
        if d.doubly_indirect != 0 {
            let dbl = self.read_ptr_block(d.doubly_indirect)?;
            for &ip in dbl.ptrs.iter() {
                if ip != 0 {
                    let inner = self.read_ptr_block(ip)?;
                    for &p in inner.ptrs.iter() {
                        if p != 0 {
                            self.freemap.release(p, 1);
                        }
                    }
                    self.freemap.release(ip, 1);
                }
            }
            self.freemap.release(d.doubly_indirect, 1);
        }
        Ok(())
    }
}

/// Shared handle to an open inode. Cloning reopens; dropping closes, and
/// the last close of a removed inode returns its sectors to the free
/// map.
pub struct InodeHandle {
    fs: Arc<FsCore>,
    ip: Arc<Inode>,
}

impl InodeHandle {
    pub(crate) fn fs(&self) -> &Arc<FsCore> {
        &self.fs
    }

    pub fn sector(&self) -> u32 {
        self.ip.sector
    }

    pub fn length(&self) -> u32 {
        self.ip.data.lock().disk.length
    }

    pub fn is_dir(&self) -> bool {
        self.ip.data.lock().disk.is_dir != 0
    }

    pub fn parent_sector(&self) -> u32 {
        self.ip.data.lock().disk.parent
    }

    pub(crate) fn set_parent(&self, parent: u32) -> Result<()> {
        let mut idata = self.ip.data.lock();
        idata.disk.parent = parent;
        self.fs.write_image(self.ip.sector, &idata.disk)
    }

    /// Mark the inode for deletion once the last handle closes.
    pub fn remove(&self) {
        self.ip.data.lock().removed = true;
    }

    pub(crate) fn removed(&self) -> bool {
        self.ip.data.lock().removed
    }

    /// Read up to `dst.len()` bytes starting at `offset`. Returns the
    /// byte count actually read, short only at end-of-file or when the
    /// device fails mid-transfer.
    pub fn read_at(&self, dst: &mut [u8], offset: u32) -> usize {
        let idata = self.ip.data.lock();
        let length = idata.disk.length;
        let mut off = offset;
        let mut done = 0usize;
        while done < dst.len() && off < length {
            let sector_ofs = off as usize % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let inode_left = (length - off) as usize;
            let chunk = (dst.len() - done).min(sector_left).min(inode_left);
            let sector = match self.fs.byte_to_sector(&idata.disk, off) {
                Ok(s) => s,
                Err(_) => break,
            };
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let buf: &mut [u8; SECTOR_SIZE] =
                    (&mut dst[done..done + SECTOR_SIZE]).try_into().unwrap();
                if self.fs.cache.read(sector, buf).is_err() {
                    break;
                }
            } else {
                let mut bounce = [0u8; SECTOR_SIZE];
                if self.fs.cache.read(sector, &mut bounce).is_err() {
                    break;
                }
                dst[done..done + chunk].copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }
            done += chunk;
            off += chunk as u32;
        }
        done
    }

    /// Write `src` at `offset`, growing the file first when the write
    /// lands past end-of-file. Returns the bytes written: 0 when writes
    /// are denied or the extension could not be fully backed, short only
    /// when the device fails mid-transfer.
    pub fn write_at(&self, src: &[u8], offset: u32) -> usize {
        let mut idata = self.ip.data.lock();
        if idata.deny_write_cnt > 0 {
            return 0;
        }
        let end = offset as u64 + src.len() as u64;
        if end > MAX_LENGTH as u64 {
            return 0;
        }
        let end = end as u32;
        if end > idata.disk.length {
            let old_length = idata.disk.length;
            let mut d = idata.disk;
            match self.fs.extend_image(&mut d, end) {
                Ok(()) => {
                    if self.fs.write_image(self.ip.sector, &d).is_err() {
                        d.length = old_length;
                        idata.disk = d;
                        return 0;
                    }
                    idata.disk = d;
                }
                Err(e) => {
                    debug!("inode {}: extension to {} failed: {}", self.ip.sector, end, e);
                    idata.disk = d;
                    return 0;
                }
            }
        }
        let length = idata.disk.length;
        let mut off = offset;
        let mut done = 0usize;
        while done < src.len() && off < length {
            let sector_ofs = off as usize % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let inode_left = (length - off) as usize;
            let chunk = (src.len() - done).min(sector_left).min(inode_left);
            let sector = match self.fs.byte_to_sector(&idata.disk, off) {
                Ok(s) => s,
                Err(_) => break,
            };
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                let buf: &[u8; SECTOR_SIZE] = src[done..done + SECTOR_SIZE].try_into().unwrap();
                if self.fs.cache.write(sector, buf).is_err() {
                    break;
                }
            } else {
                let mut bounce = [0u8; SECTOR_SIZE];
                if self.fs.cache.read(sector, &mut bounce).is_err() {
                    break;
                }
                bounce[sector_ofs..sector_ofs + chunk].copy_from_slice(&src[done..done + chunk]);
                if self.fs.cache.write(sector, &bounce).is_err() {
                    break;
                }
            }
            done += chunk;
            off += chunk as u32;
        }
        done
    }

    /// Disallow writes through any handle. Must be balanced with
    /// `allow_write` by the same opener before it closes.
    pub fn deny_write(&self) {
        let slots = self.fs.itable.slots.lock();
        let open_cnt = slots
            .iter()
            .flatten()
            .find(|s| s.sector == self.ip.sector)
            .map(|s| s.open_cnt)
            .unwrap();
        let mut idata = self.ip.data.lock();
        idata.deny_write_cnt += 1;
        assert!(
            idata.deny_write_cnt <= open_cnt,
            "deny_write: more denials than openers"
        );
    }

    pub fn allow_write(&self) {
        let mut idata = self.ip.data.lock();
        assert!(idata.deny_write_cnt > 0, "allow_write: not denied");
        idata.deny_write_cnt -= 1;
    }

    #[cfg(test)]
    pub(crate) fn mapped_sector(&self, pos: u32) -> Option<u32> {
        let idata = self.ip.data.lock();
        self.fs.byte_to_sector(&idata.disk, pos).ok()
    }
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        let mut slots = self.fs.itable.slots.lock();
        let slot = slots
            .iter_mut()
            .flatten()
            .find(|s| s.sector == self.ip.sector)
            .unwrap();
        slot.open_cnt += 1;
        InodeHandle {
            fs: self.fs.clone(),
            ip: self.ip.clone(),
        }
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        let mut slots = self.fs.itable.slots.lock();
        let entry = slots
            .iter_mut()
            .find(|s| {
                s.as_ref()
                    .map_or(false, |slot| slot.sector == self.ip.sector)
            })
            .unwrap();
        let slot = entry.as_mut().unwrap();
        slot.open_cnt -= 1;
        if slot.open_cnt > 0 {
            return;
        }
        *entry = None;
        drop(slots);
        let idata = self.ip.data.lock();
        if idata.removed {
            trace!("inode {}: releasing backing sectors", self.ip.sector);
            if let Err(e) = self.fs.dealloc_image(&idata.disk) {
                warn!("inode {}: deallocation failed: {}", self.ip.sector, e);
            }
            self.fs.freemap.release(self.ip.sector, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use crate::fs::Filesys;
    use std::collections::HashSet;

    fn fresh(sectors: u32) -> Filesys {
        Filesys::format(Arc::new(MemDisk::new(sectors))).unwrap()
    }

    fn new_file(fs: &Filesys, name: &str) -> InodeHandle {
        let root = fs.open_root().unwrap();
        fs.create(&root, name, 0, false).unwrap();
        fs.open(&root, name).unwrap()
    }

    fn distinct_backing(ino: &InodeHandle) -> usize {
        let blocks = sectors_for(ino.length());
        let mut seen = HashSet::new();
        for b in 0..blocks {
            let s = ino.mapped_sector((b * SECTOR_SIZE) as u32).unwrap();
            assert_ne!(s, 0, "block {} unmapped", b);
            seen.insert(s);
        }
        assert_eq!(seen.len(), blocks, "backing sectors must be distinct");
        seen.len()
    }

    #[test]
    fn write_then_read_roundtrip() {
        let fs = fresh(4096);
        let ino = new_file(&fs, "data");
        let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        assert_eq!(ino.write_at(&payload, 100), 3000);
        assert_eq!(ino.length(), 3100);
        let mut back = vec![0u8; 3000];
        assert_eq!(ino.read_at(&mut back, 100), 3000);
        assert_eq!(back, payload);
    }

    #[test]
    fn sparse_write_reads_zeros_before_the_data() {
        let fs = fresh(4096);
        let ino = new_file(&fs, "sparse");
        assert_eq!(ino.write_at(b"ABCD", 10_000), 4);
        assert_eq!(ino.length(), 10_004);
        let mut back = vec![0xffu8; 10_004];
        assert_eq!(ino.read_at(&mut back, 0), 10_004);
        assert!(back[..10_000].iter().all(|&b| b == 0));
        assert_eq!(&back[10_000..], b"ABCD");
    }

    #[test]
    fn reads_stop_at_end_of_file() {
        let fs = fresh(4096);
        let ino = new_file(&fs, "short");
        assert_eq!(ino.write_at(&[7u8; 100], 0), 100);
        let mut buf = [0u8; 200];
        assert_eq!(ino.read_at(&mut buf, 0), 100);
        assert_eq!(ino.read_at(&mut buf, 100), 0);
        assert_eq!(ino.read_at(&mut buf, 5000), 0);
    }

    #[test]
    fn growth_crosses_the_pointer_frontiers() {
        let fs = fresh(4096);
        let ino = new_file(&fs, "grow");
        let one = [0xa5u8; 1];

        let direct_edge = (DIRECT_PTRS * SECTOR_SIZE) as u32;
        assert_eq!(ino.write_at(&one, direct_edge - 1), 1);
        assert_eq!(distinct_backing(&ino), DIRECT_PTRS);
        assert_eq!(ino.write_at(&one, direct_edge), 1);
        assert_eq!(distinct_backing(&ino), DIRECT_PTRS + 1);

        let indirect_edge = (IND_LIMIT * SECTOR_SIZE) as u32;
        assert_eq!(ino.write_at(&one, indirect_edge - 1), 1);
        assert_eq!(distinct_backing(&ino), IND_LIMIT);
        assert_eq!(ino.write_at(&one, indirect_edge), 1);
        assert_eq!(distinct_backing(&ino), IND_LIMIT + 1);

        // The holes skipped over read back as zeros.
        let mut mid = [9u8; 16];
        assert_eq!(ino.read_at(&mut mid, 70_000), 16);
        assert!(mid.iter().all(|&b| b == 0));
    }

    #[test]
    fn doubly_indirect_file_reaches_eight_mebibytes() {
        const TOTAL: usize = 8 * 1024 * 1024;
        const CHUNK: usize = 64 * 1024;
        fn pat(i: usize) -> u8 {
            (i ^ (i >> 9)) as u8
        }

        let fs = fresh(20_000);
        let ino = new_file(&fs, "big");
        let mut off = 0usize;
        while off < TOTAL {
            let chunk: Vec<u8> = (off..off + CHUNK).map(pat).collect();
            assert_eq!(ino.write_at(&chunk, off as u32), CHUNK);
            off += CHUNK;
        }
        assert_eq!(ino.length() as usize, TOTAL);

        let mut probe = [0u8; 64];
        let mut pos = 11u64;
        for _ in 0..32 {
            pos = (pos.wrapping_mul(1_103_515_245).wrapping_add(12_345)) % (TOTAL as u64 - 64);
            let at = pos as usize;
            assert_eq!(ino.read_at(&mut probe, at as u32), 64);
            for (i, &b) in probe.iter().enumerate() {
                assert_eq!(b, pat(at + i), "mismatch at offset {}", at + i);
            }
        }
    }

    #[test]
    fn writes_past_the_pointer_capacity_are_refused() {
        let fs = fresh(1024);
        let ino = new_file(&fs, "cap");
        assert_eq!(ino.write_at(b"x", MAX_LENGTH), 0);
        assert_eq!(ino.length(), 0);
    }

    #[test]
    fn deny_write_makes_writes_return_zero() {
        let fs = fresh(1024);
        let ino = new_file(&fs, "guarded");
        ino.deny_write();
        assert_eq!(ino.write_at(b"x", 0), 0);
        assert_eq!(ino.length(), 0);
        ino.allow_write();
        assert_eq!(ino.write_at(b"x", 0), 1);
        assert_eq!(ino.length(), 1);
    }

    #[test]
    fn opening_twice_shares_the_canonical_handle() {
        let fs = fresh(1024);
        let root = fs.open_root().unwrap();
        let ino = new_file(&fs, "shared");
        let sector = ino.sector();
        assert_eq!(fs.core.open_count(sector), 1);

        let again = fs.open(&root, "shared").unwrap();
        assert_eq!(again.sector(), sector);
        assert_eq!(fs.core.open_count(sector), 2);

        let third = again.clone();
        assert_eq!(fs.core.open_count(sector), 3);
        drop(third);
        drop(again);
        assert_eq!(fs.core.open_count(sector), 1);
        drop(ino);
        assert_eq!(fs.core.open_count(sector), 0);
    }

    #[test]
    fn removed_inode_frees_its_sectors_on_last_close() {
        let fs = fresh(2048);
        let root = fs.open_root().unwrap();
        let baseline = fs.free_sectors();

        fs.create(&root, "doomed", 0, false).unwrap();
        let h1 = fs.open(&root, "doomed").unwrap();
        assert_eq!(h1.write_at(&vec![3u8; 200 * 512], 0), 200 * 512);
        let h2 = h1.clone();

        fs.remove(&root, "doomed").unwrap();
        assert!(matches!(fs.open(&root, "doomed"), Err(Error::NotFound)));

        // Both surviving handles still read the data.
        let mut buf = [0u8; 16];
        assert_eq!(h1.read_at(&mut buf, 0), 16);
        assert_eq!(buf, [3u8; 16]);
        drop(h1);
        assert_eq!(h2.read_at(&mut buf, 512), 16);
        assert_eq!(buf, [3u8; 16]);
        drop(h2);

        // Everything the file reached is free again.
        assert_eq!(fs.free_sectors(), baseline);
    }

    #[test]
    fn create_failure_rolls_back_its_sectors() {
        let fs = fresh(128);
        let root = fs.open_root().unwrap();
        let baseline = fs.free_sectors();
        assert!(matches!(
            fs.create(&root, "huge", 200 * 512, false),
            Err(Error::AllocationExhausted)
        ));
        assert_eq!(fs.free_sectors(), baseline);
    }

    #[test]
    fn preallocated_length_reads_as_zeros() {
        let fs = fresh(1024);
        let root = fs.open_root().unwrap();
        fs.create(&root, "prefilled", 3 * 512 + 17, false).unwrap();
        let ino = fs.open(&root, "prefilled").unwrap();
        assert_eq!(ino.length(), 3 * 512 + 17);
        let mut buf = vec![1u8; 3 * 512 + 17];
        assert_eq!(ino.read_at(&mut buf, 0), 3 * 512 + 17);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(distinct_backing(&ino), 4);
    }
}
