// Directories.
//
// A directory is an inode with the directory flag set whose content is a
// dense array of fixed-size entries: an in-use bit, the target's inode
// sector, and a NUL-terminated name. Lookups scan in-use entries in
// order; an add reuses the first free slot or appends one entry past the
// end, extending the directory file. "." and ".." are never stored; the
// path walker resolves them from the parent sector kept in every inode.

use crate::error::{Error, Result};
use crate::fs::FsCore;
use crate::inode::InodeHandle;
use crate::param::NAME_MAX;
use static_assertions::const_assert_eq;
use std::mem;
use zerocopy::{AsBytes, FromBytes};

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DiskDirent {
    in_use: u8,
    pad: [u8; 3],
    sector: u32,
    name: [u8; NAME_MAX + 1],
    pad2: [u8; 1],
}

pub(crate) const DIRENT_SIZE: usize = mem::size_of::<DiskDirent>();
const_assert_eq!(DIRENT_SIZE, 24);

impl DiskDirent {
    fn name(&self) -> &[u8] {
        match self.name.iter().position(|&b| b == 0) {
            Some(nul) => &self.name[..nul],
            None => &self.name[..],
        }
    }

    fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_MAX + 1];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > NAME_MAX {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// Open directory handle: the underlying inode plus a cursor for
/// readdir. Closing the handle closes the inode.
pub struct Dir {
    inode: InodeHandle,
    pos: u32,
}

impl Dir {
    /// Wrap an inode handle; the inode must be a directory.
    pub fn open(inode: InodeHandle) -> Result<Dir> {
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(Dir { inode, pos: 0 })
    }

    /// A fresh handle on the same directory with a rewound cursor.
    pub fn reopen(&self) -> Dir {
        Dir {
            inode: self.inode.clone(),
            pos: 0,
        }
    }

    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    pub fn into_inode(self) -> InodeHandle {
        self.inode
    }

    fn entry_at(inode: &InodeHandle, index: u32) -> Option<DiskDirent> {
        let mut buf = [0u8; DIRENT_SIZE];
        let n = inode.read_at(&mut buf, index * DIRENT_SIZE as u32);
        if n < DIRENT_SIZE {
            return None;
        }
        Some(DiskDirent::read_from(&buf[..]).unwrap())
    }

    fn write_entry(&self, index: u32, entry: &DiskDirent) -> Result<()> {
        let mut buf = [0u8; DIRENT_SIZE];
        buf.copy_from_slice(entry.as_bytes());
        let n = self.inode.write_at(&buf, index * DIRENT_SIZE as u32);
        if n < DIRENT_SIZE {
            // The only way an entry write comes up short is a failed
            // directory-file extension.
            return Err(Error::AllocationExhausted);
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Option<(u32, DiskDirent)> {
        let mut index = 0;
        while let Some(e) = Self::entry_at(&self.inode, index) {
            if e.in_use != 0 && e.name() == name.as_bytes() {
                return Some((index, e));
            }
            index += 1;
        }
        None
    }

    /// Open the inode a live entry points at.
    pub fn lookup(&self, name: &str) -> Result<InodeHandle> {
        check_name(name)?;
        match self.find(name) {
            Some((_, e)) => self.inode.fs().inode_open(e.sector),
            None => Err(Error::NotFound),
        }
    }

    /// Record `name -> sector`, reusing the first free slot. A live
    /// entry with the same name fails the add. When the target is a
    /// directory its parent pointer is stamped with this directory.
    pub fn add(&self, name: &str, sector: u32) -> Result<()> {
        check_name(name)?;
        if name.is_empty() || name == "." || name == ".." {
            return Err(Error::AlreadyExists);
        }
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let mut index = 0;
        while let Some(e) = Self::entry_at(&self.inode, index) {
            if e.in_use == 0 {
                break;
            }
            index += 1;
        }

        let mut entry = DiskDirent::new_zeroed();
        entry.in_use = 1;
        entry.sector = sector;
        entry.set_name(name);
        self.write_entry(index, &entry)?;

        let target = self.inode.fs().inode_open(sector)?;
        if target.is_dir() {
            target.set_parent(self.inode.sector())?;
        }
        Ok(())
    }

    /// True when the directory holds no live entries.
    fn is_empty(inode: &InodeHandle) -> bool {
        let mut index = 0;
        while let Some(e) = Self::entry_at(inode, index) {
            if e.in_use != 0 {
                return false;
            }
            index += 1;
        }
        true
    }

    /// Drop the entry for `name` and mark the target inode removed; its
    /// sectors are reclaimed when the last opener closes. A directory
    /// target must be empty and have no opener besides this call.
    pub fn remove(&self, name: &str) -> Result<()> {
        check_name(name)?;
        if name == "." || name == ".." {
            return Err(Error::NotFound);
        }
        let (index, mut entry) = self.find(name).ok_or(Error::NotFound)?;
        let target = self.inode.fs().inode_open(entry.sector)?;
        if target.is_dir() {
            if !Self::is_empty(&target) {
                return Err(Error::NotEmpty);
            }
            if self.inode.fs().open_count(entry.sector) != 1 {
                return Err(Error::NotEmpty);
            }
        }
        entry.in_use = 0;
        self.write_entry(index, &entry)?;
        target.remove();
        Ok(())
    }

    /// Next live entry name past the cursor, None at the end.
    pub fn readdir(&mut self) -> Option<String> {
        while let Some(e) = Self::entry_at(&self.inode, self.pos) {
            self.pos += 1;
            if e.in_use != 0 {
                return Some(String::from_utf8_lossy(e.name()).into_owned());
            }
        }
        None
    }
}

/// Format a directory inode at `sector` with room for `entries` entries.
pub(crate) fn create_on(fs: &FsCore, sector: u32, entries: usize) -> Result<()> {
    fs.inode_create(sector, (entries * DIRENT_SIZE) as u32, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use crate::fs::Filesys;
    use crate::param::{ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR};
    use std::sync::Arc;

    fn fresh() -> Filesys {
        Filesys::format(Arc::new(MemDisk::new(4096))).unwrap()
    }

    #[test]
    fn add_lookup_remove() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        fs.create(&root, "a", 0, false).unwrap();
        let found = root.lookup("a").unwrap();
        assert!(!found.is_dir());
        drop(found);
        fs.remove(&root, "a").unwrap();
        assert!(matches!(root.lookup("a"), Err(Error::NotFound)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        fs.create(&root, "twin", 0, false).unwrap();
        assert!(matches!(
            fs.create(&root, "twin", 0, false),
            Err(Error::AlreadyExists)
        ));
        assert!(matches!(
            fs.create(&root, "twin", 0, true),
            Err(Error::AlreadyExists)
        ));
    }

    #[test]
    fn name_length_is_bounded() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        fs.create(&root, "fourteen-chars", 0, false).unwrap();
        assert!(root.lookup("fourteen-chars").is_ok());
        assert!(matches!(
            fs.create(&root, "fifteen--chars!", 0, false),
            Err(Error::NameTooLong)
        ));
        assert!(matches!(
            root.lookup("fifteen--chars!"),
            Err(Error::NameTooLong)
        ));
    }

    #[test]
    fn slots_are_reused_and_the_file_grows_past_capacity() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        let formatted = (ROOT_DIR_ENTRIES * DIRENT_SIZE) as u32;
        assert_eq!(root.inode().length(), formatted);

        for i in 0..ROOT_DIR_ENTRIES + 4 {
            fs.create(&root, &format!("f{:02}", i), 0, false).unwrap();
        }
        // Four entries did not fit in the formatted capacity.
        assert_eq!(
            root.inode().length(),
            formatted + 4 * DIRENT_SIZE as u32
        );

        fs.remove(&root, "f03").unwrap();
        let len = root.inode().length();
        fs.create(&root, "reuse", 0, false).unwrap();
        assert_eq!(root.inode().length(), len);
    }

    #[test]
    fn readdir_walks_live_entries_in_slot_order() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        for name in &["a", "b", "c"] {
            fs.create(&root, name, 0, false).unwrap();
        }
        fs.remove(&root, "b").unwrap();

        let mut dir = root.reopen();
        let mut names = Vec::new();
        while let Some(n) = dir.readdir() {
            names.push(n);
        }
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn directories_must_be_empty_and_unshared_to_remove() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        fs.create(&root, "d", 0, true).unwrap();
        fs.create(&root, "d/x", 0, false).unwrap();
        assert!(matches!(fs.remove(&root, "d"), Err(Error::NotEmpty)));

        fs.remove(&root, "d/x").unwrap();
        let keep = fs.open_dir(&root, "d").unwrap();
        assert!(matches!(fs.remove(&root, "d"), Err(Error::NotEmpty)));
        drop(keep);
        fs.remove(&root, "d").unwrap();
        assert!(matches!(root.lookup("d"), Err(Error::NotFound)));
    }

    #[test]
    fn subdirectory_parent_points_home() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        assert_eq!(root.inode().parent_sector(), ROOT_DIR_SECTOR);

        fs.create(&root, "sub", 0, true).unwrap();
        let sub = fs.open_dir(&root, "sub").unwrap();
        assert_eq!(sub.inode().parent_sector(), ROOT_DIR_SECTOR);

        fs.create(&root, "sub/inner", 0, true).unwrap();
        let inner = fs.open_dir(&root, "sub/inner").unwrap();
        assert_eq!(inner.inode().parent_sector(), sub.inode().sector());
    }

    #[test]
    fn dot_entries_are_never_stored() {
        let fs = fresh();
        let root = fs.open_root().unwrap();
        fs.create(&root, "d", 0, true).unwrap();
        let mut d = fs.open_dir(&root, "d").unwrap();
        assert_eq!(d.readdir(), None);
        // ...yet both resolve during a walk.
        assert!(fs.open(&root, "d/.").is_ok());
        assert_eq!(fs.open(&root, "d/..").unwrap().sector(), ROOT_DIR_SECTOR);
    }
}
