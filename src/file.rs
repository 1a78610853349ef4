// Byte-stream file handles.
//
// A File wraps an inode handle with a cursor. read/write move the
// cursor, read_at/write_at leave it alone. A handle that denied writes
// re-allows them when it closes, so the deny count stays balanced per
// opener.

use crate::inode::InodeHandle;

pub struct File {
    inode: InodeHandle,
    pos: u32,
    denied: bool,
}

impl File {
    pub fn open(inode: InodeHandle) -> File {
        File {
            inode,
            pos: 0,
            denied: false,
        }
    }

    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = self.inode.read_at(dst, self.pos);
        self.pos += n as u32;
        n
    }

    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = self.inode.write_at(src, self.pos);
        self.pos += n as u32;
        n
    }

    pub fn read_at(&self, dst: &mut [u8], offset: u32) -> usize {
        self.inode.read_at(dst, offset)
    }

    pub fn write_at(&self, src: &[u8], offset: u32) -> usize {
        self.inode.write_at(src, offset)
    }

    pub fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    pub fn length(&self) -> u32 {
        self.inode.length()
    }

    /// Guard an executable image against writes for this handle's
    /// lifetime. Idempotent per handle.
    pub fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.denied {
            self.denied = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.allow_write();
    }
}
