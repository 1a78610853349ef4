// Upward-facing request surface.
//
// The boundary the call dispatcher drives: one tagged request per
// operation, a total match over the variants, and sentinel returns the
// way the user side expects them: -1 for failure, a nonnegative fd,
// count, or flag otherwise. A Session owns the caller's fd table and
// working directory.

use crate::dir::Dir;
use crate::error::Result;
use crate::file::File;
use crate::fs::Filesys;
use crate::param::NOFILE;
use array_macro::array;

pub enum Request<'a> {
    /// Create a file of `initial_size` zeroed bytes.
    Create { path: &'a str, initial_size: u32 },
    /// Create an empty directory.
    MkDir { path: &'a str },
    /// Open a file or directory; returns the fd.
    Open { path: &'a str },
    /// Close an fd.
    Close { fd: usize },
    /// Read from the fd cursor; returns the count.
    Read { fd: usize, buf: &'a mut [u8] },
    /// Write at the fd cursor; returns the count.
    Write { fd: usize, buf: &'a [u8] },
    /// Move the fd cursor.
    Seek { fd: usize, pos: u32 },
    /// Current fd cursor.
    Tell { fd: usize },
    /// File length behind the fd.
    FileSize { fd: usize },
    /// Delete a path.
    Remove { path: &'a str },
    /// Change the working directory.
    ChDir { path: &'a str },
    /// Next directory entry name; 1 with `name` filled, 0 at the end.
    ReadDir { fd: usize, name: &'a mut String },
    /// 1 when the fd is a directory, 0 when it is a file.
    IsDir { fd: usize },
    /// Inode sector behind the fd.
    INumber { fd: usize },
}

enum Node {
    File(File),
    Dir(Dir),
}

pub struct Session {
    fs: Filesys,
    cwd: Dir,
    fds: [Option<Node>; NOFILE],
}

const FAIL: i64 = -1;

impl Session {
    pub fn new(fs: Filesys) -> Result<Session> {
        let cwd = fs.open_root()?;
        Ok(Session {
            fs,
            cwd,
            fds: array![_ => None; NOFILE],
        })
    }

    pub fn fs(&self) -> &Filesys {
        &self.fs
    }

    fn install(&mut self, node: Node) -> i64 {
        for (fd, slot) in self.fds.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(node);
                return fd as i64;
            }
        }
        FAIL
    }

    pub fn dispatch(&mut self, req: Request<'_>) -> i64 {
        match req {
            Request::Create { path, initial_size } => {
                match self.fs.create(&self.cwd, path, initial_size, false) {
                    Ok(()) => 0,
                    Err(_) => FAIL,
                }
            }
            Request::MkDir { path } => match self.fs.create(&self.cwd, path, 0, true) {
                Ok(()) => 0,
                Err(_) => FAIL,
            },
            Request::Open { path } => match self.fs.open(&self.cwd, path) {
                Ok(inode) => {
                    let node = if inode.is_dir() {
                        match Dir::open(inode) {
                            Ok(d) => Node::Dir(d),
                            Err(_) => return FAIL,
                        }
                    } else {
                        Node::File(File::open(inode))
                    };
                    self.install(node)
                }
                Err(_) => FAIL,
            },
            Request::Close { fd } => match self.fds.get_mut(fd).and_then(Option::take) {
                Some(_) => 0,
                None => FAIL,
            },
            Request::Read { fd, buf } => match self.node_mut(fd) {
                Some(Node::File(f)) => f.read(buf) as i64,
                _ => FAIL,
            },
            Request::Write { fd, buf } => match self.node_mut(fd) {
                Some(Node::File(f)) => f.write(buf) as i64,
                _ => FAIL,
            },
            Request::Seek { fd, pos } => match self.node_mut(fd) {
                Some(Node::File(f)) => {
                    f.seek(pos);
                    0
                }
                _ => FAIL,
            },
            Request::Tell { fd } => match self.node_mut(fd) {
                Some(Node::File(f)) => f.tell() as i64,
                _ => FAIL,
            },
            Request::FileSize { fd } => match self.node_mut(fd) {
                Some(Node::File(f)) => f.length() as i64,
                Some(Node::Dir(d)) => d.inode().length() as i64,
                None => FAIL,
            },
            Request::Remove { path } => match self.fs.remove(&self.cwd, path) {
                Ok(()) => 0,
                Err(_) => FAIL,
            },
            Request::ChDir { path } => match self.fs.chdir(&mut self.cwd, path) {
                Ok(()) => 0,
                Err(_) => FAIL,
            },
            Request::ReadDir { fd, name } => match self.node_mut(fd) {
                Some(Node::Dir(d)) => match d.readdir() {
                    Some(next) => {
                        *name = next;
                        1
                    }
                    None => 0,
                },
                _ => FAIL,
            },
            Request::IsDir { fd } => match self.node_mut(fd) {
                Some(Node::Dir(_)) => 1,
                Some(Node::File(_)) => 0,
                None => FAIL,
            },
            Request::INumber { fd } => match self.node_mut(fd) {
                Some(Node::File(f)) => f.inode().sector() as i64,
                Some(Node::Dir(d)) => d.inode().sector() as i64,
                None => FAIL,
            },
        }
    }

    fn node_mut(&mut self, fd: usize) -> Option<&mut Node> {
        self.fds.get_mut(fd).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(Filesys::format(Arc::new(MemDisk::new(2048))).unwrap()).unwrap()
    }

    #[test]
    fn file_lifecycle_through_requests() {
        let mut s = session();
        assert_eq!(
            s.dispatch(Request::Create {
                path: "notes",
                initial_size: 0,
            }),
            0
        );
        let fd = s.dispatch(Request::Open { path: "notes" });
        assert!(fd >= 0);
        let fd = fd as usize;

        assert_eq!(s.dispatch(Request::Write { fd, buf: b"hello, disk" }), 11);
        assert_eq!(s.dispatch(Request::Seek { fd, pos: 7 }), 0);
        let mut buf = [0u8; 4];
        assert_eq!(s.dispatch(Request::Read { fd, buf: &mut buf }), 4);
        assert_eq!(&buf, b"disk");
        assert_eq!(s.dispatch(Request::Tell { fd }), 11);
        assert_eq!(s.dispatch(Request::FileSize { fd }), 11);
        assert_eq!(s.dispatch(Request::IsDir { fd }), 0);
        assert!(s.dispatch(Request::INumber { fd }) > 0);
        assert_eq!(s.dispatch(Request::Close { fd }), 0);
        assert_eq!(s.dispatch(Request::Close { fd }), -1);
    }

    #[test]
    fn directories_through_requests() {
        let mut s = session();
        assert_eq!(s.dispatch(Request::MkDir { path: "d" }), 0);
        assert_eq!(s.dispatch(Request::ChDir { path: "d" }), 0);
        assert_eq!(
            s.dispatch(Request::Create {
                path: "inner",
                initial_size: 0,
            }),
            0
        );
        assert_eq!(s.dispatch(Request::ChDir { path: ".." }), 0);

        let fd = s.dispatch(Request::Open { path: "d" });
        assert!(fd >= 0);
        let fd = fd as usize;
        assert_eq!(s.dispatch(Request::IsDir { fd }), 1);
        let mut name = String::new();
        assert_eq!(s.dispatch(Request::ReadDir { fd, name: &mut name }), 1);
        assert_eq!(name, "inner");
        assert_eq!(s.dispatch(Request::ReadDir { fd, name: &mut name }), 0);
        // Byte I/O has no meaning on a directory fd.
        assert_eq!(s.dispatch(Request::Read { fd, buf: &mut [0u8; 4] }), -1);

        assert_eq!(s.dispatch(Request::Remove { path: "d/inner" }), 0);
        // Still open here, so the directory stays.
        assert_eq!(s.dispatch(Request::Remove { path: "d" }), -1);
        assert_eq!(s.dispatch(Request::Close { fd }), 0);
        assert_eq!(s.dispatch(Request::Remove { path: "d" }), 0);
    }

    #[test]
    fn bad_fds_and_missing_paths_return_the_sentinel() {
        let mut s = session();
        assert_eq!(s.dispatch(Request::Read { fd: 3, buf: &mut [0u8; 1] }), -1);
        assert_eq!(s.dispatch(Request::Tell { fd: 99 }), -1);
        assert_eq!(s.dispatch(Request::Open { path: "missing" }), -1);
        assert_eq!(s.dispatch(Request::ChDir { path: "missing" }), -1);
        assert_eq!(s.dispatch(Request::Remove { path: "missing" }), -1);
    }
}
