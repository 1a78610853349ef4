//! A teaching-style on-disk filesystem over a raw block device.
//!
//! Four layers, leaves first:
//!   - sleeplock: blocking mutual exclusion with priority donation,
//!     used by every layer above it.
//!   - bio: a fixed-size write-back buffer cache of device sectors
//!     with clock-hand replacement.
//!   - inode: multilevel-indexed inodes with sparse growth, shared
//!     through a canonical open-inode table.
//!   - dir: directories as typed inodes, plus absolute and relative
//!     path resolution with per-task working directories.
//!
//! The device underneath is anything implementing [`BlockDevice`];
//! [`MemDisk`] serves tests and [`FileDisk`] serves disk images. The
//! free map hands out sectors, `Filesys` ties a mounted volume
//! together, and `Session` exposes the request surface the call
//! dispatcher drives.

pub mod bio;
pub mod block;
pub mod dir;
pub mod error;
pub mod file;
pub mod freemap;
pub mod fs;
pub mod inode;
pub mod param;
mod path;
pub mod sleeplock;
pub mod sysfile;
pub mod task;

pub use crate::block::{BlockDevice, FileDisk, MemDisk};
pub use crate::dir::Dir;
pub use crate::error::{Error, Result};
pub use crate::file::File;
pub use crate::fs::Filesys;
pub use crate::inode::InodeHandle;
pub use crate::sleeplock::{SleepLock, SleepLockGuard};
pub use crate::sysfile::{Request, Session};
