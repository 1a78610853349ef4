// Buffer cache.
//
// A fixed array of sector-sized entries holding cached copies of device
// sectors. Lookups are a linear scan; replacement is the clock
// (second-chance) algorithm over a single hand. The cache is write-back:
// dirty payloads reach the device only when their entry is evicted or
// the whole cache is flushed.
//
// Locking: one lock guards the entry index (sector tags, state bits, the
// clock hand, the hit/miss counters); each entry additionally owns a
// lock for its 512-byte payload. The order is always index lock first,
// then at most one payload lock, released in reverse.

use crate::block::BlockDevice;
use crate::error::Result;
use crate::param::{CACHE_BLOCKS, SECTOR_SIZE};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use array_macro::array;
use bitflags::bitflags;
use log::{debug, trace};
use std::sync::Arc;

bitflags! {
    struct EntryFlags: u8 {
        const VALID  = 1 << 0;
        const DIRTY  = 1 << 1;
        /// Second-chance bit for the clock hand.
        const RECENT = 1 << 2;
    }
}

#[derive(Clone, Copy)]
struct Meta {
    sector: u32,
    flags: EntryFlags,
}

struct Ctl {
    meta: [Meta; CACHE_BLOCKS],
    hand: usize,
    hits: u64,
    misses: u64,
}

pub struct Bcache {
    dev: Arc<dyn BlockDevice>,
    ctl: SleepLock<Ctl>,
    data: [SleepLock<[u8; SECTOR_SIZE]>; CACHE_BLOCKS],
}

impl Bcache {
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self {
            dev,
            ctl: SleepLock::new(
                Ctl {
                    meta: [Meta {
                        sector: 0,
                        flags: EntryFlags::empty(),
                    }; CACHE_BLOCKS],
                    hand: 0,
                    hits: 0,
                    misses: 0,
                },
                "bcache",
            ),
            data: array![_ => SleepLock::new([0; SECTOR_SIZE], "bcache.entry"); CACHE_BLOCKS],
        }
    }

    fn scan(ctl: &Ctl, sector: u32) -> Option<usize> {
        ctl.meta
            .iter()
            .position(|m| m.flags.contains(EntryFlags::VALID) && m.sector == sector)
    }

    /// Pick an entry for reuse with the clock hand: an invalid entry is
    /// taken on the spot, a recently-used one loses its second chance,
    /// anything else is written back if dirty and invalidated.
    fn evict(&self, ctl: &mut SleepLockGuard<'_, Ctl>) -> Result<usize> {
        loop {
            let i = ctl.hand;
            let m = ctl.meta[i];
            if !m.flags.contains(EntryFlags::VALID) {
                return Ok(i);
            }
            if m.flags.contains(EntryFlags::RECENT) {
                ctl.meta[i].flags.remove(EntryFlags::RECENT);
                ctl.hand = (i + 1) % CACHE_BLOCKS;
                continue;
            }
            if m.flags.contains(EntryFlags::DIRTY) {
                let data = self.data[i].lock();
                self.dev.write(m.sector, &data)?;
                trace!("bcache: wrote back sector {} before reuse", m.sector);
            }
            ctl.meta[i].flags = EntryFlags::empty();
            return Ok(i);
        }
    }

    /// Copy the 512 bytes of `sector` into `dst`.
    pub fn read(&self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let mut ctl = self.ctl.lock();
        if let Some(i) = Self::scan(&ctl, sector) {
            ctl.hits += 1;
            ctl.meta[i].flags.insert(EntryFlags::RECENT);
            let data = self.data[i].lock();
            dst.copy_from_slice(&data[..]);
            return Ok(());
        }
        ctl.misses += 1;
        let i = self.evict(&mut ctl)?;
        let mut data = self.data[i].lock();
        self.dev.read(sector, &mut data)?;
        ctl.meta[i] = Meta {
            sector,
            flags: EntryFlags::VALID | EntryFlags::RECENT,
        };
        dst.copy_from_slice(&data[..]);
        Ok(())
    }

    /// Replace the 512 bytes of `sector` with `src` and mark the entry
    /// dirty. A miss claims an entry without touching the device.
    pub fn write(&self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<()> {
        let mut ctl = self.ctl.lock();
        if let Some(i) = Self::scan(&ctl, sector) {
            ctl.hits += 1;
            ctl.meta[i]
                .flags
                .insert(EntryFlags::RECENT | EntryFlags::DIRTY);
            let mut data = self.data[i].lock();
            data.copy_from_slice(src);
            return Ok(());
        }
        ctl.misses += 1;
        let i = self.evict(&mut ctl)?;
        let mut data = self.data[i].lock();
        data.copy_from_slice(src);
        ctl.meta[i] = Meta {
            sector,
            flags: EntryFlags::VALID | EntryFlags::DIRTY | EntryFlags::RECENT,
        };
        Ok(())
    }

    /// Write every valid dirty entry back to the device and clear the
    /// dirty bits.
    pub fn flush(&self) -> Result<()> {
        let mut ctl = self.ctl.lock();
        let mut written = 0;
        for i in 0..CACHE_BLOCKS {
            let m = ctl.meta[i];
            if m.flags.contains(EntryFlags::VALID | EntryFlags::DIRTY) {
                let data = self.data[i].lock();
                self.dev.write(m.sector, &data)?;
                drop(data);
                ctl.meta[i].flags.remove(EntryFlags::DIRTY);
                written += 1;
            }
        }
        debug!("bcache: flushed {} dirty sectors", written);
        Ok(())
    }

    pub fn hit_count(&self) -> u64 {
        self.ctl.lock().hits
    }

    pub fn miss_count(&self) -> u64 {
        self.ctl.lock().misses
    }

    pub fn reset_stats(&self) {
        let mut ctl = self.ctl.lock();
        ctl.hits = 0;
        ctl.misses = 0;
    }
}
