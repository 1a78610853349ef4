// Priority-donating blocking locks.
//
// Long-term mutual exclusion for filesystem state. A contended acquire
// donates the requester's effective priority down the chain of holders
// before blocking; a release recomputes the holder's priority from the
// waiters that remain and hands the lock to the single most urgent
// waiter. Non-recursive: acquiring a lock already held by the caller is
// a bug, as is a release by anyone but the holder.
//
// Interface:
// * lock() blocks and returns a guard; dropping the guard releases.
// * try_lock() never blocks and never donates.
// * holding() answers for the calling thread only.

use crate::task::{self, LockId};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Condvar;
use std::thread;

pub struct SleepLock<T> {
    id: LockId,
    name: &'static str,
    waitq: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    // Guards release on the acquiring thread; keep them there.
    _not_send: PhantomData<*mut ()>,
}

impl<T> SleepLock<T> {
    pub fn new(data: T, name: &'static str) -> Self {
        Self {
            id: task::register_lock(),
            name,
            waitq: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = task::current();
        let mut reg = task::registry();
        let rec = reg.locks.get_mut(&self.id).unwrap();
        assert!(rec.holder != Some(me), "acquire {}: already held", self.name);
        if rec.holder.is_none() && rec.handoff.is_none() {
            rec.holder = Some(me);
            reg.tasks.get_mut(&me).unwrap().held.push(self.id);
        } else {
            rec.waiters.push(me);
            reg.tasks.get_mut(&me).unwrap().waiting_for = Some(self.id);
            reg.donate_from(me);
            loop {
                reg = match self.waitq.wait(reg) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let rec = reg.locks.get_mut(&self.id).unwrap();
                if rec.handoff == Some(me) {
                    rec.handoff = None;
                    rec.holder = Some(me);
                    break;
                }
            }
            let t = reg.tasks.get_mut(&me).unwrap();
            t.waiting_for = None;
            t.held.push(self.id);
        }
        drop(reg);
        SleepLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Claim the lock only if it is free right now. Does not donate.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let me = task::current();
        let mut reg = task::registry();
        let rec = reg.locks.get_mut(&self.id).unwrap();
        assert!(rec.holder != Some(me), "acquire {}: already held", self.name);
        if rec.holder.is_none() && rec.handoff.is_none() {
            rec.holder = Some(me);
            reg.tasks.get_mut(&me).unwrap().held.push(self.id);
            Some(SleepLockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    pub fn holding(&self) -> bool {
        let me = task::current();
        task::registry().locks[&self.id].holder == Some(me)
    }

    /// Consume the guard, releasing the lock, and hand back the lock
    /// itself so the caller can reacquire later.
    pub fn unlock(guard: SleepLockGuard<'_, T>) -> &'_ SleepLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    fn release(&self) {
        let me = task::current();
        let mut reg = task::registry();
        assert_eq!(
            reg.locks[&self.id].holder,
            Some(me),
            "release {}: not the holder",
            self.name
        );
        reg.locks.get_mut(&self.id).unwrap().holder = None;
        if let Some(next) = reg.take_top_waiter(self.id) {
            reg.locks.get_mut(&self.id).unwrap().handoff = Some(next);
        }
        let t = reg.tasks.get_mut(&me).unwrap();
        t.held.retain(|&l| l != self.id);
        let before = t.effective;
        let after = reg.recompute_effective(me);
        drop(reg);
        self.waitq.notify_all();
        if after < before {
            thread::yield_now();
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        task::registry().locks[&self.id].waiters.len()
    }
}

impl<T> Drop for SleepLock<T> {
    fn drop(&mut self) {
        task::unregister_lock(self.id);
    }
}

impl<'a, T> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
