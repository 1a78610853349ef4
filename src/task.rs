// Task bookkeeping behind the priority-donating lock.
//
// Threads register here lazily the first time they touch a lock. Each
// task carries a base priority and an effective priority; the effective
// one rises while higher-priority tasks wait on locks this task holds
// and is recomputed from the remaining waiters on every release. The
// registry also records which lock a blocked task is waiting for, so a
// donation can be pushed down a chain of holders.
//
// All of this state sits behind one short-held mutex, the hosted stand-in
// for the original's interrupts-off critical sections. Blocked tasks wait
// on their lock's condition variable against this same mutex.

use crate::param::{DONATION_DEPTH, PRI_DEFAULT, PRI_MAX, PRI_MIN};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};

pub(crate) type TaskId = u64;
pub(crate) type LockId = u64;

pub(crate) struct Task {
    pub base: u32,
    pub effective: u32,
    pub waiting_for: Option<LockId>,
    pub held: Vec<LockId>,
}

pub(crate) struct LockRec {
    pub holder: Option<TaskId>,
    pub waiters: Vec<TaskId>,
    /// Waiter chosen by the last release; it owns the lock as soon as it
    /// wakes, so late arrivals cannot barge past it.
    pub handoff: Option<TaskId>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub tasks: HashMap<TaskId, Task>,
    pub locks: HashMap<LockId, LockRec>,
    next_task: TaskId,
    next_lock: LockId,
}

impl Registry {
    /// Push the requester's effective priority down the chain of lock
    /// holders it is transitively blocked on. Truncates once a holder is
    /// at least as urgent, or after a bounded number of links.
    pub fn donate_from(&mut self, from: TaskId) {
        let pri = self.tasks[&from].effective;
        let mut next = self.tasks[&from].waiting_for;
        for _ in 0..DONATION_DEPTH {
            let lock = match next {
                Some(l) => l,
                None => break,
            };
            let holder = match self.locks[&lock].holder {
                Some(h) => h,
                None => break,
            };
            let t = self.tasks.get_mut(&holder).unwrap();
            if t.effective >= pri {
                break;
            }
            t.effective = pri;
            next = t.waiting_for;
        }
    }

    /// Recompute a task's effective priority from its base and the
    /// waiters of the locks it still holds. Donations are recomputed,
    /// never accumulated.
    pub fn recompute_effective(&mut self, id: TaskId) -> u32 {
        let held = self.tasks[&id].held.clone();
        let mut eff = self.tasks[&id].base;
        for lock in held {
            for w in &self.locks[&lock].waiters {
                eff = eff.max(self.tasks[w].effective);
            }
        }
        self.tasks.get_mut(&id).unwrap().effective = eff;
        eff
    }

    /// Remove and return the highest-effective-priority waiter of a
    /// lock. Ties break toward the earliest arrival.
    pub fn take_top_waiter(&mut self, lock: LockId) -> Option<TaskId> {
        let rec = self.locks.get_mut(&lock).unwrap();
        if rec.waiters.is_empty() {
            return None;
        }
        let mut top = 0;
        for i in 1..rec.waiters.len() {
            if self.tasks[&rec.waiters[i]].effective > self.tasks[&rec.waiters[top]].effective {
                top = i;
            }
        }
        let id = self.locks.get_mut(&lock).unwrap().waiters.remove(top);
        Some(id)
    }
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(Default::default);

pub(crate) fn registry() -> MutexGuard<'static, Registry> {
    match REGISTRY.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Retire(TaskId);

impl Drop for Retire {
    fn drop(&mut self) {
        registry().tasks.remove(&self.0);
    }
}

thread_local! {
    static CURRENT: Cell<Option<TaskId>> = Cell::new(None);
    static RETIRE: RefCell<Option<Retire>> = RefCell::new(None);
}

/// Task id of the calling thread, registering it on first use.
pub(crate) fn current() -> TaskId {
    CURRENT.with(|c| match c.get() {
        Some(id) => id,
        None => {
            let mut reg = registry();
            let id = reg.next_task;
            reg.next_task += 1;
            reg.tasks.insert(
                id,
                Task {
                    base: PRI_DEFAULT,
                    effective: PRI_DEFAULT,
                    waiting_for: None,
                    held: Vec::new(),
                },
            );
            drop(reg);
            c.set(Some(id));
            RETIRE.with(|r| *r.borrow_mut() = Some(Retire(id)));
            id
        }
    })
}

pub(crate) fn register_lock() -> LockId {
    let mut reg = registry();
    let id = reg.next_lock;
    reg.next_lock += 1;
    reg.locks.insert(
        id,
        LockRec {
            holder: None,
            waiters: Vec::new(),
            handoff: None,
        },
    );
    id
}

pub(crate) fn unregister_lock(id: LockId) {
    registry().locks.remove(&id);
}

/// Set the calling thread's base priority.
pub fn set_priority(priority: u32) {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {} out of range",
        priority
    );
    let me = current();
    let mut reg = registry();
    reg.tasks.get_mut(&me).unwrap().base = priority;
    reg.recompute_effective(me);
}

/// The calling thread's base priority.
pub fn priority() -> u32 {
    let me = current();
    registry().tasks[&me].base
}

/// The calling thread's effective (donation-adjusted) priority.
pub fn effective_priority() -> u32 {
    let me = current();
    registry().tasks[&me].effective
}

#[cfg(test)]
pub(crate) fn snapshot(id: TaskId) -> Option<(u32, u32)> {
    registry().tasks.get(&id).map(|t| (t.base, t.effective))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_with_default_priority() {
        let me = current();
        let (base, eff) = snapshot(me).unwrap();
        assert_eq!(base, PRI_DEFAULT);
        assert_eq!(eff, PRI_DEFAULT);
    }

    #[test]
    fn set_priority_moves_base_and_effective() {
        std::thread::spawn(|| {
            set_priority(PRI_MAX);
            assert_eq!(priority(), PRI_MAX);
            assert_eq!(effective_priority(), PRI_MAX);
            set_priority(PRI_MIN);
            assert_eq!(effective_priority(), PRI_MIN);
        })
        .join()
        .unwrap();
    }

    #[test]
    #[should_panic]
    fn rejects_out_of_range_priority() {
        set_priority(PRI_MAX + 1);
    }
}
