use std::cell::{OnceCell, RefCell};

use crate::config;
use crate::region::{Region, RegionId};

pub const SCRATCH_SLOT_COUNT: usize = 2;
pub const SCRATCH_SLOT_CAPACITY: usize = 8 * 1024 * 1024;

struct Slots {
    ids: [RegionId; SCRATCH_SLOT_COUNT],
    regions: [RefCell<Region>; SCRATCH_SLOT_COUNT],
}

impl Slots {
    fn new(capacity: usize) -> Self {
        let regions: [RefCell<Region>; SCRATCH_SLOT_COUNT] =
            std::array::from_fn(|_| RefCell::new(Region::with_capacity(capacity)));
        let ids = std::array::from_fn(|i| regions[i].borrow().id());
        Slots { ids, regions }
    }
}

/// A fixed set of throwaway regions for function-local temporaries.
///
/// Callers name the regions they already hold views into; the pool hands out
/// the first slot that is not one of them, so a callee's scratch work can
/// never rewind memory its caller is still reading.
pub struct ScratchPool {
    slot_capacity: usize,
    slots: OnceCell<Slots>,
}

impl ScratchPool {
    pub fn new(slot_capacity: usize) -> Self {
        ScratchPool {
            slot_capacity,
            slots: OnceCell::new(),
        }
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    pub fn is_initialized(&self) -> bool {
        self.slots.get().is_some()
    }

    pub fn slot_ids(&self) -> Option<[RegionId; SCRATCH_SLOT_COUNT]> {
        self.slots.get().map(|slots| slots.ids)
    }

    /// Runs `f` on a mark pushed on the first slot not listed in `conflicts`.
    ///
    /// # Panics
    ///
    /// Panics when every slot conflicts, or when the chosen slot is already
    /// lent to an enclosing caller that did not list it as a conflict.
    pub fn with<R>(&self, conflicts: &[RegionId], f: impl FnOnce(&Region) -> R) -> R {
        let slots = self
            .slots
            .get_or_init(|| Slots::new(self.slot_capacity));
        let Some(index) = slots.ids.iter().position(|id| !conflicts.contains(id)) else {
            panic!(
                "scratch pool exhausted: all {SCRATCH_SLOT_COUNT} slots conflict with the caller"
            );
        };
        let Ok(mut region) = slots.regions[index].try_borrow_mut() else {
            panic!(
                "scratch slot {index} ({}) is already in use; pass it as a conflict",
                slots.ids[index]
            );
        };
        region.scoped(f)
    }

    pub fn release(&mut self) {
        self.slots.take();
    }
}

thread_local! {
    static THREAD_POOL: RefCell<ScratchPool> =
        RefCell::new(ScratchPool::new(config::scratch_slot_capacity()));
}

pub fn with_scratch<R>(conflicts: &[RegionId], f: impl FnOnce(&Region) -> R) -> R {
    THREAD_POOL.with(|pool| pool.borrow().with(conflicts, f))
}

/// Frees the calling thread's scratch regions. The pool is rebuilt on the
/// next request.
pub fn release_scratch_pool() {
    THREAD_POOL.with(|pool| {
        let Ok(mut pool) = pool.try_borrow_mut() else {
            panic!("cannot release the scratch pool while scratch space is in use");
        };
        pool.release();
    });
}
