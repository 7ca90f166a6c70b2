use std::alloc::{self, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

pub const BACKING_ALIGN: usize = 16;

const POISON_BYTE: u8 = 0xCD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

impl RegionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RegionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// Types for which the all-zero bit pattern is a valid value.
///
/// # Safety
///
/// Implementors must be valid when every byte of their representation is zero.
pub unsafe trait Zeroable: Copy {}

macro_rules! zeroable {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Zeroable for $t {})*
    };
}

zeroable!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char);

unsafe impl<T: Zeroable, const N: usize> Zeroable for [T; N] {}

/// A fixed-capacity bump region.
///
/// Allocation goes through `&self` and hands out views borrowed from the
/// region; resetting the cursor (`pop_mark`, `reset`) needs `&mut self`, so no
/// view can outlive the span it points into.
pub struct Region {
    id: RegionId,
    base: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    cursor: Cell<usize>,
    open_marks: Cell<usize>,
}

// The backing buffer is exclusively owned; `Cell` keeps the region `!Sync`.
unsafe impl Send for Region {}

impl Region {
    pub fn with_capacity(capacity: usize) -> Region {
        let Ok(layout) = Layout::from_size_align(capacity.max(1), BACKING_ALIGN) else {
            crate::fatal::die(
                None,
                format_args!("Out of memory: region capacity {capacity} is not representable"),
            );
        };
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            crate::fatal::die(
                None,
                format_args!("Out of memory: could not acquire {capacity} bytes for a region"),
            );
        };
        Region {
            id: RegionId::next(),
            base,
            layout,
            capacity,
            cursor: Cell::new(0),
            open_marks: Cell::new(0),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.cursor.get()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor.get()
    }

    /// Reserves `elem_size * count` zero-filled bytes aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics when the region cannot fit the request. An undersized region is
    /// a configuration bug, not a condition callers recover from.
    pub fn alloc_raw(&self, elem_size: usize, align: usize, count: usize) -> NonNull<u8> {
        assert!(
            align.is_power_of_two(),
            "alignment {align} is not a power of two"
        );
        let cursor = self.cursor.get();
        let at = self.base.as_ptr() as usize + cursor;
        let padding = at.wrapping_neg() & (align - 1);
        let avail = self.capacity - cursor;
        let total = elem_size
            .checked_mul(count)
            .and_then(|n| n.checked_add(padding));
        let total = match total {
            Some(total) if total <= avail => total,
            _ => self.out_of_memory(elem_size, count, avail),
        };

        // SAFETY: `cursor + total <= capacity`, so the span lies inside the
        // backing allocation and is not covered by any earlier allocation.
        unsafe {
            let p = self.base.as_ptr().add(cursor + padding);
            std::ptr::write_bytes(p, 0, total - padding);
            self.cursor.set(cursor + total);
            NonNull::new_unchecked(p)
        }
    }

    #[cold]
    fn out_of_memory(&self, elem_size: usize, count: usize, avail: usize) -> ! {
        panic!(
            "region out of memory: requested {count} x {elem_size} bytes, {avail} of {} bytes available",
            self.capacity
        );
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: Zeroable>(&self, count: usize) -> &mut [T] {
        let p = self.alloc_raw(size_of::<T>(), align_of::<T>(), count);
        // SAFETY: freshly reserved, aligned for `T`, zero-filled, and all-zero
        // bytes are a valid `T`.
        unsafe { std::slice::from_raw_parts_mut(p.as_ptr().cast::<T>(), count) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_bytes(&self, len: usize) -> &mut [u8] {
        self.alloc_slice::<u8>(len)
    }

    #[allow(clippy::mut_from_ref)]
    pub fn alloc_value<T: Copy>(&self, value: T) -> &mut T {
        let p = self.alloc_raw(size_of::<T>(), align_of::<T>(), 1).cast::<T>();
        // SAFETY: freshly reserved and aligned for one `T`.
        unsafe {
            p.as_ptr().write(value);
            &mut *p.as_ptr()
        }
    }

    pub fn alloc_copy(&self, bytes: &[u8]) -> &[u8] {
        let dst = self.alloc_bytes(bytes.len());
        dst.copy_from_slice(bytes);
        dst
    }

    pub fn alloc_str(&self, s: &str) -> &str {
        let bytes = self.alloc_copy(s.as_bytes());
        // SAFETY: byte-for-byte copy of a valid `str`.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    /// Storage for `count` values of `T` that the caller initialises before
    /// reading. The bytes are zeroed but not claimed to be valid `T`s.
    pub(crate) fn alloc_uninit<T>(&self, count: usize) -> NonNull<T> {
        self.alloc_raw(size_of::<T>(), align_of::<T>(), count)
            .cast::<T>()
    }

    pub(crate) fn ends_at(&self, end: *const u8) -> bool {
        self.base.as_ptr() as usize + self.cursor.get() == end as usize
    }

    pub fn push_mark(&self) -> Mark {
        let depth = self.open_marks.get() + 1;
        self.open_marks.set(depth);
        Mark {
            region: self.id,
            saved_cursor: self.cursor.get(),
            depth,
        }
    }

    /// Rewinds the cursor to `mark`, releasing everything allocated since.
    ///
    /// # Panics
    ///
    /// Panics if `mark` belongs to another region, is not the most recently
    /// pushed open mark, or the cursor sits below it.
    pub fn pop_mark(&mut self, mark: Mark) {
        assert_eq!(
            mark.region, self.id,
            "mark from {} popped on {}",
            mark.region, self.id
        );
        assert_eq!(
            mark.depth,
            self.open_marks.get(),
            "marks must be popped in LIFO order"
        );
        let cursor = self.cursor.get();
        assert!(
            cursor >= mark.saved_cursor,
            "region cursor {cursor} is below mark {}",
            mark.saved_cursor
        );

        self.rewind(mark.saved_cursor);
        self.open_marks.set(mark.depth - 1);
    }

    fn rewind(&mut self, to: usize) {
        let cursor = self.cursor.get();
        if cfg!(debug_assertions) {
            // SAFETY: `[to, cursor)` lies inside the backing buffer and
            // `&mut self` guarantees no view into it is alive.
            unsafe {
                std::ptr::write_bytes(self.base.as_ptr().add(to), POISON_BYTE, cursor - to);
            }
        }
        self.cursor.set(to);
    }

    pub fn scoped<R>(&mut self, f: impl FnOnce(&Region) -> R) -> R {
        let mark = self.push_mark();
        let out = f(self);
        self.pop_mark(mark);
        out
    }

    pub fn reset(&mut self) {
        assert_eq!(
            self.open_marks.get(),
            0,
            "cannot reset a region with open marks"
        );
        self.rewind(0);
    }

    #[cfg(test)]
    pub(crate) fn byte_at(&self, offset: usize) -> u8 {
        assert!(offset < self.capacity);
        // SAFETY: in bounds of the backing buffer; only used by tests on
        // bytes that have been written at least once.
        unsafe { *self.base.as_ptr().add(offset) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `base` was returned by `alloc::alloc(self.layout)`.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("used", &self.used())
            .field("capacity", &self.capacity)
            .field("open_marks", &self.open_marks.get())
            .finish()
    }
}

#[must_use = "a mark must be popped to release what was allocated after it"]
#[derive(Debug)]
pub struct Mark {
    region: RegionId,
    saved_cursor: usize,
    depth: usize,
}

impl Mark {
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn saved_cursor(&self) -> usize {
        self.saved_cursor
    }
}
