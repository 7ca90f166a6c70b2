use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;

use crate::region::Region;

pub const SEQ_DEFAULT_CAPACITY: usize = 8;

/// A growable array living inside a [`Region`].
///
/// Growth doubles the capacity. When nothing else has been allocated from
/// the region since the array was last grown, the array is extended in place;
/// otherwise it is copied to a fresh span and the old span is abandoned.
/// Addresses of elements are not stable across a growing push.
pub struct Seq<'r, T: Copy> {
    region: &'r Region,
    items: NonNull<T>,
    len: usize,
    capacity: usize,
    _items: PhantomData<&'r mut [T]>,
}

impl<'r, T: Copy> Seq<'r, T> {
    pub fn new(region: &'r Region) -> Self {
        Seq {
            region,
            items: NonNull::dangling(),
            len: 0,
            capacity: 0,
            _items: PhantomData,
        }
    }

    pub fn with_capacity(region: &'r Region, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::new(region);
        }
        Seq {
            region,
            items: region.alloc_uninit::<T>(capacity),
            len: 0,
            capacity,
            _items: PhantomData,
        }
    }

    pub fn region(&self) -> &'r Region {
        self.region
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, value: T) -> &mut T {
        if self.len == self.capacity {
            self.grow();
        }
        // SAFETY: `len < capacity` after growing.
        unsafe { self.write_slot(value) }
    }

    pub fn push_within_capacity(&mut self, value: T) -> Result<&mut T, T> {
        if self.len == self.capacity {
            return Err(value);
        }
        // SAFETY: `len < capacity` was just checked.
        Ok(unsafe { self.write_slot(value) })
    }

    /// # Safety
    ///
    /// `self.len < self.capacity` must hold.
    unsafe fn write_slot(&mut self, value: T) -> &mut T {
        let slot = self.items.as_ptr().add(self.len);
        slot.write(value);
        self.len += 1;
        &mut *slot
    }

    fn grow(&mut self) {
        if self.capacity == 0 {
            self.items = self.region.alloc_uninit::<T>(SEQ_DEFAULT_CAPACITY);
            self.capacity = SEQ_DEFAULT_CAPACITY;
            return;
        }

        let Some(new_capacity) = self.capacity.checked_mul(2) else {
            panic!("sequence capacity overflow at {} elements", self.capacity);
        };

        // SAFETY: one-past-the-end of the current array.
        let end = unsafe { self.items.as_ptr().add(self.capacity) }.cast::<u8>();
        if std::mem::size_of::<T>() > 0 && self.region.ends_at(end) {
            let extra = self.region.alloc_uninit::<T>(self.capacity);
            if extra.as_ptr().cast::<u8>() == end {
                self.capacity = new_capacity;
                return;
            }
            // The region padded the extension; fall through and relocate.
        }

        let moved = self.region.alloc_uninit::<T>(new_capacity);
        // SAFETY: both spans are valid for `len` elements and live in
        // disjoint parts of the region.
        unsafe {
            std::ptr::copy_nonoverlapping(self.items.as_ptr(), moved.as_ptr(), self.len);
        }
        self.items = moved;
        self.capacity = new_capacity;
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` slots are initialised.
        unsafe { std::slice::from_raw_parts(self.items.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: the first `len` slots are initialised and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.items.as_ptr(), self.len) }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<T: Copy> Index<usize> for Seq<'_, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: Copy> IndexMut<usize> for Seq<'_, T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<'a, T: Copy> IntoIterator for &'a Seq<'_, T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Copy> Extend<T> for Seq<'_, T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for v in iter {
            self.push(v);
        }
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for Seq<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_order_across_growth() {
        let region = Region::with_capacity(64 * 1024);
        let mut seq = Seq::with_capacity(&region, 1);
        for i in 0..1000u32 {
            seq.push(i);
        }
        assert_eq!(seq.len(), 1000);
        assert!(seq.capacity() >= 1000);
        assert!(seq.iter().copied().eq(0..1000u32));
    }

    #[test]
    fn growth_extends_in_place_when_last_allocation() {
        let region = Region::with_capacity(4096);
        let mut seq = Seq::with_capacity(&region, 4);
        seq.extend([1u64, 2, 3, 4]);
        let before = seq.as_slice().as_ptr();
        let used = region.used();
        seq.push(5);
        assert_eq!(seq.as_slice().as_ptr(), before);
        assert_eq!(seq.capacity(), 8);
        assert_eq!(region.used(), used + 4 * 8);
        assert_eq!(seq.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn growth_relocates_after_interleaved_allocation() {
        let region = Region::with_capacity(4096);
        let mut seq = Seq::with_capacity(&region, 2);
        seq.push(10u16);
        seq.push(20);
        let before = seq.as_slice().as_ptr();
        let other = region.alloc_copy(b"in the way");
        seq.push(30);
        assert_ne!(seq.as_slice().as_ptr(), before);
        assert_eq!(seq.as_slice(), &[10, 20, 30]);
        assert_eq!(other, b"in the way");
    }

    #[test]
    fn empty_sequence_allocates_default_capacity() {
        let region = Region::with_capacity(1024);
        let mut seq: Seq<'_, u8> = Seq::new(&region);
        assert_eq!(region.used(), 0);
        seq.push(1);
        assert_eq!(seq.capacity(), SEQ_DEFAULT_CAPACITY);
    }

    #[test]
    fn push_within_capacity_refuses_when_full() {
        let region = Region::with_capacity(1024);
        let mut seq = Seq::with_capacity(&region, 2);
        assert!(seq.push_within_capacity('a').is_ok());
        assert!(seq.push_within_capacity('b').is_ok());
        assert_eq!(seq.push_within_capacity('c'), Err('c'));
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn index_and_clear() {
        let region = Region::with_capacity(1024);
        let mut seq = Seq::new(&region);
        seq.extend([3i32, 1, 4]);
        seq[1] = 9;
        assert_eq!(seq[1], 9);
        assert_eq!(seq.get(3), None);
        seq.clear();
        assert!(seq.is_empty());
    }

    #[test]
    fn holds_borrowed_slices() {
        let region = Region::with_capacity(1024);
        let mut words: Seq<'_, &[u8]> = Seq::new(&region);
        words.push(region.alloc_copy(b"cc"));
        words.push(b"-o");
        assert_eq!(words.as_slice(), &[&b"cc"[..], &b"-o"[..]]);
    }
}
