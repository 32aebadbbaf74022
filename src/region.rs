//! Backing regions: the memory the heap lives in and the only thing it asks
//! the outside world for.
//!
//! A region behaves like the program break: it starts empty, grows by exact
//! byte counts on request and reports where the previous end was. It never
//! shrinks and never grows partially.

use std::{ptr, slice};

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap,
  munmap,
};
use log::warn;

/// Contract between the heap and whatever supplies its memory.
pub trait Region {
  /// Extends the region by exactly `delta` bytes and returns the previous
  /// end, or `None` if the region is exhausted (nothing changes then).
  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<usize>;

  /// Current end of the region, in bytes from its start.
  fn end(&self) -> usize;

  /// The usable bytes `[0, end)`.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Address of the first byte. Offsets handed out by the heap are relative
  /// to it.
  fn base(&self) -> *const u8;
}

/// A region carved out of one anonymous `mmap` reservation.
///
/// The whole `capacity` is mapped up front with `MAP_NORESERVE`, so pages
/// only cost memory once the heap touches them; `grow` just moves a break
/// inside the reservation, the way `sbrk` moves the program break.
pub struct MmapRegion {
  base: *mut u8,
  capacity: usize,
  brk: usize,
}

impl MmapRegion {
  /// Reserves `capacity` bytes of address space. Returns `None` if the
  /// kernel refuses the mapping.
  pub fn reserve(capacity: usize) -> Option<Self> {
    if capacity == 0 {
      return None;
    }

    let addr = unsafe {
      mmap(
        ptr::null_mut(),
        capacity,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
      )
    };

    if addr == MAP_FAILED {
      warn!("mmap of {capacity} bytes failed");
      return None;
    }

    Some(Self {
      base: addr as *mut u8,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Region for MmapRegion {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<usize> {
    let new_brk = self.brk.checked_add(delta)?;
    if new_brk > self.capacity {
      return None;
    }
    let old = self.brk;
    self.brk = new_brk;
    Some(old)
  }

  fn end(&self) -> usize {
    self.brk
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `[base, base + brk)` lies inside the live mapping and is only
    // reachable through this region.
    unsafe { slice::from_raw_parts(self.base, self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` makes the borrow unique.
    unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
  }

  fn base(&self) -> *const u8 {
    self.base
  }
}

impl Drop for MmapRegion {
  fn drop(&mut self) {
    unsafe {
      munmap(self.base as *mut c_void, self.capacity);
    }
  }
}

/// A bounded region backed by an ordinary vector of words.
///
/// Storing `u64`s keeps the base 8-byte aligned, so offsets that are
/// multiples of 8 are also aligned addresses. The whole capacity is reserved
/// when the region is created and growth only zero-fills inside that
/// reservation, so the base never moves.
pub struct VecRegion {
  words: Vec<u64>,
  capacity: usize,
  brk: usize,
}

impl VecRegion {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      words: Vec::with_capacity(capacity.div_ceil(size_of::<u64>())),
      capacity,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Region for VecRegion {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<usize> {
    let new_brk = self.brk.checked_add(delta)?;
    if new_brk > self.capacity {
      return None;
    }
    let words = new_brk.div_ceil(size_of::<u64>());
    if words > self.words.len() {
      // Within the reserved capacity, so no reallocation.
      self.words.resize(words, 0);
    }
    let old = self.brk;
    self.brk = new_brk;
    Some(old)
  }

  fn end(&self) -> usize {
    self.brk
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `words` holds at least `brk` initialised bytes and u8 has no
    // alignment requirement.
    unsafe { slice::from_raw_parts(self.words.as_ptr() as *const u8, self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, borrowed uniquely through `&mut self`.
    unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.brk) }
  }

  fn base(&self) -> *const u8 {
    self.words.as_ptr() as *const u8
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(region: &mut impl Region) {
    assert_eq!(region.end(), 0);
    assert_eq!(region.grow(16), Some(0));
    assert_eq!(region.grow(4096), Some(16));
    assert_eq!(region.end(), 4112);
    assert_eq!(region.bytes().len(), 4112);

    region.bytes_mut()[4111] = 0xAB;
    assert_eq!(region.bytes()[4111], 0xAB);
    assert_eq!(region.base() as usize % 8, 0);

    // Refusing to grow leaves the region untouched.
    assert_eq!(region.grow(1 << 20), None);
    assert_eq!(region.end(), 4112);
    assert_eq!(region.bytes()[4111], 0xAB);
  }

  #[test]
  fn test_vec_region() {
    let mut region = VecRegion::with_capacity(8192);
    exercise(&mut region);
    assert_eq!(region.capacity(), 8192);
  }

  #[test]
  fn test_mmap_region() {
    let mut region = MmapRegion::reserve(8192).unwrap();
    exercise(&mut region);
    assert_eq!(region.capacity(), 8192);
  }

  #[test]
  fn test_grow_to_exact_capacity() {
    let mut region = VecRegion::with_capacity(64);
    assert_eq!(region.grow(64), Some(0));
    assert_eq!(region.grow(8), None);
    assert_eq!(region.grow(0), Some(64));
  }

  #[test]
  fn test_base_is_stable_across_growth() {
    let mut vec_region = VecRegion::with_capacity(1 << 16);
    let mut mmap_region = MmapRegion::reserve(1 << 16).unwrap();
    vec_region.grow(16).unwrap();
    mmap_region.grow(16).unwrap();
    let vec_base = vec_region.base();
    let mmap_base = mmap_region.base();

    let mut noise = Vec::new();
    while vec_region.grow(4096).is_some() {
      mmap_region.grow(4096).unwrap();
      noise.push(vec![0u8; 4096]);
      assert_eq!(vec_region.base(), vec_base);
      assert_eq!(mmap_region.base(), mmap_base);
    }
    assert_eq!(vec_region.end(), 16 + 15 * 4096);
  }

  #[test]
  fn test_zero_capacity_mmap_is_refused() {
    assert!(MmapRegion::reserve(0).is_none());
  }
}
