//! Next-fit search.
//!
//! The scan resumes right after the block the previous search returned and
//! only wraps to the front of the heap when the tail has nothing large
//! enough. Heads of long-lived heaps tend to be full of small holes; not
//! walking them on every request is what makes repeated allocations cheap.

use crate::{
  block::{self, Addr},
  heap::{FIRST_BLOCK, Heap},
  region::Region,
};

impl<R: Region> Heap<R> {
  /// First free block of at least `size` bytes, searching from the cursor.
  /// A hit becomes the new cursor; a miss leaves it alone.
  pub(crate) fn find_fit(
    &mut self,
    size: usize,
  ) -> Option<Addr> {
    let found = match self.cursor {
      None => self.scan(size, FIRST_BLOCK, None),
      Some(cursor) => {
        let after = block::next(self.region.bytes(), cursor);
        self
          .scan(size, after, None)
          .or_else(|| self.scan(size, FIRST_BLOCK, Some(cursor)))
      }
    };

    if found.is_some() {
      self.cursor = found;
    }
    found
  }

  /// Walks from `from` to the epilogue, or stops once `until` was visited.
  fn scan(
    &mut self,
    size: usize,
    from: Addr,
    until: Option<Addr>,
  ) -> Option<Addr> {
    let heap = self.region.bytes();
    let mut bp = from;

    loop {
      let tag = block::get(heap, block::header(bp));
      if tag.size() == 0 {
        return None;
      }

      self.search_steps += 1;
      if !tag.is_allocated() && tag.size() >= size {
        return Some(bp);
      }
      if until.is_some_and(|until| bp >= until) {
        return None;
      }

      bp = Addr(bp.0 + tag.size());
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{Addr, Config, Heap, InitialGrowth, region::VecRegion};

  fn heap(chunk: usize) -> Heap<VecRegion> {
    Heap::with_config(
      VecRegion::with_capacity(1 << 22),
      Config::default().chunk_size(chunk).check_invariants(true),
    )
    .unwrap()
  }

  #[test]
  fn test_search_resumes_after_cursor() {
    let mut heap = heap(4096);

    let a = heap.allocate(40).unwrap().unwrap();
    let _b = heap.allocate(40).unwrap().unwrap();
    let c = heap.allocate(40).unwrap().unwrap();
    let _d = heap.allocate(40).unwrap().unwrap();
    heap.free(a);
    heap.free(c);

    // First fit would hand back `a`; next fit keeps going from `d`.
    let e = heap.allocate(40).unwrap().unwrap();
    assert!(e > c);
    assert_eq!(heap.cursor(), Some(e));
  }

  #[test]
  fn test_search_wraps_to_the_front() {
    let mut heap = heap(4096);

    let a = heap.allocate(100).unwrap().unwrap();
    let b = heap.allocate(100).unwrap().unwrap();
    // Swallow the rest of the chunk so the tail holds nothing.
    let rest = heap.allocate(4096 - 224 - 8).unwrap().unwrap();
    assert_eq!(heap.stats().free_blocks, 0);
    heap.free(a);

    let size = heap.heap_size();
    let c = heap.allocate(100).unwrap().unwrap();
    assert_eq!(c, a);
    assert_eq!(heap.heap_size(), size);
    assert_eq!(heap.cursor(), Some(a));

    heap.free(b);
    heap.free(rest);
  }

  #[test]
  fn test_miss_leaves_cursor_and_grows() {
    let mut heap = heap(4096);

    let a = heap.allocate(64).unwrap().unwrap();
    assert_eq!(heap.cursor(), Some(a));
    assert_eq!(heap.find_fit(1 << 16), None);
    assert_eq!(heap.cursor(), Some(a));

    let big = heap.allocate(1 << 16).unwrap().unwrap();
    assert_eq!(heap.cursor(), Some(big));
  }

  #[test]
  fn test_cursor_on_epilogue() {
    let mut heap = heap(4096);

    let a = heap.allocate(100).unwrap().unwrap();
    heap.free(a);
    // Merged block is the whole chunk; point at the epilogue behind it.
    heap.cursor = Some(Addr(heap.heap_size()));

    assert_eq!(heap.find_fit(112), Some(a));
  }

  #[test]
  fn test_identical_allocations_scan_constant_blocks() {
    let mut heap = heap(1 << 16);

    let mut worst = 0;
    for _ in 0..1000 {
      let before = heap.search_steps();
      heap.allocate(32).unwrap().unwrap();
      worst = worst.max(heap.search_steps() - before);
    }

    // 1000 * 40 bytes fits in the first chunk: every search is a hit on
    // the block right after the previous one.
    assert_eq!(heap.heap_size(), 16 + (1 << 16));
    assert_eq!(worst, 1);
  }

  #[test]
  fn test_growth_does_not_reset_progress() {
    let mut heap = Heap::with_config(
      VecRegion::with_capacity(1 << 22),
      Config::default()
        .growth(InitialGrowth::Lazy)
        .check_invariants(false),
    )
    .unwrap();

    let rounds = 5000u64;
    for _ in 0..rounds {
      heap.allocate(100).unwrap().unwrap();
    }

    // A wrap-around scan happens once per chunk, never once per call.
    let per_chunk = 4096 / 112 + 1;
    let chunks = rounds / per_chunk + 1;
    assert!(heap.search_steps() < rounds * 3 + chunks * per_chunk * chunks);
    assert!(heap.check().is_ok());
  }
}
