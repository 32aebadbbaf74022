//! Walking, measuring and verifying the block sequence.

use std::fmt;

use crate::{
  block::{self, Addr, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  error::HeapError,
  heap::{FIRST_BLOCK, Heap},
  region::Region,
};

/// One block as seen by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: Addr,
  /// Total size, tags included.
  pub size: usize,
  pub allocated: bool,
}

impl BlockInfo {
  /// Bytes available to the caller.
  pub fn payload_size(&self) -> usize {
    self.size - DSIZE
  }
}

/// Iterator over the blocks between the prologue and the epilogue.
pub struct Blocks<'a> {
  heap: &'a [u8],
  bp: Addr,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    if self.bp.0 > self.heap.len() {
      return None;
    }

    let tag = block::get(self.heap, block::header(self.bp));
    if tag.size() == 0 {
      return None;
    }

    let info = BlockInfo {
      addr: self.bp,
      size: tag.size(),
      allocated: tag.is_allocated(),
    };
    self.bp = Addr(self.bp.0 + tag.size());
    Some(info)
  }
}

/// Occupancy figures of a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes taken from the region, sentinels included.
  pub heap_bytes: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  pub largest_free: usize,
}

impl<R: Region> Heap<R> {
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      heap: self.region.bytes(),
      bp: FIRST_BLOCK,
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        heap_bytes: self.heap_size(),
        ..HeapStats::default()
      },
      |mut stats, info| {
        if info.allocated {
          stats.allocated_bytes += info.size;
          stats.allocated_blocks += 1;
        } else {
          stats.free_bytes += info.size;
          stats.free_blocks += 1;
          stats.largest_free = stats.largest_free.max(info.size);
        }
        stats
      },
    )
  }

  /// Verifies every heap invariant and reports the first one broken:
  /// intact sentinels, matching header and footer, sane sizes, aligned
  /// payloads, no two free neighbours, a walk that ends exactly at the end
  /// of the region and a cursor that names a block.
  pub fn check(&self) -> Result<(), HeapError> {
    let heap = self.region.bytes();
    let end = heap.len();

    if end < 4 * WSIZE {
      return Err(HeapError::BadPrologue("region is shorter than the sentinels"));
    }
    let prologue = block::get(heap, WSIZE);
    if prologue != Tag::pack(DSIZE, true) {
      return Err(HeapError::BadPrologue("header is not 8/allocated"));
    }
    if block::get(heap, 2 * WSIZE) != prologue {
      return Err(HeapError::BadPrologue("footer does not match header"));
    }

    let mut bp = FIRST_BLOCK;
    let mut last_free: Option<Addr> = None;
    let mut cursor_found = self.cursor.is_none();

    loop {
      if block::header(bp) + WSIZE > end {
        return Err(HeapError::WalkOverrun {
          walked: bp.0,
          region: end,
        });
      }
      if self.cursor == Some(bp) {
        cursor_found = true;
      }

      let tag = block::get(heap, block::header(bp));
      let size = tag.size();
      if size == 0 {
        break;
      }

      if bp.0 % DSIZE != 0 {
        return Err(HeapError::Misaligned(bp));
      }
      if size < MIN_BLOCK_SIZE {
        return Err(HeapError::BadSize { addr: bp, size });
      }
      if bp.0 + size > end {
        return Err(HeapError::WalkOverrun {
          walked: bp.0 + size,
          region: end,
        });
      }

      let footer = block::get(heap, bp.0 + size - DSIZE);
      if footer != tag {
        return Err(HeapError::TagMismatch {
          addr: bp,
          header: tag.raw(),
          footer: footer.raw(),
        });
      }

      if tag.is_allocated() {
        last_free = None;
      } else {
        if let Some(prev) = last_free {
          return Err(HeapError::UncoalescedFree(prev, bp));
        }
        last_free = Some(bp);
      }

      bp = Addr(bp.0 + size);
    }

    if !block::is_allocated(heap, bp) {
      return Err(HeapError::BadEpilogue(bp));
    }
    if bp.0 != end {
      return Err(HeapError::WalkOverrun {
        walked: bp.0,
        region: end,
      });
    }
    match self.cursor {
      Some(cursor) if !cursor_found => Err(HeapError::DanglingCursor(cursor)),
      _ => Ok(()),
    }
  }
}

impl<R: Region> fmt::Display for Heap<R> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let stats = self.stats();
    writeln!(
      f,
      "heap: {} bytes, {} allocated in {} blocks, {} free in {} blocks",
      stats.heap_bytes,
      stats.allocated_bytes,
      stats.allocated_blocks,
      stats.free_bytes,
      stats.free_blocks,
    )?;

    for info in self.blocks() {
      let marker = if self.cursor == Some(info.addr) { " <- cursor" } else { "" };
      writeln!(
        f,
        "  {:>10} {:>8} {}{}",
        info.addr.to_string(),
        info.size,
        if info.allocated { "alloc" } else { "free" },
        marker,
      )?;
    }
    write!(f, "  {:>10} epilogue", Addr(self.heap_size()).to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Config, region::VecRegion};

  fn heap() -> Heap<VecRegion> {
    Heap::with_config(
      VecRegion::with_capacity(1 << 20),
      Config::default().check_invariants(false),
    )
    .unwrap()
  }

  #[test]
  fn test_blocks_and_stats() {
    let mut heap = heap();

    let a = heap.allocate(24).unwrap().unwrap();
    let b = heap.allocate(100).unwrap().unwrap();
    let c = heap.allocate(8).unwrap().unwrap();
    heap.free(b);

    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(
      blocks,
      vec![
        BlockInfo {
          addr: a,
          size: 32,
          allocated: true,
        },
        BlockInfo {
          addr: b,
          size: 112,
          allocated: false,
        },
        BlockInfo {
          addr: c,
          size: 16,
          allocated: true,
        },
        BlockInfo {
          addr: Addr(c.0 + 16),
          size: 4096 - 160,
          allocated: false,
        },
      ]
    );
    assert_eq!(blocks[1].payload_size(), 104);

    assert_eq!(
      heap.stats(),
      HeapStats {
        heap_bytes: 16 + 4096,
        allocated_bytes: 48,
        free_bytes: 4096 - 48,
        allocated_blocks: 2,
        free_blocks: 2,
        largest_free: 4096 - 160,
      }
    );
  }

  #[test]
  fn test_healthy_heap_passes() {
    let mut heap = heap();
    assert_eq!(heap.check(), Ok(()));

    let a = heap.allocate(300).unwrap().unwrap();
    let b = heap.allocate(5000).unwrap().unwrap();
    heap.free(a);
    assert_eq!(heap.check(), Ok(()));
    heap.free(b);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();

    let footer = block::footer(heap.region.bytes(), a);
    block::put(heap.region.bytes_mut(), footer, Tag::pack(56, true));

    assert_eq!(
      heap.check(),
      Err(HeapError::TagMismatch {
        addr: a,
        header: 49,
        footer: 57,
      })
    );
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();
    let b = heap.allocate(40).unwrap().unwrap();
    let _c = heap.allocate(40).unwrap().unwrap();

    // Mark both free without coalescing.
    block::set(heap.region.bytes_mut(), a, 48, false);
    block::set(heap.region.bytes_mut(), b, 48, false);

    assert_eq!(heap.check(), Err(HeapError::UncoalescedFree(a, b)));
  }

  #[test]
  fn test_detects_bad_sizes_and_sentinels() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();

    let saved = heap.region.bytes().to_vec();

    block::put(heap.region.bytes_mut(), block::header(a), Tag::pack(8, true));
    assert_eq!(heap.check(), Err(HeapError::BadSize { addr: a, size: 8 }));
    heap.region.bytes_mut().copy_from_slice(&saved);

    block::put(heap.region.bytes_mut(), WSIZE, Tag::pack(16, true));
    assert!(matches!(heap.check(), Err(HeapError::BadPrologue(_))));
    heap.region.bytes_mut().copy_from_slice(&saved);

    let end = heap.heap_size();
    block::put(heap.region.bytes_mut(), end - WSIZE, Tag::pack(0, false));
    assert_eq!(heap.check(), Err(HeapError::BadEpilogue(Addr(end))));
    heap.region.bytes_mut().copy_from_slice(&saved);

    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_detects_dangling_cursor() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();

    heap.cursor = Some(Addr(a.0 + 8));
    assert_eq!(heap.check(), Err(HeapError::DanglingCursor(Addr(a.0 + 8))));
  }

  #[test]
  fn test_display_lists_blocks() {
    let mut heap = heap();
    let a = heap.allocate(24).unwrap().unwrap();

    let dump = heap.to_string();
    assert!(dump.starts_with("heap: 4112 bytes, 32 allocated in 1 blocks"));
    assert!(dump.contains(&format!("{a}")));
    assert!(dump.contains("alloc <- cursor"));
    assert!(dump.ends_with("0x1010 epilogue"));
  }
}
