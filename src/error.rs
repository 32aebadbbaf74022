use thiserror::Error;

use crate::block::Addr;

/// Failures surfaced by the public allocator calls.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The backing region refused to grow.
  #[error("backing region exhausted while growing by {requested} bytes")]
  OutOfMemory { requested: usize },
  /// The request cannot be described by a 32-bit boundary tag.
  #[error("request of {0} bytes exceeds the largest encodable block")]
  TooLarge(usize),
  /// The heap must be laid out at the very start of its region.
  #[error("backing region already holds {0} bytes")]
  RegionNotEmpty(usize),
  /// The address does not name a live block of this heap.
  #[error("{0} is not a live block")]
  InvalidAddress(Addr),
}

/// A broken heap invariant, reported by [`crate::Heap::check`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
  #[error("prologue is damaged: {0}")]
  BadPrologue(&'static str),
  #[error("epilogue at {0} is not a zero-size allocated tag")]
  BadEpilogue(Addr),
  #[error("block {addr} has header {header:#x} but footer {footer:#x}")]
  TagMismatch { addr: Addr, header: u32, footer: u32 },
  #[error("block {addr} has invalid size {size}")]
  BadSize { addr: Addr, size: usize },
  #[error("block {0} is not 8-byte aligned")]
  Misaligned(Addr),
  #[error("free blocks {0} and {1} are adjacent")]
  UncoalescedFree(Addr, Addr),
  #[error("block walk ends at {walked:#x} but the region ends at {region:#x}")]
  WalkOverrun { walked: usize, region: usize },
  #[error("next-fit cursor {0} does not name a block")]
  DanglingCursor(Addr),
}
