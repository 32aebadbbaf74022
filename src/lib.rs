//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate implements a **next-fit, boundary-tag allocator** over a single
//! growable region of memory, in the spirit of the classic implicit free list
//! `malloc`.
//!
//! ## Overview
//!
//! The heap is one contiguous run of blocks. There is no separate free list:
//! every block carries its size and allocation bit at both ends, and that is
//! enough to walk the heap in either direction.
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬─────────┬──────────────┬────────────┬──────────────┬─────────┐
//!   │ pad │prologue │   block 1    │  block 2   │   block 3    │epilogue │
//!   │  4  │ 8 / a   │   48 / a     │  112 / f   │  4000 / a    │  0 / a  │
//!   └─────┴─────────┴──────────────┴────────────┴──────────────┴─────────┘
//!                   ▲                                                     ▲
//!                   │                                                     │
//!             first block                                          region end
//! ```
//!
//! The prologue and epilogue are permanently allocated sentinels, so the
//! merge logic never needs to special-case the ends of the heap.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags and block navigation
//!   ├── region     - Backing memory (mmap reservation, vector)
//!   ├── heap       - Heap: init, allocate, free, reallocate, coalescing
//!   ├── fit        - Next-fit search
//!   ├── check      - Block walker, statistics, consistency check
//!   ├── config     - Tunables
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, VecRegion};
//!
//! let mut heap = Heap::init(VecRegion::with_capacity(1 << 20)).unwrap();
//!
//! let addr = heap.allocate(64).unwrap().unwrap();
//! heap.payload_mut(addr).unwrap()[..5].copy_from_slice(b"hello");
//!
//! // Grows in place: the rest of the first chunk is free.
//! let addr = heap.reallocate(Some(addr), 512).unwrap().unwrap();
//! assert_eq!(&heap.payload(addr).unwrap()[..5], b"hello");
//!
//! heap.free(addr);
//! assert_eq!(heap.stats().allocated_blocks, 0);
//! ```
//!
//! ## How It Works
//!
//! Allocation looks for a free block with next fit: the search starts right
//! after the block the previous search returned and wraps to the front only
//! when the tail has nothing large enough.
//!
//! ```text
//!   Next Fit:
//!
//!   ┌───┬───┬───┬───┬───┬───┬───────────────────┐
//!   │ a │ f │ a │ a │ a │ f │       free        │
//!   └───┴───┴───┴───┴───┴───┴───────────────────┘
//!                   ▲       ─────────────────▶
//!                cursor         1. scan to the end
//!     ─────────────▶
//!     2. then wrap around, up to the cursor
//! ```
//!
//! A found block larger than needed is split; the rest becomes a new free
//! block if it can hold two tags and a minimal payload. When nothing fits,
//! the region grows by at least one chunk (4 KiB by default) and the new
//! space is merged with a free block already trailing the heap.
//!
//! Freeing re-tags the block and merges it with free neighbours, so no two
//! free blocks are ever adjacent:
//!
//! ```text
//!   Coalescing:
//!
//!   before free(b):  ┌────────┬────────┬────────┐
//!                    │ a: free│ b: used│ c: free│
//!                    └────────┴────────┴────────┘
//!   after:           ┌──────────────────────────┐
//!                    │        a+b+c: free       │
//!                    └──────────────────────────┘
//! ```
//!
//! Reallocation frees the block first and merges it, which lets a block grow
//! into free neighbours without moving. Only when the merged block is still
//! too small does it search (or grow the heap) and move the payload.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the heap in a `Mutex` to share it
//! - **Never shrinks**: memory is not returned to the region
//! - **8-byte alignment**: stronger alignment is not supported
//! - **4 GiB heap**: block sizes live in 32-bit tags

pub mod align;
pub mod block;
mod check;
mod config;
mod error;
mod fit;
mod heap;
pub mod region;

pub use block::Addr;
pub use check::{BlockInfo, Blocks, HeapStats};
pub use config::{Config, InitialGrowth};
pub use error::{AllocError, HeapError};
pub use heap::Heap;
pub use region::{MmapRegion, Region, VecRegion};
