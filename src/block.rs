//! Boundary tags and the navigation rules built on them.
//!
//! Every block carries the same 4-byte tag at both ends:
//!
//! ```text
//!        bp - 4          bp                        bp + size - 8
//!   ┌─────────────┬──────────────────────────────┬─────────────┐
//!   │   header    │           payload            │   footer    │
//!   │ size | a    │                              │ size | a    │
//!   └─────────────┴──────────────────────────────┴─────────────┘
//!                 ▲
//!                 └── block pointer handed to the caller
//! ```
//!
//! Sizes are multiples of 8, so the low three bits of a tag are free and the
//! lowest one holds the allocation state. Neighbours are never stored: the
//! next block starts `size` bytes after this one, and the previous block's
//! size is read from the footer sitting right before our header.

use std::fmt;

/// Width of one tag (a "word").
pub const WSIZE: usize = 4;
/// Double word: payload alignment and block size granularity.
pub const DSIZE: usize = 8;
/// Header + footer + the smallest payload worth handing out.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;
/// Default amount the heap grows by when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;
/// Largest block size a tag can describe.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(DSIZE - 1);

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Offset of a block's payload within the managed region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub usize);

impl Addr {
  pub fn offset(self) -> usize {
    self.0
  }
}

impl fmt::Display for Addr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// A packed `(size, allocated)` boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
  /// Packs a block size and allocation state. `size` must be a multiple of
  /// 8 no larger than [`MAX_BLOCK_SIZE`].
  pub fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size % DSIZE == 0, "unaligned block size {size}");
    debug_assert!(size <= MAX_BLOCK_SIZE, "block size {size} overflows a tag");
    Self(size as u32 | if allocated { ALLOC_BIT } else { 0 })
  }

  pub fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  pub fn is_allocated(self) -> bool {
    self.0 & ALLOC_BIT != 0
  }

  pub fn raw(self) -> u32 {
    self.0
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{}/{}",
      self.size(),
      if self.is_allocated() { 'a' } else { 'f' }
    )
  }
}

/// Reads the tag stored at byte offset `at`.
pub fn get(
  heap: &[u8],
  at: usize,
) -> Tag {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&heap[at..at + WSIZE]);
  Tag(u32::from_ne_bytes(word))
}

/// Writes `tag` at byte offset `at`.
pub fn put(
  heap: &mut [u8],
  at: usize,
  tag: Tag,
) {
  heap[at..at + WSIZE].copy_from_slice(&tag.0.to_ne_bytes());
}

/// Offset of the header of the block whose payload starts at `bp`.
pub fn header(bp: Addr) -> usize {
  bp.0 - WSIZE
}

/// Offset of the footer, derived from the size in the header.
pub fn footer(
  heap: &[u8],
  bp: Addr,
) -> usize {
  bp.0 + size(heap, bp) - DSIZE
}

/// Size recorded in the header of `bp`.
pub fn size(
  heap: &[u8],
  bp: Addr,
) -> usize {
  get(heap, header(bp)).size()
}

pub fn is_allocated(
  heap: &[u8],
  bp: Addr,
) -> bool {
  get(heap, header(bp)).is_allocated()
}

pub fn next(
  heap: &[u8],
  bp: Addr,
) -> Addr {
  Addr(bp.0 + size(heap, bp))
}

/// The previous block, found through the footer that ends right before the
/// header of `bp`.
pub fn prev(
  heap: &[u8],
  bp: Addr,
) -> Addr {
  Addr(bp.0 - get(heap, bp.0 - DSIZE).size())
}

/// Writes matching header and footer tags for a block of `size` bytes.
pub fn set(
  heap: &mut [u8],
  bp: Addr,
  size: usize,
  allocated: bool,
) {
  let tag = Tag::pack(size, allocated);
  put(heap, header(bp), tag);
  put(heap, bp.0 + size - DSIZE, tag);
}

/// Block size needed to serve a request of `request` payload bytes: room for
/// both tags, rounded to the double word, never below [`MIN_BLOCK_SIZE`].
///
/// Returns `None` if the result would not fit in a tag.
pub fn adjust_size(request: usize) -> Option<usize> {
  if request <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }
  let padded = request.checked_add(DSIZE + DSIZE - 1)?;
  let adjusted = DSIZE * (padded / DSIZE);
  (adjusted <= MAX_BLOCK_SIZE).then_some(adjusted)
}
