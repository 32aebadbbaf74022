use log::{debug, error, trace, warn};

use crate::{
  align_to,
  block::{self, Addr, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  config::{Config, InitialGrowth},
  error::AllocError,
  region::{MmapRegion, Region},
};

/// Payload offset of the prologue: 4 bytes of padding, then its header.
pub(crate) const PROLOGUE: Addr = Addr(2 * WSIZE);
/// Payload offset of the first real block, right after the prologue.
pub(crate) const FIRST_BLOCK: Addr = Addr(PROLOGUE.0 + DSIZE);

/// A boundary-tag heap with next-fit placement over a growable region.
///
/// Addresses are payload offsets into the region. The heap is strictly
/// single-threaded; wrap it in a `Mutex` to share it.
pub struct Heap<R: Region = MmapRegion> {
  pub(crate) region: R,
  pub(crate) config: Config,
  /// Block where the last successful fit search stopped.
  pub(crate) cursor: Option<Addr>,
  pub(crate) search_steps: u64,
}

/// Result of merging a freshly freed block with its free neighbours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Merge {
  pub block: Addr,
  pub size: usize,
}

impl Merge {
  /// Whether `bp` named a block that now lives inside the merged one.
  pub fn absorbed(
    &self,
    bp: Addr,
  ) -> bool {
    bp.0 > self.block.0 && bp.0 < self.following().0
  }

  /// The block right after the merged span.
  pub fn following(&self) -> Addr {
    Addr(self.block.0 + self.size)
  }
}

impl Heap<MmapRegion> {
  /// Builds a heap over a fresh `mmap` reservation of `capacity` bytes.
  pub fn mmap(capacity: usize) -> Result<Self, AllocError> {
    let region = MmapRegion::reserve(capacity).ok_or(AllocError::OutOfMemory {
      requested: capacity,
    })?;
    Self::init(region)
  }
}

impl<R: Region> Heap<R> {
  /// Lays the sentinels out in an empty region, using the default config.
  pub fn init(region: R) -> Result<Self, AllocError> {
    Self::with_config(region, Config::default())
  }

  pub fn with_config(
    mut region: R,
    config: Config,
  ) -> Result<Self, AllocError> {
    if region.end() != 0 {
      return Err(AllocError::RegionNotEmpty(region.end()));
    }

    region
      .grow(4 * WSIZE)
      .ok_or(AllocError::OutOfMemory {
        requested: 4 * WSIZE,
      })?;

    let bytes = region.bytes_mut();
    block::put(bytes, 0, Tag::pack(0, false));
    block::put(bytes, WSIZE, Tag::pack(DSIZE, true));
    block::put(bytes, 2 * WSIZE, Tag::pack(DSIZE, true));
    block::put(bytes, 3 * WSIZE, Tag::pack(0, true));

    let mut heap = Self {
      region,
      config,
      cursor: None,
      search_steps: 0,
    };

    if config.initial_growth() == InitialGrowth::Eager {
      heap.extend(config.chunk() / WSIZE)?;
    }

    debug!("heap initialised, {} bytes", heap.heap_size());
    heap.verify();
    Ok(heap)
  }

  /// Allocates a block with room for `size` payload bytes.
  ///
  /// Returns `Ok(None)` for a zero-size request and `Err` when the region
  /// cannot grow far enough.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<Addr>, AllocError> {
    if size == 0 {
      trace!("allocate(0) -> none");
      return Ok(None);
    }

    let adjusted = block::adjust_size(size).ok_or(AllocError::TooLarge(size))?;
    let bp = match self.find_fit(adjusted) {
      Some(bp) => bp,
      None => self.grow_for(adjusted)?,
    };

    self.place(bp, adjusted);
    trace!("allocate({size}) -> {bp} ({adjusted} byte block)");
    self.verify();
    Ok(Some(bp))
  }

  /// Releases a block. Null, already free and foreign addresses are ignored.
  pub fn free(
    &mut self,
    addr: impl Into<Option<Addr>>,
  ) {
    let Some(bp) = addr.into() else {
      return;
    };

    match self.state(bp) {
      Some(true) => {}
      Some(false) => {
        trace!("free({bp}) ignored, block already free");
        return;
      }
      None => {
        warn!("free({bp}) ignored, not a block of this heap");
        return;
      }
    }

    let size = block::size(self.region.bytes(), bp);
    block::set(self.region.bytes_mut(), bp, size, false);
    let merged = self.release(bp);
    trace!("free({bp}) -> free block {merged}");
    self.verify();
  }

  /// Resizes a block, in place when its neighbours allow it, otherwise by
  /// moving the payload to a block that fits.
  ///
  /// `None` behaves like [`Heap::allocate`], a zero `size` like
  /// [`Heap::free`]. On failure the original block is left exactly as it
  /// was.
  pub fn reallocate(
    &mut self,
    addr: Option<Addr>,
    size: usize,
  ) -> Result<Option<Addr>, AllocError> {
    let Some(bp) = addr else {
      return self.allocate(size);
    };

    if size == 0 {
      self.free(bp);
      return Ok(None);
    }

    if self.state(bp) != Some(true) {
      return Err(AllocError::InvalidAddress(bp));
    }

    let adjusted = block::adjust_size(size).ok_or(AllocError::TooLarge(size))?;
    let old_size = block::size(self.region.bytes(), bp);
    if adjusted == old_size {
      trace!("reallocate({bp}, {size}) -> unchanged");
      return Ok(Some(bp));
    }

    block::set(self.region.bytes_mut(), bp, old_size, false);
    let merged = self.release(bp);

    let target = if block::size(self.region.bytes(), merged) >= adjusted {
      merged
    } else {
      match self.find_fit(adjusted) {
        Some(found) => found,
        None => match self.grow_for(adjusted) {
          Ok(grown) => grown,
          Err(err) => {
            self.restore(merged, bp, old_size);
            warn!("reallocate({bp}, {size}) failed: {err}");
            self.verify();
            return Err(err);
          }
        },
      }
    };

    let keep = (old_size - DSIZE).min(adjusted - DSIZE);
    self
      .region
      .bytes_mut()
      .copy_within(bp.0..bp.0 + keep, target.0);
    self.place(target, adjusted);

    trace!("reallocate({bp}, {size}) -> {target}");
    self.verify();
    Ok(Some(target))
  }

  /// Payload of a live block.
  pub fn payload(
    &self,
    addr: Addr,
  ) -> Option<&[u8]> {
    let size = self.live_size(addr)?;
    Some(&self.region.bytes()[addr.0..addr.0 + size - DSIZE])
  }

  pub fn payload_mut(
    &mut self,
    addr: Addr,
  ) -> Option<&mut [u8]> {
    let size = self.live_size(addr)?;
    Some(&mut self.region.bytes_mut()[addr.0..addr.0 + size - DSIZE])
  }

  /// Raw pointer to `addr` inside the backing region.
  pub fn as_ptr(
    &self,
    addr: Addr,
  ) -> *const u8 {
    self.region.base().wrapping_add(addr.0)
  }

  /// Bytes currently taken from the region, sentinels included.
  pub fn heap_size(&self) -> usize {
    self.region.end()
  }

  pub fn cursor(&self) -> Option<Addr> {
    self.cursor
  }

  /// Blocks visited by fit searches since the heap was created.
  pub fn search_steps(&self) -> u64 {
    self.search_steps
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  /// Grows the region by at least `words` 4-byte words (rounded to an even
  /// count) and returns the resulting free block, merged with a free block
  /// that was already trailing the heap.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<Addr, AllocError> {
    let words = align_to!(words, 2);
    let bytes = words
      .checked_mul(WSIZE)
      .ok_or(AllocError::TooLarge(usize::MAX))?;

    // Tags are 32 bits wide, so the heap as a whole stays below that limit.
    let fits = self
      .region
      .end()
      .checked_add(bytes)
      .is_some_and(|end| end <= MAX_BLOCK_SIZE);
    let old_end = fits
      .then(|| self.region.grow(bytes))
      .flatten()
      .ok_or_else(|| {
        warn!("heap exhausted growing by {bytes} bytes");
        AllocError::OutOfMemory { requested: bytes }
      })?;

    let bp = Addr(old_end);
    let heap = self.region.bytes_mut();
    block::set(heap, bp, bytes, false);
    let epilogue = block::next(heap, bp);
    block::put(heap, block::header(epilogue), Tag::pack(0, true));

    debug!(
      "heap grew by {bytes} bytes to {} at {bp}",
      self.region.end()
    );
    Ok(self.release(bp))
  }

  /// Grows the heap enough for a block of `adjusted` bytes and moves the
  /// cursor onto the new space.
  fn grow_for(
    &mut self,
    adjusted: usize,
  ) -> Result<Addr, AllocError> {
    let grown = self.extend(adjusted.max(self.config.chunk()) / WSIZE)?;
    self.cursor = Some(grown);
    Ok(grown)
  }

  /// Marks the first `size` bytes of free block `bp` allocated, splitting
  /// off the rest as a free block when it can stand on its own.
  fn place(
    &mut self,
    bp: Addr,
    size: usize,
  ) {
    let heap = self.region.bytes_mut();
    let current = block::size(heap, bp);

    if current - size >= MIN_BLOCK_SIZE {
      block::set(heap, bp, size, true);
      let rest = block::next(heap, bp);
      block::set(heap, rest, current - size, false);
    } else {
      block::set(heap, bp, current, true);
    }
  }

  /// Merges the free block `bp` with whichever neighbours are free.
  ///
  /// Only tags are rewritten; payload bytes are never touched.
  pub(crate) fn coalesce(
    &mut self,
    bp: Addr,
  ) -> Merge {
    let heap = self.region.bytes_mut();
    let prev_free = !block::get(heap, bp.0 - DSIZE).is_allocated();
    let next = block::next(heap, bp);
    let next_free = !block::is_allocated(heap, next);
    let mut size = block::size(heap, bp);

    let start = match (prev_free, next_free) {
      (false, false) => return Merge { block: bp, size },
      (false, true) => {
        size += block::size(heap, next);
        bp
      }
      (true, false) => {
        let prev = block::prev(heap, bp);
        size += block::size(heap, prev);
        prev
      }
      (true, true) => {
        let prev = block::prev(heap, bp);
        size += block::size(heap, prev) + block::size(heap, next);
        prev
      }
    };

    block::set(heap, start, size, false);
    Merge { block: start, size }
  }

  /// Coalesces `bp` and moves the cursor off any block the merge swallowed.
  fn release(
    &mut self,
    bp: Addr,
  ) -> Addr {
    let merge = self.coalesce(bp);
    if self.cursor.is_some_and(|cursor| merge.absorbed(cursor)) {
      self.cursor = Some(merge.following());
    }
    merge.block
  }

  /// Splits a merged free block back around the allocation it absorbed.
  fn restore(
    &mut self,
    merged: Addr,
    bp: Addr,
    size: usize,
  ) {
    let heap = self.region.bytes_mut();
    let end = merged.0 + block::size(heap, merged);

    if merged.0 < bp.0 {
      block::set(heap, merged, bp.0 - merged.0, false);
    }
    block::set(heap, bp, size, true);
    let after = bp.0 + size;
    if after < end {
      block::set(heap, Addr(after), end - after, false);
    }
  }

  /// `Some(allocated)` if `bp` looks like a block of this heap.
  ///
  /// This is a plausibility check on the tags around `bp`, not a walk.
  fn state(
    &self,
    bp: Addr,
  ) -> Option<bool> {
    let heap = self.region.bytes();
    if bp.0 % DSIZE != 0 || bp < FIRST_BLOCK || bp.0 >= heap.len() {
      return None;
    }

    let tag = block::get(heap, block::header(bp));
    let size = tag.size();
    if size < MIN_BLOCK_SIZE || bp.0.checked_add(size)? > heap.len() {
      return None;
    }
    if block::get(heap, bp.0 + size - DSIZE) != tag {
      return None;
    }
    Some(tag.is_allocated())
  }

  fn live_size(
    &self,
    bp: Addr,
  ) -> Option<usize> {
    self
      .state(bp)?
      .then(|| block::size(self.region.bytes(), bp))
  }

  /// Runs the full consistency check when enabled. A broken heap cannot be
  /// repaired, so a violation is fatal.
  pub(crate) fn verify(&self) {
    if !self.config.checks_invariants() {
      return;
    }
    if let Err(err) = self.check() {
      error!("heap corrupted: {err}\n{self}");
      panic!("heap corrupted: {err}");
    }
  }
}
