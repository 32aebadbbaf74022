use crate::block::{CHUNK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// When the first free block is carved out of the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InitialGrowth {
  /// `init` grows the heap by one chunk right away.
  #[default]
  Eager,
  /// `init` only plants the sentinels; the first allocation grows the heap.
  Lazy,
}

/// Heap tunables.
///
/// ```rust
/// use tagalloc::{Config, InitialGrowth};
///
/// let config = Config::default()
///   .chunk_size(8192)
///   .growth(InitialGrowth::Lazy)
///   .check_invariants(true);
/// assert_eq!(config.chunk(), 8192);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
  chunk_size: usize,
  growth: InitialGrowth,
  check_invariants: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
      growth: InitialGrowth::default(),
      check_invariants: cfg!(debug_assertions),
    }
  }
}

impl Config {
  /// Minimum number of bytes requested from the region per growth event.
  /// Rounded up to the double word and kept within what a tag can describe.
  pub fn chunk_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.chunk_size = crate::align!(bytes.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE));
    self
  }

  pub fn growth(
    mut self,
    growth: InitialGrowth,
  ) -> Self {
    self.growth = growth;
    self
  }

  /// Run the full heap check after every public call and panic on the first
  /// broken invariant.
  pub fn check_invariants(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_invariants = enabled;
    self
  }

  pub fn chunk(&self) -> usize {
    self.chunk_size
  }

  pub fn initial_growth(&self) -> InitialGrowth {
    self.growth
  }

  pub fn checks_invariants(&self) -> bool {
    self.check_invariants
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.chunk(), 4096);
    assert_eq!(config.initial_growth(), InitialGrowth::Eager);
    assert_eq!(config.checks_invariants(), cfg!(debug_assertions));
  }

  #[test]
  fn test_chunk_size_is_rounded() {
    assert_eq!(Config::default().chunk_size(1).chunk(), 16);
    assert_eq!(Config::default().chunk_size(0).chunk(), 16);
    assert_eq!(Config::default().chunk_size(1001).chunk(), 1008);
    assert_eq!(
      Config::default().chunk_size(usize::MAX).chunk(),
      MAX_BLOCK_SIZE
    );
  }
}
