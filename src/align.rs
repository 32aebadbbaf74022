/// Rounds a byte count up to the double-word (8 byte) boundary every block
/// size and payload address in the heap sits on.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(8), 8);
/// assert_eq!(align!(13), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::block::DSIZE)
  };
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// ```rust
/// use tagalloc::align_to;
///
/// assert_eq!(align_to!(4095, 4096), 4096);
/// assert_eq!(align_to!(3, 4), 4);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

#[cfg(test)]
mod tests {
  use crate::block::DSIZE;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (DSIZE * i + 1)..=(DSIZE * (i + 1));

      let expected_alignment = DSIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_word_pairs() {
    // Growth requests are counted in 4-byte words and rounded to an even
    // number of them.
    assert_eq!(align_to!(1usize, 2), 2);
    assert_eq!(align_to!(2usize, 2), 2);
    assert_eq!(align_to!(1025usize, 2), 1026);
    assert_eq!(align_to!(0usize, 4096), 0);
  }
}
