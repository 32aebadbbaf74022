use std::io::Read;

use tagalloc::{Addr, Heap, MmapRegion};

/// Waits until the user presses ENTER when the demo runs with `--pause`.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed(pause: bool) {
  if !pause {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_alloc(
  heap: &Heap<MmapRegion>,
  size: usize,
  addr: Addr,
) {
  println!(
    "Allocated {} bytes, offset = {}, address = {:?}, heap size = {}",
    size,
    addr,
    heap.as_ptr(addr),
    heap.heap_size(),
  );
}

fn main() {
  pretty_env_logger::init();
  let pause = std::env::args().any(|arg| arg == "--pause");

  // 64 MiB of address space; pages are only touched as the heap grows.
  let mut heap = match Heap::mmap(64 << 20) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("cannot set up the heap: {err}");
      return;
    }
  };

  println!(
    "reserved {} bytes, growing by {} bytes at a time",
    heap.region().capacity(),
    heap.config().chunk(),
  );
  println!("[start]\n{heap}");
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 1) Allocate a u32. The request is padded to the 16 byte minimum block.
  // --------------------------------------------------------------------
  let first = heap.allocate(4).unwrap().unwrap();
  println!("\n[1] Allocate u32");
  print_alloc(&heap, 4, first);
  heap.payload_mut(first).unwrap()[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes and a [u16; 16] right behind it.
  // --------------------------------------------------------------------
  let second = heap.allocate(12).unwrap().unwrap();
  println!("\n[2] Allocate [u8; 12]");
  print_alloc(&heap, 12, second);
  heap.payload_mut(second).unwrap()[..12].fill(0xAB);

  let third = heap.allocate(32).unwrap().unwrap();
  println!("\n[3] Allocate [u16; 16]");
  print_alloc(&heap, 32, third);
  println!("{heap}");
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 4) Free the first block, then the second: they merge into one.
  // --------------------------------------------------------------------
  heap.free(first);
  heap.free(second);
  println!("\n[4] Freed first and second block\n{heap}");
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 5) Grow the third block. Its right neighbour is free, so it grows in
  //    place.
  // --------------------------------------------------------------------
  let grown = heap.reallocate(Some(third), 200).unwrap().unwrap();
  println!(
    "\n[5] Reallocate third block to 200 bytes: {}",
    if grown == third { "grew in place" } else { "moved" }
  );
  println!("{heap}");
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 6) A 64 KiB request does not fit: the heap grows.
  // --------------------------------------------------------------------
  let before = heap.heap_size();
  let big = heap.allocate(64 * 1024).unwrap().unwrap();
  println!("\n[6] Allocate 64 KiB");
  print_alloc(&heap, 64 * 1024, big);
  println!("heap grew by {} bytes", heap.heap_size() - before);
  block_until_enter_pressed(pause);

  heap.free(grown);
  heap.free(big);
  println!("\n[7] Freed everything\n{heap}");

  match heap.check() {
    Ok(()) => println!("\nheap is consistent"),
    Err(err) => println!("\nheap is corrupted: {err}"),
  }
}
