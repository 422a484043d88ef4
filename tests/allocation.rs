#![no_std]

const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[global_allocator]
static ALLOCATOR: seglloc::Allocator<HEAP_SIZE> = seglloc::Allocator::new();

extern crate alloc;

#[test]
fn vec() {
    let mut v = alloc::vec![1, 2, 3];
    v.push(4);

    assert_eq!((1..=4).collect::<alloc::vec::Vec<_>>(), v);
}

#[test]
fn map_and_formatting() {
    let mut map = alloc::collections::BTreeMap::new();
    map.insert(10, "Hello");
    map.insert(11, "world");
    map.insert(20, "Hallo");
    map.insert(21, "Welt");
    map.insert(-1, "english");
    map.insert(-2, "german");

    let english = alloc::format!("[{}]: {}, {}!", map[&-1], map[&10], map[&11]);
    let german = alloc::format!("[{}]: {}, {}!", map[&-2], map[&20], map[&21]);
    assert_eq!(english, "[english]: Hello, world!");
    assert_eq!(german, "[german]: Hallo, Welt!");
}

/// Every `u8` pushed here is below the 8-byte threshold that routes a
/// request through the mini-block cluster path instead of an ordinary block.
#[test]
fn many_small_allocations_exercise_the_cluster_path() {
    let mut bytes = alloc::vec::Vec::new();
    for i in 0..512u32 {
        bytes.push(i as u8);
    }
    assert_eq!(bytes.len(), 512);
    assert_eq!(bytes[500], 500u32 as u8);
}

/// A long-lived allocation surrounded by many short-lived ones of varying
/// size, to exercise coalescing across several size classes as the
/// short-lived ones are dropped.
#[test]
fn interleaved_allocation_and_deallocation_across_size_classes() {
    let long_lived = alloc::vec![0u8; 2048];
    for round in 0..64u8 {
        let sizes = [8usize, 40, 100, 500, 3000];
        let buffers: alloc::vec::Vec<alloc::vec::Vec<u8>> =
            sizes.iter().map(|&size| alloc::vec![round; size]).collect();
        drop(buffers);
    }
    assert_eq!(long_lived.len(), 2048);
    assert!(long_lived.iter().all(|&b| b == 0));
}

#[test]
fn vec_growth_preserves_contents_across_reallocation() {
    let mut v = alloc::vec::Vec::with_capacity(1);
    for i in 0..1000u32 {
        v.push(i);
    }
    assert_eq!(v.len(), 1000);
    assert_eq!(v[999], 999);
}
