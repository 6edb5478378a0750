use super::*;

#[test]
fn bump_allocates_within_a_chunk() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(256);

    let a = arena.alloc(&mut free_list, 16, 8);
    let b = arena.alloc(&mut free_list, 16, 8);
    assert_ne!(a, b);
    assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 16);
}

#[test]
fn overflow_pulls_a_new_chunk() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(64);

    // First allocation barely fits; the second must overflow into a new chunk.
    let _a = arena.alloc(&mut free_list, 32, 8);
    let _b = arena.alloc(&mut free_list, 32, 8);
    let _c = arena.alloc(&mut free_list, 32, 8);
}

#[test]
fn snapshot_restore_rewinds_bump_pointer() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(256);

    let snap = arena.snapshot();
    let a = arena.alloc(&mut free_list, 16, 8);
    arena.restore(&mut free_list, snap);
    let b = arena.alloc(&mut free_list, 16, 8);

    assert_eq!(a, b, "restore should make the next alloc reuse the same bytes");
}

#[test]
fn restore_recycles_chunks_into_the_free_list() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(64);

    let snap = arena.snapshot();
    let _a = arena.alloc(&mut free_list, 32, 8);
    let _b = arena.alloc(&mut free_list, 32, 8);
    let _c = arena.alloc(&mut free_list, 32, 8); // forces a second chunk
    arena.restore(&mut free_list, snap);

    // A second arena should be able to reuse the chunk this one released.
    let mut other = Arena::new(64);
    let _d = other.alloc(&mut free_list, 32, 8);
}

#[test]
fn reset_returns_to_empty() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(256);
    let _a = arena.alloc(&mut free_list, 16, 8);
    arena.reset(&mut free_list);
    assert_eq!(arena.snapshot(), ArenaSnapshot::empty());
}

#[test]
fn alignment_is_respected() {
    let mut free_list = ChunkFreeList::new();
    let mut arena = Arena::new(256);
    let _ = arena.alloc(&mut free_list, 1, 1);
    let p = arena.alloc(&mut free_list, 8, 8);
    assert_eq!(p.as_ptr() as usize % 8, 0);
}
