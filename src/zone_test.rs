use super::*;

#[test]
fn arena_mask_union_combines_bits() {
    let mut mask = ArenaMask::of(0);
    mask.union_with(ArenaMask::of(3));
    assert!(mask.contains(0));
    assert!(mask.contains(3));
    assert!(!mask.contains(1));
}

#[test]
fn empty_mask_contains_nothing() {
    let mask = ArenaMask::empty();
    for i in 0..8 {
        assert!(!mask.contains(i));
    }
}

#[test]
fn compute_in_use_marks_current_arena() {
    let in_use = compute_in_use(4, ArenaRef::Pool(2), &[]);
    assert_eq!(in_use, vec![false, false, true, false]);
}

#[test]
fn compute_in_use_marks_carried_arenas() {
    let carry = [ArenaMask::of(0), ArenaMask::of(3)];
    let in_use = compute_in_use(4, ArenaRef::Permanent, &carry);
    assert_eq!(in_use, vec![true, false, false, true]);
}

#[test]
fn pick_free_arena_finds_first_unused() {
    assert_eq!(pick_free_arena(&[true, true, false, true]), Some(2));
}

#[test]
fn pick_free_arena_none_when_all_used() {
    assert_eq!(pick_free_arena(&[true, true, true]), None);
}

#[test]
fn finalizers_run_in_lifo_order() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let order = Rc::new(RefCell::new(Vec::new()));
    let mut zone = Zone {
        parent: None,
        arena: ArenaRef::Permanent,
        snapshot: crate::arena::ArenaSnapshot::empty(),
        level: 0,
        finalizers: Vec::new(),
        source_info: None,
    };

    let o1 = order.clone();
    zone.register_finalizer(move || o1.borrow_mut().push(1));
    let o2 = order.clone();
    zone.register_finalizer(move || o2.borrow_mut().push(2));

    zone.run_finalizers();
    assert_eq!(*order.borrow(), vec![2, 1]);
}
