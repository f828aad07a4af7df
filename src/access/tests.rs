use super::*;
use crate::sync::{CheckedMutex, RwMutex};
use crate::test_logging::init_test_logging;
use std::sync::atomic::{AtomicU32, Ordering};

type Shared<T> = Unlocked<T, ReadWrite<SpinRwLock>>;

fn init_test(name: &str) {
    init_test_logging();
    crate::test_phase!(name);
}

#[test]
fn write_then_read_round_trip() {
    init_test("write_then_read_round_trip");
    let data = Shared::new(vec![1, 2, 3]);
    {
        let mut w = data.write();
        w.push(4);
    }
    let r = data.read();
    crate::assert_with_log!(r.len() == 4, "write visible to reader", 4usize, r.len());
    crate::test_complete!("write_then_read_round_trip");
}

#[test]
fn readers_overlap() {
    init_test("readers_overlap");
    let data = Shared::new(7_u32);
    let a = data.read();
    let b = data.const_read();
    crate::assert_with_log!(*a == 7 && *b == 7, "both readers see the value", 7u32, *a);
    drop(a);
    drop(b);
    crate::test_complete!("readers_overlap");
}

#[test]
fn upgrade_as_sole_reader() {
    init_test("upgrade_as_sole_reader");
    let data = Shared::new(0_u32);
    let r = data.read();
    let mut w = r.try_upgrade().ok().expect("sole reader must upgrade");
    *w = 5;
    let r = w.downgrade();
    crate::assert_with_log!(*r == 5, "downgraded guard sees the write", 5u32, *r);
    crate::test_complete!("upgrade_as_sole_reader");
}

#[test]
fn upgrade_conflict_returns_the_guard() {
    init_test("upgrade_conflict_returns_the_guard");
    let data = Shared::new(0_u32);
    let completions = AtomicU32::new(0);

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| loop {
                let r = data.read();
                match r.try_upgrade() {
                    Ok(mut w) => {
                        *w += 1;
                        completions.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(r) => {
                        // The read guard came back untouched; release it
                        // and wait out the winner.
                        drop(r);
                        data.upgrade_yield();
                    }
                }
            });
        }
    });

    let done = completions.load(Ordering::Relaxed);
    crate::assert_with_log!(done == 2, "both upgraders complete", 2u32, done);
    let r = data.read();
    crate::assert_with_log!(*r == 2, "both increments landed", 2u32, *r);
    crate::test_complete!("upgrade_conflict_returns_the_guard");
}

#[test]
fn read_guard_into_const() {
    let data = Shared::new(3_u32);
    let r = data.read().into_const();
    assert_eq!(*r, 3);
}

// ── Carry sequencing ───────────────────────────────────────────────────

#[test]
fn carry_keeps_the_lock_across_the_downgrade() {
    init_test("carry_keeps_the_lock_across_the_downgrade");
    let data = Shared::new(0_u32);

    let carry = data.carry();
    let mut w = carry.write();
    *w += 1;
    let r = w.into_read();
    crate::assert_with_log!(*r == 1, "read phase sees the write", 1u32, *r);
    drop(r);

    // The lock must be fully released now: a fresh write acquires.
    let mut w = data.write();
    *w += 1;
    drop(w);
    crate::assert_with_log!(*data.read() == 2, "lock unheld after carry", 2u32, *data.read());
    crate::test_complete!("carry_keeps_the_lock_across_the_downgrade");
}

#[test]
fn unused_carry_locks_nothing() {
    let data = Shared::new(1_u32);
    let carry = data.carry();
    drop(carry);
    assert_eq!(*data.read(), 1);
}

#[test]
fn carry_write_dropped_without_read_releases() {
    let data = Shared::new(0_u32);
    {
        let mut w = data.carry().write();
        *w = 9;
    }
    assert_eq!(*data.read(), 9);
}

// ── Other lock backings ────────────────────────────────────────────────

#[test]
fn read_write_policy_over_the_cv_mutex() {
    let data = Unlocked::<u32, ReadWrite<RwMutex>>::new(1);
    {
        let r = data.read();
        let w = r.try_upgrade().ok().expect("sole reader must upgrade");
        drop(w.downgrade());
    }
    assert_eq!(*data.read(), 1);
}

// ── Primitive policy ───────────────────────────────────────────────────

#[test]
fn primitive_lock_grants_write_access() {
    let data = Unlocked::<u32, Primitive<CheckedMutex>>::new(0);
    {
        let mut guard = data.lock();
        *guard = 3;
    }
    let read = data.lock_read();
    assert_eq!(*read, 3);
}

#[test]
fn primitive_read_converts_to_write_without_relocking() {
    let data = Unlocked::<u32, Primitive<CheckedMutex>>::new(0);
    let read = data.lock_read();
    let mut write = read.into_write();
    *write = 4;
    drop(write);
    assert_eq!(*data.lock_read(), 4);
}

#[test]
#[should_panic(expected = "recursive lock")]
fn primitive_guard_held_while_relocking_panics() {
    let data = Unlocked::<u32, Primitive<CheckedMutex>>::new(0);
    let _guard = data.lock();
    let _second = data.lock();
}

// ── OneThread policy ───────────────────────────────────────────────────

#[test]
fn one_thread_wrapper_reads_and_writes() {
    let data = Unlocked::<u32, OneThread>::new(1);
    {
        let mut w = data.access_mut();
        *w += 1;
    }
    let a = data.access();
    let b = data.access();
    assert_eq!(*a + *b, 4);
}

#[test]
#[should_panic(expected = "exclusive access while a borrow is live")]
fn one_thread_write_under_read_panics() {
    let data = Unlocked::<u32, OneThread>::new(1);
    let _r = data.access();
    let _w = data.access_mut();
}

#[test]
fn one_thread_wrapper_can_move_between_threads() {
    let data = Unlocked::<u32, OneThread>::new(5);
    let value = std::thread::spawn(move || *data.access()).join().unwrap();
    assert_eq!(value, 5);
}

// ── Views ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Body {
    head: u32,
    tail: u32,
}

#[test]
fn view_projects_a_field_under_the_same_lock() {
    init_test("view_projects_a_field_under_the_same_lock");
    let data = Shared::new(Body::default());
    let tail = data.view(|body| &mut body.tail);

    {
        let mut w = tail.write();
        *w = 11;
    }
    let r = tail.read();
    crate::assert_with_log!(*r == 11, "view write visible", 11u32, *r);
    drop(r);

    let whole = data.read();
    crate::assert_with_log!(whole.tail == 11, "wrapper sees the view write", 11u32, whole.tail);
    crate::assert_with_log!(whole.head == 0, "untouched field intact", 0u32, whole.head);
    crate::test_complete!("view_projects_a_field_under_the_same_lock");
}

trait Count {
    fn bump(&mut self);
    fn total(&self) -> u32;
}

impl Count for Body {
    fn bump(&mut self) {
        self.head += 1;
    }

    fn total(&self) -> u32 {
        self.head + self.tail
    }
}

#[test]
fn view_projects_a_trait_object() {
    fn as_count(body: &mut Body) -> &mut dyn Count {
        body
    }

    let data = Shared::new(Body::default());
    let counter = data.view(as_count);
    counter.write().bump();
    assert_eq!(counter.read().total(), 1);
}

#[test]
fn views_are_copyable_handles() {
    let data = Shared::new(Body::default());
    let a = data.view(|body| &mut body.head);
    let b = a;
    *a.write() = 2;
    assert_eq!(*b.read(), 2);
}

// ── Wrapper plumbing ───────────────────────────────────────────────────

#[test]
fn into_inner_returns_the_payload() {
    let data = Shared::new(String::from("payload"));
    assert_eq!(data.into_inner(), "payload");
}

#[test]
fn get_mut_skips_locking() {
    let mut data = Shared::new(0_u32);
    *data.get_mut() = 9;
    assert_eq!(*data.read(), 9);
}

#[test]
fn default_builds_a_default_payload() {
    let data = Shared::<u32>::default();
    assert_eq!(*data.read(), 0);
}

#[test]
fn shared_wrapper_across_threads() {
    let data = Shared::new(0_u64);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..100 {
                    *data.write() += 1;
                    let _ = *data.read();
                }
            });
        }
    });
    assert_eq!(*data.read(), 400);
}
