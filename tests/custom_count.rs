// Custom counting policy test suite.
//
// Core invariants exercised:
// - A downstream `Count` built on `Token::mint` plugs into `Shared`.
// - Every minted token is returned through `put`; the value is released
//   on the put that reports zero.
use erased_rc::{Count, Shared, Token};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static GETS: AtomicUsize = AtomicUsize::new(0);
static PUTS: AtomicUsize = AtomicUsize::new(0);

/// Sequentially consistent counter that records every get and put.
struct AuditedCount {
    count: AtomicUsize,
}

unsafe impl Count for AuditedCount {
    fn one() -> (Self, Token<Self>) {
        let count = AuditedCount {
            count: AtomicUsize::new(1),
        };
        // SAFETY: the counter starts at one share, owned by this token.
        (count, unsafe { Token::mint() })
    }

    fn get(&self) -> Token<Self> {
        self.count.fetch_add(1, Ordering::SeqCst);
        GETS.fetch_add(1, Ordering::SeqCst);
        // SAFETY: one share was just added to this counter.
        unsafe { Token::mint() }
    }

    fn put(&self, t: Token<Self>) -> bool {
        std::mem::forget(t);
        PUTS.fetch_add(1, Ordering::SeqCst);
        self.count.fetch_sub(1, Ordering::SeqCst) == 1
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

struct Payload {
    id: u32,
    drops: Arc<AtomicUsize>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

// Test: Shared over a counter minted outside the crate.
// Assumes: this is the only test touching GETS/PUTS.
// Verifies: clones and views go through get, every release goes through
// put, and the payload is destroyed once, on the last put.
#[test]
fn shared_with_minted_tokens() {
    let drops = Arc::new(AtomicUsize::new(0));
    let a: Shared<Payload, AuditedCount> = Shared::new(Payload {
        id: 4,
        drops: drops.clone(),
    });
    assert_eq!(a.use_count(), 1);

    let b = a.clone();
    let id: Shared<u32, AuditedCount> = a.view(|p| &p.id);
    assert_eq!(a.use_count(), 3);
    assert_eq!(*id, 4);
    assert!(b == a);
    assert_eq!(GETS.load(Ordering::SeqCst), 2);

    drop(a);
    drop(b);
    assert_eq!(PUTS.load(Ordering::SeqCst), 2);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(id.use_count(), 1);

    drop(id);
    assert_eq!(PUTS.load(Ordering::SeqCst), 3);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
