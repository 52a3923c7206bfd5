//! Linear tokens and thread-safe counting policies for control blocks.
//!
//! Tokens are zero-sized proofs that one share was acquired from a
//! counter of a particular type. Dropping a token panics; the only valid
//! way to dispose of it is to return it to a counter via `Count::put`.

use core::marker::PhantomData;
use core::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counts above this are treated as an overflow, matching `Arc`.
const MAX_COUNT: usize = isize::MAX as usize;

/// Zero-sized, linear token branded to the counter type that minted it.
pub struct Token<C: ?Sized> {
    // `fn(&C)` keeps the token `Send + Sync` regardless of `C`.
    _ctr: PhantomData<fn(&C)>,
}

impl<C: ?Sized> Token<C> {
    #[inline]
    fn new() -> Self {
        Self { _ctr: PhantomData }
    }

    /// Mint a token for a counter implementation.
    ///
    /// # Safety
    /// The caller must have added exactly one share to a counter of type `C`
    /// that this token will later be returned to.
    #[inline]
    pub unsafe fn mint() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> Drop for Token<C> {
    fn drop(&mut self) {
        // Intentional fail-fast on misuse: token must be consumed by Count::put.
        panic!("Token dropped without Count::put");
    }
}

impl<C: ?Sized> core::fmt::Debug for Token<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Token")
    }
}

/// A thread-safe source of counted shares, enforced by linear token flow.
///
/// # Safety
/// `put` must return `true` exactly once per counter, on the call that
/// returns the last outstanding token, and that transition must be atomic
/// with respect to every concurrent `get`/`put` on the same counter.
/// `Shared` frees the control block on `true`.
pub unsafe trait Count: Sized + Send + Sync + 'static {
    /// Create a counter holding exactly one share, plus the token for it.
    fn one() -> (Self, Token<Self>);

    /// Acquire one more share and return a linear token for it.
    fn get(&self) -> Token<Self>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put(&self, t: Token<Self>) -> bool;

    /// Snapshot of the current count. Racy under concurrent use.
    fn current(&self) -> usize;
}

/// Lock-free counter: a single `AtomicUsize` with read-modify-write
/// increment and decrement-and-test.
#[derive(Debug)]
pub struct AtomicCount {
    count: AtomicUsize,
}

unsafe impl Count for AtomicCount {
    #[inline]
    fn one() -> (Self, Token<Self>) {
        (
            Self {
                count: AtomicUsize::new(1),
            },
            Token::new(),
        )
    }

    #[inline]
    fn get(&self) -> Token<Self> {
        // A new share can only be made from an existing one, so no ordering
        // is needed here; the existing share keeps the block alive.
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_COUNT {
            std::process::abort();
        }
        Token::new()
    }

    #[inline]
    fn put(&self, t: Token<Self>) -> bool {
        core::mem::forget(t);
        if self.count.fetch_sub(1, Ordering::Release) != 1 {
            return false;
        }
        // Synchronise with every earlier release before the caller frees.
        atomic::fence(Ordering::Acquire);
        true
    }

    #[inline]
    fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Counter guarded by a per-block mutex. Simpler than `AtomicCount` and
/// slower under contention.
#[derive(Debug)]
pub struct MutexCount {
    count: Mutex<usize>,
}

impl MutexCount {
    fn lock(&self) -> MutexGuard<'_, usize> {
        // No user code runs under this lock, so poisoning carries no meaning.
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

unsafe impl Count for MutexCount {
    fn one() -> (Self, Token<Self>) {
        (
            Self {
                count: Mutex::new(1),
            },
            Token::new(),
        )
    }

    fn get(&self) -> Token<Self> {
        let mut c = self.lock();
        if *c >= MAX_COUNT {
            std::process::abort();
        }
        *c += 1;
        Token::new()
    }

    fn put(&self, t: Token<Self>) -> bool {
        let mut c = self.lock();
        assert!(*c > 0, "MutexCount underflow");
        *c -= 1;
        core::mem::forget(t);
        *c == 0
    }

    fn current(&self) -> usize {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol<C: Count>() {
        let (c, t0) = C::one();
        assert_eq!(c.current(), 1);
        let t1 = c.get();
        let t2 = c.get();
        assert_eq!(c.current(), 3);
        assert!(!c.put(t1));
        assert!(!c.put(t0));
        assert_eq!(c.current(), 1);
        assert!(c.put(t2));
        assert_eq!(c.current(), 0);
    }

    #[test]
    fn atomic_count_protocol() {
        protocol::<AtomicCount>();
    }

    #[test]
    fn mutex_count_protocol() {
        protocol::<MutexCount>();
    }

    #[test]
    fn dropping_a_token_panics() {
        let res = std::panic::catch_unwind(|| {
            let (c, t) = AtomicCount::one();
            let extra = c.get();
            assert!(!c.put(t));
            drop(extra);
        });
        assert!(res.is_err(), "expected token drop to panic");
    }

    #[test]
    fn only_one_concurrent_put_observes_zero() {
        use std::sync::atomic::AtomicUsize as Hits;
        for _ in 0..64 {
            let (c, first) = AtomicCount::one();
            let mut tokens = vec![first];
            for _ in 0..7 {
                tokens.push(c.get());
            }
            let zeroes = Hits::new(0);
            std::thread::scope(|s| {
                for t in tokens {
                    let c = &c;
                    let zeroes = &zeroes;
                    s.spawn(move || {
                        if c.put(t) {
                            zeroes.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });
            assert_eq!(zeroes.load(Ordering::SeqCst), 1);
        }
    }
}
