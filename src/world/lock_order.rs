//! Per-thread lock rank bookkeeping.
//!
//! Graph locks must be taken entities-first, factors-second. Every guard
//! registers its rank here before blocking on the lock; in debug builds a
//! thread that already holds the factors lock and asks for the entities lock
//! panics instead of risking a deadlock.

use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rank {
    Entities = 0,
    Factors = 1,
}

thread_local! {
    static HELD: Cell<[u32; 2]> = const { Cell::new([0, 0]) };
}

/// Marks a rank as held by the current thread until dropped.
#[derive(Debug)]
pub(crate) struct RankToken {
    rank: Rank,
}

pub(crate) fn enter(rank: Rank) -> RankToken {
    HELD.with(|held| {
        let mut counts = held.get();
        if cfg!(debug_assertions) && rank == Rank::Entities {
            assert!(
                counts[Rank::Factors as usize] == 0,
                "lock order violation: entities lock requested while holding the factors lock"
            );
        }
        counts[rank as usize] += 1;
        held.set(counts);
    });
    RankToken { rank }
}

impl Drop for RankToken {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut counts = held.get();
            counts[self.rank as usize] = counts[self.rank as usize].saturating_sub(1);
            held.set(counts);
        });
    }
}
