use std::fmt;

use serde::{Deserialize, Serialize};

/// A totally ordered 192-bit transaction identifier, serving as the
/// system's logical clock. Transactions committed by different peers are
/// compared lexicographically by `(a, b, c)`; the middle word `b` is
/// conventionally seeded from the committing peer so that two peers whose
/// counters collide still produce distinct, comparable ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    a: u64,
    b: u64,
    c: u64,
}

impl TransactionId {
    /// Reserved minimum, strictly less than every valid transaction id.
    pub const MIN: TransactionId = TransactionId { a: 0, b: 0, c: 0 };
    /// Reserved maximum, strictly greater than every valid transaction id.
    pub const MAX: TransactionId = TransactionId {
        a: u64::MAX,
        b: u64::MAX,
        c: u64::MAX,
    };

    pub fn new(a: u64, b: u64, c: u64) -> Self {
        TransactionId { a, b, c }
    }

    pub fn a(&self) -> u64 {
        self.a
    }

    pub fn b(&self) -> u64 {
        self.b
    }

    pub fn c(&self) -> u64 {
        self.c
    }

    /// A transaction id is valid if it sits strictly between the two
    /// sentinels on the `a` word; `b` and `c` are unconstrained.
    pub fn is_valid(&self) -> bool {
        self.a > 0 && self.a < u64::MAX
    }

    /// Produces the next id after `self`, chaining the increment from `c`
    /// into `b` and then into `a` on overflow. Overflowing `a` itself means
    /// every valid id has been exhausted, which cannot happen in practice
    /// and is treated as a fatal programming error rather than a `Result`.
    pub fn increment(&self) -> TransactionId {
        let (c, carry_b) = self.c.overflowing_add(1);
        let (b, carry_a) = if carry_b {
            self.b.overflowing_add(1)
        } else {
            (self.b, false)
        };
        let a = if carry_a {
            self.a.checked_add(1).expect("transaction id space exhausted")
        } else {
            self.a
        };
        TransactionId { a, b, c }
    }

    /// An id strictly greater than `self`, seeded with `peer_seed` in `b`
    /// whenever that alone is enough to guarantee it. Used when a peer must
    /// mint a transaction id known to exceed every id it has seen so far,
    /// including ones committed by peers with a larger `peer_seed`: simply
    /// overwriting `b` with a smaller seed than `self.b` would produce an id
    /// less than `self`, so when `peer_seed` can't carry the comparison on
    /// its own this bumps `a` instead, which always can.
    pub fn next_after(&self, peer_seed: u64) -> TransactionId {
        if peer_seed > self.b {
            return TransactionId { a: self.a, b: peer_seed, c: 0 };
        }
        if peer_seed == self.b {
            let (c, carried) = self.c.overflowing_add(1);
            if !carried {
                return TransactionId { a: self.a, b: peer_seed, c };
            }
        }
        TransactionId {
            a: self.a.checked_add(1).expect("transaction id space exhausted"),
            b: peer_seed,
            c: 0,
        }
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({:016x}{:016x}{:016x})", self.a, self.b, self.c)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}{:016x}", self.a, self.b, self.c)
    }
}
