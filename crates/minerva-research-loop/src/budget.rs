use std::sync::atomic::{AtomicI64, Ordering};

/// Cost of one `search-web` call.
pub const SEARCH_COST: u32 = 1;
/// Cost of one `complete-text` call.
pub const COMPLETION_COST: u32 = 2;

/// Shared provider-call budget for one task.
///
/// Monotonically non-increasing and never negative: a spend either fits in
/// the remainder or is refused whole.
pub struct Budget(AtomicI64);

impl Budget {
    pub fn new(initial: u32) -> Self {
        Self(AtomicI64::new(i64::from(initial)))
    }

    pub fn remaining(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    /// True once the remainder cannot cover a single search.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() < i64::from(SEARCH_COST)
    }

    /// Deduct `cost` if the remainder covers it.
    pub fn try_spend(&self, cost: u32) -> bool {
        let cost = i64::from(cost);
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current < cost {
                return false;
            }
            match self.0.compare_exchange(
                current,
                current - cost,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_never_goes_negative() {
        let budget = Budget::new(3);
        assert!(budget.try_spend(2));
        assert!(!budget.try_spend(2));
        assert!(budget.try_spend(1));
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn zero_budget_is_exhausted_from_the_start() {
        let budget = Budget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.try_spend(SEARCH_COST));
    }
}
