/// Id allocation for new records
///
/// Ids are drawn uniformly from a large random space instead of a counter.
/// Collisions are possible, so the store rejects an insert whose id exists
/// and the service retries with a fresh id up to [`MAX_ID_ATTEMPTS`] times.

use rand::Rng;

use crate::models::user::UserId;

/// Attempts before giving up with `IdAllocationExhausted`
pub const MAX_ID_ATTEMPTS: u32 = 5;

/// Largest id handed out: 2^53 - 1, exact in a JSON number
pub const MAX_ID: UserId = (1 << 53) - 1;

/// Source of candidate ids for new records
pub trait IdAllocator: Send + Sync {
    /// Returns the next candidate id
    fn next_id(&self) -> UserId;
}

/// Uniform random ids in `1..=MAX_ID`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdAllocator;

impl IdAllocator for RandomIdAllocator {
    fn next_id(&self) -> UserId {
        rand::thread_rng().gen_range(1..=MAX_ID)
    }
}
