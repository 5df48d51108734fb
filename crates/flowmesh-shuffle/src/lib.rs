//! Pre-shuffle reduction for flowmesh.
//!
//! Before items leave a worker for the shuffle, a reduce table combines
//! them by key so the wire only carries one entry per key per flush. The
//! table is striped into one partition per destination worker; entry `k`
//! lives in partition `hash(k) % P`, and each partition drains through its
//! own emitter into the channel sink of the matching destination.
//!
//! Two interchangeable layouts implement the same contract:
//!
//! - [`probing::ProbingReduceTable`]: flat slots, linear probing, a
//!   sentinel key for emptiness
//! - [`chaining::ChainingReduceTable`]: bucket heads chaining through
//!   recycled entry frames
//!
//! The post-shuffle side runs the same tables with `num_partitions = 1`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub mod chaining;
pub mod config;
pub mod emit;
pub mod probing;

pub use chaining::{ChainingReduceTable, FRAME_CAPACITY};
pub use config::ReduceTableConfig;
pub use emit::{EmitKind, Emitter};
pub use probing::ProbingReduceTable;

/// Hash used for partition and slot placement.
///
/// Built on the default hasher with its fixed initial state, so every
/// worker process of one build places a key in the same partition. That is
/// what routes all occurrences of a key to the same destination worker.
pub fn stable_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_is_deterministic() {
        assert_eq!(stable_hash(&42u64), stable_hash(&42u64));
        assert_eq!(stable_hash("left"), stable_hash("left"));
        assert_ne!(stable_hash("left"), stable_hash("right"));
    }
}
