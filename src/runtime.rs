//! The runtime context.
//!
//! The database needs a monotonic wall clock and an entropy source for
//! seeding the partition hash. Both are bundled into a [`Runtime`] that is
//! passed in explicitly; [`Runtime::shared`] provides the process-wide
//! instance behind a one-shot latch for callers that do not care.

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::base::Name;

//------------ Runtime -------------------------------------------------------

/// Clock and entropy for a database instance.
#[derive(Debug)]
pub struct Runtime {
    hash_seed: u64,
}

impl Runtime {
    /// Creates a runtime with a fresh random hash seed.
    pub fn new() -> Self {
        Runtime {
            hash_seed: rand::random(),
        }
    }

    /// Creates a runtime with a fixed seed, for reproducible tests.
    pub fn with_seed(hash_seed: u64) -> Self {
        Runtime { hash_seed }
    }

    /// Returns the process-wide shared runtime.
    ///
    /// The first call initializes it; later calls return the same instance.
    pub fn shared() -> Arc<Runtime> {
        static SHARED: OnceLock<Arc<Runtime>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Runtime::new())).clone()
    }

    /// Returns the current wall-clock time in seconds.
    pub fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|age| age.as_secs() as u32)
            .unwrap_or(0)
    }

    /// Maps a name onto one of `partitions` node-lock partitions.
    ///
    /// Seeded FNV-1a over the canonical tree key, so equal names always
    /// land in the same partition while the distribution differs between
    /// processes.
    pub fn name_locknum(&self, name: &Name, partitions: usize) -> usize {
        debug_assert!(partitions.is_power_of_two());
        let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ self.hash_seed;
        for &octet in name.tree_key().iter() {
            hash ^= u64::from(octet);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash as usize) & (partitions - 1)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

//============ Tests =========================================================
