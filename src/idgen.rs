//! Snowflake-style unique id generation for the `generate` workload
//!
//! Layout of a generated id, most significant bit first:
//!
//! ```text
//! | milliseconds since EPOCH_MS (42) | node index (8) | unused (1) | sequence (13) |
//! ```
//!
//! Ids from one generator are strictly increasing; ids from generators with
//! different node indexes never collide.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch, in Unix milliseconds
pub const EPOCH_MS: u64 = 1_741_048_067_000;

const NODE_SHIFT: u32 = 14;
const TIME_SHIFT: u32 = 22;
const SEQUENCE_MASK: u64 = 0x1FFF;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Default)]
struct IdState {
    last_tick: u64,
    sequence: u64,
}

/// Generator of cluster-unique 64-bit ids
pub struct IdGenerator {
    node_index: u8,
    state: Mutex<IdState>,
    clock: Clock,
}

impl IdGenerator {
    /// Create a generator for the given node index using the system clock
    pub fn new(node_index: u8) -> Self {
        Self::with_clock(node_index, system_millis)
    }

    /// Create a generator reading milliseconds from `clock`
    pub fn with_clock(node_index: u8, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            node_index,
            state: Mutex::new(IdState::default()),
            clock: Box::new(clock),
        }
    }

    /// Create a generator for a node id such as `"n3"`
    pub fn for_node(node_id: &str) -> Self {
        Self::new(node_index(node_id))
    }

    /// Node index embedded in every id
    pub fn node_index(&self) -> u8 {
        self.node_index
    }

    /// Produce the next id
    ///
    /// When the 13-bit sequence is exhausted within one millisecond this
    /// spins until the clock moves on.
    pub fn generate(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // A clock that steps backwards is treated as standing still
        let mut tick = self.tick().max(state.last_tick);

        if tick == state.last_tick {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while tick <= state.last_tick {
                    std::hint::spin_loop();
                    tick = self.tick();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_tick = tick;
        (tick << TIME_SHIFT) | (u64::from(self.node_index) << NODE_SHIFT) | state.sequence
    }

    fn tick(&self) -> u64 {
        (self.clock)().saturating_sub(EPOCH_MS)
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node_index", &self.node_index)
            .finish_non_exhaustive()
    }
}

/// Numeric part of a node id (`"n12"` -> 12); anything unparsable maps to 0
pub fn node_index(node_id: &str) -> u8 {
    node_id
        .get(1..)
        .and_then(|digits| digits.parse::<u64>().ok())
        .map(|index| (index & 0xFF) as u8)
        .unwrap_or(0)
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
}
