use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(TenantId);
define_id!(DepartmentId);
define_id!(UserId);
define_id!(RoleId);
define_id!(GrantId);
define_id!(PolicyId);

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_704_067_200_000;

const TIMESTAMP_BITS: u32 = 41;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_NODE_ID: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("node id {0} is outside 0..=1023")]
    NodeOutOfRange(i64),
    #[error("system clock reads before the id epoch")]
    ClockBeforeEpoch,
    #[error("id timestamp space exhausted")]
    Exhausted,
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<i64, IdError>;
}

#[derive(Debug)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

/// Snowflake ids: 41 bits of milliseconds since [`SNOWFLAKE_EPOCH_MS`], 10 bits
/// of node id, 12 bits of per-millisecond sequence.
///
/// Ids are strictly increasing for the lifetime of the generator. A wall clock
/// that steps backwards does not produce an error; the generator keeps issuing
/// from the last timestamp it used and borrows the next millisecond once the
/// sequence for that millisecond is spent.
pub struct Snowflake {
    node_id: i64,
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
    state: Mutex<SnowflakeState>,
}

impl Snowflake {
    pub fn new(node_id: i64) -> Result<Self, IdError> {
        Self::with_clock(node_id, system_millis)
    }

    pub fn with_clock(
        node_id: i64,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self, IdError> {
        if !(0..=MAX_NODE_ID).contains(&node_id) {
            return Err(IdError::NodeOutOfRange(node_id));
        }
        Ok(Self {
            node_id,
            clock: Box::new(clock),
            state: Mutex::new(SnowflakeState {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }
}

impl fmt::Debug for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snowflake")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl IdGenerator for Snowflake {
    fn next_id(&self) -> Result<i64, IdError> {
        let elapsed = (self.clock)() - SNOWFLAKE_EPOCH_MS;
        if elapsed < 0 {
            return Err(IdError::ClockBeforeEpoch);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ms = elapsed.max(state.last_ms);
        if ms == state.last_ms {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                ms += 1;
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }

        if ms > MAX_TIMESTAMP {
            return Err(IdError::Exhausted);
        }
        state.last_ms = ms;

        Ok((ms << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | state.sequence)
    }
}

fn system_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Hands out consecutive ids starting at a fixed value. Used where ids must be
/// predictable, such as tests and fixtures.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicI64,
}

impl SequentialIds {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Result<i64, IdError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
