use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::KeyGenerateAlgorithm;
use super::props::{self, Props};
use crate::ast::Value;
use crate::error::{ShardError, ShardResult};

const KIND: &str = "key generate";

/// 2016-11-01T00:00:00Z in milliseconds.
const EPOCH_MILLIS: i64 = 1_477_929_600_000;
const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_millis: i64,
    sequence: i64,
}

/// 64-bit ids: 41 bits of milliseconds since the epoch, 10 bits of worker id
/// and a 12 bit sequence.
///
/// A clock that moves back by at most the tolerance keeps issuing ids from
/// the last seen millisecond; a larger step back is an error.
#[derive(Debug)]
pub struct SnowflakeKeyGenerator {
    worker_id: i64,
    max_tolerate_millis: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeKeyGenerator {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let worker_id = props::optional_i64(props, "worker_id", KIND)?.unwrap_or(0);
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(ShardError::algorithm(
                KIND,
                format!("worker_id must be within 0..={}", MAX_WORKER_ID),
            ));
        }
        let max_tolerate_millis =
            props::optional_i64(props, "max_tolerate_time_difference_milliseconds", KIND)?
                .unwrap_or(10);
        Ok(Self {
            worker_id,
            max_tolerate_millis,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn next_id(&self, now: i64) -> ShardResult<i64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut millis = now;
        if millis < state.last_millis {
            let drift = state.last_millis - millis;
            if drift > self.max_tolerate_millis {
                return Err(ShardError::algorithm(
                    KIND,
                    format!("clock moved backwards by {} ms", drift),
                ));
            }
            millis = state.last_millis;
        }
        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted: borrow the next millisecond.
                millis += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;
        Ok(((millis - EPOCH_MILLIS) << (SEQUENCE_BITS + WORKER_ID_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence)
    }
}

impl KeyGenerateAlgorithm for SnowflakeKeyGenerator {
    fn generate(&self) -> ShardResult<Value> {
        self.next_id(Self::now_millis()).map(Value::Int)
    }
}

/// Random UUID v4 without dashes.
#[derive(Debug, Default)]
pub struct UuidKeyGenerator;

impl UuidKeyGenerator {
    pub fn new(_props: &Props) -> ShardResult<Self> {
        Ok(Self)
    }
}

impl KeyGenerateAlgorithm for UuidKeyGenerator {
    fn generate(&self) -> ShardResult<Value> {
        Ok(Value::String(uuid::Uuid::new_v4().simple().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snowflake(worker: i64) -> SnowflakeKeyGenerator {
        SnowflakeKeyGenerator::new(&serde_json::from_value(json!({"worker_id": worker})).unwrap())
            .unwrap()
    }

    #[test]
    fn test_ids_increase_within_one_millisecond() {
        let keys = snowflake(3);
        let now = EPOCH_MILLIS + 1_000;
        let a = keys.next_id(now).unwrap();
        let b = keys.next_id(now).unwrap();
        assert!(b > a);
        assert_eq!((a >> SEQUENCE_BITS) & MAX_WORKER_ID, 3);
    }

    #[test]
    fn test_small_clock_drift_is_tolerated() {
        let keys = snowflake(0);
        let now = EPOCH_MILLIS + 5_000;
        let a = keys.next_id(now).unwrap();
        let b = keys.next_id(now - 5).unwrap();
        assert!(b > a);
        assert!(keys.next_id(now - 100).is_err());
    }

    #[test]
    fn test_worker_id_range() {
        let props = serde_json::from_value(json!({"worker_id": 1024})).unwrap();
        assert!(SnowflakeKeyGenerator::new(&props).is_err());
    }

    #[test]
    fn test_uuid_without_dashes() {
        let Value::String(id) = UuidKeyGenerator.generate().unwrap() else {
            panic!("expected a string key");
        };
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
