//! Redis-backed breaker state.
//!
//! The record is one hash:
//!
//! ```text
//! leadguard:circuit_breaker
//!   state      "open" | "closed"
//!   opened_at  RFC 3339
//!   closed_at  RFC 3339
//!   metadata   JSON (FailureMetadata), absent while closed
//!   version    monotonically increasing write counter
//! ```
//!
//! Every write goes through a Lua script so the read-check-write runs as a
//! single Redis command. The key carries no TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{RedisResult, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::store::BreakerStateStore;
use super::{BreakerRecord, CircuitState, FailureMetadata};
use crate::error::{GuardError, Result};

const INIT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'state', 'closed', 'version', 0)
return 1
"#;

const OPEN_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
redis.call('HSET', KEYS[1], 'metadata', ARGV[1])
redis.call('HINCRBY', KEYS[1], 'version', 1)
if state == 'open' then
    return 0
end
redis.call('HSET', KEYS[1], 'state', 'open', 'opened_at', ARGV[2])
return 1
"#;

const CLOSE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if state == 'closed' then
    return 0
end
redis.call('HSET', KEYS[1], 'state', 'closed', 'closed_at', ARGV[1])
redis.call('HDEL', KEYS[1], 'metadata')
redis.call('HINCRBY', KEYS[1], 'version', 1)
return 1
"#;

/// Breaker state shared by every process through one Redis hash.
pub struct RedisBreakerStore {
    client: redis::Client,
    key: String,
    command_timeout: Duration,
    init_script: Script,
    open_script: Script,
    close_script: Script,
}

impl RedisBreakerStore {
    pub fn new(client: redis::Client, key: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            client,
            key: key.into(),
            command_timeout,
            init_script: Script::new(INIT_SCRIPT),
            open_script: Script::new(OPEN_SCRIPT),
            close_script: Script::new(CLOSE_SCRIPT),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run one Redis round trip under the command timeout. Any failure means
    /// the state is unknowable, so everything maps to `StateStoreUnavailable`.
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(GuardError::state_store_unavailable(format!(
                "redis {} failed: {}",
                op, e
            ))
            .with_source(e)),
            Err(_) => Err(GuardError::state_store_unavailable(format!(
                "redis {} timed out after {:?}",
                op, self.command_timeout
            ))),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.bounded("connect", self.client.get_multiplexed_async_connection())
            .await
    }

    fn parse_record(&self, fields: HashMap<String, String>) -> Result<BreakerRecord> {
        let state = match fields.get("state").map(String::as_str) {
            Some("open") => CircuitState::Open,
            Some("closed") => CircuitState::Closed,
            other => {
                return Err(GuardError::state_store_corrupted(format!(
                    "unexpected breaker state {:?} at {}",
                    other, self.key
                )))
            }
        };

        let opened_at = parse_timestamp(&fields, "opened_at")?;
        let closed_at = parse_timestamp(&fields, "closed_at")?;

        let metadata = match fields.get("metadata") {
            Some(raw) if !raw.is_empty() => Some(
                serde_json::from_str::<FailureMetadata>(raw).map_err(|e| {
                    GuardError::state_store_corrupted(format!("invalid breaker metadata: {}", e))
                })?,
            ),
            _ => None,
        };

        let version = fields
            .get("version")
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| GuardError::state_store_corrupted(format!("invalid version: {}", e)))?
            .unwrap_or(0);

        Ok(BreakerRecord {
            state,
            opened_at,
            closed_at,
            metadata,
            version,
        })
    }
}

fn parse_timestamp(fields: &HashMap<String, String>, name: &str) -> Result<Option<DateTime<Utc>>> {
    match fields.get(name) {
        Some(raw) if !raw.is_empty() => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| GuardError::state_store_corrupted(format!("invalid {}: {}", name, e))),
        _ => Ok(None),
    }
}

#[async_trait]
impl BreakerStateStore for RedisBreakerStore {
    async fn initialize(&self, _now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.connection().await?;
        let invocation = self.init_script.key(&self.key);
        let created: i64 = self
            .bounded("initialize", invocation.invoke_async(&mut conn))
            .await?;
        Ok(created == 1)
    }

    async fn load(&self) -> Result<Option<BreakerRecord>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = self
            .bounded(
                "load",
                redis::cmd("HGETALL").arg(&self.key).query_async(&mut conn),
            )
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        self.parse_record(fields).map(Some)
    }

    async fn open(&self, metadata: &FailureMetadata, now: DateTime<Utc>) -> Result<bool> {
        let metadata_json = serde_json::to_string(metadata)?;
        let mut conn = self.connection().await?;

        let mut invocation = self.open_script.key(&self.key);
        invocation.arg(metadata_json).arg(now.to_rfc3339());
        let opened: i64 = self
            .bounded("open", invocation.invoke_async(&mut conn))
            .await?;
        Ok(opened == 1)
    }

    async fn close(&self, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.connection().await?;

        let mut invocation = self.close_script.key(&self.key);
        invocation.arg(now.to_rfc3339());
        let closed: i64 = self
            .bounded("close", invocation.invoke_async(&mut conn))
            .await?;
        Ok(closed == 1)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RedisBreakerStore {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        RedisBreakerStore::new(client, "test:breaker", Duration::from_millis(100))
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_open_record() {
        let record = store()
            .parse_record(fields(&[
                ("state", "open"),
                ("opened_at", "2024-05-01T12:00:00+00:00"),
                (
                    "metadata",
                    r#"{"last_error":"timeout","error_type":"network","failed_at":"2024-05-01T12:00:00Z"}"#,
                ),
                ("version", "4"),
            ]))
            .unwrap();

        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.version, 4);
        assert!(record.opened_at.is_some());
        assert!(record.closed_at.is_none());
        assert_eq!(record.metadata.unwrap().error_type, "network");
    }

    #[test]
    fn test_parse_rejects_unknown_state() {
        let err = store()
            .parse_record(fields(&[("state", "half_open")]))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StateStoreCorrupted);
    }

    #[test]
    fn test_parse_rejects_bad_metadata() {
        let err = store()
            .parse_record(fields(&[("state", "open"), ("metadata", "{not json")]))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StateStoreCorrupted);
    }
}
