//! Redis streams backend.
//!
//! Maps the backend commands onto `XADD`, `EXPIRE`, `XRANGE` and `PING` over
//! a single multiplexed connection. Clones of the connection share one
//! socket, so concurrent requests pipeline onto it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use redis::{aio::MultiplexedConnection, Client, RedisError, Value};
use tracing::{debug, info, warn};

use super::{BackendError, LogBackend};
use crate::{keys::EntryId, types::Record};

/// Reply fragment Redis uses when an `XADD` id does not grow.
const ID_NOT_INCREASING_REPLY: &str = "equal or smaller than the target stream top item";

/// Ordered-log backend on Redis streams.
///
/// Clones share the connection, and closing any of them closes it for all.
#[derive(Clone)]
pub struct RedisBackend {
    /// `None` once closed
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
}

impl RedisBackend {
    /// Open a connection from a `redis://` URL.
    pub async fn connect(connection_string: &str) -> Result<Self, BackendError> {
        let client = Client::open(connection_string)
            .map_err(|e| BackendError::Unavailable(format!("invalid connection string: {e}")))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        info!("Connected to redis");
        Ok(Self {
            connection: Arc::new(RwLock::new(Some(connection))),
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection, BackendError> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| BackendError::Unavailable("redis connection closed".to_string()))
    }
}

fn unavailable(err: RedisError) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

/// Classify a failed `XADD`.
fn map_xadd_error(key: &str, id: EntryId, err: RedisError) -> BackendError {
    if err.to_string().contains(ID_NOT_INCREASING_REPLY) {
        BackendError::IdNotIncreasing {
            key: key.to_string(),
            id,
        }
    } else {
        unavailable(err)
    }
}

/// Whole seconds for `EXPIRE`, rounded up and never zero for a non-zero TTL.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// Decode one `XRANGE` entry: `[id, [field, value, ...]]`.
fn parse_entry(key: &str, (id, raw_fields): (String, Vec<(String, Value)>)) -> Option<Record> {
    let id = match id.parse::<EntryId>() {
        Ok(id) => id,
        Err(e) => {
            warn!(key = %key, error = %e, "Skipping stream entry with unreadable id");
            return None;
        }
    };

    let mut fields = HashMap::with_capacity(raw_fields.len());
    for (name, value) in raw_fields {
        match redis::from_redis_value::<Vec<u8>>(&value) {
            Ok(bytes) => {
                fields.insert(name, bytes);
            }
            Err(e) => {
                debug!(key = %key, id = %id, field = %name, error = %e, "Dropping non-string field");
            }
        }
    }
    Some(Record { id, fields })
}

impl LogBackend for RedisBackend {
    async fn append(
        &self,
        key: &str,
        id: EntryId,
        fields: &[(&str, &str)],
    ) -> Result<EntryId, BackendError> {
        let mut connection = self.connection()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg(id.to_string());
        for (name, value) in fields {
            cmd.arg(*name).arg(*value);
        }

        let assigned: String = cmd
            .query_async(&mut connection)
            .await
            .map_err(|e| map_xadd_error(key, id, e))?;

        assigned
            .parse()
            .map_err(|e| BackendError::Protocol(format!("XADD returned {assigned}: {e}")))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let _applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn range(&self, key: &str, start: EntryId) -> Result<Vec<Record>, BackendError> {
        let mut connection = self.connection()?;
        let entries: Vec<(String, Vec<(String, Value)>)> = redis::cmd("XRANGE")
            .arg(key)
            .arg(start.to_string())
            .arg("+")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| parse_entry(key, entry))
            .collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        // The socket closes once commands still in flight drop their clones.
        if self.connection.write().take().is_some() {
            info!("Closed redis connection");
        }
        Ok(())
    }
}
