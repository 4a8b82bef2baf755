//! Redis store client.
//!
//! Owns the single network connection and exposes the atomic command
//! surface the lock protocol needs: a version probe over `INFO`, a
//! set-if-absent with expiry, and a scripted compare-and-delete.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client, Script};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Pause between connection attempts while the connect budget lasts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Delete the key only when it still carries the caller's token, as one
/// atomic server-side operation. A plain GET-then-DEL pair would race a
/// concurrent expiry and could delete another holder's entry.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// A server version parsed out of the `INFO` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let component = |raw: Option<&str>| raw.and_then(|c| c.parse::<u32>().ok());
        let mut parts = s.trim().splitn(3, '.');
        match (
            component(parts.next()),
            component(parts.next()),
            component(parts.next()),
        ) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self {
                major,
                minor,
                patch,
            }),
            _ => Err(Error::VersionUnparseable {
                reply: s.to_string(),
            }),
        }
    }
}

/// The atomic command surface the lock coordinator needs from a store.
///
/// Modeled as a trait so the coordinator can be exercised against an
/// in-memory fake, and so a backend with native conditional operations
/// could satisfy the same contract without Lua scripting.
#[async_trait]
pub trait Store {
    /// Parse the server's version out of its introspection output.
    async fn probe_version(&mut self) -> Result<ServerVersion>;

    /// Atomically create `key → value` with an expiry, only if `key` is
    /// absent. Returns whether the create happened.
    async fn set_if_absent(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically delete `key` iff its current value equals `expected`.
    /// Returns whether a delete occurred.
    async fn compare_and_delete(&mut self, key: &str, expected: &str) -> Result<bool>;
}

/// Redis-backed [`Store`] over one multiplexed async connection.
#[derive(Debug)]
pub struct StoreClient {
    conn: MultiplexedConnection,
}

impl StoreClient {
    /// Connect to the redis-server at `address` (`host:port`).
    ///
    /// A zero `timeout` means a single immediate attempt. Otherwise attempts
    /// are repeated every [`CONNECT_RETRY_INTERVAL`] until one succeeds or
    /// the budget runs out, each dial bounded by the time remaining.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnreachable`] when no connection could be established
    /// within the budget.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(format!("redis://{address}")).map_err(|e| {
            Error::StoreUnreachable {
                address: address.to_string(),
                reason: e.to_string(),
            }
        })?;

        if timeout.is_zero() {
            return match client.get_multiplexed_async_connection().await {
                Ok(conn) => Ok(Self { conn }),
                Err(e) => Err(Error::StoreUnreachable {
                    address: address.to_string(),
                    reason: e.to_string(),
                }),
            };
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::StoreUnreachable {
                    address: address.to_string(),
                    reason: format!("no connection within {}s", timeout.as_secs()),
                });
            }
            match tokio::time::timeout(remaining, client.get_multiplexed_async_connection()).await
            {
                Ok(Ok(conn)) => return Ok(Self { conn }),
                Ok(Err(e)) => {
                    tracing::debug!(address, error = %e, "store dial failed, retrying");
                }
                Err(_) => {
                    return Err(Error::StoreUnreachable {
                        address: address.to_string(),
                        reason: format!("no connection within {}s", timeout.as_secs()),
                    });
                }
            }
            tokio::time::sleep(CONNECT_RETRY_INTERVAL.min(remaining)).await;
        }
    }
}

#[async_trait]
impl Store for StoreClient {
    async fn probe_version(&mut self) -> Result<ServerVersion> {
        let info: String = redis::cmd("INFO").query_async(&mut self.conn).await?;
        parse_info_version(&info)
    }

    async fn set_if_absent(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("NX")
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&mut self, key: &str, expected: &str) -> Result<bool> {
        let deleted: i64 = Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(deleted == 1)
    }
}

/// Scan the free-form `INFO` reply for the `redis_version` field.
fn parse_info_version(info: &str) -> Result<ServerVersion> {
    info.lines()
        .find_map(|line| line.trim_end().strip_prefix("redis_version:"))
        .ok_or_else(|| Error::VersionUnparseable {
            reply: info.to_string(),
        })
        .and_then(str::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_SAMPLE: &str = "# Server\r\nredis_version:7.2.4\r\nredis_git_sha1:00000000\r\nos:Linux\r\n";

    #[test]
    fn version_is_found_in_info_noise() {
        let version = parse_info_version(INFO_SAMPLE).unwrap();
        assert_eq!(
            version,
            ServerVersion {
                major: 7,
                minor: 2,
                patch: 4
            }
        );
    }

    #[test]
    fn missing_version_field_is_unparseable() {
        let err = parse_info_version("# Server\r\nos:Linux\r\n").unwrap_err();
        assert!(matches!(err, Error::VersionUnparseable { .. }));
    }

    #[test]
    fn malformed_components_are_unparseable() {
        for raw in ["", "2", "2.6", "a.b.c", "2.six.12"] {
            assert!(raw.parse::<ServerVersion>().is_err(), "parsed {raw:?}");
        }
    }

    #[test]
    fn versions_order_numerically() {
        let parse = |s: &str| s.parse::<ServerVersion>().unwrap();
        assert!(parse("2.6.12") > parse("2.6.11"));
        assert!(parse("2.7.0") > parse("2.6.99"));
        assert!(parse("3.0.0") > parse("2.9.99"));
        assert_eq!(parse("2.6.12"), parse("2.6.12"));
    }

    #[test]
    fn version_displays_as_dotted_triple() {
        let version = ServerVersion {
            major: 2,
            minor: 6,
            patch: 12,
        };
        assert_eq!(version.to_string(), "2.6.12");
    }

    #[tokio::test]
    async fn zero_timeout_connect_is_a_single_attempt() {
        // Port 1 is reserved and refuses immediately on loopback.
        let err = StoreClient::connect("127.0.0.1:1", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnreachable { .. }));
    }

    #[tokio::test]
    async fn bounded_connect_gives_up_at_the_deadline() {
        let start = std::time::Instant::now();
        let err = StoreClient::connect("127.0.0.1:1", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnreachable { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
