//! Lock acquisition and release against the shared store.
//!
//! The protocol is optimistic: one atomic set-if-absent per attempt, a
//! fresh token every time, and a jittered sub-second sleep between
//! attempts when waiting is allowed. Release deletes the entry only while
//! it still carries the caller's token.

use std::time::Duration;

use rand::{rngs::OsRng, Rng, RngCore};

use crate::{
    error::{Error, Result},
    options::Options,
    store::{ServerVersion, Store},
};

/// Oldest server version whose `SET ... EX ... NX` and scripted delete
/// behave atomically.
pub const MIN_SERVER_VERSION: ServerVersion = ServerVersion {
    major: 2,
    minor: 6,
    patch: 12,
};

/// Bounds of the jittered sleep between acquisition attempts.
const POLL_MIN: Duration = Duration::from_millis(250);
const POLL_MAX: Duration = Duration::from_millis(750);

/// Generate a fresh 128-bit hex-encoded lock token.
///
/// Tokens prove ownership, so they come from the OS entropy source; a
/// predictable token would let another process release a lock it never
/// held. A token is never reused across attempts.
#[must_use]
pub fn fresh_token() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Draw one poll interval.
fn poll_interval() -> Duration {
    rand::thread_rng().gen_range(POLL_MIN..=POLL_MAX)
}

/// Require a server new enough to support the protocol.
///
/// Runs before any acquisition attempt so the tool never proceeds with
/// broken exclusivity guarantees on an older store.
///
/// # Errors
///
/// [`Error::UnsupportedStoreVersion`] below [`MIN_SERVER_VERSION`]; probe
/// failures pass through.
pub async fn check_version<S>(store: &mut S) -> Result<ServerVersion>
where
    S: Store + Send + ?Sized,
{
    let found = store.probe_version().await?;
    if found < MIN_SERVER_VERSION {
        return Err(Error::UnsupportedStoreVersion {
            found,
            required: MIN_SERVER_VERSION,
        });
    }
    Ok(found)
}

/// Acquire the lock on `key`, returning the token that proves ownership.
///
/// Under fail-fast (`options.wait == false`) a contended key returns
/// [`Error::LockContended`] immediately, with no sleep and no retry.
/// Otherwise the attempt loop polls until the entry can be created; the
/// connect phase already bounded total wait time, so the loop itself has
/// no separate ceiling.
///
/// # Errors
///
/// [`Error::LockContended`] under fail-fast; store errors pass through.
pub async fn acquire<S>(store: &mut S, key: &str, options: &Options) -> Result<String>
where
    S: Store + Send + ?Sized,
{
    loop {
        let token = fresh_token();
        if store
            .set_if_absent(key, &token, options.expires_secs)
            .await?
        {
            tracing::debug!(key, "lock acquired");
            return Ok(token);
        }
        if !options.wait {
            return Err(Error::LockContended {
                key: key.to_string(),
            });
        }
        tokio::time::sleep(poll_interval()).await;
    }
}

/// Release the lock on `key` if this invocation still owns it.
///
/// With `options.keep` the entry is deliberately left behind to outlive
/// the process. A release that finds the entry gone or carrying another
/// token is logged and swallowed: an expired lock is not a
/// caller-actionable condition. Store errors here are swallowed too,
/// since the guarded command has already finished either way.
pub async fn release<S>(store: &mut S, key: &str, token: &str, options: &Options)
where
    S: Store + Send + ?Sized,
{
    if options.keep {
        tracing::debug!(key, "keeping the lock past exit");
        return;
    }
    match store.compare_and_delete(key, token).await {
        Ok(true) => tracing::debug!(key, "lock released"),
        Ok(false) => tracing::warn!(key, "lock was already expired or released"),
        Err(e) => tracing::warn!(key, error = %e, "lock release failed"),
    }
}
