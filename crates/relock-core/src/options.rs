//! Run options, immutable after parse.

use std::time::Duration;

/// Default redis-server address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:6379";

/// Default lock TTL in seconds (one day).
pub const DEFAULT_EXPIRES_SECS: u64 = 86400;

/// Distinguished exit code for store, version, spawn and contention failures.
pub const EXIT_CODE_ERROR: i32 = 111;

/// Options for one locked invocation.
#[derive(Debug, Clone)]
pub struct Options {
    /// redis-server address as `host:port`.
    pub address: String,
    /// Lock TTL in seconds; also the connection-wait ceiling in wait mode.
    pub expires_secs: u64,
    /// Poll for the lock instead of failing fast when it is contended.
    pub wait: bool,
    /// Leave the lock in place when the invoked command exits.
    pub keep: bool,
    /// Exit code reported when the lock is contended under fail-fast.
    pub lock_exit_code: i32,
}

impl Options {
    /// Budget for establishing the store connection.
    ///
    /// Zero means a single immediate attempt; in wait mode the budget is the
    /// lock expiry itself, which also bounds the total time spent waiting.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        if self.wait {
            Duration::from_secs(self.expires_secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            expires_secs: DEFAULT_EXPIRES_SECS,
            wait: true,
            keep: false,
            lock_exit_code: EXIT_CODE_ERROR,
        }
    }
}
