//! Top-level orchestration: connect, validate, acquire, run, release.

use relock_core::{lock, supervise, Error, StoreClient, EXIT_CODE_ERROR};

use crate::cli::Invocation;

/// Execute one locked invocation and report the process exit code.
///
/// The sequence is strictly linear: connect to the store, gate on its
/// version, acquire the lock, supervise the command, release. Release
/// runs unconditionally after supervision — it is tied to the child's
/// lifetime, not to its exit status.
pub async fn run(invocation: &Invocation) -> i32 {
    let Invocation {
        options,
        key,
        program,
        args,
    } = invocation;

    let mut store = match StoreClient::connect(&options.address, options.connect_timeout()).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "redis-server seems down");
            return EXIT_CODE_ERROR;
        }
    };

    match lock::check_version(&mut store).await {
        Ok(version) => tracing::debug!(%version, "store passed the version gate"),
        Err(e) => {
            tracing::error!(error = %e, "store cannot support the lock protocol");
            return EXIT_CODE_ERROR;
        }
    }

    let token = match lock::acquire(&mut store, key, options).await {
        Ok(token) => token,
        Err(e @ Error::LockContended { .. }) => {
            tracing::error!(error = %e, "giving up");
            return options.lock_exit_code;
        }
        Err(e) => {
            tracing::error!(error = %e, "lock acquisition failed");
            return EXIT_CODE_ERROR;
        }
    };

    let code = match supervise::trap_signals() {
        Ok(signals) => {
            match supervise::Supervisor::new(signals).run(program, args).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!(error = %e, "could not run the command");
                    EXIT_CODE_ERROR
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "could not register signal handlers");
            EXIT_CODE_ERROR
        }
    };

    // The child is fully gone by now; the lock's lifetime ends with it.
    lock::release(&mut store, key, &token, options).await;

    code
}
