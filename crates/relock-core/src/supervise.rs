//! Supervision of the guarded command.
//!
//! Runs exactly one child while the lock is held: wires the child's stdio
//! to the parent's through relay tasks, races child completion against
//! termination-signal delivery, forwards caught signals to the child, and
//! folds whatever exit condition results into a single exit code.

use std::process::Stdio;

use tokio::{
    io::{self, AsyncRead, AsyncWrite},
    process::{Child, Command},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    error::{Error, Result},
    options::EXIT_CODE_ERROR,
};

/// Termination-class signals trapped by the supervisor and forwarded to
/// the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapSignal {
    /// SIGHUP
    Hangup,
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
}

impl TrapSignal {
    /// Every signal the supervisor traps.
    pub const ALL: [Self; 4] = [Self::Hangup, Self::Interrupt, Self::Terminate, Self::Quit];

    /// POSIX signal number; doubles as the exit code on the signal path.
    #[must_use]
    pub const fn number(self) -> i32 {
        match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Quit => 3,
            Self::Terminate => 15,
        }
    }

    /// Conventional name for the log.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Register process-wide handlers for all trapped signals.
///
/// Returns the receiving end of the channel the handlers feed. The
/// receiver is handed to [`Supervisor::new`]; keeping the channel explicit
/// rather than ambient lets tests drive supervision with synthetic signal
/// events.
///
/// # Errors
///
/// Propagates the OS error when a handler cannot be registered.
#[cfg(unix)]
pub fn trap_signals() -> std::io::Result<mpsc::Receiver<TrapSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let (tx, rx) = mpsc::channel(TrapSignal::ALL.len());
    for trapped in TrapSignal::ALL {
        let kind = match trapped {
            TrapSignal::Hangup => SignalKind::hangup(),
            TrapSignal::Interrupt => SignalKind::interrupt(),
            TrapSignal::Quit => SignalKind::quit(),
            TrapSignal::Terminate => SignalKind::terminate(),
        };
        let mut stream = signal(kind)?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if tx.send(trapped).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(rx)
}

/// Non-Unix fallback: only Ctrl-C is observable, reported as SIGINT.
#[cfg(not(unix))]
pub fn trap_signals() -> std::io::Result<mpsc::Receiver<TrapSignal>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(TrapSignal::Interrupt).await;
        }
    });
    Ok(rx)
}

/// Supervises one guarded command from spawn to exit code.
pub struct Supervisor {
    signals: mpsc::Receiver<TrapSignal>,
}

impl Supervisor {
    /// Create a supervisor fed by the given signal channel.
    #[must_use]
    pub fn new(signals: mpsc::Receiver<TrapSignal>) -> Self {
        Self { signals }
    }

    /// Run the command and report the exit code for the whole invocation.
    ///
    /// The child's stdio is piped through the parent's. A trapped signal
    /// is forwarded to the child verbatim and the child is still awaited,
    /// so the caller only regains control once the child is truly gone; on
    /// that path the reported code is the signal's own number. A child
    /// exiting normally with the same numeric code is indistinguishable —
    /// a known, accepted collision.
    ///
    /// # Errors
    ///
    /// [`Error::SpawnFailed`] when the child cannot be started. Everything
    /// after a successful spawn is folded into the exit code.
    pub async fn run(mut self, program: &str, args: &[String]) -> Result<i32> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SpawnFailed {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        // The stdin relay closes the child's input once the parent's is
        // exhausted. It is deliberately not awaited: it may well outlive
        // the child, blocked on a read that never completes.
        if let Some(child_in) = child.stdin.take() {
            relay(io::stdin(), child_in, "stdin");
        } else {
            tracing::warn!("child stdin pipe unavailable, input will not be forwarded");
        }
        let stdout_relay = child
            .stdout
            .take()
            .map(|out| relay(out, io::stdout(), "stdout"));
        if stdout_relay.is_none() {
            tracing::warn!("child stdout pipe unavailable, output will not be forwarded");
        }
        let stderr_relay = child
            .stderr
            .take()
            .map(|err| relay(err, io::stderr(), "stderr"));
        if stderr_relay.is_none() {
            tracing::warn!("child stderr pipe unavailable, output will not be forwarded");
        }

        let mut forwarded = None;
        let status = tokio::select! {
            status = child.wait() => status,
            caught = self.signals.recv() => {
                if let Some(trapped) = caught {
                    tracing::info!(
                        signal = trapped.name(),
                        number = trapped.number(),
                        "caught signal, forwarding to child"
                    );
                    forward_signal(&child, trapped);
                    forwarded = Some(trapped);
                }
                // Whether a signal arrived or the channel closed, the
                // child still has to be reaped before the caller may
                // release the lock.
                child.wait().await
            }
        };

        drain_relay(stdout_relay).await;
        drain_relay(stderr_relay).await;

        if let Some(trapped) = forwarded {
            return Ok(trapped.number());
        }
        Ok(match status {
            Ok(status) => decode_exit_status(&status),
            Err(e) => {
                tracing::error!(error = %e, "failed waiting for the child process");
                EXIT_CODE_ERROR
            }
        })
    }
}

/// Spawn a task copying one stdio channel until its source closes.
fn relay<R, W>(mut from: R, mut to: W, channel: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = io::copy(&mut from, &mut to).await {
            tracing::warn!(channel, error = %e, "stdio relay stopped early");
        }
        // Dropping the writer closes a piped end, signalling end-of-input.
    })
}

/// Await an output relay so the child's pipes are drained before the
/// exit code is reported.
async fn drain_relay(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "stdio relay task failed");
        }
    }
}

/// Forward a trapped signal to the child process, verbatim.
#[cfg(unix)]
#[allow(unsafe_code)]
fn forward_signal(child: &Child, trapped: TrapSignal) {
    let Some(pid) = child.id() else {
        tracing::warn!(signal = trapped.name(), "child already exited, nothing to signal");
        return;
    };
    // kill(2) with a pid this process spawned and has not yet reaped.
    let rc = unsafe { libc::kill(pid as libc::pid_t, trapped.number()) };
    if rc != 0 {
        tracing::warn!(signal = trapped.name(), pid, "failed to forward signal to child");
    }
}

#[cfg(not(unix))]
fn forward_signal(_child: &Child, trapped: TrapSignal) {
    tracing::warn!(
        signal = trapped.name(),
        "signal forwarding is not supported on this platform"
    );
}

/// Fold an exit status into the code reported to the caller.
///
/// A normal exit reports the child's own code. A child killed by a signal
/// reports the raw wait-status signal number; when the platform exposes
/// neither field, the fixed error sentinel stands in.
fn decode_exit_status(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    status.code().or(signal).unwrap_or_else(|| {
        tracing::error!(?status, "child exit status could not be decoded");
        EXIT_CODE_ERROR
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn supervisor() -> (mpsc::Sender<TrapSignal>, Supervisor) {
        let (tx, rx) = mpsc::channel(TrapSignal::ALL.len());
        (tx, Supervisor::new(rx))
    }

    fn shell(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn signal_numbers_match_posix() {
        assert_eq!(TrapSignal::Hangup.number(), 1);
        assert_eq!(TrapSignal::Interrupt.number(), 2);
        assert_eq!(TrapSignal::Quit.number(), 3);
        assert_eq!(TrapSignal::Terminate.number(), 15);
    }

    #[tokio::test]
    async fn successful_child_reports_zero() {
        let (_tx, supervisor) = supervisor();
        let code = supervisor.run("sh", &shell("exit 0")).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn child_exit_code_is_propagated_verbatim() {
        let (_tx, supervisor) = supervisor();
        let code = supervisor.run("sh", &shell("exit 7")).await.unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn spawn_failure_is_distinguished() {
        let (_tx, supervisor) = supervisor();
        let err = supervisor
            .run("relock-test-no-such-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_killed_child_reports_the_raw_signal() {
        let (_tx, supervisor) = supervisor();
        let code = supervisor.run("sh", &shell("kill -9 $$")).await.unwrap();
        assert_eq!(code, 9);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwarded_signal_number_becomes_the_exit_code() {
        let (tx, supervisor) = supervisor();
        let run = tokio::spawn(async move {
            supervisor.run("sleep", &["30".to_string()]).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(TrapSignal::Terminate).await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("supervisor must return once the signaled child is gone")
            .unwrap()
            .unwrap();
        assert_eq!(code, TrapSignal::Terminate.number());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closed_signal_channel_still_waits_for_the_child() {
        let (tx, supervisor) = supervisor();
        drop(tx);
        let code = supervisor.run("sh", &shell("exit 3")).await.unwrap();
        assert_eq!(code, 3);
    }

    #[cfg(unix)]
    #[test]
    fn decode_prefers_the_normal_exit_code() {
        use std::os::unix::process::ExitStatusExt;

        // Wait statuses: exit code lives in the high byte, a killing
        // signal in the low bits.
        let exited = std::process::ExitStatus::from_raw(7 << 8);
        assert_eq!(decode_exit_status(&exited), 7);

        let signaled = std::process::ExitStatus::from_raw(15);
        assert_eq!(decode_exit_status(&signaled), 15);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trap_signals_registers_inside_the_runtime() {
        let rx = trap_signals().unwrap();
        drop(rx);
    }
}
