//! Fallback chain for running one placement request.
//!
//! ```text
//! TryDaemon ──ok──────────────────────────────────────────────▶ Done(Daemon)
//!     │ unreachable, server alive ─▶ RetryDaemon(Transient)
//!     │ unreachable, server down ──▶ start ─▶ RetryDaemon(Started)
//!     │ stale tree / broken reply ─▶ Standalone
//! RetryDaemon(Transient) ─unreachable─▶ start ─▶ RetryDaemon(Started)
//! RetryDaemon(Started) ───unreachable─▶ Standalone
//! Standalone ──────────────────────────────────────────────────▶ Done
//! ```
//!
//! All process and socket work goes through [`PlacementBackend`], so the chain
//! can be driven by a fake in tests.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::outdir::{scan_output_dir, OutputFiles};
use super::protocol::{classify_reply, EngineCommand, ServerReply};
use super::results::{
    load_placements, parse_clades, parse_mutation_paths, read, PlacementResults, StabilityPoll,
};
use super::{DaemonSupervisor, PlacementError};

/// Outcome of one request sent over the daemon socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOutcome {
    /// Could not connect.
    Unreachable(String),
    /// The daemon finished the request.
    Completed,
    /// The daemon does not have the tree; a reload should be requested.
    StaleTree(String),
    /// Connected, but the exchange failed before completion.
    Broken(String),
}

/// Process and socket operations the fallback chain needs.
pub trait PlacementBackend {
    /// A daemon is configured for this request's organism.
    fn daemon_configured(&self) -> bool;

    /// The configured daemon process is currently healthy.
    fn daemon_alive(&self) -> bool;

    /// Spawn the daemon.
    fn start_daemon(&mut self) -> Result<(), PlacementError>;

    /// Ask the daemon to reload its trees without waiting.
    fn request_reload(&mut self);

    /// Send a complete request message and read replies until it finishes.
    fn send(&mut self, message: &str) -> SocketOutcome;

    /// Run the engine as a subprocess, capturing its diagnostics in `stderr_path`.
    fn run_standalone(
        &mut self,
        command: &EngineCommand,
        stderr_path: &Path,
    ) -> Result<(), PlacementError>;

    /// Wait before retrying the socket.
    fn pause(&mut self, interval: Duration);
}

/// Why the socket is tried a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The daemon looked alive; assume it was still starting up.
    Transient,
    /// The daemon was just started.
    Started,
}

/// Route by which a request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// First socket attempt.
    Daemon,
    /// Socket attempt after a retry.
    DaemonRetry(RetryReason),
    /// Standalone subprocess.
    Standalone,
}

/// States of the fallback chain.
#[derive(Debug)]
pub enum Attempt {
    /// First socket attempt.
    TryDaemon,
    /// Second (or third) socket attempt.
    RetryDaemon(RetryReason),
    /// Subprocess fallback.
    Standalone,
    /// Terminal state.
    Done(Result<Via, PlacementError>),
}

/// Everything a completed request produced.
#[derive(Debug, Clone)]
pub struct PlacementRun {
    /// Route that completed the request.
    pub via: Via,
    /// States visited, for diagnostics.
    pub trail: Vec<String>,
    /// Files found in the output directory.
    pub files: OutputFiles,
    /// Per-sample results with paths and clades attached.
    pub results: PlacementResults,
}

/// Drives the fallback chain for one request at a time.
#[derive(Debug)]
pub struct PlacementClient<B: PlacementBackend> {
    backend: B,
    retry_delay: Duration,
    sample_prefix: String,
    anchor_samples: Option<PathBuf>,
}

impl<B: PlacementBackend> PlacementClient<B> {
    /// Client over `backend` with a 1 second retry delay.
    pub fn new(backend: B, sample_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            retry_delay: Duration::from_secs(1),
            sample_prefix: sample_prefix.into(),
            anchor_samples: None,
        }
    }

    /// Delay between a failed connect and the retry.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Anchor-sample file forwarded to the daemon.
    pub fn with_anchor_samples(mut self, path: Option<PathBuf>) -> Self {
        self.anchor_samples = path;
        self
    }

    /// Backend, for inspection.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the request to completion and report how it completed. The trail of
    /// visited states is returned alongside for diagnostics.
    pub fn run(
        &mut self,
        command: &EngineCommand,
        stderr_path: &Path,
    ) -> (Result<Via, PlacementError>, Vec<String>) {
        let message = command.to_socket_message(&self.sample_prefix, self.anchor_samples.as_deref());
        let mut state = if self.backend.daemon_configured() {
            Attempt::TryDaemon
        } else {
            Attempt::Standalone
        };
        let mut trail = Vec::new();
        loop {
            trail.push(format!("{:?}", state));
            state = match state {
                Attempt::Done(result) => return (result, trail),
                Attempt::TryDaemon => self.try_daemon(&message, None),
                Attempt::RetryDaemon(reason) => self.try_daemon(&message, Some(reason)),
                Attempt::Standalone => {
                    info!(command = %command, "running placement engine as a subprocess");
                    Attempt::Done(
                        self.backend
                            .run_standalone(command, stderr_path)
                            .map(|_| Via::Standalone),
                    )
                }
            };
        }
    }

    /// Run the request, then inventory the output directory and parse the
    /// per-sample results, mutation paths and clade assignments.
    pub fn place(
        &mut self,
        command: &EngineCommand,
        stderr_path: &Path,
        poll: &StabilityPoll,
    ) -> Result<PlacementRun, PlacementError> {
        let (via, trail) = self.run(command, stderr_path);
        let via = via?;
        info!(?via, "placement engine finished");
        let files = scan_output_dir(command.out_dir())?;
        let mut results = load_placements(command.out_dir(), stderr_path, poll)?;
        if let Some(path) = &files.mutation_paths {
            parse_mutation_paths(&read(path)?, path, &mut results.placements)?;
        }
        if let Some(path) = &files.clades {
            parse_clades(&read(path)?, &mut results.placements);
        }
        Ok(PlacementRun {
            via,
            trail,
            files,
            results,
        })
    }

    fn try_daemon(&mut self, message: &str, retry: Option<RetryReason>) -> Attempt {
        match self.backend.send(message) {
            SocketOutcome::Completed => Attempt::Done(Ok(match retry {
                None => Via::Daemon,
                Some(reason) => Via::DaemonRetry(reason),
            })),
            SocketOutcome::StaleTree(line) => {
                warn!(reply = %line, "placement server has a stale tree; requesting reload");
                self.backend.request_reload();
                Attempt::Standalone
            }
            SocketOutcome::Broken(reason) => {
                warn!(%reason, "placement server request failed");
                Attempt::Standalone
            }
            SocketOutcome::Unreachable(reason) => {
                debug!(%reason, ?retry, "placement server unreachable");
                match retry {
                    None if self.backend.daemon_alive() => {
                        self.backend.pause(self.retry_delay);
                        Attempt::RetryDaemon(RetryReason::Transient)
                    }
                    None | Some(RetryReason::Transient) => self.start_then_retry(),
                    Some(RetryReason::Started) => Attempt::Standalone,
                }
            }
        }
    }

    fn start_then_retry(&mut self) -> Attempt {
        match self.backend.start_daemon() {
            Ok(()) => {
                self.backend.pause(self.retry_delay);
                Attempt::RetryDaemon(RetryReason::Started)
            }
            Err(err) => {
                warn!(error = %err, "could not start placement server");
                Attempt::Standalone
            }
        }
    }
}

/// Real backend: Unix socket, [`DaemonSupervisor`] and `std::process`.
#[derive(Debug)]
pub struct SystemBackend {
    supervisor: DaemonSupervisor,
    organism: String,
    tree_files: Vec<PathBuf>,
    read_timeout: Option<Duration>,
}

impl SystemBackend {
    /// Backend for `organism`, whose daemon serves `tree_files`.
    pub fn new(supervisor: DaemonSupervisor, organism: impl Into<String>, tree_files: Vec<PathBuf>) -> Self {
        Self {
            supervisor,
            organism: organism.into(),
            tree_files,
            read_timeout: None,
        }
    }

    /// Give up on a daemon that stops replying for this long.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Supervisor used for liveness and control commands.
    pub fn supervisor(&self) -> &DaemonSupervisor {
        &self.supervisor
    }
}

impl PlacementBackend for SystemBackend {
    fn daemon_configured(&self) -> bool {
        self.supervisor.is_configured(&self.organism)
    }

    fn daemon_alive(&self) -> bool {
        self.supervisor.is_running(&self.organism)
    }

    fn start_daemon(&mut self) -> Result<(), PlacementError> {
        self.supervisor.start(&self.organism, &self.tree_files)?;
        Ok(())
    }

    fn request_reload(&mut self) {
        if let Err(err) = self.supervisor.reload(&self.organism, &self.tree_files) {
            warn!(error = %err, "reload request failed");
        }
    }

    fn send(&mut self, message: &str) -> SocketOutcome {
        let socket = match self.supervisor.paths(&self.organism) {
            Ok(paths) => paths.socket.clone(),
            Err(err) => return SocketOutcome::Unreachable(err.to_string()),
        };
        let mut stream = match UnixStream::connect(&socket) {
            Ok(stream) => stream,
            Err(err) => return SocketOutcome::Unreachable(format!("{}: {}", socket.display(), err)),
        };
        if let Err(err) = stream
            .set_read_timeout(self.read_timeout)
            .and_then(|_| stream.write_all(message.as_bytes()))
        {
            return SocketOutcome::Broken(err.to_string());
        }
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => return SocketOutcome::Broken(err.to_string()),
            };
            match classify_reply(&line) {
                ServerReply::Done => return SocketOutcome::Completed,
                ServerReply::StaleTree(line) => return SocketOutcome::StaleTree(line),
                ServerReply::Diagnostic(text) if !text.is_empty() => {
                    debug!(reply = %text, "placement server")
                }
                ServerReply::Diagnostic(_) => {}
            }
        }
        SocketOutcome::Broken("connection closed before end of transmission".into())
    }

    fn run_standalone(
        &mut self,
        command: &EngineCommand,
        stderr_path: &Path,
    ) -> Result<(), PlacementError> {
        let stderr = File::create(stderr_path).map_err(|source| PlacementError::Io {
            path: stderr_path.to_path_buf(),
            source,
        })?;
        let status = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .status()
            .map_err(|source| PlacementError::Io {
                path: command.program().to_path_buf(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(PlacementError::EngineFailed {
                status: status.to_string(),
                stderr: stderr_path.to_path_buf(),
            })
        }
    }

    fn pause(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::DaemonError;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        configured: bool,
        alive: bool,
        start_ok: bool,
        replies: VecDeque<SocketOutcome>,
        standalone_ok: bool,
        calls: Vec<&'static str>,
    }

    impl PlacementBackend for Scripted {
        fn daemon_configured(&self) -> bool {
            self.configured
        }
        fn daemon_alive(&self) -> bool {
            self.alive
        }
        fn start_daemon(&mut self) -> Result<(), PlacementError> {
            self.calls.push("start");
            if self.start_ok {
                Ok(())
            } else {
                Err(PlacementError::Daemon(DaemonError::NotConfigured("x".into())))
            }
        }
        fn request_reload(&mut self) {
            self.calls.push("reload");
        }
        fn send(&mut self, _message: &str) -> SocketOutcome {
            self.calls.push("send");
            self.replies
                .pop_front()
                .unwrap_or(SocketOutcome::Unreachable("refused".into()))
        }
        fn run_standalone(&mut self, _: &EngineCommand, path: &Path) -> Result<(), PlacementError> {
            self.calls.push("standalone");
            if self.standalone_ok {
                Ok(())
            } else {
                Err(PlacementError::EngineFailed {
                    status: "exit status: 1".into(),
                    stderr: path.to_path_buf(),
                })
            }
        }
        fn pause(&mut self, _: Duration) {
            self.calls.push("pause");
        }
    }

    fn command() -> EngineCommand {
        EngineCommand::placement(
            "usher",
            Path::new("in.vcf"),
            Path::new("tree.pb"),
            Path::new("out"),
            50,
            16,
        )
    }

    fn run(backend: Scripted) -> (Result<Via, PlacementError>, Vec<&'static str>) {
        let mut client = PlacementClient::new(backend, "uploaded_").with_retry_delay(Duration::ZERO);
        let (result, _) = client.run(&command(), Path::new("stderr.txt"));
        (result, client.backend().calls.clone())
    }

    #[test]
    fn unconfigured_daemon_goes_straight_to_standalone() {
        let (result, calls) = run(Scripted {
            standalone_ok: true,
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::Standalone);
        assert_eq!(calls, ["standalone"]);
    }

    #[test]
    fn first_connect_succeeds() {
        let (result, calls) = run(Scripted {
            configured: true,
            replies: VecDeque::from([SocketOutcome::Completed]),
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::Daemon);
        assert_eq!(calls, ["send"]);
    }

    #[test]
    fn alive_daemon_gets_one_transient_retry() {
        let (result, calls) = run(Scripted {
            configured: true,
            alive: true,
            replies: VecDeque::from([
                SocketOutcome::Unreachable("refused".into()),
                SocketOutcome::Completed,
            ]),
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::DaemonRetry(RetryReason::Transient));
        assert_eq!(calls, ["send", "pause", "send"]);
    }

    #[test]
    fn dead_daemon_is_started_then_retried() {
        let (result, calls) = run(Scripted {
            configured: true,
            start_ok: true,
            replies: VecDeque::from([
                SocketOutcome::Unreachable("refused".into()),
                SocketOutcome::Completed,
            ]),
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::DaemonRetry(RetryReason::Started));
        assert_eq!(calls, ["send", "start", "pause", "send"]);
    }

    #[test]
    fn exhausted_retries_fall_back_to_standalone() {
        let (result, calls) = run(Scripted {
            configured: true,
            alive: true,
            start_ok: true,
            standalone_ok: true,
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::Standalone);
        assert_eq!(
            calls,
            ["send", "pause", "send", "start", "pause", "send", "standalone"]
        );
    }

    #[test]
    fn stale_tree_requests_reload_and_falls_back() {
        let (result, calls) = run(Scripted {
            configured: true,
            replies: VecDeque::from([SocketOutcome::StaleTree("Tree x.pb not found".into())]),
            standalone_ok: true,
            ..Scripted::default()
        });
        assert_eq!(result.unwrap(), Via::Standalone);
        assert_eq!(calls, ["send", "reload", "standalone"]);
    }

    #[test]
    fn standalone_failure_is_terminal() {
        let (result, _) = run(Scripted {
            configured: true,
            start_ok: false,
            ..Scripted::default()
        });
        assert!(matches!(result, Err(PlacementError::EngineFailed { .. })));
    }
}
