//! Supervision of the long-lived placement server.
//!
//! Liveness comes from the operating system: the supervisor reads the pid the
//! log file starts with and inspects `/proc/<pid>/stat`. Control requests are
//! single lines appended to the server's control FIFO without waiting for an
//! answer.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while managing the placement server.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// No server is configured for the organism.
    #[error("no placement server configured for {0}")]
    NotConfigured(String),

    /// The server process could not be spawned.
    #[error("failed to spawn placement server {binary}: {source}")]
    Spawn {
        /// Server executable.
        binary: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// A server file could not be read or written.
    #[error("placement server file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
}

/// Files and executable of one organism's placement server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    /// Unix socket the server listens on.
    pub socket: PathBuf,
    /// Log file whose first line is the server pid.
    pub log: PathBuf,
    /// Control FIFO read by the server.
    pub control: PathBuf,
    /// Server executable.
    pub server_binary: PathBuf,
    /// Extra arguments placed before the socket, FIFO and tree arguments.
    pub server_args: Vec<String>,
    /// Destination for the server's stdout/stderr; discarded when `None`.
    pub output: Option<PathBuf>,
}

/// Scheduler state from `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// `R`
    Running,
    /// `S`
    Sleeping,
    /// `D`
    DiskSleep,
    /// `T` or `t`
    Stopped,
    /// `Z`
    Zombie,
    /// `X` or `x`
    Dead,
    /// Anything else.
    Other(char),
}

impl ProcessState {
    fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'T' | 't' => ProcessState::Stopped,
            'Z' => ProcessState::Zombie,
            'X' | 'x' => ProcessState::Dead,
            other => ProcessState::Other(other),
        }
    }

    /// Running and both sleep states count as a live server.
    pub fn is_healthy(self) -> bool {
        matches!(
            self,
            ProcessState::Running | ProcessState::Sleeping | ProcessState::DiskSleep
        )
    }
}

/// Extract the state field from the contents of a `/proc/<pid>/stat` file.
///
/// The command name is parenthesized and may itself contain spaces or
/// parentheses, so the state is read after the last `)`.
pub fn parse_proc_stat(stat: &str) -> Option<ProcessState> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next().map(ProcessState::from_code)
}

/// Starts, checks and steers placement servers keyed by organism (database) name.
#[derive(Debug, Clone)]
pub struct DaemonSupervisor {
    daemons: HashMap<String, DaemonPaths>,
    proc_root: PathBuf,
    children: Arc<Mutex<HashMap<String, Child>>>,
}

impl Default for DaemonSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonSupervisor {
    /// Supervisor with no configured servers.
    pub fn new() -> Self {
        Self {
            daemons: HashMap::new(),
            proc_root: PathBuf::from("/proc"),
            children: Arc::default(),
        }
    }

    /// Register the server for `organism`.
    pub fn with_daemon(mut self, organism: impl Into<String>, paths: DaemonPaths) -> Self {
        self.daemons.insert(organism.into(), paths);
        self
    }

    /// Inspect process state under a different root than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Returns `true` when a server is configured for `organism`.
    pub fn is_configured(&self, organism: &str) -> bool {
        self.daemons.contains_key(organism)
    }

    /// Paths of the server for `organism`.
    pub fn paths(&self, organism: &str) -> Result<&DaemonPaths, DaemonError> {
        self.daemons
            .get(organism)
            .ok_or_else(|| DaemonError::NotConfigured(organism.to_string()))
    }

    /// Pid recorded on the first line of the server log, if readable.
    pub fn recorded_pid(&self, organism: &str) -> Option<u32> {
        let paths = self.daemons.get(organism)?;
        let log = fs::read_to_string(&paths.log).ok()?;
        log.lines().next()?.trim().parse().ok()
    }

    /// Current state of the recorded server process. Never cached.
    pub fn process_state(&self, organism: &str) -> Option<ProcessState> {
        let pid = self.recorded_pid(organism)?;
        let stat_path = self.proc_root.join(pid.to_string()).join("stat");
        let stat = fs::read_to_string(&stat_path).ok()?;
        parse_proc_stat(&stat)
    }

    /// Returns `true` when the recorded server process exists and is runnable
    /// or sleeping.
    pub fn is_running(&self, organism: &str) -> bool {
        self.reap(organism);
        match self.process_state(organism) {
            Some(state) if state.is_healthy() => true,
            Some(state) => {
                warn!(organism, ?state, "placement server process is unhealthy");
                false
            }
            None => false,
        }
    }

    /// Collect the exit status of a server this supervisor started, once it
    /// has exited. `None` while it runs or when it was started elsewhere.
    pub fn reap(&self, organism: &str) -> Option<ExitStatus> {
        let mut children = self.children.lock().ok()?;
        let status = match children.get_mut(organism)?.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(err) => {
                warn!(organism, error = %err, "could not check placement server status");
                return None;
            }
        };
        children.remove(organism);
        info!(organism, %status, "placement server exited");
        Some(status)
    }

    /// Spawn the server in its own process group with null stdin, record its
    /// pid as the first line of the log and return the pid. The child keeps
    /// running after this process exits; its handle is kept for [`Self::reap`].
    pub fn start(&self, organism: &str, tree_files: &[PathBuf]) -> Result<u32, DaemonError> {
        let paths = self.paths(organism)?;
        let (stdout, stderr) = match &paths.output {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| DaemonError::Io {
                        path: path.clone(),
                        source,
                    })?;
                let clone = file.try_clone().map_err(|source| DaemonError::Io {
                    path: path.clone(),
                    source,
                })?;
                (Stdio::from(file), Stdio::from(clone))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let mut command = Command::new(&paths.server_binary);
        command
            .args(&paths.server_args)
            .arg("-s")
            .arg(&paths.socket)
            .arg("-m")
            .arg(&paths.control)
            .args(tree_files)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0);
        let child = command.spawn().map_err(|source| DaemonError::Spawn {
            binary: paths.server_binary.clone(),
            source,
        })?;
        let pid = child.id();

        let mut log = File::create(&paths.log).map_err(|source| DaemonError::Io {
            path: paths.log.clone(),
            source,
        })?;
        writeln!(log, "{}", pid)
            .and_then(|_| writeln!(log, "{:?}", command))
            .map_err(|source| DaemonError::Io {
                path: paths.log.clone(),
                source,
            })?;
        if let Ok(mut children) = self.children.lock() {
            children.insert(organism.to_string(), child);
        }
        info!(organism, pid, "started placement server");
        Ok(pid)
    }

    /// Ask the server to reload its trees.
    pub fn reload(&self, organism: &str, tree_files: &[PathBuf]) -> Result<(), DaemonError> {
        let mut line = String::from("reload");
        for tree in tree_files {
            line.push(' ');
            line.push_str(&tree.display().to_string());
        }
        self.send_control(organism, &line)
    }

    /// Ask the server to exit.
    pub fn stop(&self, organism: &str) -> Result<(), DaemonError> {
        self.send_control(organism, "stop")
    }

    /// Change the number of worker threads the server uses.
    pub fn set_thread_count(&self, organism: &str, threads: usize) -> Result<(), DaemonError> {
        self.send_control(organism, &format!("thread {}", threads))
    }

    /// Change the server's idle timeout in seconds.
    pub fn set_timeout(&self, organism: &str, seconds: u64) -> Result<(), DaemonError> {
        self.send_control(organism, &format!("timeout {}", seconds))
    }

    /// Append one line to the control FIFO. Opening is non-blocking, so this
    /// fails immediately instead of hanging when no server is reading.
    fn send_control(&self, organism: &str, line: &str) -> Result<(), DaemonError> {
        let paths = self.paths(organism)?;
        write_control_line(&paths.control, line)?;
        debug!(organism, command = line, "sent placement server command");
        Ok(())
    }
}

fn write_control_line(path: &Path, line: &str) -> Result<(), DaemonError> {
    let io_error = |source| DaemonError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut fifo = OpenOptions::new()
        .append(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(io_error)?;
    fifo.write_all(format!("{}\n", line).as_bytes())
        .map_err(io_error)
}
