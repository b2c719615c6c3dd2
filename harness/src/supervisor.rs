//! OS-level lifecycle control for producer, ship, and rodeos processes.
//!
//! A [`ProcessHandle`] owns exactly one role instance: its data directory,
//! its cached command line, and (while running) the child process and log
//! files. No other component touches OS-level process state directly.

use crate::Error;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::{Child, Command};
use tracing::info;

/// Settle delay after every relaunch, giving the process time to begin
/// on-disk replay or resync before further commands are issued.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Signal delivered to a process on stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, as if the operator hit Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGKILL. The process gets no chance to persist state, so a subsequent
    /// restart must be clean.
    Kill,
}

impl Signal {
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }

    /// SIGINT and SIGTERM request an orderly shutdown; SIGKILL does not.
    pub fn is_graceful(&self) -> bool {
        !matches!(self, Signal::Kill)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        };
        write!(f, "{name}")
    }
}

/// Owns one role instance's process and data directory.
pub struct ProcessHandle {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    data_dir: PathBuf,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Launches a fresh process. When `clean`, the data directory is
    /// recursively deleted and recreated first. A launch that fails is fatal
    /// to the running scenario: it indicates a configuration or binary fault,
    /// not transient unavailability, so it is never retried.
    pub async fn launch(
        name: impl Into<String>,
        program: impl AsRef<Path>,
        args: Vec<String>,
        data_dir: impl Into<PathBuf>,
        clean: bool,
    ) -> Result<Self, Error> {
        let mut handle = Self {
            name: name.into(),
            program: program.as_ref().to_path_buf(),
            args,
            data_dir: data_dir.into(),
            child: None,
        };
        handle.spawn(clean)?;
        Ok(handle)
    }

    fn spawn(&mut self, clean: bool) -> Result<(), Error> {
        if clean && self.data_dir.exists() {
            fs::remove_dir_all(&self.data_dir)?;
        }
        fs::create_dir_all(&self.data_dir)?;
        let (stdout, stderr) = self.open_logs(clean)?;
        // A handle dropped without an explicit stop (cluster bring-up failed
        // partway) must not leak its process.
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LaunchFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        info!(name = %self.name, pid = ?child.id(), clean, "launched");
        self.child = Some(child);
        Ok(())
    }

    /// Log files are reopened only on a clean relaunch; a warm restart
    /// appends to whatever the previous run left behind.
    fn open_logs(&self, clean: bool) -> Result<(fs::File, fs::File), Error> {
        let open = |path: PathBuf| -> Result<fs::File, Error> {
            if clean {
                Ok(fs::File::create(path)?)
            } else {
                Ok(fs::OpenOptions::new().create(true).append(true).open(path)?)
            }
        };
        Ok((
            open(self.data_dir.join("stdout.out"))?,
            open(self.data_dir.join("stderr.out"))?,
        ))
    }

    /// Delivers `signal` and blocks until the process exits. A no-op when the
    /// process is already stopped.
    pub async fn stop(&mut self, signal: Signal) -> Result<(), Error> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(pid) = child.id() {
            // SAFETY: pid refers to a child we own and have not yet reaped.
            let ret = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                // The process may have exited on its own; reap it below.
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(err.into());
                }
            }
        }
        let status = child.wait().await?;
        info!(name = %self.name, %signal, ?status, "stopped");
        Ok(())
    }

    /// Stops the process if running, optionally wipes the data directory,
    /// and relaunches from the cached command line. A short settle delay
    /// follows every relaunch so on-disk replay or resync can begin before
    /// the caller issues further commands.
    pub async fn restart(&mut self, clean: bool) -> Result<(), Error> {
        self.stop(Signal::Terminate).await?;
        self.spawn(clean)?;
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Extends the cached command line. The command is remembered from the
    /// first invocation, so flags that must survive restarts (e.g. the
    /// producer's production-enabling arguments) are appended here once.
    pub fn append_args<I>(&mut self, extra: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.args.extend(extra);
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_kill_is_ungraceful() {
        assert!(Signal::Interrupt.is_graceful());
        assert!(Signal::Terminate.is_graceful());
        assert!(!Signal::Kill.is_graceful());
    }

    #[test]
    fn raw_signal_numbers() {
        assert_eq!(Signal::Interrupt.as_raw(), libc::SIGINT);
        assert_eq!(Signal::Terminate.as_raw(), libc::SIGTERM);
        assert_eq!(Signal::Kill.as_raw(), libc::SIGKILL);
    }
}
