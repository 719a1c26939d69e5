//! Process creation backends
//!
//! [`ProcessSpawner`] is the seam between the launcher and the OS:
//! - [`CloneSpawner`](crate::CloneSpawner) - real `clone(2)` with namespace flags
//! - [`RecordingSpawner`] - fake for tests, never creates a process

use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nslaunch_core::{CreationError, LaunchError, LaunchResult, ProcessId};

use crate::config::{NamespaceSet, UserMapping, ValidatedSet};

/// A fully resolved child, ready to be created
///
/// Every allocation the child needs is done while building this, so the
/// code running between `clone` and `execve` only touches prepared data.
#[derive(Debug)]
pub struct PreparedChild {
    pub(crate) program: PathBuf,
    pub(crate) path: CString,
    pub(crate) argv: Vec<CString>,
    pub(crate) envp: Vec<CString>,
    pub(crate) namespaces: ValidatedSet,
    pub(crate) user_mapping: Option<UserMapping>,
    pub(crate) hostname: Option<CString>,
    pub(crate) domainname: Option<CString>,
    pub(crate) stdio: [Option<OwnedFd>; 3],
}

impl PreparedChild {
    /// Resolved program path
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument vector including `argv[0]`
    #[must_use]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// Environment as `KEY=VALUE` entries
    #[must_use]
    pub fn envp(&self) -> &[CString] {
        &self.envp
    }

    /// Namespaces the child is created in
    #[must_use]
    pub const fn namespaces(&self) -> NamespaceSet {
        self.namespaces.namespaces()
    }

    /// Flags passed to clone(2)
    #[must_use]
    pub const fn clone_flags(&self) -> CloneFlags {
        self.namespaces.clone_flags()
    }

    /// UID/GID mappings written before the child execs
    #[must_use]
    pub const fn user_mapping(&self) -> Option<&UserMapping> {
        self.user_mapping.as_ref()
    }

    /// Hostname applied in the child
    #[must_use]
    pub fn hostname(&self) -> Option<&CStr> {
        self.hostname.as_deref()
    }

    /// Domain name applied in the child
    #[must_use]
    pub fn domainname(&self) -> Option<&CStr> {
        self.domainname.as_deref()
    }

    /// Check if stream `fd` (0, 1 or 2) is bound to an explicit descriptor
    #[must_use]
    pub fn has_explicit_stdio(&self, fd: usize) -> bool {
        self.stdio.get(fd).is_some_and(Option::is_some)
    }
}

/// Trait for process creation backends
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; concurrent launches share one spawner.
pub trait ProcessSpawner: Send + Sync {
    /// Create the child inside its namespaces and start the target program
    ///
    /// Returns once the program has been exec'd, or with the reason it could
    /// not be.
    ///
    /// # Errors
    /// Returns error if the OS refused creation or the child failed before exec
    fn spawn(&self, child: &PreparedChild) -> Result<ProcessId, CreationError>;

    /// Block until the child terminates and reap it
    ///
    /// # Errors
    /// Returns error if waiting fails
    fn wait(&self, pid: ProcessId) -> Result<LaunchResult, LaunchError>;

    /// Block until the child terminates without reaping it
    ///
    /// The PID stays reserved for the zombie until [`ProcessSpawner::wait`]
    /// reaps it, so signals sent in between cannot hit another process.
    ///
    /// # Errors
    /// Returns error if waiting fails
    fn wait_terminated(&self, pid: ProcessId) -> Result<(), LaunchError>;

    /// Reap the child if it has terminated, without blocking
    ///
    /// # Errors
    /// Returns error if waiting fails
    fn try_wait(&self, pid: ProcessId) -> Result<Option<LaunchResult>, LaunchError>;

    /// Send a signal to the child
    ///
    /// # Errors
    /// Returns error if the signal cannot be delivered
    fn signal(&self, pid: ProcessId, signal: Signal) -> Result<(), Errno>;
}

/// What a [`RecordingSpawner`] saw for one spawn call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    /// PID handed back
    pub pid: ProcessId,
    /// Resolved program path
    pub program: PathBuf,
    /// Argument vector including `argv[0]`
    pub argv: Vec<String>,
    /// Requested namespaces
    pub namespaces: NamespaceSet,
    /// Clone flags that would have been used
    pub flags: CloneFlags,
}

/// Fake spawner for testing (never creates a process)
///
/// # Example
/// ```
/// use nslaunch_namespace::{LaunchRequest, Launcher, RecordingSpawner};
/// use nslaunch_core::LaunchResult;
///
/// let spawner = RecordingSpawner::new().with_result(LaunchResult::Exited(3));
/// let launcher = Launcher::with_spawner(spawner.clone());
///
/// let result = launcher.launch(LaunchRequest::new("/bin/sh")).unwrap();
/// assert_eq!(result, LaunchResult::Exited(3));
/// assert_eq!(spawner.spawn_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSpawner {
    state: Arc<Mutex<RecordingState>>,
}

#[derive(Debug, Default)]
struct RecordingState {
    next_pid: i32,
    spawn_errors: VecDeque<CreationError>,
    results: VecDeque<LaunchResult>,
    spawned: Vec<SpawnRecord>,
    signals: Vec<(ProcessId, Signal)>,
    reaped: Vec<ProcessId>,
}

impl RecordingSpawner {
    /// First PID handed out
    pub const FIRST_PID: i32 = 1000;

    /// Create a new recording spawner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next spawn with `error`
    #[must_use]
    pub fn with_spawn_error(self, error: CreationError) -> Self {
        self.lock().spawn_errors.push_back(error);
        self
    }

    /// Report `result` for the next child that is waited on
    #[must_use]
    pub fn with_result(self, result: LaunchResult) -> Self {
        self.lock().results.push_back(result);
        self
    }

    /// Get the number of spawn calls that created a (fake) child
    #[must_use]
    pub fn spawn_count(&self) -> usize {
        self.lock().spawned.len()
    }

    /// Get the spawn calls made so far
    #[must_use]
    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.lock().spawned.clone()
    }

    /// Get the signals sent so far
    #[must_use]
    pub fn signals(&self) -> Vec<(ProcessId, Signal)> {
        self.lock().signals.clone()
    }

    /// Get the children reaped so far
    #[must_use]
    pub fn reaped(&self) -> Vec<ProcessId> {
        self.lock().reaped.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessSpawner for RecordingSpawner {
    fn spawn(&self, child: &PreparedChild) -> Result<ProcessId, CreationError> {
        let mut state = self.lock();
        if let Some(error) = state.spawn_errors.pop_front() {
            return Err(error);
        }

        let pid = ProcessId::from_raw(Self::FIRST_PID + state.next_pid);
        state.next_pid += 1;
        state.spawned.push(SpawnRecord {
            pid,
            program: child.program().to_path_buf(),
            argv: child
                .argv()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            namespaces: child.namespaces(),
            flags: child.clone_flags(),
        });
        Ok(pid)
    }

    fn wait(&self, pid: ProcessId) -> Result<LaunchResult, LaunchError> {
        let mut state = self.lock();
        if state.reaped.contains(&pid) {
            return Err(LaunchError::WaitFailed(Errno::ECHILD));
        }
        state.reaped.push(pid);

        // A signalled child reports that signal, like the real thing
        if let Some((_, signal)) = state.signals.iter().rev().find(|(p, _)| *p == pid) {
            return Ok(LaunchResult::Signaled(*signal as i32));
        }
        Ok(state.results.pop_front().unwrap_or(LaunchResult::Exited(0)))
    }

    fn wait_terminated(&self, pid: ProcessId) -> Result<(), LaunchError> {
        if self.lock().reaped.contains(&pid) {
            return Err(LaunchError::WaitFailed(Errno::ECHILD));
        }
        Ok(())
    }

    fn try_wait(&self, pid: ProcessId) -> Result<Option<LaunchResult>, LaunchError> {
        self.wait(pid).map(Some)
    }

    fn signal(&self, pid: ProcessId, signal: Signal) -> Result<(), Errno> {
        let mut state = self.lock();
        if state.reaped.contains(&pid) {
            return Err(Errno::ESRCH);
        }
        state.signals.push((pid, signal));
        Ok(())
    }
}
