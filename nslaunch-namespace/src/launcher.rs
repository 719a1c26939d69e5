//! Launching programs in fresh namespaces
//!
//! [`Launcher::launch`] does the whole job synchronously:
//! 1. Validates the namespace set (no OS interaction on failure)
//! 2. Resolves the executable on the search path
//! 3. Binds stdin/stdout/stderr
//! 4. Creates the child with the namespace flags applied at creation
//! 5. Blocks until the child exits and reaps it

use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::ffi::{CString, OsString};
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use nslaunch_core::{
    CreationError, CreationStage, LaunchError, LaunchEvent, LaunchResult, ProcessId,
};

use crate::clone::CloneSpawner;
use crate::config::Namespace;
use crate::request::{LaunchRequest, Stdio, inherited_env};
use crate::spawner::{PreparedChild, ProcessSpawner};

/// Launches programs inside new namespaces
///
/// The launcher holds no per-launch state; one instance may be shared by
/// many threads launching independent requests concurrently.
#[derive(Debug, Clone)]
pub struct Launcher<S: ProcessSpawner = CloneSpawner> {
    spawner: Arc<S>,
}

impl Launcher<CloneSpawner> {
    /// Create a launcher that creates real processes
    #[must_use]
    pub fn new() -> Self {
        Self::with_spawner(CloneSpawner::new())
    }
}

impl Default for Launcher<CloneSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ProcessSpawner> Launcher<S> {
    /// Create a launcher on top of a custom spawner
    #[must_use]
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner: Arc::new(spawner),
        }
    }

    /// Get the spawner
    #[must_use]
    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Launch `request` and block until the child terminates
    ///
    /// # Errors
    /// Returns [`LaunchError`] if the request is invalid, the program cannot
    /// be found, the OS refuses creation, or waiting fails
    pub fn launch(&self, request: LaunchRequest) -> Result<LaunchResult, LaunchError> {
        self.launch_with(request, |_| {})
    }

    /// Launch `request`, report the child's PID, and block until it terminates
    ///
    /// `on_spawn` runs right after creation, before waiting, so the caller
    /// can hand the PID to whoever may need to signal the child.
    ///
    /// # Errors
    /// Same as [`Launcher::launch`]
    pub fn launch_with<F>(&self, request: LaunchRequest, on_spawn: F) -> Result<LaunchResult, LaunchError>
    where
        F: FnOnce(ProcessId),
    {
        let mut handle = self.spawn(request)?;
        on_spawn(handle.pid());
        handle.wait()
    }

    /// Launch `request` without waiting for it
    ///
    /// The returned handle must be waited on; dropping it kills the child.
    ///
    /// # Errors
    /// Returns [`LaunchError`] if the request is invalid, the program cannot
    /// be found, or the OS refuses creation
    pub fn spawn(&self, request: LaunchRequest) -> Result<LaunchHandle<S>, LaunchError> {
        let program = request.program.clone();

        let prepared = prepare(request).inspect_err(|e| {
            LaunchEvent::failed(&program, e).emit_trace();
        })?;

        let pid = self.spawner.spawn(&prepared).map_err(|e| {
            LaunchEvent::failed(&program, e).emit_trace();
            LaunchError::from(e)
        })?;

        let namespaces = prepared
            .namespaces()
            .names()
            .into_iter()
            .map(String::from)
            .collect();
        LaunchEvent::spawned(pid, prepared.program().display().to_string(), namespaces)
            .emit_trace();

        Ok(LaunchHandle {
            pid,
            spawner: Arc::clone(&self.spawner),
            state: Arc::new(Mutex::new(ChildState::Running)),
        })
    }
}

/// A running child created by [`Launcher::spawn`]
///
/// Waiting reaps the child. A handle dropped before that kills and reaps
/// the child on the spot, so no zombie is left behind.
#[derive(Debug)]
pub struct LaunchHandle<S: ProcessSpawner = CloneSpawner> {
    pid: ProcessId,
    spawner: Arc<S>,
    state: Arc<Mutex<ChildState>>,
}

/// Reaping state shared by a handle and its signallers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildState {
    Running,
    Reaped(LaunchResult),
    /// Reaped by someone else, e.g. the kernel with SIGCHLD ignored
    Gone,
}

impl<S: ProcessSpawner> LaunchHandle<S> {
    /// PID of the child as seen from the caller
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Block until the child terminates and reap it
    ///
    /// Calling again after the child was reaped returns the same result.
    ///
    /// # Errors
    /// Returns [`LaunchError::WaitFailed`] if waiting fails
    pub fn wait(&mut self) -> Result<LaunchResult, LaunchError> {
        // Block outside the lock; the unreaped zombie keeps the PID ours
        let terminated = self.spawner.wait_terminated(self.pid);
        let result = self.reap_with(|| {
            terminated?;
            self.spawner.wait(self.pid).map(Some)
        })?;
        result.ok_or(LaunchError::WaitFailed(Errno::ECHILD))
    }

    /// Reap the child if it has terminated
    ///
    /// # Errors
    /// Returns [`LaunchError::WaitFailed`] if waiting fails
    pub fn try_wait(&mut self) -> Result<Option<LaunchResult>, LaunchError> {
        self.reap_with(|| self.spawner.try_wait(self.pid))
    }

    /// Send a signal to the child
    ///
    /// # Errors
    /// Returns `ESRCH` if the child was already reaped, or the error from kill(2)
    pub fn signal(&self, signal: Signal) -> Result<(), Errno> {
        signal_child(&*self.spawner, self.pid, &self.state, signal)
    }

    /// Get a signaller that stays usable while another thread waits
    #[must_use]
    pub fn signaller(&self) -> ChildSignaller<S> {
        ChildSignaller {
            pid: self.pid,
            spawner: Arc::clone(&self.spawner),
            state: Arc::clone(&self.state),
        }
    }

    /// Run `reap` unless the child was already reaped, recording the outcome
    fn reap_with<F>(&self, reap: F) -> Result<Option<LaunchResult>, LaunchError>
    where
        F: FnOnce() -> Result<Option<LaunchResult>, LaunchError>,
    {
        let mut state = lock(&self.state);
        match *state {
            ChildState::Reaped(result) => return Ok(Some(result)),
            ChildState::Gone => return Err(LaunchError::WaitFailed(Errno::ECHILD)),
            ChildState::Running => {}
        }

        match reap() {
            Ok(Some(result)) => {
                *state = ChildState::Reaped(result);
                drop(state);
                LaunchEvent::exited(self.pid, result).emit_trace();
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if e == LaunchError::WaitFailed(Errno::ECHILD) {
                    warn!(pid = %self.pid, "Child was reaped elsewhere");
                    *state = ChildState::Gone;
                }
                Err(e)
            }
        }
    }
}

impl<S: ProcessSpawner + 'static> LaunchHandle<S> {
    /// Wait for the child on tokio's blocking pool
    ///
    /// Take a [`LaunchHandle::signaller`] first to signal the child meanwhile.
    ///
    /// # Errors
    /// Returns error if waiting fails or the blocking task panics
    pub async fn wait_async(mut self) -> nslaunch_core::Result<LaunchResult> {
        let result = tokio::task::spawn_blocking(move || self.wait()).await??;
        Ok(result)
    }
}

impl<S: ProcessSpawner> Drop for LaunchHandle<S> {
    fn drop(&mut self) {
        let running = *lock(&self.state) == ChildState::Running;
        if !running {
            return;
        }
        warn!(pid = %self.pid, "Launch handle dropped before wait, killing child");
        let _ = self.signal(Signal::SIGKILL);
        if let Err(e) = self.wait() {
            warn!(pid = %self.pid, error = %e, "Failed to reap child");
        }
    }
}

/// Signals a launched child until it is reaped
///
/// Signalling and reaping are serialized, so a signal never reaches a
/// process that reused the child's PID.
#[derive(Debug)]
pub struct ChildSignaller<S: ProcessSpawner = CloneSpawner> {
    pid: ProcessId,
    spawner: Arc<S>,
    state: Arc<Mutex<ChildState>>,
}

impl<S: ProcessSpawner> ChildSignaller<S> {
    /// PID of the child
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Send a signal to the child
    ///
    /// # Errors
    /// Returns `ESRCH` once the child was reaped, or the error from kill(2)
    pub fn signal(&self, signal: Signal) -> Result<(), Errno> {
        signal_child(&*self.spawner, self.pid, &self.state, signal)
    }
}

impl<S: ProcessSpawner> Clone for ChildSignaller<S> {
    fn clone(&self) -> Self {
        Self {
            pid: self.pid,
            spawner: Arc::clone(&self.spawner),
            state: Arc::clone(&self.state),
        }
    }
}

fn signal_child<S: ProcessSpawner>(
    spawner: &S,
    pid: ProcessId,
    state: &Mutex<ChildState>,
    signal: Signal,
) -> Result<(), Errno> {
    // Held across kill so the child cannot be reaped in between
    let state = lock(state);
    if *state != ChildState::Running {
        return Err(Errno::ESRCH);
    }
    spawner.signal(pid, signal)
}

fn lock(state: &Mutex<ChildState>) -> MutexGuard<'_, ChildState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Check a request and turn it into everything the child needs
fn prepare(request: LaunchRequest) -> Result<PreparedChild, LaunchError> {
    let LaunchRequest {
        program,
        args,
        arg0,
        env,
        namespaces,
        user_mapping,
        uts,
        search_path,
        stdin,
        stdout,
        stderr,
    } = request;

    let validated = namespaces.validate(user_mapping.as_ref(), &uts)?;
    // Maps only apply to a child in a new user namespace
    let user_mapping = user_mapping.filter(|_| namespaces.contains(Namespace::User));

    let env = env.unwrap_or_else(inherited_env);
    let search = match search_path {
        Some(dirs) => Some(std::env::join_paths(dirs).map_err(|e| {
            LaunchError::InvalidArgument {
                message: format!("bad search path: {e}"),
            }
        })?),
        None => env.get("PATH").map(OsString::from).or_else(|| std::env::var_os("PATH")),
    };
    let resolved = resolve_executable(&program, search)?;
    debug!(program = %program, resolved = %resolved.display(), "Resolved executable");

    let path = cstring(resolved.as_os_str().as_bytes(), "program path")?;
    let argv = std::iter::once(arg0.unwrap_or_else(|| program.clone()))
        .chain(args)
        .map(|arg| cstring(arg.as_bytes(), "argument"))
        .collect::<Result<Vec<_>, _>>()?;
    let envp = env
        .iter()
        .map(|(key, value)| {
            if key.is_empty() || key.contains('=') {
                return Err(LaunchError::InvalidArgument {
                    message: format!("bad environment variable name {key:?}"),
                });
            }
            cstring(format!("{key}={value}").as_bytes(), "environment entry")
        })
        .collect::<Result<Vec<_>, _>>()?;

    let hostname = uts
        .hostname
        .map(|h| cstring(h.as_bytes(), "hostname"))
        .transpose()?;
    let domainname = uts
        .domainname
        .map(|d| cstring(d.as_bytes(), "domainname"))
        .transpose()?;

    let stdio = [bind(stdin, false)?, bind(stdout, true)?, bind(stderr, true)?];

    Ok(PreparedChild {
        program: resolved,
        path,
        argv,
        envp,
        namespaces: validated,
        user_mapping,
        hostname,
        domainname,
        stdio,
    })
}

/// Find `program` the way a shell would, on `search` when it has no slash
fn resolve_executable(program: &str, search: Option<OsString>) -> Result<PathBuf, LaunchError> {
    let not_found = || LaunchError::ExecutableNotFound {
        program: program.to_string(),
    };

    if program.is_empty() {
        return Err(not_found());
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(program, search, cwd).map_err(|e| {
        debug!(program = %program, error = %e, "Executable lookup failed");
        not_found()
    })
}

fn cstring(bytes: &[u8], what: &str) -> Result<CString, LaunchError> {
    CString::new(bytes).map_err(|_| LaunchError::InvalidArgument {
        message: format!("{what} contains a NUL byte"),
    })
}

/// Turn a [`Stdio`] into the descriptor the child dup2's, `None` to inherit
fn bind(stdio: Stdio, write: bool) -> Result<Option<OwnedFd>, LaunchError> {
    match stdio {
        Stdio::Inherit => Ok(None),
        Stdio::Fd(fd) => Ok(Some(fd)),
        Stdio::Null => OpenOptions::new()
            .read(!write)
            .write(write)
            .open(Path::new("/dev/null"))
            .map(|file| Some(file.into()))
            .map_err(|e| {
                let errno = e.raw_os_error().map_or(Errno::EIO, Errno::from_raw);
                CreationError::new(CreationStage::Stdio, errno).into()
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserMapping;

    #[test]
    fn test_empty_program_not_found() {
        let err = prepare(LaunchRequest::new("")).unwrap_err();
        assert_eq!(
            err,
            LaunchError::ExecutableNotFound {
                program: String::new()
            }
        );
    }

    #[test]
    fn test_validation_runs_before_resolution() {
        let request = LaunchRequest::new("").with_namespace(Namespace::User);
        let err = prepare(request).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidConfig(_)));
    }

    #[test]
    fn test_argv0_defaults_to_program() {
        let prepared = prepare(LaunchRequest::new("/bin/sh").with_args(["-c", "true"])).unwrap();
        let argv: Vec<_> = prepared
            .argv()
            .iter()
            .map(|a| a.to_str().unwrap().to_string())
            .collect();
        assert_eq!(argv, vec!["/bin/sh", "-c", "true"]);
        assert_eq!(prepared.program(), Path::new("/bin/sh"));
    }

    #[test]
    fn test_arg0_override() {
        let prepared = prepare(LaunchRequest::new("/bin/sh").with_arg0("-sh")).unwrap();
        assert_eq!(prepared.argv()[0].to_str().unwrap(), "-sh");
    }

    #[test]
    fn test_bare_name_uses_search_path() {
        let prepared = prepare(LaunchRequest::new("sh").with_search_path(["/nonexistent", "/bin"]))
            .unwrap();
        assert_eq!(prepared.program(), Path::new("/bin/sh"));
        assert_eq!(prepared.argv()[0].to_str().unwrap(), "sh");
    }

    #[test]
    fn test_bare_name_uses_request_path_variable() {
        let request = LaunchRequest::new("sh")
            .with_env_clear()
            .with_env("PATH", "/bin");
        let prepared = prepare(request).unwrap();
        assert_eq!(prepared.program(), Path::new("/bin/sh"));
    }

    #[test]
    fn test_missing_program() {
        let err = prepare(LaunchRequest::new("nslaunch-no-such-program").with_search_path(["/bin"]))
            .unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_nul_in_argument_rejected() {
        let err = prepare(LaunchRequest::new("/bin/sh").with_arg("a\0b")).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument { .. }));
    }

    #[test]
    fn test_environment_entries() {
        let request = LaunchRequest::new("/bin/sh")
            .with_env_clear()
            .with_env("A", "1")
            .with_env("B", "two words");
        let prepared = prepare(request).unwrap();
        let envp: Vec<_> = prepared
            .envp()
            .iter()
            .map(|e| e.to_str().unwrap().to_string())
            .collect();
        assert_eq!(envp, vec!["A=1", "B=two words"]);
    }

    #[test]
    fn test_bad_env_name_rejected() {
        let request = LaunchRequest::new("/bin/sh")
            .with_env_clear()
            .with_env("A=B", "1");
        assert!(matches!(
            prepare(request).unwrap_err(),
            LaunchError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn test_null_stdio_opens_dev_null() {
        let request = LaunchRequest::new("/bin/sh").with_stdout(Stdio::Null);
        let prepared = prepare(request).unwrap();
        assert!(!prepared.has_explicit_stdio(0));
        assert!(prepared.has_explicit_stdio(1));
        assert!(!prepared.has_explicit_stdio(2));
    }

    #[test]
    fn test_user_mapping_and_hostname_carried() {
        let request = LaunchRequest::new("/bin/sh")
            .with_namespace(Namespace::User)
            .with_namespace(Namespace::Uts)
            .with_user_mapping(UserMapping::current_user_as_root())
            .with_hostname("inner");
        let prepared = prepare(request).unwrap();
        assert!(prepared.user_mapping().is_some());
        assert_eq!(prepared.hostname().unwrap().to_str().unwrap(), "inner");
        assert!(prepared.domainname().is_none());
    }

    #[test]
    fn test_user_mapping_ignored_without_user_namespace() {
        let request = LaunchRequest::new("/bin/sh").with_user_mapping(UserMapping::current_user_as_root());
        let prepared = prepare(request).unwrap();
        assert!(prepared.user_mapping().is_none());
    }
}
