//! Process creation with `clone(2)`
//!
//! The child is created with its namespace flags in the same `clone` call
//! that creates it, so it never runs in the parent's namespaces. Between
//! `clone` and `execve` the child only makes async-signal-safe libc calls on
//! data the parent prepared, and reports failures over a close-on-exec pipe.

#![allow(unsafe_code)]

use libc::{c_char, c_int};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::{SigSet, Signal, kill};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid, waitpid};
use nix::unistd::{Pid, pipe2};
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr;
use tracing::{debug, warn};

use nslaunch_core::{CreationError, CreationStage, LaunchError, LaunchResult, ProcessId};

use crate::config::UserMapping;
use crate::spawner::{PreparedChild, ProcessSpawner};

/// Stack for the cloned child until it execs
const STACK_SIZE: usize = 1024 * 1024;

/// Exit status of a child that failed before exec
const EXIT_SETUP_FAILED: c_int = 127;

/// Byte the parent sends once uid/gid maps are in place
const SYNC_GO: u8 = 1;

/// Stage tag followed by a native-endian errno
const REPORT_LEN: usize = 1 + std::mem::size_of::<c_int>();

/// Real process creation through `clone(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneSpawner;

impl CloneSpawner {
    /// Create a new clone spawner
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Raw view of a [`PreparedChild`] used after `clone`
struct ChildContext {
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
    /// Source descriptor for fds 0, 1, 2; negative means inherit
    stdio: [RawFd; 3],
    sync_read: RawFd,
    sync_write: RawFd,
    error_write: RawFd,
    hostname: Option<(*const c_char, usize)>,
    domainname: Option<(*const c_char, usize)>,
    /// Mask installed before exec; the caller's blocked signals must not leak
    signal_mask: SigSet,
}

impl ProcessSpawner for CloneSpawner {
    fn spawn(&self, child: &PreparedChild) -> Result<ProcessId, CreationError> {
        let clone_err = |e| CreationError::new(CreationStage::Clone, e);

        let (error_read, error_write) = pipe2(OFlag::O_CLOEXEC).map_err(clone_err)?;
        let sync = match child.user_mapping() {
            Some(_) => Some(pipe2(OFlag::O_CLOEXEC).map_err(clone_err)?),
            None => None,
        };

        let argv = null_terminated(&child.argv);
        let envp = null_terminated(&child.envp);
        let raw = |fd: &Option<OwnedFd>| fd.as_ref().map_or(-1, AsRawFd::as_raw_fd);

        let ctx = ChildContext {
            path: child.path.as_ptr(),
            argv: argv.as_ptr(),
            envp: envp.as_ptr(),
            stdio: [raw(&child.stdio[0]), raw(&child.stdio[1]), raw(&child.stdio[2])],
            sync_read: sync.as_ref().map_or(-1, |(r, _)| r.as_raw_fd()),
            sync_write: sync.as_ref().map_or(-1, |(_, w)| w.as_raw_fd()),
            error_write: error_write.as_raw_fd(),
            hostname: child.hostname.as_deref().map(|h| (h.as_ptr(), h.to_bytes().len())),
            domainname: child
                .domainname
                .as_deref()
                .map(|d| (d.as_ptr(), d.to_bytes().len())),
            signal_mask: SigSet::empty(),
        };

        let mut stack = vec![0u8; STACK_SIZE];

        debug!(
            program = %child.program().display(),
            flags = ?child.clone_flags(),
            "Cloning child"
        );

        // SAFETY: without CLONE_VM the child runs on a copy of this address
        // space. child_main only calls async-signal-safe functions on memory
        // owned by `ctx`, `argv`, `envp` and `child`, all alive across the call.
        let pid = unsafe {
            clone(
                Box::new(|| child_main(&ctx)),
                &mut stack,
                child.clone_flags(),
                Some(Signal::SIGCHLD as c_int),
            )
        }
        .map_err(clone_err)?;

        // The child holds its own copy; ours must go so EOF means exec
        drop(error_write);

        if let Some((sync_read, sync_write)) = sync {
            drop(sync_read);
            if let Some(mapping) = child.user_mapping() {
                if let Err(errno) = write_id_maps(pid, mapping) {
                    abort_child(pid);
                    return Err(CreationError::new(CreationStage::UserMapping, errno));
                }
            }
            if let Err(e) = File::from(sync_write).write_all(&[SYNC_GO]) {
                abort_child(pid);
                return Err(CreationError::new(CreationStage::UserMapping, io_errno(&e)));
            }
        }

        match read_report(error_read) {
            Ok(None) => Ok(pid.into()),
            Ok(Some(error)) => {
                debug!(pid = %pid, error = %error, "Child failed before exec");
                reap(pid);
                Err(error)
            }
            Err(errno) => {
                abort_child(pid);
                Err(CreationError::new(CreationStage::Exec, errno))
            }
        }
    }

    fn wait(&self, pid: ProcessId) -> Result<LaunchResult, LaunchError> {
        loop {
            match waitpid(pid.as_nix_pid(), None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(LaunchResult::Exited(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(LaunchResult::Signaled(signal as i32));
                }
                Ok(status) => {
                    debug!(pid = %pid, ?status, "Child status changed, still waiting");
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(LaunchError::WaitFailed(e)),
            }
        }
    }

    fn wait_terminated(&self, pid: ProcessId) -> Result<(), LaunchError> {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
        loop {
            match waitid(Id::Pid(pid.as_nix_pid()), flags) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(LaunchError::WaitFailed(e)),
            }
        }
    }

    fn try_wait(&self, pid: ProcessId) -> Result<Option<LaunchResult>, LaunchError> {
        loop {
            match waitpid(pid.as_nix_pid(), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Some(LaunchResult::Exited(code))),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(Some(LaunchResult::Signaled(signal as i32)));
                }
                Ok(_) => return Ok(None),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(LaunchError::WaitFailed(e)),
            }
        }
    }

    fn signal(&self, pid: ProcessId, signal: Signal) -> Result<(), Errno> {
        kill(pid.as_nix_pid(), signal)
    }
}

/// Pointer array for execve, terminated by a null pointer
fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Runs in the cloned child; never returns on success
fn child_main(ctx: &ChildContext) -> isize {
    // SAFETY: every call below is async-signal-safe and only reads memory
    // prepared by the parent before clone.
    unsafe {
        if ctx.sync_write >= 0 {
            libc::close(ctx.sync_write);
        }

        for (target, &source) in (0..).zip(ctx.stdio.iter()) {
            if source < 0 {
                continue;
            }
            let rc = if source == target {
                clear_cloexec(source)
            } else {
                libc::dup2(source, target)
            };
            if rc < 0 {
                report_and_exit(ctx.error_write, CreationStage::Stdio);
            }
        }

        if ctx.sync_read >= 0 {
            let mut go = 0u8;
            loop {
                let n = libc::read(ctx.sync_read, ptr::from_mut(&mut go).cast(), 1);
                if n >= 0 || Errno::last() != Errno::EINTR {
                    break;
                }
            }
            // Parent kills us when mapping fails; anything but the go byte means it is gone
            if go != SYNC_GO {
                libc::_exit(EXIT_SETUP_FAILED);
            }
            libc::close(ctx.sync_read);
        }

        if let Some((name, len)) = ctx.hostname {
            if libc::sethostname(name, len) != 0 {
                report_and_exit(ctx.error_write, CreationStage::Hostname);
            }
        }
        if let Some((name, len)) = ctx.domainname {
            if libc::setdomainname(name, len) != 0 {
                report_and_exit(ctx.error_write, CreationStage::Hostname);
            }
        }

        // Rust ignores SIGPIPE; the exec'd program expects the default
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        let rc = libc::sigprocmask(
            libc::SIG_SETMASK,
            AsRef::<libc::sigset_t>::as_ref(&ctx.signal_mask),
            ptr::null_mut(),
        );
        if rc != 0 {
            report_and_exit(ctx.error_write, CreationStage::Exec);
        }

        libc::execve(ctx.path, ctx.argv, ctx.envp);
        report_and_exit(ctx.error_write, CreationStage::Exec)
    }
}

unsafe fn clear_cloexec(fd: RawFd) -> c_int {
    // SAFETY: plain fcntl on a descriptor we own in the child
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return flags;
        }
        libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC)
    }
}

unsafe fn report_and_exit(fd: RawFd, stage: CreationStage) -> ! {
    let errno = Errno::last() as c_int;
    let mut report = [0u8; REPORT_LEN];
    report[0] = stage as u8;
    report[1..].copy_from_slice(&errno.to_ne_bytes());

    // SAFETY: write and _exit are async-signal-safe
    unsafe {
        libc::write(fd, report.as_ptr().cast(), report.len());
        libc::_exit(EXIT_SETUP_FAILED)
    }
}

/// Read the child's failure report; `None` means it exec'd
fn read_report(error_read: OwnedFd) -> Result<Option<CreationError>, Errno> {
    let mut report = Vec::with_capacity(REPORT_LEN);
    File::from(error_read)
        .read_to_end(&mut report)
        .map_err(|e| io_errno(&e))?;

    if report.is_empty() {
        return Ok(None);
    }
    if report.len() < REPORT_LEN {
        warn!(len = report.len(), "Truncated failure report from child");
        return Ok(Some(CreationError::new(CreationStage::Exec, Errno::EIO)));
    }

    let stage = CreationStage::from_tag(report[0]).unwrap_or(CreationStage::Exec);
    let mut errno = [0u8; REPORT_LEN - 1];
    errno.copy_from_slice(&report[1..REPORT_LEN]);
    Ok(Some(CreationError::new(
        stage,
        Errno::from_raw(c_int::from_ne_bytes(errno)),
    )))
}

/// Write uid/gid maps for a child in a new user namespace
fn write_id_maps(pid: Pid, mapping: &UserMapping) -> Result<(), Errno> {
    let base = format!("/proc/{pid}");

    // Unprivileged writers must give up setgroups before gid_map is accepted
    let setgroups = format!("{base}/setgroups");
    if !nix::unistd::geteuid().is_root() && Path::new(&setgroups).exists() {
        fs::write(&setgroups, "deny").map_err(|e| io_errno(&e))?;
    }

    fs::write(format!("{base}/uid_map"), mapping.uid_map()).map_err(|e| io_errno(&e))?;
    fs::write(format!("{base}/gid_map"), mapping.gid_map()).map_err(|e| io_errno(&e))?;

    debug!(pid = %pid, uid_map = ?mapping.uid, gid_map = ?mapping.gid, "Wrote id maps");
    Ok(())
}

fn io_errno(e: &std::io::Error) -> Errno {
    e.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}

/// Kill a child that must not exec and reap it
fn abort_child(pid: Pid) {
    warn!(pid = %pid, "Killing half-created child");
    let _ = kill(pid, Signal::SIGKILL);
    reap(pid);
}

fn reap(pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => {}
            Err(e) => {
                warn!(pid = %pid, error = %e, "Could not reap child");
                return;
            }
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => return,
            Ok(_) => {}
        }
    }
}
