//! Child process spawning with a bidirectional command channel.
//!
//! The child receives `[command_fd_option] <in-fd> <out-fd>` ahead of the
//! caller's arguments: it reads commands from `<in-fd>` and writes replies to
//! `<out-fd>`. Only those two fds survive the exec; every other pipe end is
//! close-on-exec.

// Opted down for the pre-exec hook, which runs between fork and exec.
#![allow(unsafe_code)]

use super::com_wire::{ComWire, WireFds};
use crate::config::SpawnConfig;
use crate::{GlueError, Result};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

/// Parameters for [`spawn_async`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub executable: PathBuf,
    /// Option preceding the two command fd numbers. `Some("")` passes the fds
    /// without an option; `None` opens no command channel.
    pub command_fd_option: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl SpawnOptions {
    pub fn new(executable: impl AsRef<Path>) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            command_fd_option: None,
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn command_fd_option(mut self, option: impl Into<String>) -> Self {
        self.command_fd_option = Some(option.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// A running child and the parent's ends of its pipes.
#[derive(Debug)]
pub struct SpawnedChild {
    pub child: Child,
    pub pid: i32,
    /// Writable: commands to the child.
    pub command_input: Option<OwnedFd>,
    /// Readable: replies from the child.
    pub command_output: Option<OwnedFd>,
    pub standard_input: Option<OwnedFd>,
    pub standard_output: Option<OwnedFd>,
    pub standard_error: Option<OwnedFd>,
}

impl SpawnedChild {
    /// Hand every pipe end over to a new wire. The `Child` is returned for
    /// reaping.
    pub fn into_wire(self, ident: &str) -> (ComWire, Child) {
        let fds = WireFds {
            remote_input: self.command_output,
            remote_output: self.command_input,
            standard_input: self.standard_input,
            standard_output: self.standard_output,
            standard_error: self.standard_error,
        };
        (ComWire::from_child(ident, fds, Some(self.pid)), self.child)
    }
}

struct CommandPipes {
    /// Child reads commands from `.0`, parent writes to `.1`.
    input: (OwnedFd, OwnedFd),
    /// Parent reads replies from `.0`, child writes to `.1`.
    output: (OwnedFd, OwnedFd),
}

/// Pipes are close-on-exec from creation; setting the flag later races
/// with forks on other threads.
fn command_pipes() -> Result<CommandPipes> {
    let output = pipe2(OFlag::O_CLOEXEC)?;
    let input = pipe2(OFlag::O_CLOEXEC)?;
    Ok(CommandPipes { input, output })
}

/// Spawn `options.executable` with stdio pipes and an optional command channel.
///
/// On failure every fd created here is closed before the error is returned.
pub fn spawn_async(options: &SpawnOptions) -> Result<SpawnedChild> {
    let program = options.executable.display().to_string();
    let spawn_error = |message: String| GlueError::Spawn {
        program: program.clone(),
        message,
    };

    let pipes = match &options.command_fd_option {
        Some(_) => Some(command_pipes().map_err(|err| {
            spawn_error(format!("failed to create communication channels: {err}"))
        })?),
        None => None,
    };

    let mut cmd = Command::new(&options.executable);
    cmd.arg0(&options.executable)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }

    let mut keep: [Option<RawFd>; 2] = [None, None];
    if let (Some(option), Some(pipes)) = (&options.command_fd_option, &pipes) {
        let child_reads = pipes.input.0.as_raw_fd();
        let child_writes = pipes.output.1.as_raw_fd();
        if !option.is_empty() {
            cmd.arg(option);
        }
        cmd.arg(child_reads.to_string()).arg(child_writes.to_string());
        keep = [Some(child_reads), Some(child_writes)];
    }
    cmd.args(&options.args);

    let priority = SpawnConfig::CHILD_PRIORITY;
    // SAFETY: the hook only issues fcntl() and setpriority(), both
    // async-signal-safe, on fds that stay open in the parent until after the
    // spawn returns. No allocation or locking happens between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            for fd in keep.into_iter().flatten() {
                loop {
                    if libc::fcntl(fd, libc::F_SETFD, 0) == 0 {
                        break;
                    }
                    let err = std::io::Error::last_os_error();
                    if err.kind() != std::io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
            // drop scheduling priorities inherited from the parent
            libc::setpriority(libc::PRIO_PROCESS, 0, priority);
            Ok(())
        });
    }

    // Dropping `pipes` on the error path closes all four ends.
    let mut child = cmd
        .spawn()
        .map_err(|err| spawn_error(err.to_string()))?;
    let pid = child.id() as i32;

    let (command_input, command_output) = match pipes {
        Some(CommandPipes { input, output }) => {
            // the child's ends are closed here in the parent
            drop(input.0);
            drop(output.1);
            (Some(input.1), Some(output.0))
        }
        None => (None, None),
    };

    info!("Spawned {} (pid {})", program, pid);
    debug!("args: {:?}", options.args);

    Ok(SpawnedChild {
        pid,
        command_input,
        command_output,
        standard_input: child.stdin.take().map(OwnedFd::from),
        standard_output: child.stdout.take().map(OwnedFd::from),
        standard_error: child.stderr.take().map(OwnedFd::from),
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_missing_executable_reports_error() {
        let err = spawn_async(&SpawnOptions::new("/nonexistent/sfi-peer").command_fd_option("--fds"))
            .unwrap_err();
        match err {
            GlueError::Spawn { program, .. } => assert_eq!(program, "/nonexistent/sfi-peer"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_child_receives_fd_arguments() {
        let options = SpawnOptions::new("/bin/sh")
            .command_fd_option("")
            .arg("-c")
            .arg("true");
        // sh treats the fd numbers as script arguments; only the spawn matters here
        let spawned = spawn_async(&options).unwrap();
        assert!(spawned.command_input.is_some());
        assert!(spawned.command_output.is_some());
        let (_wire, mut child) = spawned.into_wire("sh");
        child.wait().unwrap();
    }

    fn is_cloexec(fd: &OwnedFd) -> bool {
        let flags = nix::fcntl::fcntl(fd.as_raw_fd(), nix::fcntl::FcntlArg::F_GETFD).unwrap();
        nix::fcntl::FdFlag::from_bits_truncate(flags).contains(nix::fcntl::FdFlag::FD_CLOEXEC)
    }

    #[test]
    fn test_command_pipes_are_created_cloexec() {
        let pipes = command_pipes().unwrap();
        for fd in [&pipes.input.0, &pipes.input.1, &pipes.output.0, &pipes.output.1] {
            assert!(is_cloexec(fd));
        }
    }

    #[test]
    fn test_stdout_is_piped() {
        let options = SpawnOptions::new("/bin/echo").arg("hello");
        let mut spawned = spawn_async(&options).unwrap();
        assert!(spawned.command_input.is_none());
        let mut out = String::new();
        let stdout = spawned.standard_output.take().unwrap();
        std::fs::File::from(stdout).read_to_string(&mut out).unwrap();
        spawned.child.wait().unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let options = SpawnOptions::new("/bin/pwd").working_dir(dir.path());
        let mut spawned = spawn_async(&options).unwrap();
        let mut out = String::new();
        let stdout = spawned.standard_output.take().unwrap();
        std::fs::File::from(stdout).read_to_string(&mut out).unwrap();
        spawned.child.wait().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(out.trim()).canonicalize().unwrap(), expected);
    }
}
