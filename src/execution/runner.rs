//! Bounded execution of external commands.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command::CommandSpec;
use super::result::ExecutionResult;
use crate::error::{LbAdapterError, Termination};
use crate::Result;

/// Default interval between child status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the output pipe to drain after a kill.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Default buffer size for reading command output.
const READ_BUFFER_SIZE: usize = 4096;

type SharedBuffer = Arc<Mutex<Vec<u8>>>;
type Reader = JoinHandle<io::Result<()>>;

/// Runs one external command per call, bounded by the command's timeout.
///
/// stdout and stderr are captured together in write order. On timeout the
/// command's whole process group is killed and reaped before `run` returns,
/// and the output captured up to that point travels with the error.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    poll_interval: Duration,
}

impl CommandRunner {
    /// Create a runner with the default poll interval.
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often the child is polled for exit.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Execute `spec` and wait for it to finish or time out.
    pub fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let start = Instant::now();
        let deadline = start + spec.timeout;
        let buffer = SharedBuffer::default();

        let (mut child, readers) = spawn_captured(spec, &buffer)?;
        debug!(
            command = %spec,
            pid = child.id(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "Spawned command"
        );

        let status = match self.wait_until(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                terminate(&mut child);
                self.wait_readers(&readers, Instant::now() + DRAIN_GRACE);
                let output = salvage_output(spec, readers, &buffer);
                warn!(
                    command = %spec,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Command timed out, killed its process group"
                );
                return Err(execution_failure(
                    spec,
                    output,
                    Termination::TimedOut(spec.timeout),
                ));
            }
            Err(e) => {
                terminate(&mut child);
                return Err(e.into());
            }
        };

        if !self.wait_readers(&readers, deadline) {
            // A background process outlived the command and still holds the pipe.
            warn!(command = %spec, "Output pipe still open at deadline, killing process group");
            kill_group(&mut child);
            self.wait_readers(&readers, Instant::now() + DRAIN_GRACE);
        }
        let output = finish_readers(readers, &buffer)?;
        let duration = start.elapsed();

        match exit_code(status) {
            Ok(code) if spec.exit_codes.accepts(code) => {
                let output = String::from_utf8(output)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(ExecutionResult::new(code, output, duration))
            }
            Ok(code) => Err(execution_failure(spec, output, Termination::Exited(code))),
            Err(signal) => Err(execution_failure(
                spec,
                output,
                Termination::Signaled(signal),
            )),
        }
    }

    /// Poll the child until it exits or `deadline` passes.
    fn wait_until(
        &self,
        child: &mut Child,
        deadline: Instant,
    ) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Wait for every reader to reach EOF. Returns false if `deadline` passed first.
    fn wait_readers(&self, readers: &[Reader], deadline: Instant) -> bool {
        loop {
            if readers.iter().all(JoinHandle::is_finished) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn execution_failure(
    spec: &CommandSpec,
    output: Vec<u8>,
    termination: Termination,
) -> LbAdapterError {
    LbAdapterError::Execution {
        output: String::from_utf8_lossy(&output).into_owned(),
        termination,
        command: spec.command_line().to_string(),
    }
}

fn lock(buffer: &SharedBuffer) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Join finished readers, reporting the first one that failed.
///
/// Readers still blocked (pipe held open by an escaped process) are left
/// detached; their partial output is still in the buffer.
fn join_readers(readers: Vec<Reader>) -> io::Result<()> {
    let mut outcome = Ok(());
    for reader in readers {
        if !reader.is_finished() {
            continue;
        }
        let result = reader.join().unwrap_or_else(|_| {
            Err(io::Error::new(io::ErrorKind::Other, "output reader panicked"))
        });
        if outcome.is_ok() {
            outcome = result;
        }
    }
    outcome
}

fn take_output(buffer: &SharedBuffer) -> Vec<u8> {
    std::mem::take(&mut *lock(buffer))
}

/// Join finished readers and take what they captured.
fn finish_readers(readers: Vec<Reader>, buffer: &SharedBuffer) -> io::Result<Vec<u8>> {
    join_readers(readers)?;
    Ok(take_output(buffer))
}

/// Output for a timed-out command. A failed reader does not discard what
/// was already captured.
fn salvage_output(spec: &CommandSpec, readers: Vec<Reader>, buffer: &SharedBuffer) -> Vec<u8> {
    if let Err(e) = join_readers(readers) {
        warn!(command = %spec, error = %e, "Output reader failed before timeout");
    }
    take_output(buffer)
}

fn spawn_reader<R>(mut source: R, buffer: SharedBuffer) -> io::Result<Reader>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("lb-adapter-output".to_string())
        .spawn(move || {
            let mut chunk = [0u8; READ_BUFFER_SIZE];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => return Ok(()),
                    Ok(n) => lock(&buffer).extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        })
}

/// Kill the child (and its group) and reap it.
fn terminate(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.wait() {
        warn!(pid = child.id(), error = %e, "Failed to reap killed command");
    }
}

#[cfg(unix)]
fn output_pipe() -> io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        Ok(nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?)
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let (read_end, write_end) = nix::unistd::pipe()?;
        for fd in [&read_end, &write_end] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        Ok((read_end, write_end))
    }
}

/// Spawn the command in its own process group with stdout and stderr
/// sharing one pipe.
#[cfg(unix)]
fn spawn_captured(
    spec: &CommandSpec,
    buffer: &SharedBuffer,
) -> io::Result<(Child, Vec<Reader>)> {
    use std::os::unix::process::CommandExt;

    let (read_end, write_end) = output_pipe()?;

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(write_end.try_clone()?)
        .stderr(write_end)
        .process_group(0);

    let spawned = command.spawn();
    // The Command owns our copies of the write end; EOF needs them closed.
    drop(command);
    let mut child = spawned?;

    match spawn_reader(std::fs::File::from(read_end), Arc::clone(buffer)) {
        Ok(reader) => Ok((child, vec![reader])),
        Err(e) => {
            terminate(&mut child);
            Err(e)
        }
    }
}

#[cfg(not(unix))]
fn spawn_captured(
    spec: &CommandSpec,
    buffer: &SharedBuffer,
) -> io::Result<(Child, Vec<Reader>)> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut readers = Vec::with_capacity(2);
    let stdout = child.stdout.take().map(|s| spawn_reader(s, Arc::clone(buffer)));
    let stderr = child.stderr.take().map(|s| spawn_reader(s, Arc::clone(buffer)));
    for reader in [stdout, stderr].into_iter().flatten() {
        match reader {
            Ok(reader) => readers.push(reader),
            Err(e) => {
                terminate(&mut child);
                return Err(e);
            }
        }
    }

    Ok((child, readers))
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            warn!(pid = child.id(), error = %e, "killpg failed, killing child only");
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

/// Exit code on normal exit, or the terminating signal.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> std::result::Result<i32, i32> {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => Ok(code),
        None => Err(status.signal().unwrap_or_default()),
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> std::result::Result<i32, i32> {
    Ok(status.code().unwrap_or(-1))
}
