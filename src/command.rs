//! Runs external tools (tar, rclone, git) with captured output and an optional time limit.

use crate::error::BackupError;
use crate::Result;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// One-line description of what the tool said, preferring stderr
    pub fn summary(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return first_line(stderr);
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return first_line(stdout);
        }
        format!("status {}", self.status)
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run to completion and return the output, whatever the exit status
    pub fn output(&self, cmd: &mut Command) -> Result<CommandOutput> {
        let program = program_name(cmd);
        tracing::debug!(command = ?cmd, "running external command");

        // Own process group, so a timeout can also stop helpers the tool spawned (ssh for git)
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::CommandFailed {
                program: program.clone(),
                summary: format!("failed to launch: {e}"),
            })?;

        // Drain both pipes on their own threads so a chatty tool can't block on a full pipe
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => wait_with_deadline(&mut child, limit),
            None => child.wait().map(Some),
        };

        // Pipes close once every process in the group is gone
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        match status? {
            Some(status) => Ok(CommandOutput {
                status,
                stdout,
                stderr,
            }),
            None => Err(BackupError::CommandTimeout {
                program,
                timeout: self.timeout.unwrap_or_default(),
            }),
        }
    }

    /// Run and turn a non-zero exit into `CommandFailed`
    pub fn run(&self, cmd: &mut Command) -> Result<CommandOutput> {
        let output = self.output(cmd)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(BackupError::CommandFailed {
                program: program_name(cmd),
                summary: output.summary(),
            })
        }
    }
}

/// `None` when the deadline passed and the process group was killed
fn wait_with_deadline(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= limit {
            kill_group(child);
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // The child leads its own group, so -pid addresses every process in it
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}
