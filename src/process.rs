use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long pipe readers may linger once their process is gone.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// A program plus its arguments, ready to be handed to a [`ProcessRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Killed when the run is interrupted. VCS restores must never set this.
    pub interruptible: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            interruptible: false,
        }
    }

    pub fn interruptible(mut self) -> Self {
        self.interruptible = true;
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Capability for running external tools. The VCS and the test oracle only
/// ever talk to the outside world through this trait.
pub trait ProcessRunner {
    fn run(&self, command: &CommandSpec, workdir: &Path, timeout: Duration)
        -> io::Result<ProcessOutput>;
}

/// Split a configured command line on whitespace into program and arguments.
/// `{profile}` placeholders are replaced when a profile path is given.
pub fn parse_command(cmd: &str, profile: Option<&Path>) -> io::Result<CommandSpec> {
    let mut parts = cmd.split_whitespace().map(|part| match profile {
        Some(p) => part.replace("{profile}", &p.to_string_lossy()),
        None => part.to_string(),
    });
    let program = parts.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
    })?;
    Ok(CommandSpec::new(program, parts))
}

/// Runs real subprocesses.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    interrupt: Option<Arc<AtomicBool>>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interruptible commands are killed once `flag` is raised.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        command: &CommandSpec,
        workdir: &Path,
        timeout: Duration,
    ) -> io::Result<ProcessOutput> {
        debug!(
            command = %command.display(),
            workdir = %workdir.display(),
            timeout_secs = timeout.as_secs(),
            "Spawning process"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl+C reaches only this driver, which
        // decides itself what to kill.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let (exit_code, timed_out) = loop {
            match child.try_wait() {
                Ok(Some(status)) => break (status.code(), false),
                Ok(None) => {
                    if command.interruptible && self.interrupted() {
                        kill(&mut child);
                        collect(stdout, KILL_GRACE);
                        collect(stderr, KILL_GRACE);
                        return Err(io::Error::new(
                            io::ErrorKind::Interrupted,
                            format!("{} interrupted", command.program),
                        ));
                    }
                    if start.elapsed() > timeout {
                        warn!(command = %command.display(), "Process timed out, killing");
                        kill(&mut child);
                        break (None, true);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    kill(&mut child);
                    collect(stdout, KILL_GRACE);
                    collect(stderr, KILL_GRACE);
                    return Err(e);
                }
            }
        };

        // Descendants that outlive the child keep the pipes open.
        let grace = if timed_out {
            KILL_GRACE
        } else {
            timeout.saturating_sub(start.elapsed()).max(KILL_GRACE)
        };
        let deadline = Instant::now() + grace;
        let output = ProcessOutput {
            exit_code,
            stdout: collect(stdout, grace),
            stderr: collect(stderr, deadline.saturating_duration_since(Instant::now())),
            timed_out,
        };
        trace!(stdout = %output.stdout, stderr = %output.stderr, "Process output");
        debug!(
            exit_code = output.exit_code.unwrap_or(-1),
            timed_out,
            duration_ms = start.elapsed().as_millis() as u64,
            "Process completed"
        );
        Ok(output)
    }
}

/// Read a pipe to EOF on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// Wait at most `within` for a drained pipe. A reader still blocked after
/// that is abandoned along with whatever it has read.
fn collect(pipe: Option<Receiver<String>>, within: Duration) -> String {
    pipe.and_then(|rx| rx.recv_timeout(within).ok())
        .unwrap_or_default()
}

/// Kill the child's whole process group, then reap the child.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // The group id equals the child pid, see `process_group(0)`.
            let result = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if result == -1 {
                debug!(error = %io::Error::last_os_error(), "Could not signal process group");
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
