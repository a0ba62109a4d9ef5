//! Interactive child process with piped stdio and streamed output.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Grace period between SIGTERM and a hard kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// A running subprocess whose stdout and stderr arrive as text chunks.
///
/// Both streams feed one channel. The channel disconnects once the child has
/// closed both pipes, which is how callers learn that output is finished.
#[derive(Debug)]
pub struct SupervisedChild {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<String>,
}

impl SupervisedChild {
    /// Spawn `program args...` with all three stdio streams piped.
    ///
    /// With `relay` set, output is also copied to our own stdout/stderr as it
    /// arrives.
    #[instrument(skip(args), fields(args = args.len()))]
    pub fn spawn(program: &str, args: &[String], relay: bool) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning supervised process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).with_context(|| format!("spawn {program}"));
            }
        };

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, rx) = mpsc::channel();
        let stderr_tx = tx.clone();
        thread::spawn(move || forward_stream(stdout, Stream::Stdout, relay, tx));
        thread::spawn(move || forward_stream(stderr, Stream::Stderr, relay, stderr_tx));

        debug!(pid = child.id(), "supervised process started");
        Ok(Self {
            child,
            stdin,
            output: rx,
        })
    }

    /// Wait up to `timeout` for the next output chunk.
    pub fn recv_output(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.output.recv_timeout(timeout)
    }

    /// Drop output that has arrived but not been consumed yet.
    pub fn discard_pending_output(&self) -> usize {
        self.output.try_iter().count()
    }

    /// Write `text` plus a newline to the child's stdin.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("stdin is closed"))?;
        stdin
            .write_all(format!("{text}\n").as_bytes())
            .context("write to child stdin")?;
        stdin.flush().context("flush child stdin")?;
        debug!(len = text.len(), "sent line to child");
        Ok(())
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("poll child status")
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout).context("wait for child")
    }

    /// Ask the child to exit, escalating to a hard kill after a grace period.
    #[instrument(skip(self), fields(pid = self.child.id()))]
    pub fn terminate(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        self.stdin.take();
        send_term(&mut self.child)?;
        if let Some(status) = self.wait_timeout(TERMINATE_GRACE)? {
            return Ok(status);
        }
        warn!("child ignored termination signal, killing");
        self.child.kill().context("kill child")?;
        self.child.wait().context("wait child after kill")
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn send_term(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).context("child pid out of range")?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).context("send SIGTERM")?;
    Ok(())
}

#[cfg(not(unix))]
fn send_term(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

fn forward_stream<R: Read>(mut reader: R, stream: Stream, relay: bool, tx: Sender<String>) {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(err = %e, ?stream, "output stream closed with error");
                break;
            }
        };
        if relay {
            relay_chunk(stream, &chunk[..n]);
        }
        if tx
            .send(String::from_utf8_lossy(&chunk[..n]).into_owned())
            .is_err()
        {
            break;
        }
    }
    debug!(?stream, "output stream finished");
}

fn relay_chunk(stream: Stream, bytes: &[u8]) {
    let result = match stream {
        Stream::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(bytes).and_then(|()| out.flush())
        }
        Stream::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(bytes).and_then(|()| err.flush())
        }
    };
    if let Err(e) = result {
        debug!(err = %e, ?stream, "failed to relay output");
    }
}
