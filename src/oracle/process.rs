//! External simulator over a process boundary.
//!
//! Protocol, one process per condition:
//!
//! ```text
//! <program> <args...> --mode <world_gen|crop_economy> --seed <n>
//! stdin:  the parameter set as JSON
//! stdout: {"score": <number>, "failures": [{"metric", "value", "description"}, ...]}
//! ```
//!
//! A non-zero exit, unparseable stdout, or running past the deadline is an
//! error. The child runs in its own process group; past the deadline the
//! whole group is killed and the call returns without waiting for pipes that
//! a stray grandchild may still hold open.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};

use super::{SimMode, Simulator};
use crate::types::{ParameterSet, Trial};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ProcessSimulator {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSimulator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Parse a whitespace-separated command line such as `node sim.js --fast`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn command(&self, mode: SimMode, seed: u64) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--mode")
            .arg(mode.as_str())
            .arg("--seed")
            .arg(seed.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Kill the child and everything it spawned, then reap the child.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall on a process group we created at spawn.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Drain `source` on a detached thread; the result arrives on the receiver
/// once the pipe closes.
fn drain<R: Read + Send + 'static>(mut source: R) -> Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let read = source.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(read);
    });
    rx
}

fn recv_by(rx: &Receiver<std::io::Result<Vec<u8>>>, deadline: Instant, what: &str) -> anyhow::Result<Vec<u8>> {
    let wait = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(wait) {
        Ok(read) => read.with_context(|| format!("Failed to read simulator {}", what)),
        Err(RecvTimeoutError::Timeout) => bail!("simulator {} still open at deadline", what),
        Err(RecvTimeoutError::Disconnected) => bail!("simulator {} reader stopped", what),
    }
}

impl Simulator for ProcessSimulator {
    fn simulate(&self, params: &ParameterSet, seed: u64, mode: SimMode, deadline: Instant) -> anyhow::Result<Trial> {
        let input = serde_json::to_vec(params.as_value())?;

        let mut child = self
            .command(mode, seed)
            .spawn()
            .with_context(|| format!("Failed to spawn simulator {}", self.program.display()))?;

        let mut stdin = child.stdin.take().context("simulator stdin unavailable")?;
        let stdout = drain(child.stdout.take().context("simulator stdout unavailable")?);
        let stderr = drain(child.stderr.take().context("simulator stderr unavailable")?);
        thread::spawn(move || {
            // The child may exit without reading; a broken pipe is reported via its status.
            let _ = stdin.write_all(&input);
        });

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    kill_tree(&mut child);
                    bail!("simulator timed out (seed {})", seed);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill_tree(&mut child);
                    return Err(anyhow!(e).context("Failed to wait for simulator"));
                }
            }
        };

        // The direct child is gone; anything it left running may still hold the pipes.
        let stdout = recv_by(&stdout, deadline, "stdout");
        let stderr = recv_by(&stderr, deadline, "stderr").unwrap_or_default();
        kill_tree(&mut child);

        if !status.success() {
            bail!("simulator exited with {}: {}", status, String::from_utf8_lossy(&stderr).trim());
        }
        let stdout = stdout?;
        let trial: Trial = serde_json::from_slice(&stdout).with_context(|| {
            format!(
                "Failed to parse simulator output: {}",
                String::from_utf8_lossy(&stdout[..stdout.len().min(500)])
            )
        })?;
        Ok(trial)
    }
}
