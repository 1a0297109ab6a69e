//! Turns a dispatched job into actual child-process execution.
//!
//! Program jobs run one quantum at a time: the child is spawned on first
//! dispatch, stopped with SIGSTOP when the quantum expires (or a preemption
//! request is observed), and resumed with SIGCONT on the next dispatch. One
//! output line is one simulated unit of work. Shell jobs run to completion
//! with their combined output streamed to the client.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::frame::ClientChannel;
use crate::job::{Job, JobStatus};
use crate::shell;

/// Per-job execution state owned by the submitting client thread.
///
/// The child handle never crosses threads: only this thread stops, continues,
/// and reaps it.
pub struct ExecContext {
    child: Option<Child>,
    output: Option<BufReader<ChildStdout>>,
    started: bool,
    /// Number of times this job has been dispatched.
    pub rounds_run: u32,
    /// Working directory for spawned children; inherited when `None`.
    cwd: Option<PathBuf>,
}

/// What one quantum did, reported back to the yield step.
#[derive(Debug, Clone, Copy)]
pub struct QuantumReport {
    /// Simulated units executed this quantum.
    pub time_consumed: u32,
    pub finished: bool,
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext::new()
    }
}

impl ExecContext {
    pub fn new() -> ExecContext {
        ExecContext {
            child: None,
            output: None,
            started: false,
            rounds_run: 0,
            cwd: None,
        }
    }

    /// Spawn children under `dir` instead of the server's own directory.
    pub fn with_cwd(dir: PathBuf) -> ExecContext {
        ExecContext {
            cwd: Some(dir),
            ..ExecContext::new()
        }
    }

    /// Execute up to `quantum` output units of a program job, then stop the
    /// child or reap it. Exits early on a preemption request (between whole
    /// lines) or on EOF, which counts as natural completion.
    pub fn run_quantum<W: Write>(
        &mut self,
        job: &Job,
        quantum: u32,
        chan: &ClientChannel<W>,
    ) -> QuantumReport {
        if !self.started {
            if let Err(err) = self.spawn_program(job) {
                warn!(job = job.id, error = %err, "spawn failed");
                let _ = chan.end_of_output();
                job.set_status(JobStatus::Finished);
                return QuantumReport {
                    time_consumed: 0,
                    finished: true,
                };
            }
            info!(job = job.id, total = job.total_time, "created");
            info!(job = job.id, remaining = job.remaining(), "started");
        } else {
            self.resume(job);
            info!(job = job.id, remaining = job.remaining(), "running");
        }

        let mut consumed = 0u32;
        let mut forwarding = true;
        let mut line = Vec::new();
        while consumed < quantum && job.remaining() > 0 {
            if job.preempt_requested() {
                break;
            }
            line.clear();
            let read = match self.output.as_mut() {
                Some(stream) => stream.read_until(b'\n', &mut line),
                None => Ok(0),
            };
            match read {
                Ok(0) | Err(_) => {
                    // EOF (or a broken pipe) before the declared burst ran
                    // out: natural completion.
                    job.exhaust();
                    break;
                }
                Ok(_) => {
                    if forwarding && chan.send(&line).is_err() {
                        // The client is gone; keep the cadence, drop the bytes.
                        forwarding = false;
                    }
                    job.consume_unit();
                    consumed += 1;
                }
            }
        }
        if consumed > 0 {
            // Historical statistic carried over from the original server:
            // ten bytes per simulated unit, not actual transport bytes.
            debug!(job = job.id, bytes = consumed * 10, "bytes forwarded");
        }

        if job.remaining() > 0 {
            self.stop(job);
            job.clear_preempt();
            info!(job = job.id, remaining = job.remaining(), "waiting");
            QuantumReport {
                time_consumed: consumed,
                finished: false,
            }
        } else {
            self.reap();
            let _ = chan.end_of_output();
            job.set_status(JobStatus::Finished);
            info!(job = job.id, remaining = 0, "ended");
            QuantumReport {
                time_consumed: consumed,
                finished: true,
            }
        }
    }

    /// Run a shell job's pipeline to completion, forwarding its combined
    /// output. Never preempted; never on the timeline.
    pub fn run_shell<W: Write + Send>(&mut self, job: &Job, chan: &ClientChannel<W>) {
        let stages = match shell::tokenize(&job.command).and_then(|t| shell::build_pipeline(&t)) {
            Ok(stages) => stages,
            Err(err) => {
                let _ = chan.send(format!("{err}\n").as_bytes());
                let _ = chan.end_of_output();
                job.set_status(JobStatus::Finished);
                return;
            }
        };

        let handles = match shell::spawn_pipeline(&stages, self.cwd.as_deref()) {
            Ok(handles) => handles,
            Err(err) => {
                warn!(job = job.id, error = %err, "spawn failed");
                let _ = chan.end_of_output();
                job.set_status(JobStatus::Finished);
                return;
            }
        };

        let shell::PipelineHandles {
            mut children,
            stdout,
            stderrs,
        } = handles;

        thread::scope(|scope| {
            for err_pipe in stderrs {
                scope.spawn(move || forward_stream(err_pipe, chan, job.id));
            }
            if let Some(out_pipe) = stdout {
                forward_stream(out_pipe, chan, job.id);
            }
        });

        for child in &mut children {
            let _ = child.wait();
        }
        let _ = chan.end_of_output();
        job.set_status(JobStatus::Finished);
    }

    fn spawn_program(&mut self, job: &Job) -> Result<()> {
        // The child is re-invoked canonically as `<name> <total_time>`, not
        // with the raw submitted tokens: its output cadence must match the
        // declared burst the timeline accounts with.
        let name = job
            .command
            .split_whitespace()
            .next()
            .context("empty command")?;

        let mut cmd = Command::new(name);
        cmd.arg(job.total_time.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {name}"))?;
        let stdout = child.stdout.take().context("child stdout not piped")?;
        self.output = Some(BufReader::new(stdout));
        self.child = Some(child);
        self.started = true;
        Ok(())
    }

    fn resume(&self, job: &Job) {
        if let Some(child) = &self.child
            && let Err(err) = continue_child(child.id())
        {
            warn!(job = job.id, error = %err, "SIGCONT failed");
        }
    }

    fn stop(&self, job: &Job) {
        if let Some(child) = &self.child
            && let Err(err) = stop_child(child.id())
        {
            warn!(job = job.id, error = %err, "SIGSTOP failed");
        }
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
        self.output = None;
    }
}

/// Copy a child output stream to the client channel in raw chunks until EOF.
/// A failed frame write abandons forwarding but keeps draining the pipe so
/// the child is never blocked on a full buffer.
fn forward_stream<R: Read, W: Write>(mut src: R, chan: &ClientChannel<W>, job_id: u32) {
    let mut buf = [0u8; 1024];
    let mut forwarding = true;
    loop {
        match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if forwarding {
                    if chan.send(&buf[..n]).is_err() {
                        forwarding = false;
                    } else {
                        debug!(job = job_id, bytes = n, "bytes forwarded");
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signum: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) is safe to call with any pid and a valid signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        // ESRCH: the child is already gone — nothing left to signal.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn stop_child(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGSTOP)
}

#[cfg(unix)]
fn continue_child(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGCONT)
}

#[cfg(not(unix))]
fn stop_child(_pid: u32) -> io::Result<()> {
    Err(io::Error::other(
        "stop/continue signals not supported on this platform",
    ))
}

#[cfg(not(unix))]
fn continue_child(_pid: u32) -> io::Result<()> {
    Err(io::Error::other(
        "stop/continue signals not supported on this platform",
    ))
}
