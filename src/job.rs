//! The unit of scheduling: one submitted command from one client.

use std::sync::Condvar;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

/// Sentinel burst for shell jobs: duration unknown, highest priority.
pub const SHELL_BURST: i32 = -1;

/// Declared burst when a program command omits its duration.
pub const DEFAULT_BURST: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Built-in or external command; non-preemptive, runs to completion.
    Shell,
    /// Simulated CPU workload with a declared burst, one output line per unit.
    Program,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    Waiting = 0,
    Running = 1,
    Finished = 2,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => JobStatus::Waiting,
            1 => JobStatus::Running,
            _ => JobStatus::Finished,
        }
    }
}

/// Scheduler-visible record for one submitted command.
///
/// Fields the executor mutates while the scheduler lock is released
/// (`remaining`, `preempt`, `status`) are atomics; `my_turn` is written only
/// under the lock and re-checked under it after a wakeup. The child process
/// handle and its output stream are deliberately NOT here: they belong to the
/// submitting thread's `ExecContext` and never cross threads.
pub struct Job {
    /// Client id; stable for the connection's lifetime, 1-based.
    pub id: u32,
    pub kind: JobKind,
    /// Original command text; opaque to the scheduler.
    pub command: String,
    /// Advertised burst in units, or [`SHELL_BURST`] for shell jobs.
    pub total_time: i32,
    remaining: AtomicI32,
    status: AtomicU8,
    my_turn: AtomicBool,
    preempt: AtomicBool,
    /// Parked on by the submitting thread; signaled by the dispatcher under
    /// the scheduler lock once the CPU is granted.
    pub wake: Condvar,
}

impl Job {
    /// Build a job from a received command line, classifying it as shell or
    /// program and parsing the declared burst.
    pub fn from_command(id: u32, command: String) -> Job {
        let (kind, total_time) = classify(&command);
        Job {
            id,
            kind,
            command,
            total_time,
            remaining: AtomicI32::new(total_time),
            status: AtomicU8::new(JobStatus::Waiting as u8),
            my_turn: AtomicBool::new(false),
            preempt: AtomicBool::new(false),
            wake: Condvar::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.status() == JobStatus::Finished
    }

    /// Simulated units left; meaningful for program jobs only.
    pub fn remaining(&self) -> i32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Account one executed output unit.
    pub fn consume_unit(&self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }

    /// Force completion: the child produced EOF before its declared burst.
    pub fn exhaust(&self) {
        self.remaining.store(0, Ordering::Release);
    }

    pub fn preempt_requested(&self) -> bool {
        self.preempt.load(Ordering::Acquire)
    }

    pub fn request_preempt(&self) {
        self.preempt.store(true, Ordering::Release);
    }

    pub fn clear_preempt(&self) {
        self.preempt.store(false, Ordering::Release);
    }

    pub(crate) fn has_turn(&self) -> bool {
        self.my_turn.load(Ordering::Acquire)
    }

    pub(crate) fn grant_turn(&self) {
        self.my_turn.store(true, Ordering::Release);
    }

    pub(crate) fn clear_turn(&self) {
        self.my_turn.store(false, Ordering::Release);
    }
}

/// A command is a program job when it starts with `./demo` or `demo`; the
/// first whitespace-separated integer after the name is the declared burst
/// (default 10). Everything else is a shell job.
fn classify(command: &str) -> (JobKind, i32) {
    if command.starts_with("./demo") || command.starts_with("demo") {
        let mut total = DEFAULT_BURST;
        for tok in command.split_whitespace().skip(1) {
            if let Ok(n) = tok.parse::<i32>() {
                total = n.max(0);
                break;
            }
        }
        (JobKind::Program, total)
    } else {
        (JobKind::Shell, SHELL_BURST)
    }
}
