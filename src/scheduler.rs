//! Global scheduling state: the ready queue, the hybrid policy selector, the
//! preemption controller, and the dispatcher loop.
//!
//! The simulated CPU is a single logical resource. One dispatcher thread
//! grants it to one job at a time; the quantum itself runs on the submitting
//! client's thread with the lock released. Every piece of cross-thread state
//! the original design kept as process globals (queue, `cpu_busy`, current
//! job, last dispatched program, timeline) lives behind the one mutex here.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::job::{Job, JobKind, JobStatus};
use crate::timeline::Timeline;

/// Everything the scheduler lock guards.
struct SchedState {
    /// FIFO by insertion; priority is the selector's business.
    queue: VecDeque<Arc<Job>>,
    /// True from "turn granted" to "yielded back".
    cpu_busy: bool,
    current: Option<Arc<Job>>,
    /// Id of the most recently dispatched program job (anti-monopoly rule).
    last_program: Option<u32>,
    timeline: Timeline,
    shutdown: bool,
}

pub struct Scheduler {
    state: Mutex<SchedState>,
    /// Woken when the queue changes or the CPU is freed.
    cond: Condvar,
}

impl Scheduler {
    pub fn new() -> Arc<Scheduler> {
        Arc::new(Scheduler {
            state: Mutex::new(SchedState {
                queue: VecDeque::new(),
                cpu_busy: false,
                current: None,
                last_program: None,
                timeline: Timeline::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn locked(&self) -> MutexGuard<'_, SchedState> {
        // A panicking handler thread must not take the whole scheduler down
        // with a poisoned lock; the state itself stays consistent because
        // every critical section completes its updates before unlocking.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SchedState>) -> MutexGuard<'a, SchedState> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Append a job at the tail, run the preemption check against the
    /// currently running job, and wake the dispatcher.
    pub fn enqueue(&self, job: Arc<Job>) {
        let mut st = self.locked();
        maybe_preempt(&st, &job);
        st.queue.push_back(job);
        self.cond.notify_all();
    }

    /// Start the dispatcher thread. One per scheduler.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let sched = Arc::clone(self);
        thread::spawn(move || sched.run_dispatcher())
    }

    /// Dispatcher loop: wait for "CPU free and queue non-empty", select a
    /// job, grant it the CPU, repeat. Exits when [`Scheduler::shutdown`] is
    /// called.
    fn run_dispatcher(&self) {
        let mut st = self.locked();
        loop {
            while !st.shutdown && (st.queue.is_empty() || st.cpu_busy) {
                st = self.wait(st);
            }
            if st.shutdown {
                break;
            }
            match pick(&mut st) {
                Some(job) => {
                    st.cpu_busy = true;
                    st.current = Some(Arc::clone(&job));
                    job.set_status(JobStatus::Running);
                    job.grant_turn();
                    job.wake.notify_one();
                    debug!(job = job.id, "dispatched");
                }
                // Only finished-but-not-yet-retired jobs are queued; wait for
                // their owners to remove them.
                None => st = self.wait(st),
            }
        }
    }

    /// Ask the dispatcher loop to exit and wake every waiter.
    pub fn shutdown(&self) {
        let mut st = self.locked();
        st.shutdown = true;
        self.cond.notify_all();
    }

    /// Block the submitting thread until the dispatcher grants the CPU.
    pub fn await_turn(&self, job: &Job) {
        let mut st = self.locked();
        while !job.has_turn() {
            st = job.wake.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Yield the CPU back: record the executed segment, free the CPU, and
    /// wake the dispatcher.
    pub fn finish_turn(&self, job: &Job, segment: Option<(u32, u32)>) {
        let mut st = self.locked();
        if let Some((job_id, duration)) = segment {
            st.timeline.append(job_id, duration);
        }
        st.cpu_busy = false;
        st.current = None;
        job.clear_turn();
        if !job.is_finished() {
            job.set_status(JobStatus::Waiting);
        }
        self.cond.notify_all();
    }

    /// Remove a finished job from the queue. When this drains the queue, the
    /// Gantt string is flushed and returned.
    pub fn retire(&self, job: &Arc<Job>) -> Option<String> {
        let mut st = self.locked();
        st.queue.retain(|queued| !Arc::ptr_eq(queued, job));
        // The dispatcher may be parked on an all-finished queue.
        self.cond.notify_all();
        if st.queue.is_empty() {
            st.timeline.flush()
        } else {
            None
        }
    }
}

/// Preemption controller: a newly enqueued job may outrank the running one.
/// Shell jobs always do; a program job does when it has strictly less
/// remaining work. Shell jobs are never preempted themselves.
fn maybe_preempt(st: &SchedState, new: &Job) {
    if !st.cpu_busy {
        return;
    }
    let Some(current) = st.current.as_ref() else {
        return;
    };
    if current.kind != JobKind::Program {
        return;
    }
    let outranks = match new.kind {
        JobKind::Shell => true,
        JobKind::Program => new.remaining() < current.remaining(),
    };
    if outranks {
        current.request_preempt();
        debug!(job = current.id, by = new.id, "preemption requested");
    }
}

/// The hybrid policy: shell priority first, then SRJF over program jobs with
/// the anti-monopoly exclusion, FIFO on ties.
fn pick(st: &mut SchedState) -> Option<Arc<Job>> {
    // 1. Shell jobs run as soon as the CPU frees up, oldest first.
    if let Some(job) = st
        .queue
        .iter()
        .find(|j| !j.is_finished() && j.kind == JobKind::Shell)
    {
        return Some(Arc::clone(job));
    }

    // 2. The last dispatched program is excluded, unless it is the only one.
    let candidates = st
        .queue
        .iter()
        .filter(|j| !j.is_finished() && j.kind == JobKind::Program)
        .count();
    let excluded = if candidates > 1 { st.last_program } else { None };

    // 3. Shortest remaining time; the earliest-enqueued wins ties.
    let mut best: Option<&Arc<Job>> = None;
    for job in &st.queue {
        if job.is_finished() || job.kind != JobKind::Program || excluded == Some(job.id) {
            continue;
        }
        match best {
            Some(current_best) if job.remaining() >= current_best.remaining() => {}
            _ => best = Some(job),
        }
    }

    let job = Arc::clone(best?);
    st.last_program = Some(job.id);
    Some(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(id: u32, total: i32) -> Arc<Job> {
        Arc::new(Job::from_command(id, format!("./demo {total}")))
    }

    fn shell(id: u32) -> Arc<Job> {
        Arc::new(Job::from_command(id, "ls -l".to_string()))
    }

    fn state_with(jobs: &[&Arc<Job>]) -> SchedState {
        SchedState {
            queue: jobs.iter().map(|j| Arc::clone(j)).collect(),
            cpu_busy: false,
            current: None,
            last_program: None,
            timeline: Timeline::new(),
            shutdown: false,
        }
    }

    #[test]
    fn shell_outranks_programs() {
        let p = program(1, 2);
        let s = shell(2);
        let mut st = state_with(&[&p, &s]);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
        // Shell selections never update the anti-monopoly marker.
        assert_eq!(st.last_program, None);
    }

    #[test]
    fn srjf_picks_smallest_remaining() {
        let long = program(1, 20);
        let short = program(2, 5);
        let mut st = state_with(&[&long, &short]);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
        assert_eq!(st.last_program, Some(2));
    }

    #[test]
    fn srjf_ties_break_fifo() {
        let first = program(1, 6);
        let second = program(2, 6);
        let mut st = state_with(&[&first, &second]);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(1));
    }

    #[test]
    fn anti_monopoly_forces_alternation() {
        let a = program(1, 6);
        let b = program(2, 6);
        let mut st = state_with(&[&a, &b]);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(1));
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
        assert_eq!(pick(&mut st).map(|j| j.id), Some(1));
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
    }

    #[test]
    fn sole_candidate_stays_eligible() {
        let only = program(1, 9);
        let mut st = state_with(&[&only]);
        st.last_program = Some(1);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(1));
    }

    #[test]
    fn anti_monopoly_beats_srjf() {
        // The shortest job just ran; the longer one must get the CPU.
        let short = program(1, 2);
        let long = program(2, 10);
        let mut st = state_with(&[&short, &long]);
        st.last_program = Some(1);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
    }

    #[test]
    fn finished_jobs_are_skipped() {
        let done = program(1, 4);
        done.set_status(JobStatus::Finished);
        let live = program(2, 8);
        let mut st = state_with(&[&done, &live]);
        assert_eq!(pick(&mut st).map(|j| j.id), Some(2));
    }

    #[test]
    fn empty_queue_picks_nothing() {
        let mut st = state_with(&[]);
        assert!(pick(&mut st).is_none());
    }

    #[test]
    fn shell_arrival_preempts_running_program() {
        let sched = Scheduler::new();
        let running = program(1, 10);
        {
            let mut st = sched.locked();
            st.cpu_busy = true;
            st.current = Some(Arc::clone(&running));
        }
        sched.enqueue(shell(2));
        assert!(running.preempt_requested());
    }

    #[test]
    fn shorter_program_preempts() {
        let sched = Scheduler::new();
        let running = program(1, 17);
        {
            let mut st = sched.locked();
            st.cpu_busy = true;
            st.current = Some(Arc::clone(&running));
        }
        sched.enqueue(program(2, 5));
        assert!(running.preempt_requested());
    }

    #[test]
    fn longer_program_does_not_preempt() {
        let sched = Scheduler::new();
        let running = program(1, 5);
        {
            let mut st = sched.locked();
            st.cpu_busy = true;
            st.current = Some(Arc::clone(&running));
        }
        sched.enqueue(program(2, 17));
        assert!(!running.preempt_requested());
    }

    #[test]
    fn running_shell_is_never_preempted() {
        let sched = Scheduler::new();
        let running = shell(1);
        {
            let mut st = sched.locked();
            st.cpu_busy = true;
            st.current = Some(Arc::clone(&running));
        }
        sched.enqueue(shell(2));
        sched.enqueue(program(3, 1));
        assert!(!running.preempt_requested());
    }

    #[test]
    fn idle_cpu_means_no_preemption() {
        let sched = Scheduler::new();
        let queued = program(1, 10);
        sched.enqueue(Arc::clone(&queued));
        sched.enqueue(program(2, 1));
        assert!(!queued.preempt_requested());
    }
}
