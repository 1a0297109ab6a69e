//! Per-command control flow, run on the submitting client's thread.
//!
//! Enqueue the job, then loop: wait for the dispatcher's grant, execute one
//! quantum (shell jobs run to completion instead), yield the CPU back.
//! When the finished job's removal drains the queue, the Gantt string is
//! flushed.

use std::io::Write;
use std::sync::Arc;

use tracing::info;

use crate::executor::ExecContext;
use crate::frame::ClientChannel;
use crate::job::{Job, JobKind};
use crate::scheduler::Scheduler;

/// First-dispatch quantum, in simulated units.
const FIRST_QUANTUM: u32 = 3;
/// Quantum for every later dispatch.
const NEXT_QUANTUM: u32 = 7;

/// Drive one job from enqueue to retirement. Returns the Gantt string when
/// this job's retirement drained the queue.
pub fn run_job<W: Write + Send>(
    sched: &Scheduler,
    job: &Arc<Job>,
    ctx: &mut ExecContext,
    chan: &ClientChannel<W>,
) -> Option<String> {
    if job.kind == JobKind::Shell {
        info!(job = job.id, total = -1, "created");
    }
    sched.enqueue(Arc::clone(job));

    while !job.is_finished() {
        sched.await_turn(job);

        let segment = match job.kind {
            JobKind::Shell => {
                info!(job = job.id, remaining = -1, "started");
                ctx.run_shell(job, chan);
                info!(job = job.id, remaining = -1, "ended");
                None
            }
            JobKind::Program => {
                let quantum = if ctx.rounds_run == 0 {
                    FIRST_QUANTUM
                } else {
                    NEXT_QUANTUM
                };
                ctx.rounds_run += 1;
                let report = ctx.run_quantum(job, quantum, chan);
                Some((job.id, report.time_consumed))
            }
        };

        sched.finish_turn(job, segment);
    }

    let gantt = sched.retire(job);
    if let Some(gantt) = &gantt {
        info!(gantt = %gantt, "timeline");
    }
    gantt
}
