//! Networked remote shell with a simulated preemptive CPU scheduler.
//!
//! One `remshd` process accepts many TCP clients. Every submitted command
//! becomes a [`job::Job`] serialized onto a single logical CPU by the
//! [`scheduler::Scheduler`]: shell commands get absolute priority and run to
//! completion; `demo` program jobs are real child processes with a declared
//! burst, picked shortest-remaining-first with an anti-monopoly rule, and
//! preempted between output lines with SIGSTOP/SIGCONT.

pub mod executor;
pub mod frame;
pub mod job;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod shell;
pub mod timeline;
