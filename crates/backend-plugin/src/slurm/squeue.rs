//! Parsing of `squeue --format="%i %T"` output.

use std::collections::HashMap;

/// Coarse state of a job still known to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedState {
    Waiting,
    Running,
}

impl QueuedState {
    fn from_slurm(state: &str) -> Self {
        match state {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED"
            | "SUSPENDED" | "RESV_DEL_HOLD" => QueuedState::Waiting,
            _ => QueuedState::Running,
        }
    }
}

/// Job ID to state for every line of the queue listing. Lines are matched on
/// the whole job-id token, so job `42` never matches `420`.
pub fn parse_queue(output: &str) -> HashMap<String, QueuedState> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let state = fields.next().unwrap_or("RUNNING");
            Some((id.to_string(), QueuedState::from_slurm(state)))
        })
        .collect()
}
