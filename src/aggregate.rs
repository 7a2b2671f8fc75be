//! Dispatches tasks, collects leaf outcomes, and folds them into one result.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::chunk::Task;
use crate::error::{ApiError, CompoundError, Error, Result};
use crate::executor::{execute, RequestContext, Step, TaskOutcome};
use crate::model::{InstanceId, Payload};
use crate::pool::TaskExecutor;

/// Leaf outcomes of one call, ordered by input position.
#[derive(Debug)]
pub struct Summary<I> {
    outcomes: Vec<TaskOutcome<I>>,
}

impl<I> Summary<I> {
    /// All leaf outcomes.
    pub fn outcomes(&self) -> &[TaskOutcome<I>] {
        &self.outcomes
    }

    /// Whether any leaf task failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(TaskOutcome::is_failure)
    }

    /// Decodes every success entry with `unwrap`, in input order.
    pub fn joined_results<T, F>(&self, unwrap: F) -> Result<Vec<T>>
    where
        F: Fn(&Value) -> std::result::Result<T, ApiError>,
    {
        let mut joined = Vec::new();
        for outcome in &self.outcomes {
            if let TaskOutcome::Success { results, .. } = outcome {
                for entry in results {
                    joined.push(unwrap(entry).map_err(|err| Error::Decode(err.to_string()))?);
                }
            }
        }
        Ok(joined)
    }

    /// Decodes every success entry, then folds the outcomes.
    ///
    /// A task whose response holds an entry `decode` rejects is turned into a
    /// failure carrying [`ApiError::Decode`], so its items end up in the
    /// [`CompoundError`] next to the items that went through.
    pub fn into_results<T, D, E>(mut self, decode: D, element_id: E) -> Result<Vec<T>>
    where
        D: Fn(&Value) -> std::result::Result<T, ApiError>,
        E: Fn(&I) -> InstanceId,
    {
        let mut joined = Vec::new();
        for outcome in std::mem::take(&mut self.outcomes) {
            let outcome = match outcome {
                TaskOutcome::Success { task, results } => {
                    match results.iter().map(&decode).collect::<std::result::Result<Vec<T>, _>>() {
                        Ok(typed) => {
                            joined.extend(typed);
                            TaskOutcome::Success { task, results }
                        }
                        Err(err) => {
                            warn!(items = task.len(), offset = task.offset(), %err, "undecodable response entry");
                            TaskOutcome::Failure {
                                task,
                                error: Arc::new(err),
                            }
                        }
                    }
                }
                failure => failure,
            };
            self.outcomes.push(outcome);
        }
        self.raise_compound_error_if_failed_tasks(element_id)?;
        Ok(joined)
    }

    /// Fails with a [`CompoundError`] covering every item of every failed task.
    ///
    /// `element_id` maps an input item to the identity used as the error key.
    pub fn raise_compound_error_if_failed_tasks<F>(
        &self,
        element_id: F,
    ) -> std::result::Result<(), CompoundError>
    where
        F: Fn(&I) -> InstanceId,
    {
        if !self.has_failures() {
            return Ok(());
        }
        let mut compound = CompoundError::default();
        for outcome in &self.outcomes {
            match outcome {
                TaskOutcome::Success { task, .. } => {
                    compound
                        .successful
                        .extend(task.items().iter().map(&element_id));
                }
                TaskOutcome::Failure { task, error } => {
                    for item in task.items() {
                        compound.failed.insert(element_id(item), Arc::clone(error));
                    }
                }
            }
        }
        Err(compound)
    }
}

/// Runs `tasks` on `executor` with at most `max_workers` of them in flight.
///
/// Split halves are queued ahead of untouched tasks and dispatched as fresh
/// jobs, so a small pool never blocks on its own children.
pub fn run<I: Payload>(
    tasks: Vec<Task<I>>,
    executor: TaskExecutor,
    max_workers: usize,
    ctx: Arc<RequestContext>,
) -> Summary<I> {
    let limit = executor.effective_workers(max_workers);
    let mut pending: VecDeque<Task<I>> = tasks.into();
    let (tx, rx) = mpsc::channel::<Step<I>>();
    let mut in_flight = 0usize;
    let mut outcomes = Vec::new();
    let mut splits = 0usize;

    while !pending.is_empty() || in_flight > 0 {
        while in_flight < limit {
            let Some(task) = pending.pop_front() else {
                break;
            };
            dispatch(executor, &ctx, &tx, task);
            in_flight += 1;
        }
        ctx.metrics.in_flight(in_flight);

        match rx.recv() {
            Ok(Step::Done(outcome)) => outcomes.push(outcome),
            Ok(Step::Split(left, right)) => {
                splits += 1;
                pending.push_front(right);
                pending.push_front(left);
            }
            Err(_) => {
                error!(in_flight, "result channel closed with tasks outstanding");
                break;
            }
        }
        in_flight -= 1;
    }

    outcomes.sort_by_key(|outcome| outcome.task().offset());
    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    info!(
        path = ctx.path,
        leaves = outcomes.len(),
        failed,
        splits,
        workers = limit,
        "bulk call finished"
    );
    Summary { outcomes }
}

fn dispatch<I: Payload>(
    executor: TaskExecutor,
    ctx: &Arc<RequestContext>,
    tx: &Sender<Step<I>>,
    task: Task<I>,
) {
    let ctx = Arc::clone(ctx);
    let tx = tx.clone();
    executor.submit(move || {
        let shadow = task.shallow_clone();
        let step = catch_unwind(AssertUnwindSafe(|| execute(&ctx, task))).unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ctx.metrics.task_failed(shadow.len());
            Step::Done(TaskOutcome::Failure {
                task: shadow,
                error: Arc::new(ApiError::WorkerPanicked(message)),
            })
        });
        let _ = tx.send(step);
    });
}
