/*!
 * Scheduler Task
 * Unit of work: an id plus a one-shot job run on exactly one worker
 */

use crate::core::errors::SchedulerError;
use crate::core::types::{TaskId, WorkerId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a job; `Err` carries a failure description
pub type TaskResult = Result<(), String>;

type Job = Box<dyn FnOnce(&TaskContext<'_>) -> TaskResult + Send + 'static>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A submitted unit of work
pub struct Task {
    id: TaskId,
    job: Job,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Task {
    /// Wrap `job` with a fresh process-unique id
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult + Send + 'static,
    {
        Self::with_id(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed), job)
    }

    pub fn with_id<F>(id: TaskId, job: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult + Send + 'static,
    {
        Self {
            id,
            job: Box::new(job),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Run the job, turning a panic into a failure
    pub(crate) fn run(self, ctx: &TaskContext<'_>) -> TaskResult {
        let job = self.job;
        match panic::catch_unwind(AssertUnwindSafe(|| job(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}

/// View of the executing worker handed to a running job
pub struct TaskContext<'a> {
    worker: WorkerId,
    task: TaskId,
    spawner: &'a dyn Fn(Task) -> Result<(), SchedulerError>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        worker: WorkerId,
        task: TaskId,
        spawner: &'a dyn Fn(Task) -> Result<(), SchedulerError>,
    ) -> Self {
        Self {
            worker,
            task,
            spawner,
        }
    }

    /// Worker running this task
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Queue a child task on the current worker
    pub fn spawn(&self, task: Task) -> Result<(), SchedulerError> {
        (self.spawner)(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_spawn(_: Task) -> Result<(), SchedulerError> {
        Err(SchedulerError::ShutDown)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Task::new(|_| Ok(()));
        let b = Task::new(|_| Ok(()));
        assert_ne!(a.id(), b.id());
        assert_eq!(Task::with_id(7, |_| Ok(())).id(), 7);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let ctx = TaskContext::new(0, 1, &no_spawn);
        let err = Task::new(|_| panic!("boom")).run(&ctx).unwrap_err();
        assert_eq!(err, "task panicked: boom");
    }

    #[test]
    fn test_context_exposes_worker() {
        let ctx = TaskContext::new(3, 9, &no_spawn);
        let result = Task::new(|ctx| {
            assert_eq!(ctx.worker(), 3);
            assert_eq!(ctx.task_id(), 9);
            ctx.spawn(Task::new(|_| Ok(()))).map_err(|e| e.to_string())
        })
        .run(&ctx);
        assert_eq!(result.unwrap_err(), "Scheduler is shut down");
    }
}
