//! Host Scheduling
//!
//! Transitions need one capability from the host: "run this callback after
//! the current synchronous work, in FIFO order". This module defines that
//! seam as the [`Schedule`] trait and ships two implementations:
//!
//! - [`QueueScheduler`]: a plain FIFO queue drained explicitly by the host
//!   (or by tests) with [`run_pending`]. This is what every runtime starts
//!   with.
//! - [`TokioScheduler`]: forwards tasks over a channel to a
//!   [`SchedulerDriver`] future, so a tokio `LocalSet` drains them as part of
//!   its normal event loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::reactive::Runtime;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Runs callbacks after the current synchronous work, preserving FIFO order.
pub trait Schedule {
    /// Queue `task` to run later.
    fn schedule(&self, task: Task);
}

/// FIFO task queue drained explicitly by the host.
#[derive(Clone, Default)]
pub struct QueueScheduler {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl QueueScheduler {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop without holding the borrow across the task.
            let next = self.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Schedule for QueueScheduler {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueScheduler")
            .field("pending", &self.len())
            .finish()
    }
}

/// Scheduler that hands tasks to a tokio-driven [`SchedulerDriver`].
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    sender: UnboundedSender<Task>,
}

/// Future side of a [`TokioScheduler`]. Spawn [`SchedulerDriver::run`] on a
/// `tokio::task::LocalSet` (tasks are not `Send`).
#[derive(Debug)]
pub struct SchedulerDriver {
    receiver: UnboundedReceiver<Task>,
}

impl TokioScheduler {
    /// Create a scheduler and the driver that executes its tasks.
    pub fn new() -> (Self, SchedulerDriver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, SchedulerDriver { receiver })
    }
}

impl Schedule for TokioScheduler {
    fn schedule(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::warn!("scheduler driver dropped; deferred task discarded");
        }
    }
}

impl SchedulerDriver {
    /// Execute tasks in arrival order until every scheduler handle is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            task();
        }
    }
}

/// Replace the current thread's scheduler.
pub fn set_scheduler<S>(scheduler: S)
where
    S: Schedule + 'static,
{
    Runtime::with(|rt| *rt.scheduler.borrow_mut() = Rc::new(scheduler));
}

/// Drain the current thread's default [`QueueScheduler`].
///
/// Does nothing for tasks handed to a scheduler installed with
/// [`set_scheduler`]; those run wherever that scheduler runs them.
pub fn run_pending() -> usize {
    let queue = Runtime::with(|rt| rt.default_queue.clone());
    queue.run_pending()
}

/// Queue `task` on the current thread's scheduler.
pub(crate) fn schedule(task: Task) {
    let scheduler = Runtime::with(|rt| rt.scheduler.borrow().clone());
    scheduler.schedule(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn queue_runs_tasks_in_fifo_order() {
        let queue = QueueScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            queue.schedule(Box::new(move || log.borrow_mut().push(i)));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn tasks_scheduled_while_draining_run_in_the_same_drain() {
        let queue = QueueScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_queue = queue.clone();
        let inner_log = log.clone();
        queue.schedule(Box::new(move || {
            inner_log.borrow_mut().push("outer");
            let log = inner_log.clone();
            inner_queue.schedule(Box::new(move || log.borrow_mut().push("inner")));
        }));

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn default_scheduler_is_drained_by_run_pending() {
        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        schedule(Box::new(move || *counter.borrow_mut() += 1));

        assert_eq!(*hits.borrow(), 0);
        assert_eq!(run_pending(), 1);
        assert_eq!(*hits.borrow(), 1);
    }

    #[tokio::test]
    async fn tokio_driver_runs_tasks_in_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (scheduler, driver) = TokioScheduler::new();
                let log = Rc::new(RefCell::new(Vec::new()));
                let (done_tx, done_rx) = tokio::sync::oneshot::channel();

                for i in 0..3 {
                    let log = log.clone();
                    scheduler.schedule(Box::new(move || log.borrow_mut().push(i)));
                }
                scheduler.schedule(Box::new(move || {
                    let _ = done_tx.send(());
                }));

                tokio::task::spawn_local(driver.run());
                done_rx.await.unwrap();
                assert_eq!(*log.borrow(), vec![0, 1, 2]);
            })
            .await;
    }
}
