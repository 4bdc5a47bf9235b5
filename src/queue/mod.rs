pub mod startup;
pub mod task;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::server::AppState;
use crate::workflow::WorkflowState;

use task::Task;

/// FIFO of pending tasks, drained by a single processor.
#[derive(Default)]
pub struct TaskQueue {
    pending: VecDeque<Task>,
    /// Wakes the processor on enqueue.
    notify: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_notifier(&mut self, tx: tokio::sync::mpsc::UnboundedSender<()>) {
        self.notify = Some(tx);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `false` when an identical task is already waiting.
    pub fn enqueue(&mut self, task: Task) -> bool {
        if self.pending.contains(&task) {
            tracing::debug!(task = %task.description(), "Task already queued");
            return false;
        }
        tracing::info!(task = %task.description(), "Enqueuing task");
        self.pending.push_back(task);

        if let Some(ref tx) = self.notify {
            let _ = tx.send(());
        }
        true
    }

    /// Drop queued work for an issue. Returns how many tasks were removed.
    pub fn cancel_issue(&mut self, issue_number: u64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|task| task.issue_number() != Some(issue_number));
        let removed = before - self.pending.len();
        if removed > 0 {
            tracing::info!(issue = issue_number, removed, "Cancelled queued tasks for issue");
        }
        removed
    }

    pub fn take_next(&mut self) -> Option<Task> {
        self.pending.pop_front()
    }
}

/// Run the background queue processor. Tasks run one at a time, so two
/// runs of the same issue never overlap.
pub async fn run_queue_processor(state: Arc<AppState>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    {
        let mut queue = state.task_queue.write().await;
        // Anything enqueued before the notifier existed.
        if !queue.is_empty() {
            let _ = tx.send(());
        }
        queue.set_notifier(tx);
    }

    tracing::info!("Queue processor started");

    while rx.recv().await.is_some() {
        loop {
            let task = {
                let mut queue = state.task_queue.write().await;
                queue.take_next()
            };
            let Some(task) = task else {
                break;
            };

            tracing::info!(task = %task.description(), "Processing task");
            run_task(&state, &task).await;
        }
    }
}

async fn run_task(state: &AppState, task: &Task) {
    match task {
        Task::ProcessIssue { issue_number } => {
            match state.services.engine.process_issue(*issue_number, true, false).await {
                Ok(result) => {
                    tracing::info!(
                        task = %task.description(),
                        success = result.success,
                        state = %result.current_state,
                        error = ?result.error,
                        "Task completed"
                    );
                    let hand_off = state.services.config.workflow.monitor_after_finalize
                        && result.current_state == WorkflowState::ReadyForHuman;
                    if let (true, Some(pr)) = (hand_off, result.pull_request) {
                        state.monitor.start_monitoring(pr).await;
                    }
                }
                Err(e) => {
                    tracing::error!(task = %task.description(), error = %e, "Task failed");
                }
            }
        }
        Task::MonitorPullRequest { pr_number } => {
            state.monitor.start_monitoring(*pr_number).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_tasks_are_deduplicated() {
        let mut queue = TaskQueue::new();
        assert!(queue.enqueue(Task::ProcessIssue { issue_number: 1 }));
        assert!(!queue.enqueue(Task::ProcessIssue { issue_number: 1 }));
        assert!(queue.enqueue(Task::MonitorPullRequest { pr_number: 1 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_take_next_is_fifo() {
        let mut queue = TaskQueue::new();
        queue.enqueue(Task::ProcessIssue { issue_number: 2 });
        queue.enqueue(Task::ProcessIssue { issue_number: 1 });
        assert_eq!(queue.take_next(), Some(Task::ProcessIssue { issue_number: 2 }));
        assert_eq!(queue.take_next(), Some(Task::ProcessIssue { issue_number: 1 }));
        assert_eq!(queue.take_next(), None);
    }

    #[test]
    fn test_cancel_issue_leaves_monitor_tasks() {
        let mut queue = TaskQueue::new();
        queue.enqueue(Task::ProcessIssue { issue_number: 7 });
        queue.enqueue(Task::MonitorPullRequest { pr_number: 7 });
        queue.enqueue(Task::ProcessIssue { issue_number: 8 });

        assert_eq!(queue.cancel_issue(7), 1);
        assert_eq!(queue.take_next(), Some(Task::MonitorPullRequest { pr_number: 7 }));
        assert_eq!(queue.take_next(), Some(Task::ProcessIssue { issue_number: 8 }));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_processor() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut queue = TaskQueue::new();
        queue.set_notifier(tx);
        queue.enqueue(Task::ProcessIssue { issue_number: 3 });
        assert!(rx.recv().await.is_some());
    }
}
