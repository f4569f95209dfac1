use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    AutoSubmit,
    ClearAfterFeedback,
    NextCycle,
    UnlockHatch,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    action: DeferredAction,
    token: CancelToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn action(&self) -> DeferredAction {
        self.action
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A task whose delay has elapsed. The token is still live: an earlier task in the
/// same batch may cancel it, so check `is_cancelled` right before applying it.
#[derive(Debug, Clone)]
pub struct DueTask {
    pub id: TaskId,
    pub action: DeferredAction,
    token: CancelToken,
}

impl DueTask {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct ScheduledTask {
    id: TaskId,
    action: DeferredAction,
    remaining_seconds: f32,
    token: CancelToken,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    next_task_id: u64,
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn schedule(&mut self, action: DeferredAction, delay_seconds: f32) -> TaskHandle {
        let id = TaskId(self.next_task_id);
        self.next_task_id = self.next_task_id.saturating_add(1);
        let token = CancelToken::default();
        let remaining_seconds = if delay_seconds.is_finite() {
            delay_seconds.max(0.0)
        } else {
            0.0
        };
        self.tasks.push(ScheduledTask {
            id,
            action,
            remaining_seconds,
            token: token.clone(),
        });
        TaskHandle { id, action, token }
    }

    pub fn cancel_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.token.is_cancelled())
            .count()
    }

    pub fn advance(&mut self, dt_seconds: f32) -> Vec<DueTask> {
        let dt_seconds = if dt_seconds.is_finite() {
            dt_seconds.max(0.0)
        } else {
            0.0
        };
        self.tasks.retain(|task| !task.token.is_cancelled());

        let mut due = Vec::new();
        self.tasks.retain_mut(|task| {
            task.remaining_seconds -= dt_seconds;
            if task.remaining_seconds <= 0.0 {
                due.push((task.remaining_seconds, task.id, task.action, task.token.clone()));
                false
            } else {
                true
            }
        });

        // Most overdue first; ties keep scheduling order.
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter()
            .map(|(_, id, action, token)| DueTask { id, action, token })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_becomes_due_after_its_delay() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(DeferredAction::UnlockHatch, 2.0);

        assert!(scheduler.advance(1.0).is_empty());
        let due = scheduler.advance(1.0);

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].action, DeferredAction::UnlockHatch);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn cancelled_task_never_becomes_due() {
        let mut scheduler = Scheduler::default();
        let handle = scheduler.schedule(DeferredAction::AutoSubmit, 0.5);
        handle.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.advance(1.0).is_empty());
    }

    #[test]
    fn due_tasks_are_ordered_by_due_time_then_schedule_order() {
        let mut scheduler = Scheduler::default();
        let late = scheduler.schedule(DeferredAction::NextCycle, 1.0);
        let early = scheduler.schedule(DeferredAction::ClearAfterFeedback, 0.5);
        let tied = scheduler.schedule(DeferredAction::UnlockHatch, 1.0);

        let due = scheduler.advance(1.0);
        let ids = due.iter().map(|task| task.id).collect::<Vec<_>>();

        assert_eq!(ids, vec![early.id(), late.id(), tied.id()]);
    }

    #[test]
    fn due_task_observes_cancellation_after_it_was_returned() {
        let mut scheduler = Scheduler::default();
        let handle = scheduler.schedule(DeferredAction::AutoSubmit, 0.25);
        let due = scheduler.advance(0.5);

        handle.cancel();

        assert_eq!(due.len(), 1);
        assert!(due[0].is_cancelled());
    }

    #[test]
    fn cancel_all_cancels_outstanding_handles() {
        let mut scheduler = Scheduler::default();
        let first = scheduler.schedule(DeferredAction::NextCycle, 2.0);
        let second = scheduler.schedule(DeferredAction::UnlockHatch, 2.0);

        scheduler.cancel_all();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.advance(5.0).is_empty());
    }

    #[test]
    fn non_finite_delays_are_due_on_next_advance() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(DeferredAction::ClearAfterFeedback, f32::NAN);
        scheduler.schedule(DeferredAction::ClearAfterFeedback, -3.0);

        assert_eq!(scheduler.advance(0.0).len(), 2);
    }
}
