use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

pub const MAX_SCHEDULED_TASKS: usize = 64;

const_assert!(MAX_SCHEDULED_TASKS >= 16);

pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    Once,
    Every(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask<T> {
    pub id: TaskId,
    pub task: T,
    pub deadline_ms: u64,
    pub scheduled_at_ms: u64,
    pub recurrence: Recurrence,
    // Insertion order, breaks deadline ties.
    seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_scheduled: u32,
    pub total_fired: u32,
    pub total_cancelled: u32,
    pub currently_scheduled: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler queue full ({capacity} tasks)")]
    QueueFull { capacity: usize },
    #[error("periodic task needs a non-zero period")]
    ZeroPeriod,
}

/// Deadline-ordered timer queue driven by virtual milliseconds.
///
/// Nothing fires on its own: the owner asks for the next due task with
/// [`TaskScheduler::pop_due`] after moving its clock forward. Periodic tasks
/// are re-armed at `deadline + period` when popped, so a long jump in time
/// yields one firing per elapsed period.
#[derive(Debug)]
pub struct TaskScheduler<T> {
    tasks: Vec<ScheduledTask<T>, MAX_SCHEDULED_TASKS>,
    stats: SchedulerStats,
    next_id: TaskId,
    next_seq: u64,
}

impl<T: Clone> TaskScheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            stats: SchedulerStats::default(),
            next_id: 1,
            next_seq: 0,
        }
    }

    /// Schedule `task` to fire once, `delay_ms` after `now_ms`.
    pub fn schedule_once(&mut self, task: T, delay_ms: u64, now_ms: u64) -> Result<TaskId, SchedulerError> {
        self.insert(task, now_ms.saturating_add(delay_ms), now_ms, Recurrence::Once)
    }

    /// Schedule `task` every `period_ms`, first firing one period after `now_ms`.
    pub fn schedule_periodic(&mut self, task: T, period_ms: u64, now_ms: u64) -> Result<TaskId, SchedulerError> {
        if period_ms == 0 {
            return Err(SchedulerError::ZeroPeriod);
        }
        self.insert(task, now_ms.saturating_add(period_ms), now_ms, Recurrence::Every(period_ms))
    }

    fn insert(
        &mut self,
        task: T,
        deadline_ms: u64,
        now_ms: u64,
        recurrence: Recurrence,
    ) -> Result<TaskId, SchedulerError> {
        if self.tasks.is_full() {
            return Err(SchedulerError::QueueFull { capacity: MAX_SCHEDULED_TASKS });
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let scheduled = ScheduledTask {
            id,
            task,
            deadline_ms,
            scheduled_at_ms: now_ms,
            recurrence,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        // Capacity was checked above.
        let _ = self.tasks.push(scheduled);
        self.sort();

        self.stats.total_scheduled += 1;
        self.stats.currently_scheduled = self.tasks.len() as u8;

        Ok(id)
    }

    fn sort(&mut self) {
        self.tasks.sort_unstable_by_key(|t| (t.deadline_ms, t.seq));
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<u64> {
        self.tasks.first().map(|t| t.deadline_ms)
    }

    /// Pop the earliest task whose deadline is at or before `now_ms`.
    ///
    /// Returns the task id, the payload and the deadline it fired for.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TaskId, T, u64)> {
        let first = self.tasks.first()?;
        if first.deadline_ms > now_ms {
            return None;
        }

        let mut entry = self.tasks.remove(0);
        let fired_at = entry.deadline_ms;
        let payload = entry.task.clone();

        if let Recurrence::Every(period) = entry.recurrence {
            entry.deadline_ms = fired_at.saturating_add(period);
            entry.seq = self.next_seq;
            self.next_seq += 1;
            // Slot was just freed by the remove above.
            let _ = self.tasks.push(entry.clone());
            self.sort();
        }

        self.stats.total_fired += 1;
        self.stats.currently_scheduled = self.tasks.len() as u8;

        Some((entry.id, payload, fired_at))
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        let removed = before - self.tasks.len();
        self.stats.total_cancelled += removed as u32;
        self.stats.currently_scheduled = self.tasks.len() as u8;
        removed > 0
    }

    /// Cancel every task matching `predicate`. Returns how many were removed.
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.tasks.len();
        self.tasks.retain(|t| !predicate(&t.task));
        let removed = before - self.tasks.len();
        self.stats.total_cancelled += removed as u32;
        self.stats.currently_scheduled = self.tasks.len() as u8;
        removed
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn get_scheduled_tasks(&self) -> &[ScheduledTask<T>] {
        &self.tasks
    }

    pub fn clear_all(&mut self) {
        let cleared = self.tasks.len();
        self.tasks.clear();
        self.stats.total_cancelled += cleared as u32;
        self.stats.currently_scheduled = 0;
    }
}

impl<T: Clone> Default for TaskScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Tick {
        A,
        B,
        C,
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler: TaskScheduler<Tick> = TaskScheduler::new();
        assert_eq!(scheduler.tasks.len(), 0);
        assert_eq!(scheduler.stats.total_scheduled, 0);
        assert!(scheduler.next_deadline().is_none());
    }

    #[test]
    fn test_once_fires_at_deadline() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_once(Tick::A, 5000, 1000).unwrap();

        assert!(scheduler.pop_due(5999).is_none());
        let (_, task, fired_at) = scheduler.pop_due(6000).unwrap();
        assert_eq!(task, Tick::A);
        assert_eq!(fired_at, 6000);
        assert!(scheduler.pop_due(100_000).is_none());
    }

    #[test]
    fn test_deadline_ordering() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_once(Tick::C, 3000, 0).unwrap();
        scheduler.schedule_once(Tick::A, 1000, 0).unwrap();
        scheduler.schedule_once(Tick::B, 2000, 0).unwrap();

        let order: std::vec::Vec<Tick> = std::iter::from_fn(|| scheduler.pop_due(10_000))
            .map(|(_, t, _)| t)
            .collect();
        assert_eq!(order, vec![Tick::A, Tick::B, Tick::C]);
    }

    #[test]
    fn test_ties_keep_scheduling_order() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_once(Tick::B, 1000, 0).unwrap();
        scheduler.schedule_once(Tick::A, 1000, 0).unwrap();

        assert_eq!(scheduler.pop_due(1000).unwrap().1, Tick::B);
        assert_eq!(scheduler.pop_due(1000).unwrap().1, Tick::A);
    }

    #[test]
    fn test_periodic_rearms() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_periodic(Tick::A, 2000, 0).unwrap();

        let mut fired = 0;
        while scheduler.pop_due(10_000).is_some() {
            fired += 1;
        }
        assert_eq!(fired, 5);
        assert_eq!(scheduler.next_deadline(), Some(12_000));
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = TaskScheduler::new();
        let id = scheduler.schedule_once(Tick::A, 1000, 0).unwrap();
        scheduler.schedule_once(Tick::B, 1000, 0).unwrap();

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.pop_due(1000).unwrap().1, Tick::B);
        assert_eq!(scheduler.stats.total_cancelled, 1);
    }

    #[test]
    fn test_cancel_where() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_periodic(Tick::A, 100, 0).unwrap();
        scheduler.schedule_once(Tick::A, 50, 0).unwrap();
        scheduler.schedule_once(Tick::B, 50, 0).unwrap();

        assert_eq!(scheduler.cancel_where(|t| *t == Tick::A), 2);
        assert_eq!(scheduler.get_scheduled_tasks().len(), 1);
    }

    #[test]
    fn test_queue_full() {
        let mut scheduler = TaskScheduler::new();
        for i in 0..MAX_SCHEDULED_TASKS {
            scheduler.schedule_once(Tick::A, i as u64, 0).unwrap();
        }
        assert_eq!(
            scheduler.schedule_once(Tick::B, 1, 0),
            Err(SchedulerError::QueueFull { capacity: MAX_SCHEDULED_TASKS })
        );
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut scheduler = TaskScheduler::new();
        assert_eq!(scheduler.schedule_periodic(Tick::A, 0, 0), Err(SchedulerError::ZeroPeriod));
    }
}
