//! Единица работы и ее порядок в очереди.

use super::{
    errors::PoolError,
    handle::TaskHandle,
    model::{Outcome, Priority},
};
use std::{
    cmp::Ordering,
    fmt,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};
use tokio::sync::oneshot;

pub(crate) type Job = Box<dyn FnOnce() -> Outcome + Send + 'static>;

/// Одноразовая задача: замыкание вместе с каналом результата.
/// Принадлежит очереди, пока ровно один воркер ее не заберет.
pub(crate) struct Task {
    priority: Priority,
    created_at: Instant,
    sequence: u64,
    job: Job,
}

impl Task {
    pub(crate) fn new(priority: Priority, sequence: u64, job: Job) -> Self {
        Self {
            priority,
            created_at: Instant::now(),
            sequence,
            job,
        }
    }

    /// Оборачивает `f`: значение или паника уходят в возвращаемый handle.
    /// Если задачу дропнули без запуска, handle резолвится в `PoolStopped`.
    pub(crate) fn bind<F, T>(priority: Priority, sequence: u64, f: F) -> (Task, TaskHandle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                let _ = tx.send(Ok(value));
                Outcome::Completed
            }
            Err(payload) => {
                let _ = tx.send(Err(PoolError::from_panic(payload)));
                Outcome::Panicked
            }
        });
        (Task::new(priority, sequence, job), TaskHandle::new(rx))
    }

    #[inline]
    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    /// Поглощает задачу, поэтому она выполняется не больше одного раза.
    #[inline]
    pub(crate) fn run(self) -> Outcome {
        (self.job)()
    }
}

// Порядок max-heap: выше приоритет, затем раньше создана, затем
// меньший sequence при совпадении времени.
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::sync::{Arc, Mutex};

    fn recording(priority: i32, sequence: u64, log: &Arc<Mutex<Vec<(i32, u64)>>>) -> Task {
        let log = log.clone();
        Task::new(
            Priority::new(priority),
            sequence,
            Box::new(move || {
                log.lock().unwrap().push((priority, sequence));
                Outcome::Completed
            }),
        )
    }

    #[test]
    fn heap_yields_priority_desc_then_fcfs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut heap = BinaryHeap::new();
        for (seq, p) in [5, 1, 5, 3].into_iter().enumerate() {
            heap.push(recording(p, seq as u64, &log));
        }
        while let Some(task) = heap.pop() {
            task.run();
        }
        assert_eq!(*log.lock().unwrap(), vec![(5, 0), (5, 2), (3, 3), (1, 1)]);
    }

    #[test]
    fn equal_priority_earlier_task_is_greater() {
        let first = Task::new(Priority::NORMAL, 0, Box::new(|| Outcome::Completed));
        std::thread::sleep(std::time::Duration::from_millis(1));
        let second = Task::new(Priority::NORMAL, 1, Box::new(|| Outcome::Completed));
        assert!(first > second);
        assert!(first.created_at < second.created_at);
    }

    #[test]
    fn sequence_breaks_timestamp_collisions() {
        let mut a = Task::new(Priority::HIGH, 7, Box::new(|| Outcome::Completed));
        let mut b = Task::new(Priority::HIGH, 8, Box::new(|| Outcome::Completed));
        let now = Instant::now();
        a.created_at = now;
        b.created_at = now;
        assert!(a > b);
        assert_ne!(a, b);
    }

    #[test]
    fn bound_task_delivers_value_and_panics() {
        let (task, mut handle) = Task::bind(Priority::NORMAL, 0, || 21 * 2);
        assert_eq!(task.run(), Outcome::Completed);
        assert_eq!(handle.try_result(), Some(Ok(42)));

        let (task, handle) = Task::bind(Priority::NORMAL, 1, || -> u8 { panic!("boom") });
        assert_eq!(task.run(), Outcome::Panicked);
        assert_eq!(handle.wait(), Err(PoolError::TaskPanicked("boom".into())));
    }

    #[test]
    fn dropped_task_resolves_to_stopped() {
        let (task, handle) = Task::bind(Priority::LOW, 0, || ());
        drop(task);
        assert_eq!(handle.wait(), Err(PoolError::PoolStopped));
    }
}
