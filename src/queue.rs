//! Ограниченная приоритетная очередь, общая для отправителей и воркеров.
//!
//! Один mutex защищает heap и capacity; `not_empty` будит воркеров,
//! `not_full` будит заблокированных отправителей. Каждое ожидание ограничено
//! `max_wait`, а таймаут возвращается наружу как сигнал для масштабирования.

use super::task::Task;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::BinaryHeap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

#[derive(Debug)]
pub(crate) enum Push {
    Queued,
    /// Очередь закрыта; задача возвращается нетронутой.
    Stopped(Task),
    /// Все еще полна после `max_wait`.
    TimedOut(Task),
    /// Полна, а ждать не просили.
    Full(Task),
}

#[derive(Debug)]
pub(crate) enum Pop {
    Task(Task),
    Stopped,
    /// Все еще пуста после `max_wait`.
    TimedOut,
}

struct Inner {
    heap: BinaryHeap<Task>,
    capacity: usize,
}

impl Inner {
    #[inline]
    fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }
}

pub(crate) struct BoundedQueue {
    inner: Mutex<Inner>,
    stopped: AtomicBool,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BoundedQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                capacity,
            }),
            stopped: AtomicBool::new(false),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ждет свободное место до `max_wait`, затем кладет задачу.
    pub(crate) fn push(&self, task: Task, max_wait: Duration) -> Push {
        let mut inner = self.inner.lock();
        if inner.is_full() && !self.is_stopped() {
            self.not_full.wait_while_for(
                &mut inner,
                |inner| inner.is_full() && !self.stopped.load(Ordering::Acquire),
                max_wait,
            );
        }
        if self.is_stopped() {
            return Push::Stopped(task);
        }
        if inner.is_full() {
            return Push::TimedOut(task);
        }
        inner.heap.push(task);
        drop(inner);
        self.not_empty.notify_one();
        Push::Queued
    }

    pub(crate) fn try_push(&self, task: Task) -> Push {
        let mut inner = self.inner.lock();
        if self.is_stopped() {
            return Push::Stopped(task);
        }
        if inner.is_full() {
            return Push::Full(task);
        }
        inner.heap.push(task);
        drop(inner);
        self.not_empty.notify_one();
        Push::Queued
    }

    /// Ждет задачу до `max_wait`. После close ничего не выдается,
    /// даже если задачи остались.
    pub(crate) fn pop(&self, max_wait: Duration) -> Pop {
        let mut inner = self.inner.lock();
        if inner.heap.is_empty() && !self.is_stopped() {
            self.not_empty.wait_while_for(
                &mut inner,
                |inner| inner.heap.is_empty() && !self.stopped.load(Ordering::Acquire),
                max_wait,
            );
        }
        if self.is_stopped() {
            return Pop::Stopped;
        }
        match inner.heap.pop() {
            Some(task) => {
                drop(inner);
                self.not_full.notify_one();
                Pop::Task(task)
            }
            None => Pop::TimedOut,
        }
    }

    /// Ставит флаг остановки и будит всех ждущих. `false`, если
    /// очередь уже была закрыта.
    pub(crate) fn close(&self) -> bool {
        let first = {
            let _inner = self.inner.lock();
            !self.stopped.swap(true, Ordering::AcqRel)
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        first
    }

    /// Забирает все оставшиеся задачи в порядке приоритета.
    pub(crate) fn drain(&self) -> Vec<Task> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::with_capacity(inner.heap.len());
        while let Some(task) = inner.heap.pop() {
            drained.push(task);
        }
        drop(inner);
        self.not_full.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// При уменьшении ниже текущей длины новые push ждут, пока backlog
    /// не разойдется; увеличение сразу будит заблокированных отправителей.
    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.inner.lock().capacity = capacity;
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Outcome, Priority};
    use std::{sync::Arc, thread, time::Instant};

    fn task(priority: i32, sequence: u64) -> Task {
        Task::new(Priority::new(priority), sequence, Box::new(|| Outcome::Completed))
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn pops_in_priority_order() {
        let q = BoundedQueue::new(8);
        for (seq, p) in [5, 1, 5, 3].into_iter().enumerate() {
            assert!(matches!(q.push(task(p, seq as u64), SHORT), Push::Queued));
        }
        let mut order = Vec::new();
        while let Pop::Task(t) = q.pop(Duration::from_millis(1)) {
            order.push(t.priority().value());
        }
        assert_eq!(order, vec![5, 5, 3, 1]);
    }

    #[test]
    fn full_queue_times_out_and_returns_task() {
        let q = BoundedQueue::new(2);
        assert!(matches!(q.push(task(0, 0), SHORT), Push::Queued));
        assert!(matches!(q.push(task(0, 1), SHORT), Push::Queued));

        let start = Instant::now();
        match q.push(task(7, 2), SHORT) {
            Push::TimedOut(t) => assert_eq!(t.priority().value(), 7),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= SHORT);
        assert!(matches!(q.try_push(task(0, 3)), Push::Full(_)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn empty_queue_pop_times_out() {
        let q = BoundedQueue::new(2);
        assert!(matches!(q.pop(SHORT), Pop::TimedOut));
    }

    #[test]
    fn pop_frees_slot_for_blocked_pusher() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(matches!(q.push(task(0, 0), SHORT), Push::Queued));

        let pusher = {
            let q = q.clone();
            thread::spawn(move || matches!(q.push(task(0, 1), Duration::from_secs(5)), Push::Queued))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(q.pop(SHORT), Pop::Task(_)));
        assert!(pusher.join().unwrap());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn close_wakes_waiters_and_stops_dequeue() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(matches!(q.push(task(0, 0), SHORT), Push::Queued));

        let pusher = {
            let q = q.clone();
            thread::spawn(move || matches!(q.push(task(0, 1), Duration::from_secs(10)), Push::Stopped(_)))
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        assert!(q.close());
        assert!(!q.close());
        assert!(pusher.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));

        assert!(matches!(q.pop(SHORT), Pop::Stopped));
        assert_eq!(q.drain().len(), 1);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn growing_capacity_unblocks_pusher() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(matches!(q.push(task(0, 0), SHORT), Push::Queued));

        let pusher = {
            let q = q.clone();
            thread::spawn(move || matches!(q.push(task(0, 1), Duration::from_secs(10)), Push::Queued))
        };
        thread::sleep(Duration::from_millis(20));
        q.set_capacity(4);
        assert!(pusher.join().unwrap());
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.len(), 2);
    }
}
