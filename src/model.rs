use std::fmt;

/// Приоритет задачи; больший выполняется раньше.
///
/// `i32::MIN` зарезервирован как маркер "нет задачи" и никогда не создается:
/// любой конструктор превращает его в [`Priority::LOWEST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(i32);

impl Priority {
    pub const LOWEST: Priority = Priority(i32::MIN + 1);
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);
    pub const HIGHEST: Priority = Priority(i32::MAX);

    #[inline]
    pub const fn new(value: i32) -> Self {
        if value == i32::MIN {
            Self::LOWEST
        } else {
            Priority(value)
        }
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority::new(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Идентификатор воркера внутри пула. Не переиспользуется.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub(crate) u64);

impl WorkerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Жизненный цикл потока воркера.
///
/// `Running -> WaitingForTask -> Executing -> WaitingForTask ...`, и
/// `WaitingForTask -> Exited` при самоудалении по простою или shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    WaitingForTask,
    Executing,
    Exited,
}

/// Результат запроса на resize. Упор в границу - не ошибка, а отдельный вариант.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    Spawned(WorkerId),
    Removed(WorkerId),
    /// `workers` уже на границе `bound` (потолок для expand, пол для reduce).
    AtBound { workers: usize, bound: usize },
    /// Пул останавливается; registry больше не меняется.
    Stopped,
}

impl ScaleOutcome {
    pub fn is_at_bound(&self) -> bool {
        matches!(self, ScaleOutcome::AtBound { .. })
    }
}

/// Чем закончилась задача с точки зрения воркера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Panicked,
}

#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub workers: usize,
    pub idle_workers: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub queue_capacity: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub panicked_tasks: usize,
    pub discarded_tasks: usize,
    pub rejected_submissions: usize,
    pub expansions: usize,
    pub reductions: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.active_tasks + self.idle_workers == 0 {
            return 0.0;
        }
        self.active_tasks as f64 / (self.active_tasks + self.idle_workers) as f64
    }

    pub fn queue_pressure(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queued_tasks as f64 / self.queue_capacity as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.panicked_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
