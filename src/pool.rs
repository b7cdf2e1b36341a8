use super::{
    errors::{PoolError, TaskResult},
    handle::TaskHandle,
    model::{PoolMetrics, Priority, ScaleOutcome, WorkerId, WorkerState},
    queue::{BoundedQueue, Push},
    task::Task,
    worker::{self, Registry, Worker},
};
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Конфигурация пула потоков
///
/// `max_wait` - единственная ручка чувствительности авто-масштабирования:
/// отправитель, прождавший столько на полной очереди, просит еще воркер,
/// а воркер, прождавший столько на пустой очереди, завершается.
#[derive(Debug, Clone)]
pub struct Config {
    pub thread_count: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub max_queue_size: usize,
    pub auto_scale: bool,
    pub max_wait: Duration,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get().max(1);
        Self {
            thread_count: num_cpus,
            min_threads: 1,
            max_threads: num_cpus * 2,
            max_queue_size: 64,
            auto_scale: false,
            max_wait: Duration::from_millis(1000),
            thread_name_prefix: "prio-pool".to_string(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get().max(1);
        Self {
            thread_count: num_cpus,
            max_threads: num_cpus,
            max_queue_size: num_cpus * 10,
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get().max(1);
        Self {
            thread_count: num_cpus,
            max_threads: num_cpus * 2,
            max_queue_size: num_cpus * 20,
            auto_scale: true,
            max_wait: Duration::from_millis(250),
            ..Default::default()
        }
    }

    /// Старт с одного воркера, размер определяет нагрузка.
    pub fn elastic(max_wait: Duration) -> Self {
        Self {
            thread_count: 1,
            auto_scale: true,
            max_wait,
            ..Default::default()
        }
    }

    /// Отклоняет негодные значения и зажимает число воркеров в диапазон.
    pub fn validate(mut self) -> TaskResult<Self> {
        if self.max_queue_size == 0 {
            return Err(PoolError::InvalidConfig("max_queue_size must be positive".into()));
        }
        if self.max_wait.is_zero() {
            return Err(PoolError::InvalidConfig("max_wait must be positive".into()));
        }
        self.min_threads = self.min_threads.max(1);
        if self.min_threads > self.max_threads {
            return Err(PoolError::InvalidConfig(format!(
                "min_threads ({}) exceeds max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        self.thread_count = self.thread_count.clamp(self.min_threads, self.max_threads);
        Ok(self)
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) active: AtomicUsize,
    pub(crate) submitted: AtomicUsize,
    pub(crate) completed: AtomicUsize,
    pub(crate) panicked: AtomicUsize,
    pub(crate) discarded: AtomicUsize,
    pub(crate) rejected: AtomicUsize,
    pub(crate) expansions: AtomicUsize,
    pub(crate) reductions: AtomicUsize,
}

/// Состояние, общее для пула и всех воркеров.
pub(crate) struct Shared {
    pub(crate) queue: BoundedQueue,
    pub(crate) counters: Counters,
    registry: Mutex<Registry>,
    max_wait: AtomicCell<Duration>,
    auto_scale: AtomicBool,
    min_threads: usize,
    max_threads: usize,
    thread_name_prefix: String,
    next_worker: AtomicU64,
    next_sequence: AtomicU64,
    shutdown_lock: Mutex<()>,
}

impl Shared {
    #[inline]
    pub(crate) fn max_wait(&self) -> Duration {
        self.max_wait.load()
    }

    #[inline]
    pub(crate) fn auto_scale_enabled(&self) -> bool {
        self.auto_scale.load(Ordering::Relaxed)
    }

    pub(crate) fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// Добавляет воркер, если пул еще не уперся в `max_threads`.
    pub(crate) fn expand(self: &Arc<Self>) -> TaskResult<ScaleOutcome> {
        let mut registry = self.registry.lock();
        if self.queue.is_stopped() {
            return Ok(ScaleOutcome::Stopped);
        }
        let workers = registry.len();
        if workers >= self.max_threads {
            tracing::warn!(
                workers,
                max = self.max_threads,
                "worker ceiling reached; submission rate exceeds pool capacity"
            );
            return Ok(ScaleOutcome::AtBound {
                workers,
                bound: self.max_threads,
            });
        }

        let id = WorkerId(self.next_worker.fetch_add(1, Ordering::Relaxed));
        let entry = Worker::spawn(self, id).map_err(|e| {
            tracing::warn!(error = %e, "failed to spawn worker thread");
            PoolError::SpawnFailed(e.to_string())
        })?;
        registry.insert(id, entry);
        self.counters.expansions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(worker = %id, workers = workers + 1, "pool expanded");
        Ok(ScaleOutcome::Spawned(id))
    }

    /// Убирает `id` из registry и отсоединяет его поток. Можно вызывать из
    /// самого удаляемого воркера; ниже `min_threads` не опускается.
    pub(crate) fn reduce(&self, id: WorkerId) -> ScaleOutcome {
        let mut registry = self.registry.lock();
        if self.queue.is_stopped() {
            return ScaleOutcome::Stopped;
        }
        let workers = registry.len();
        if workers <= self.min_threads {
            tracing::trace!(worker = %id, workers, "worker floor reached; not reducing");
            return ScaleOutcome::AtBound {
                workers,
                bound: self.min_threads,
            };
        }
        match registry.remove(id) {
            Some(entry) => {
                drop(entry);
                self.counters.reductions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = %id, workers = workers - 1, "pool reduced");
                ScaleOutcome::Removed(id)
            }
            // Только shutdown забирает записи из-под живого воркера.
            None => ScaleOutcome::Stopped,
        }
    }
}

/// Ограниченный пул OS потоков с приоритетной очередью
///
/// Drop пула делает shutdown: запущенные задачи доработают, задачи в очереди
/// резолвятся в [`PoolError::PoolStopped`], все воркеры join'ятся.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(thread_count: usize, max_queue_size: usize) -> TaskResult<Self> {
        let config = Config {
            thread_count,
            max_queue_size,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> TaskResult<Self> {
        let config = config.validate()?;

        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(config.max_queue_size),
            counters: Counters::default(),
            registry: Mutex::new(Registry::default()),
            max_wait: AtomicCell::new(config.max_wait),
            auto_scale: AtomicBool::new(config.auto_scale),
            min_threads: config.min_threads,
            max_threads: config.max_threads,
            thread_name_prefix: config.thread_name_prefix.clone(),
            next_worker: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            shutdown_lock: Mutex::new(()),
        });
        let pool = WorkerPool { shared };

        // Начальные воркеры идут тем же путем, что и авто-расширение
        for _ in 0..config.thread_count {
            if let Err(e) = pool.shared.expand() {
                pool.shutdown();
                return Err(e);
            }
        }

        tracing::info!(
            workers = config.thread_count,
            max_workers = config.max_threads,
            queue_capacity = config.max_queue_size,
            auto_scale = config.auto_scale,
            max_wait_ms = config.max_wait.as_millis() as u64,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Отправляет `f` с [`Priority::NORMAL`].
    pub fn submit<F, T>(&self, f: F) -> TaskResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_priority(Priority::NORMAL, f)
    }

    /// Блокируется, пока очередь полна. Каждый `max_wait` ожидания просит еще
    /// воркер, если авто-масштабирование включено. Ошибка только после остановки.
    pub fn submit_with_priority<P, F, T>(&self, priority: P, f: F) -> TaskResult<TaskHandle<T>>
    where
        P: Into<Priority>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.queue.is_stopped() {
            return Err(self.reject());
        }
        let (mut task, handle) = Task::bind(priority.into(), self.next_sequence(), f);

        loop {
            match self.shared.queue.push(task, self.shared.max_wait()) {
                Push::Queued => return Ok(self.accepted(handle)),
                Push::Stopped(_) => return Err(self.reject()),
                Push::TimedOut(t) | Push::Full(t) => {
                    task = t;
                    if self.shared.auto_scale_enabled() {
                        // Ошибки spawn логируются в expand; продолжаем ждать
                        let _ = self.shared.expand();
                    }
                }
            }
        }
    }

    pub fn try_submit<F, T>(&self, f: F) -> TaskResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_submit_with_priority(Priority::NORMAL, f)
    }

    /// Кладет задачу без ожидания; полная очередь дает [`PoolError::QueueFull`].
    pub fn try_submit_with_priority<P, F, T>(&self, priority: P, f: F) -> TaskResult<TaskHandle<T>>
    where
        P: Into<Priority>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.queue.is_stopped() {
            return Err(self.reject());
        }
        let (task, handle) = Task::bind(priority.into(), self.next_sequence(), f);
        match self.shared.queue.try_push(task) {
            Push::Queued => Ok(self.accepted(handle)),
            Push::Stopped(_) => Err(self.reject()),
            Push::Full(_) | Push::TimedOut(_) => Err(PoolError::QueueFull),
        }
    }

    #[inline]
    fn next_sequence(&self) -> u64 {
        self.shared.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn accepted<T>(&self, handle: TaskHandle<T>) -> TaskHandle<T> {
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("task queued");
        handle
    }

    fn reject(&self) -> PoolError {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        PoolError::PoolStopped
    }

    /// Добавляет воркер сразу, с учетом `max_threads`.
    pub fn expand(&self) -> TaskResult<ScaleOutcome> {
        self.shared.expand()
    }

    pub fn current_size(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn current_queue_length(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn max_queue_size(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn set_max_queue_size(&self, max_queue_size: usize) -> TaskResult<()> {
        if max_queue_size == 0 {
            return Err(PoolError::InvalidConfig("max_queue_size must be positive".into()));
        }
        self.shared.queue.set_capacity(max_queue_size);
        Ok(())
    }

    pub fn enable_auto_scale(&self) {
        self.shared.auto_scale.store(true, Ordering::Relaxed);
    }

    pub fn disable_auto_scale(&self) {
        self.shared.auto_scale.store(false, Ordering::Relaxed);
    }

    pub fn is_auto_scaling(&self) -> bool {
        self.shared.auto_scale_enabled()
    }

    pub fn max_wait(&self) -> Duration {
        self.shared.max_wait()
    }

    /// Действует со следующего цикла ожидания каждого отправителя и воркера.
    pub fn set_max_wait(&self, max_wait: Duration) -> TaskResult<()> {
        if max_wait.is_zero() {
            return Err(PoolError::InvalidConfig("max_wait must be positive".into()));
        }
        self.shared.max_wait.store(max_wait);
        Ok(())
    }

    pub fn set_max_wait_ms(&self, millis: u64) -> TaskResult<()> {
        self.set_max_wait(Duration::from_millis(millis))
    }

    pub fn worker_states(&self) -> Vec<(WorkerId, WorkerState)> {
        self.shared.registry.lock().states()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queue.is_stopped()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (workers, idle_workers) = {
            let registry = self.shared.registry.lock();
            (registry.len(), registry.idle())
        };
        let c = &self.shared.counters;
        PoolMetrics {
            workers,
            idle_workers,
            active_tasks: c.active.load(Ordering::Relaxed),
            queued_tasks: self.shared.queue.len(),
            queue_capacity: self.shared.queue.capacity(),
            total_submitted: c.submitted.load(Ordering::Relaxed),
            completed_tasks: c.completed.load(Ordering::Relaxed),
            panicked_tasks: c.panicked.load(Ordering::Relaxed),
            discarded_tasks: c.discarded.load(Ordering::Relaxed),
            rejected_submissions: c.rejected.load(Ordering::Relaxed),
            expansions: c.expansions.load(Ordering::Relaxed),
            reductions: c.reductions.load(Ordering::Relaxed),
        }
    }

    /// Останавливает пул и блокируется, пока все воркеры не завершатся.
    ///
    /// Запущенные задачи доработают; задачи в очереди дропаются, их handles
    /// резолвятся в `PoolStopped`. Повторный вызов ждет завершения первого.
    pub fn shutdown(&self) {
        // Поздние вызовы ждут здесь, пока первый не join'ит всех воркеров.
        // Задача, останавливающая свой же пул, не может ждать свой воркер: только try_lock.
        let _guard = if worker::runs_on_worker_of(&self.shared) {
            self.shared.shutdown_lock.try_lock()
        } else {
            Some(self.shared.shutdown_lock.lock())
        };

        let first = self.shared.queue.close();

        let discarded = self.shared.queue.drain();
        if !discarded.is_empty() {
            self.shared
                .counters
                .discarded
                .fetch_add(discarded.len(), Ordering::Relaxed);
            tracing::debug!(discarded = discarded.len(), "dropping queued tasks at shutdown");
        }
        drop(discarded);

        // Join вне lock registry: завершающиеся воркеры могут быть внутри reduce()
        let workers = self.shared.registry.lock().drain();
        for (id, entry) in workers {
            if entry.join().is_err() {
                tracing::warn!(worker = %id, "worker thread panicked outside a task");
            }
        }

        if first {
            tracing::info!("worker pool stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_clamps_and_rejects() {
        let cfg = Config {
            thread_count: 0,
            min_threads: 0,
            max_threads: 4,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.min_threads, 1);
        assert_eq!(cfg.thread_count, 1);

        let cfg = Config {
            thread_count: 100,
            max_threads: 3,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.thread_count, 3);

        let bad_queue = Config {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(matches!(bad_queue.validate(), Err(PoolError::InvalidConfig(_))));

        let bad_wait = Config {
            max_wait: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(bad_wait.validate(), Err(PoolError::InvalidConfig(_))));

        let bad_bounds = Config {
            min_threads: 5,
            max_threads: 2,
            ..Default::default()
        };
        assert!(matches!(bad_bounds.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn default_config_scales_with_cpus() {
        let cfg = Config::default();
        let cpus = num_cpus::get().max(1);
        assert_eq!(cfg.thread_count, cpus);
        assert_eq!(cfg.max_threads, cpus * 2);
        assert!(!cfg.auto_scale);
        assert!(Config::io_bound().auto_scale);
        assert_eq!(Config::elastic(Duration::from_millis(5)).thread_count, 1);
    }

    #[test]
    fn reduce_respects_floor_and_expand_respects_ceiling() {
        let pool = WorkerPool::with_config(Config {
            thread_count: 1,
            min_threads: 1,
            max_threads: 2,
            ..Default::default()
        })
        .unwrap();

        let only = pool.worker_states()[0].0;
        assert_eq!(
            pool.shared.reduce(only),
            ScaleOutcome::AtBound { workers: 1, bound: 1 }
        );
        assert!(matches!(pool.expand(), Ok(ScaleOutcome::Spawned(_))));
        assert_eq!(
            pool.expand().unwrap(),
            ScaleOutcome::AtBound { workers: 2, bound: 2 }
        );
        assert_eq!(pool.current_size(), 2);

        pool.shutdown();
        assert_eq!(pool.current_size(), 0);
        assert_eq!(pool.expand().unwrap(), ScaleOutcome::Stopped);
    }

    #[test]
    fn runtime_knobs() {
        let pool = WorkerPool::new(1, 4).unwrap();
        assert_eq!(pool.max_queue_size(), 4);
        pool.set_max_queue_size(9).unwrap();
        assert_eq!(pool.max_queue_size(), 9);
        assert!(pool.set_max_queue_size(0).is_err());

        pool.set_max_wait_ms(15).unwrap();
        assert_eq!(pool.max_wait(), Duration::from_millis(15));
        assert!(pool.set_max_wait(Duration::ZERO).is_err());

        assert!(!pool.is_auto_scaling());
        pool.enable_auto_scale();
        assert!(pool.is_auto_scaling());
        pool.disable_auto_scale();
        assert!(!pool.is_auto_scaling());
    }
}
