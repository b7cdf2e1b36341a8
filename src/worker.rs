use super::{
    model::{Outcome, ScaleOutcome, WorkerId, WorkerState},
    pool::Shared,
    queue::Pop,
    task::Task,
};
use crossbeam::atomic::AtomicCell;
use std::{
    cell::Cell,
    collections::BTreeMap,
    io,
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
};

thread_local! {
    // Адрес `Shared`, чей worker loop крутится в этом потоке; 0 в остальных потоках.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Вызывающий поток - воркер этого `shared`?
pub(crate) fn runs_on_worker_of(shared: &Shared) -> bool {
    CURRENT_POOL.with(|current| current.get() == shared as *const Shared as usize)
}

/// Запись registry для живого воркера. Drop отсоединяет OS поток.
pub(crate) struct WorkerEntry {
    state: Arc<AtomicCell<WorkerState>>,
    thread: JoinHandle<()>,
}

impl WorkerEntry {
    pub(crate) fn state(&self) -> WorkerState {
        self.state.load()
    }

    pub(crate) fn join(self) -> thread::Result<()> {
        if self.thread.thread().id() == thread::current().id() {
            // Последним владельцем пула была задача на этом же воркере.
            return Ok(());
        }
        self.thread.join()
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
}

impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn insert(&mut self, id: WorkerId, entry: WorkerEntry) {
        self.workers.insert(id, entry);
    }

    pub(crate) fn remove(&mut self, id: WorkerId) -> Option<WorkerEntry> {
        self.workers.remove(&id)
    }

    pub(crate) fn drain(&mut self) -> Vec<(WorkerId, WorkerEntry)> {
        std::mem::take(&mut self.workers).into_iter().collect()
    }

    pub(crate) fn states(&self) -> Vec<(WorkerId, WorkerState)> {
        self.workers
            .iter()
            .map(|(id, entry)| (*id, entry.state()))
            .collect()
    }

    pub(crate) fn idle(&self) -> usize {
        self.workers
            .values()
            .filter(|e| matches!(e.state(), WorkerState::Running | WorkerState::WaitingForTask))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum ExitReason {
    Stopped,
    Idle,
}

pub(crate) struct Worker {
    id: WorkerId,
    state: Arc<AtomicCell<WorkerState>>,
    shared: Arc<Shared>,
}

impl Worker {
    /// Запускает именованный OS поток с worker loop.
    pub(crate) fn spawn(shared: &Arc<Shared>, id: WorkerId) -> io::Result<WorkerEntry> {
        let state = Arc::new(AtomicCell::new(WorkerState::Running));
        let worker = Worker {
            id,
            state: state.clone(),
            shared: shared.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("{}-{}", shared.thread_name_prefix(), id.as_u64()))
            .spawn(move || worker.run())?;
        Ok(WorkerEntry { state, thread })
    }

    fn run(self) {
        CURRENT_POOL.with(|current| current.set(Arc::as_ptr(&self.shared) as usize));
        tracing::debug!(worker = %self.id, "worker started");

        let reason = loop {
            self.state.store(WorkerState::WaitingForTask);
            match self.shared.queue.pop(self.shared.max_wait()) {
                Pop::Task(task) => self.execute(task),
                Pop::Stopped => break ExitReason::Stopped,
                Pop::TimedOut => {
                    if !self.shared.auto_scale_enabled() {
                        continue;
                    }
                    if let ScaleOutcome::Removed(_) = self.shared.reduce(self.id) {
                        break ExitReason::Idle;
                    }
                }
            }
        };

        self.state.store(WorkerState::Exited);
        tracing::debug!(worker = %self.id, reason = ?reason, "worker exited");
    }

    fn execute(&self, task: Task) {
        self.state.store(WorkerState::Executing);
        let counters = &self.shared.counters;
        counters.active.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(worker = %self.id, priority = %task.priority(), "executing task");

        match task.run() {
            Outcome::Completed => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Panicked => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker = %self.id, "task panicked; worker keeps serving");
            }
        }

        counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}
