//! Ограниченный пул потоков с приоритетной очередью и авто-масштабированием
//!
//! # Features
//! - Одна общая max-heap очередь: выше приоритет раньше, FCFS среди равных
//! - Backpressure: submit блокируется, пока очередь заполнена
//! - Авто-масштабирование по одному таймауту `max_wait`: заблокированные
//!   отправители расширяют пул, простаивающие воркеры завершаются сами
//! - Паники ловятся на уровне задачи и приходят через handle
//! - Graceful shutdown: запущенные задачи доработают, очередь резолвится в `PoolStopped`

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
mod queue;
mod task;
mod worker;

pub use errors::{PoolError, TaskResult};
pub use handle::TaskHandle;
pub use model::{PoolMetrics, Priority, ScaleOutcome, WorkerId, WorkerState};
pub use pool::{Config, WorkerPool};
