use std::any::Any;

/// Ошибки пула: синхронно из submit или асинхронно через
/// [`TaskHandle`](crate::handle::TaskHandle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Submit после начала shutdown или задача, выброшенная из очереди при shutdown.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// Задача запаниковала; воркер жив и продолжает работу.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// Неблокирующий submit застал очередь заполненной.
    #[error("task queue is full")]
    QueueFull,

    /// Ожидание handle закончилось раньше задачи.
    #[error("timed out waiting for task result")]
    Timeout,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

impl PoolError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        PoolError::TaskPanicked(message)
    }
}

pub type TaskResult<T> = Result<T, PoolError>;
