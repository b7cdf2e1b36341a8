use super::errors::{PoolError, TaskResult};
use futures::future::FusedFuture;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{sync::oneshot, time::Duration};

/// Handle на результат отправленной задачи.
///
/// Резолвится ровно один раз: значением задачи, `TaskPanicked` при панике
/// или `PoolStopped`, если pool выбросил задачу из очереди.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Option<oneshot::Receiver<TaskResult<T>>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<TaskResult<T>>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// Блокирует текущий поток до результата задачи.
    ///
    /// Не паникует внутри tokio runtime, но занимает его поток; в async коде лучше `.await`.
    pub fn wait(self) -> TaskResult<T> {
        futures::executor::block_on(self)
    }

    /// Результат, если задача уже завершилась; не блокирует.
    pub fn try_result(&mut self) -> Option<TaskResult<T>> {
        let rx = self.receiver.as_mut()?;
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(PoolError::PoolStopped),
        };
        self.receiver = None;
        Some(result)
    }

    /// Ждет результат не дольше `timeout`. После `Err(Timeout)` handle
    /// остается валидным, его можно ждать повторно.
    pub async fn await_timeout(&mut self, timeout: Duration) -> TaskResult<T> {
        match tokio::time::timeout(timeout, &mut *self).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(rx) = this.receiver.as_mut() else {
            return Poll::Ready(Err(PoolError::PoolStopped));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(res) => {
                this.receiver = None;
                Poll::Ready(res.unwrap_or(Err(PoolError::PoolStopped)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> FusedFuture for TaskHandle<T> {
    fn is_terminated(&self) -> bool {
        self.receiver.is_none()
    }
}
