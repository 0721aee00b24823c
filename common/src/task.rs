use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, error};

/// A named [`JoinHandle`] which must be joined or aborted.
///
/// Invoice trackers run as [`NamedTask`]s. If the inner task panicked,
/// awaiting the handle re-raises the panic in the awaiter.
#[must_use]
pub struct NamedTask<T> {
    handle: JoinHandle<T>,
    name: &'static str,
}

impl<T: Send + 'static> NamedTask<T> {
    pub fn spawn_named<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        Self { handle, name }
    }

    /// Like [`NamedTask::spawn_named`], but logs from the task carry `span`.
    pub fn spawn_named_with_span<F>(
        name: &'static str,
        span: tracing::Span,
        future: F,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::spawn_named(name, future.instrument(span))
    }
}

impl<T> NamedTask<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn abort(&self) {
        self.handle.abort()
    }
}

impl<T> Future for NamedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let join_err = match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(output)) => return Poll::Ready(Ok(output)),
            Poll::Ready(Err(join_err)) => join_err,
        };

        if join_err.is_panic() {
            error!(task = self.name, "Task panicked");
            std::panic::resume_unwind(join_err.into_panic());
        }
        Poll::Ready(Err(join_err))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn joins_with_output() {
        let task = NamedTask::spawn_named("adder", async { 1 + 2 });
        assert_eq!(task.name(), "adder");
        assert_eq!(task.await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_yields_cancelled() {
        let task = NamedTask::spawn_named(
            "sleeper",
            tokio::time::sleep(Duration::from_secs(3600)),
        );
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn panics_propagate_to_the_awaiter() {
        let task = NamedTask::spawn_named("bomb", async { panic!("boom") });
        let _: Result<(), _> = task.await;
    }
}
