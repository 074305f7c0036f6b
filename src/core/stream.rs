use futures_util::Stream;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::errors::OmnistonError;
use super::lock;

/// Fan-out of values to any number of unbounded subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn publish(&self, value: T) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(value.clone()).is_ok());
    }

    /// Completes every current subscriber's stream.
    pub fn close(&self) {
        lock(&self.subscribers).clear();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }
}

type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// A push stream of results that the consumer can cancel.
///
/// The stream yields values until the producer finishes, or until the first
/// `Err`, after which it always returns `None`. Calling
/// [`EventStream::unsubscribe`] or dropping the stream runs the producer's
/// teardown once and closes the channel, which the producer observes through
/// [`mpsc::UnboundedSender::closed`].
pub struct EventStream<T, E = OmnistonError> {
    receiver: mpsc::UnboundedReceiver<Result<T, E>>,
    teardown: Option<Teardown>,
    terminated: bool,
}

impl<T, E> EventStream<T, E> {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Result<T, E>>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            teardown: Some(Box::new(teardown)),
            terminated: false,
        }
    }

    /// A stream whose producer only needs to see the channel close.
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<Result<T, E>>) -> Self {
        Self {
            receiver,
            teardown: None,
            terminated: false,
        }
    }

    pub fn channel() -> (mpsc::UnboundedSender<Result<T, E>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::from_receiver(rx))
    }

    /// Stop receiving values. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.terminated = true;
        self.receiver.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T, E> Stream for EventStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Err(error))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T, E> Drop for EventStream<T, E> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T, E> std::fmt::Debug for EventStream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
