use crate::core::errors::TransportError;
use crate::core::kernel::transport::{Transport, TransportFactory};
use crate::core::lock;
use crate::core::stream::EventBus;
use crate::core::timer::{self, Timer};
use crate::core::types::ConnectionStatusEvent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Backoff settings for [`ReconnectingTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// `reconnect_delay * 2^(attempt - 1)` for a 1-based attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pending,
    Reconnected,
    Failed(TransportError),
}

struct Process {
    id: u64,
    outcome: Arc<watch::Sender<Outcome>>,
    task: Option<JoinHandle<()>>,
}

impl Process {
    fn abort(mut self) {
        if *self.outcome.borrow() == Outcome::Pending {
            self.outcome
                .send_replace(Outcome::Failed(TransportError::CancelledByClient));
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct State {
    active: Option<Arc<dyn Transport>>,
    // events from transports of older generations are dropped
    generation: u64,
    process: Option<Process>,
    next_process_id: u64,
    closed: bool,
}

struct Inner {
    factory: TransportFactory,
    timer: Arc<dyn Timer>,
    policy: ReconnectPolicy,
    state: Mutex<State>,
    messages: EventBus<String>,
    status_events: EventBus<ConnectionStatusEvent>,
}

/// [`Transport`] that survives connection loss.
///
/// Every connection attempt builds a new underlying transport from the
/// factory. An error status from the current transport starts one
/// reconnection process that retries with exponential backoff; sends issued
/// meanwhile wait for its outcome. After `max_retries` failed attempts the
/// process fails for good and every send is rejected with
/// [`TransportError::ReconnectFailed`] until `connect()` is called again.
/// A manual `connect()` or `close()` cancels a running process and its
/// waiting sends fail with [`TransportError::CancelledByClient`].
#[derive(Clone)]
pub struct ReconnectingTransport {
    inner: Arc<Inner>,
}

impl ReconnectingTransport {
    pub fn new(factory: TransportFactory, timer: Arc<dyn Timer>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                timer,
                policy,
                state: Mutex::new(State::default()),
                messages: EventBus::new(),
                status_events: EventBus::new(),
            }),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// True while a reconnection process is retrying.
    pub fn is_reconnecting(&self) -> bool {
        lock(&self.inner.state)
            .process
            .as_ref()
            .is_some_and(|p| *p.outcome.borrow() == Outcome::Pending)
    }
}

impl Inner {
    fn install_transport(self: &Arc<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = (self.factory)();
        let mut messages = transport.messages();
        let mut status_events = transport.connection_status_events();

        let (generation, previous) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.generation += 1;
            (state.generation, state.active.replace(transport.clone()))
        };
        if let Some(previous) = previous {
            previous.close();
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                if inner.generation() == generation {
                    inner.messages.publish(message);
                }
            }
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = status_events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                if inner.generation() == generation {
                    inner.handle_status_event(event);
                }
            }
        });

        Ok(transport)
    }

    fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    fn handle_status_event(self: &Arc<Self>, event: ConnectionStatusEvent) {
        match event {
            ConnectionStatusEvent::Error { error_message, .. } => {
                let reconnecting = self.start_reconnection(&error_message);
                self.status_events.publish(ConnectionStatusEvent::Error {
                    error_message,
                    is_reconnecting: Some(reconnecting),
                });
            }
            other => self.status_events.publish(other),
        }
    }

    /// Start a reconnection process unless one is already known.
    ///
    /// Returns whether a process is retrying after this call.
    fn start_reconnection(self: &Arc<Self>, error_message: &str) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        if let Some(process) = &state.process {
            return *process.outcome.borrow() == Outcome::Pending;
        }
        if self.policy.max_retries == 0 {
            let failure = TransportError::ReconnectFailed {
                attempts: 0,
                last_error: error_message.to_string(),
            };
            let (outcome, _) = watch::channel(Outcome::Failed(failure));
            state.next_process_id += 1;
            state.process = Some(Process {
                id: state.next_process_id,
                outcome: Arc::new(outcome),
                task: None,
            });
            return false;
        }

        state.next_process_id += 1;
        let id = state.next_process_id;
        let (outcome, _) = watch::channel(Outcome::Pending);
        let outcome = Arc::new(outcome);
        let task = tokio::spawn(run_reconnection(
            Arc::downgrade(self),
            id,
            outcome.clone(),
            error_message.to_string(),
        ));
        state.process = Some(Process {
            id,
            outcome,
            task: Some(task),
        });
        true
    }

    fn abort_reconnection(&self) {
        let process = lock(&self.state).process.take();
        if let Some(process) = process {
            debug!("Cancelling reconnection process");
            process.abort();
        }
    }

    fn finish_process(&self, id: u64) {
        let mut state = lock(&self.state);
        if state.process.as_ref().is_some_and(|p| p.id == id) {
            state.process = None;
        }
    }
}

async fn run_reconnection(
    weak: Weak<Inner>,
    id: u64,
    outcome: Arc<watch::Sender<Outcome>>,
    first_error: String,
) {
    let Some((timer, policy)) = weak.upgrade().map(|i| (i.timer.clone(), i.policy)) else {
        return;
    };

    let mut last_error = first_error;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if attempt > policy.max_retries {
            let failure = TransportError::ReconnectFailed {
                attempts: policy.max_retries,
                last_error,
            };
            error!("{}", failure);
            outcome.send_replace(Outcome::Failed(failure.clone()));
            if let Some(inner) = weak.upgrade() {
                inner.status_events.publish(ConnectionStatusEvent::Error {
                    error_message: failure.to_string(),
                    is_reconnecting: Some(false),
                });
            }
            return;
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            "Connection error: {}. Retries left: {}. Will reconnect after {} ms.",
            last_error,
            policy.max_retries - attempt + 1,
            delay.as_millis()
        );
        timer::sleep(timer.as_ref(), delay).await;

        let Some(inner) = weak.upgrade() else { return };
        let transport = match inner.install_transport() {
            Ok(transport) => transport,
            Err(e) => {
                outcome.send_replace(Outcome::Failed(e));
                return;
            }
        };
        drop(inner);

        match transport.connect().await {
            Ok(()) => {
                info!(attempt, "Reconnected");
                outcome.send_replace(Outcome::Reconnected);
                if let Some(inner) = weak.upgrade() {
                    inner.finish_process(id);
                }
                return;
            }
            Err(e) => {
                debug!(attempt, error = %e, "Reconnection attempt failed");
                last_error = e.to_string();
            }
        }
    }
}

#[async_trait]
impl Transport for ReconnectingTransport {
    /// Connect a fresh underlying transport, cancelling any reconnection in
    /// progress. Connection failures are not returned: they start the
    /// reconnection process instead.
    #[instrument(skip(self))]
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.abort_reconnection();
        let transport = self.inner.install_transport()?;

        if let Err(e) = transport.connect().await {
            debug!(error = %e, "Initial connection failed, reconnecting");
            // the status event for this failure joins the same process
            self.inner.start_reconnection(&e.to_string());
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn send(&self, message: String) -> Result<(), TransportError> {
        let waiting = {
            let state = lock(&self.inner.state);
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.process.as_ref().map(|p| p.outcome.subscribe())
        };

        if let Some(mut outcome) = waiting {
            let settled = outcome
                .wait_for(|o| *o != Outcome::Pending)
                .await
                .map(|o| o.clone())
                .map_err(|_| TransportError::CancelledByClient)?;
            if let Outcome::Failed(e) = settled {
                return Err(e);
            }
        }

        let active = lock(&self.inner.state).active.clone();
        match active {
            Some(transport) => transport.send(message).await,
            None => Err(TransportError::NotConnected),
        }
    }

    fn close(&self) {
        let active = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.active.take()
        };
        self.inner.abort_reconnection();
        if let Some(transport) = active {
            transport.close();
        }
        self.inner.messages.close();
    }

    fn messages(&self) -> mpsc::UnboundedReceiver<String> {
        self.inner.messages.subscribe()
    }

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.inner.status_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = ReconnectPolicy {
            max_retries: 3,
            reconnect_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(200),
            Duration::from_millis(1000).saturating_mul(u32::MAX)
        );
    }
}
