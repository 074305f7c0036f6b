use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::types::{QuoteEvent, QuoteEventKind, QuoteResponseEvent};
use crate::core::errors::ProtocolError;
use crate::core::scheduler::Scheduler;
use crate::core::timer::Timer;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    AwaitingAck,
    Active { rfq_id: String },
    Done { rfq_id: String },
}

/// Turns raw quote-stream events into [`QuoteResponseEvent`]s.
///
/// The first event must be an ack, anything else (keep-alives included) is a
/// protocol error. The ack fixes the RFQ id stamped on everything that
/// follows; later keep-alives are dropped. After `unsubscribed` the controller
/// ignores further input and cancels its timers.
///
/// With local expiry enabled, every quote carrying a trade start deadline
/// schedules a check; when the deadline passes and that quote is still the
/// current one, [`QuoteResponseController::handle_expiry`] yields `NoQuote`.
/// The quote id to check is delivered on the receiver returned by
/// [`QuoteResponseController::take_expirations`].
pub struct QuoteResponseController {
    state: State,
    scheduler: Scheduler,
    expire_locally: bool,
    last_quote_id: Option<String>,
    expiry_tx: mpsc::UnboundedSender<String>,
    expiry_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl QuoteResponseController {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        Self {
            state: State::AwaitingAck,
            scheduler: Scheduler::new(timer),
            expire_locally: false,
            last_quote_id: None,
            expiry_tx,
            expiry_rx: Some(expiry_rx),
        }
    }

    #[must_use]
    pub fn with_local_expiry(mut self, enabled: bool) -> Self {
        self.expire_locally = enabled;
        self
    }

    pub fn take_expirations(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.expiry_rx.take()
    }

    pub fn rfq_id(&self) -> Option<&str> {
        match &self.state {
            State::AwaitingAck => None,
            State::Active { rfq_id } | State::Done { rfq_id } => Some(rfq_id),
        }
    }

    /// Whether the server already ended the subscription.
    pub fn is_server_unsubscribed(&self) -> bool {
        matches!(self.state, State::Done { .. })
    }

    pub fn handle_event(
        &mut self,
        event: QuoteEvent,
    ) -> Result<Option<QuoteResponseEvent>, ProtocolError> {
        let rfq_id = match &self.state {
            State::AwaitingAck => return self.handle_first_event(event),
            State::Done { .. } => {
                debug!(event = event.event.name(), "Ignoring event after unsubscribe");
                return Ok(None);
            }
            State::Active { rfq_id } => rfq_id.clone(),
        };

        match event.event {
            QuoteEventKind::Ack(_) => Err(ProtocolError::DuplicateAck { rfq_id }),
            QuoteEventKind::KeepAlive(_) => Ok(None),
            QuoteEventKind::QuoteUpdated(quote) => {
                self.last_quote_id = Some(quote.quote_id.clone());
                if self.expire_locally && quote.trade_start_deadline > 0 {
                    self.schedule_expiry(&quote.quote_id, quote.trade_start_deadline);
                }
                Ok(Some(QuoteResponseEvent::QuoteUpdated { quote, rfq_id }))
            }
            QuoteEventKind::NoQuote(_) => {
                self.last_quote_id = None;
                Ok(Some(QuoteResponseEvent::NoQuote { rfq_id }))
            }
            QuoteEventKind::Unsubscribed(_) => {
                self.scheduler.cancel_all();
                self.last_quote_id = None;
                self.state = State::Done {
                    rfq_id: rfq_id.clone(),
                };
                Ok(Some(QuoteResponseEvent::Unsubscribed { rfq_id }))
            }
        }
    }

    fn handle_first_event(
        &mut self,
        event: QuoteEvent,
    ) -> Result<Option<QuoteResponseEvent>, ProtocolError> {
        match event.event {
            QuoteEventKind::Ack(ack) => {
                debug!(rfq_id = %ack.rfq_id, "RFQ acknowledged");
                self.state = State::Active {
                    rfq_id: ack.rfq_id.clone(),
                };
                Ok(Some(QuoteResponseEvent::Ack { rfq_id: ack.rfq_id }))
            }
            other => Err(ProtocolError::EventBeforeAck {
                event: other.name(),
            }),
        }
    }

    /// Expire `quote_id` if it is still the current quote.
    pub fn handle_expiry(&mut self, quote_id: &str) -> Option<QuoteResponseEvent> {
        let State::Active { rfq_id } = &self.state else {
            return None;
        };
        if self.last_quote_id.as_deref() != Some(quote_id) {
            return None;
        }

        debug!(%quote_id, "Quote expired locally");
        self.last_quote_id = None;
        Some(QuoteResponseEvent::NoQuote {
            rfq_id: rfq_id.clone(),
        })
    }

    fn schedule_expiry(&self, quote_id: &str, deadline_secs: u64) {
        let deadline_ms = deadline_secs.saturating_mul(1000);
        let delay = Duration::from_millis(deadline_ms.saturating_sub(self.scheduler.now_ms()));
        let tx = self.expiry_tx.clone();
        let quote_id = quote_id.to_string();
        self.scheduler.schedule(
            Box::new(move || {
                let _ = tx.send(quote_id);
            }),
            delay,
        );
    }
}
