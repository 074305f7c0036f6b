#![allow(clippy::unwrap_used)]

mod common;

use common::{settle, MockTransportFactory};
use omniston_sdk::core::errors::TransportError;
use omniston_sdk::core::kernel::{ReconnectPolicy, ReconnectingTransport, Transport};
use omniston_sdk::core::timer::{FakeTimer, Timer};
use omniston_sdk::ConnectionStatusEvent;
use std::sync::Arc;
use std::time::Duration;

fn setup(
    factory: &Arc<MockTransportFactory>,
    max_retries: u32,
) -> (ReconnectingTransport, Arc<FakeTimer>) {
    let timer = Arc::new(FakeTimer::new());
    let policy = ReconnectPolicy {
        max_retries,
        reconnect_delay: Duration::from_millis(500),
    };
    let transport =
        ReconnectingTransport::new(factory.as_factory(), timer.clone() as Arc<dyn Timer>, policy);
    (transport, timer)
}

async fn advance(timer: &FakeTimer, ms: u64) {
    timer.advance(Duration::from_millis(ms));
    settle().await;
}

fn spawn_send(
    transport: &ReconnectingTransport,
    message: &str,
) -> tokio::task::JoinHandle<Result<(), TransportError>> {
    let transport = transport.clone();
    let message = message.to_string();
    tokio::spawn(async move { transport.send(message).await })
}

fn drain_errors(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ConnectionStatusEvent>,
) -> Vec<Option<bool>> {
    let mut flags = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ConnectionStatusEvent::Error {
            is_reconnecting, ..
        } = event
        {
            flags.push(is_reconnecting);
        }
    }
    flags
}

#[cfg(test)]
mod backoff_tests {
    use super::*;

    #[tokio::test]
    async fn test_retries_with_exponential_backoff_then_gives_up() {
        let factory = MockTransportFactory::failing();
        let (transport, timer) = setup(&factory, 3);

        transport.connect().await.unwrap();
        settle().await;
        assert_eq!(factory.total_connect_calls(), 1);
        assert!(transport.is_reconnecting());

        advance(&timer, 499).await;
        assert_eq!(factory.total_connect_calls(), 1);

        advance(&timer, 1).await;
        assert_eq!(factory.total_connect_calls(), 2);

        advance(&timer, 1000).await;
        assert_eq!(factory.total_connect_calls(), 3);

        advance(&timer, 2000).await;
        assert_eq!(factory.total_connect_calls(), 4);
        assert!(!transport.is_reconnecting());

        let err = transport.send("hello".to_string()).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Unable to reconnect after 3 attempts"));

        advance(&timer, 60_000).await;
        assert_eq!(factory.total_connect_calls(), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_fails_immediately() {
        let factory = MockTransportFactory::failing();
        let (transport, _timer) = setup(&factory, 0);

        transport.connect().await.unwrap();
        settle().await;

        let err = transport.send("hello".to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ReconnectFailed { attempts: 0, .. }
        ));
        assert_eq!(factory.total_connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_error_flags_report_reconnection_state() {
        let factory = MockTransportFactory::failing();
        let (transport, timer) = setup(&factory, 1);
        let mut events = transport.connection_status_events();

        transport.connect().await.unwrap();
        settle().await;
        assert_eq!(drain_errors(&mut events), vec![Some(true)]);

        advance(&timer, 500).await;
        let flags = drain_errors(&mut events);
        assert_eq!(flags.last(), Some(&Some(false)));
        assert!(!transport.is_reconnecting());
    }
}

#[cfg(test)]
mod send_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let factory = MockTransportFactory::new();
        let (transport, _timer) = setup(&factory, 3);

        let err = transport.send("hello".to_string()).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }

    #[tokio::test]
    async fn test_send_waits_for_reconnection() {
        let factory = MockTransportFactory::new();
        let (transport, timer) = setup(&factory, 3);

        transport.connect().await.unwrap();
        settle().await;
        factory
            .latest()
            .emit(ConnectionStatusEvent::error("Connection reset"));
        settle().await;
        assert!(transport.is_reconnecting());

        let send = spawn_send(&transport, "hello");
        settle().await;
        assert!(!send.is_finished());

        advance(&timer, 500).await;
        send.await.unwrap().unwrap();

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].sent().is_empty());
        assert_eq!(created[1].sent(), vec!["hello".to_string()]);
        assert!(!transport.is_reconnecting());
    }

    #[tokio::test]
    async fn test_manual_connect_cancels_waiting_sends() {
        let factory = MockTransportFactory::failing();
        let (transport, _timer) = setup(&factory, 3);

        transport.connect().await.unwrap();
        settle().await;
        let waiting = spawn_send(&transport, "queued");
        settle().await;

        factory.set_failing(false);
        transport.connect().await.unwrap();

        assert_eq!(
            waiting.await.unwrap().unwrap_err(),
            TransportError::CancelledByClient
        );

        transport.send("next".to_string()).await.unwrap();
        assert_eq!(factory.latest().sent(), vec!["next".to_string()]);
    }

    #[tokio::test]
    async fn test_close_cancels_reconnection() {
        let factory = MockTransportFactory::failing();
        let (transport, timer) = setup(&factory, 3);

        transport.connect().await.unwrap();
        settle().await;
        let waiting = spawn_send(&transport, "queued");
        settle().await;

        transport.close();
        assert_eq!(
            waiting.await.unwrap().unwrap_err(),
            TransportError::CancelledByClient
        );
        assert_eq!(
            transport.send("late".to_string()).await.unwrap_err(),
            TransportError::Closed
        );

        advance(&timer, 10_000).await;
        assert_eq!(factory.total_connect_calls(), 1);
    }
}

#[cfg(test)]
mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_events_from_replaced_transport_are_dropped() {
        let factory = MockTransportFactory::new();
        let (transport, _timer) = setup(&factory, 3);
        let mut messages = transport.messages();

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        settle().await;

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].close_calls(), 1);

        created[0].push_message("stale");
        created[1].push_message("fresh");
        created[0].emit(ConnectionStatusEvent::error("old socket died"));
        settle().await;

        assert_eq!(messages.try_recv().unwrap(), "fresh");
        assert!(messages.try_recv().is_err());
        assert!(!transport.is_reconnecting());
    }

    #[tokio::test]
    async fn test_close_ends_message_stream() {
        let factory = MockTransportFactory::new();
        let (transport, _timer) = setup(&factory, 3);
        let mut messages = transport.messages();

        transport.connect().await.unwrap();
        transport.close();

        assert!(messages.recv().await.is_none());
        assert_eq!(factory.latest().close_calls(), 1);
    }
}
