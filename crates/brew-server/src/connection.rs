//! WebSocket plumbing for one drinker: a reader feeding the agent and a
//! writer draining the mailbox, with ping keep-alive and read/write deadlines.

use std::fmt;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use brew_settings::ConnectionSettings;
use brew_telemetry::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

use crate::drinker::{DrinkerAgent, MailboxReceiver};

#[derive(Clone, Copy, Debug)]
pub struct ConnectionLimits {
    /// Larger inbound messages drop the connection.
    pub max_message_size: usize,
    /// Read inactivity deadline, refreshed by every inbound frame.
    pub pong_wait: Duration,
    /// Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub mailbox_capacity: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

impl From<&ConnectionSettings> for ConnectionLimits {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            max_message_size: settings.max_message_size,
            pong_wait: settings.pong_wait(),
            ping_period: settings.ping_period(),
            write_wait: settings.write_wait(),
            mailbox_capacity: settings.mailbox_capacity,
        }
    }
}

/// Drive one drinker's socket until either side gives up, then deregister.
///
/// The writer ends when the mailbox is closed and drained, or on a failed
/// write; its exit stops the reader. The reader ends on a read error, the
/// read deadline, a close frame, a closed kettle or server shutdown; its exit
/// closes the mailbox, which lets the writer flush and send a close frame.
#[instrument(skip_all, fields(kettle_id = %agent.kettle().id(), drinker_id = %agent.drinker().id()))]
pub async fn serve_drinker(
    socket: WebSocket,
    agent: DrinkerAgent,
    mailbox: MailboxReceiver,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
) {
    let started = Instant::now();
    info!(name = agent.drinker().name(), "drinker connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(write_loop(ws_tx, mailbox, limits, writer_done.clone()));

    let reason = tokio::select! {
        reason = read_loop(&mut ws_rx, &agent, &limits, &writer_done) => reason,
        _ = shutdown.cancelled() => "server_shutdown",
    };

    if let Err(e) = agent.leave().await {
        debug!(error = %e, "kettle already gone at teardown");
    }
    agent.drinker().mailbox().close();
    if tokio::time::timeout(limits.write_wait, &mut writer).await.is_err() {
        warn!("writer did not finish in time, aborting");
        writer.abort();
    }

    info!(reason, "drinker disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    agent: &DrinkerAgent,
    limits: &ConnectionLimits,
    writer_done: &CancellationToken,
) -> &'static str {
    loop {
        let next = tokio::select! {
            _ = writer_done.cancelled() => return "writer_closed",
            next = tokio::time::timeout(limits.pong_wait, ws_rx.next()) => next,
        };
        let message = match next {
            Err(_) => {
                info!(timeout = ?limits.pong_wait, "read deadline exceeded");
                return "read_timeout";
            }
            Ok(None) => return "eof",
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read error");
                return "read_error";
            }
            Ok(Some(Ok(message))) => message,
        };

        let outcome = match message {
            Message::Text(text) => agent.handle_frame(text.as_str()).await,
            Message::Binary(data) => agent.handle_bytes(&data).await,
            Message::Ping(_) | Message::Pong(_) => Ok(()),
            Message::Close(_) => return "client_close",
        };
        if let Err(e) = outcome {
            info!(error = %e, kind = e.error_kind(), "kettle gone under connection");
            return "kettle_closed";
        }
    }
}

/// Drains the mailbox into `ws_tx`. Generic over the sink so the teardown
/// path can be driven without a socket.
async fn write_loop<S>(
    mut ws_tx: S,
    mut mailbox: MailboxReceiver,
    limits: ConnectionLimits,
    done: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping = tokio::time::interval(limits.ping_period);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            message = mailbox.recv() => {
                let Some(first) = message else {
                    let _ = write_frame(&mut ws_tx, Message::Close(None), limits.write_wait).await;
                    break;
                };
                let frame = coalesce(first.as_str(), &mut mailbox);
                if !write_frame(&mut ws_tx, Message::Text(frame.into()), limits.write_wait).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if !write_frame(&mut ws_tx, Message::Ping(Vec::new().into()), limits.write_wait).await {
                    break;
                }
            }
        }
    }
    done.cancel();
}

/// Join `first` with everything already queued behind it, newline-separated.
fn coalesce(first: &str, mailbox: &mut MailboxReceiver) -> String {
    let mut frame = String::from(first);
    while let Some(next) = mailbox.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}

async fn write_frame<S>(ws_tx: &mut S, message: Message, deadline: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(deadline, ws_tx.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            false
        }
        Err(_) => {
            warn!(deadline = ?deadline, "write deadline exceeded");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drinker::{mailbox, Drinker};
    use crate::hub::Hub;
    use crate::kettle::KettleConfig;
    use brew_core::KettleId;
    use std::sync::Arc;

    #[test]
    fn limits_follow_settings() {
        let limits = ConnectionLimits::default();
        assert_eq!(limits.max_message_size, 512);
        assert_eq!(limits.pong_wait, Duration::from_secs(60));
        assert_eq!(limits.ping_period, Duration::from_secs(54));
        assert_eq!(limits.write_wait, Duration::from_secs(10));
        assert_eq!(limits.mailbox_capacity, 256);
        assert!(limits.ping_period < limits.pong_wait);
    }

    #[test]
    fn coalesce_joins_queued_messages_in_order() {
        let (tx, mut rx) = mailbox(8);
        tx.try_send(Arc::new("b".into())).unwrap();
        tx.try_send(Arc::new("c".into())).unwrap();
        assert_eq!(coalesce("a", &mut rx), "a\nb\nc");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn coalesce_single_message_is_unchanged() {
        let (_tx, mut rx) = mailbox(8);
        assert_eq!(coalesce(r#"{"status":"ok","msg":""}"#, &mut rx), r#"{"status":"ok","msg":""}"#);
    }

    #[tokio::test]
    async fn forced_removal_flushes_then_closes_the_socket() {
        let hub = Hub::new(KettleConfig::default());
        let id = KettleId::new();
        let (ann, _ann_rx) = Drinker::new("ann", 8);
        let (slow, slow_rx) = Drinker::new("slow", 1);
        let handle = hub.join(&id, "kitchen", ann.clone()).await.unwrap();
        let _ = hub.join(&id, "kitchen", slow.clone()).await.unwrap();
        slow.deliver(Arc::new("queued".into())).unwrap();

        // The completion broadcast cannot fit in slow's mailbox.
        handle.round_completed(ann.id().clone()).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().drinkers, 1);
        assert!(slow.mailbox().is_closed());

        let (wire_tx, mut wire_rx) = futures::channel::mpsc::unbounded::<Message>();
        let done = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(1),
            write_loop(wire_tx, slow_rx, ConnectionLimits::default(), done.clone()),
        )
        .await
        .unwrap();
        assert!(done.is_cancelled());

        match wire_rx.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "queued"),
            other => panic!("expected queued text, got {other:?}"),
        }
        assert!(matches!(wire_rx.next().await, Some(Message::Close(None))));
        assert!(wire_rx.next().await.is_none());
    }
}
