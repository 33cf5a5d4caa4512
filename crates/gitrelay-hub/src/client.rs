//! Subscriber send loop

use axum::extract::ws::Message;
use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::hub::{ClientId, HubHandle, HubSettings, Subscription};

/// Why a client's send loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The hub closed the outbound queue (unregistered or too slow)
    Evicted,
    /// A frame or ping could not be written before the deadline
    WriteFailed,
}

/// One live subscriber, fed by its hub through a bounded queue
pub struct Client {
    id: ClientId,
    hub: HubHandle,
    outbound: mpsc::Receiver<Bytes>,
    ping_period: Duration,
    write_wait: Duration,
}

impl Client {
    pub fn new(subscription: Subscription, settings: &HubSettings) -> Self {
        Self {
            id: subscription.id,
            hub: subscription.hub,
            outbound: subscription.outbound,
            ping_period: settings.ping_period,
            write_wait: settings.write_wait,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Drain the outbound queue into `sink` until the hub closes it or a
    /// write fails.
    ///
    /// Messages that queued up while a write was in flight are joined with
    /// newlines into the next frame. A ping goes out every `ping_period`.
    /// The client always unregisters itself on the way out; the hub treats
    /// that as a no-op if it already dropped the client.
    pub async fn run<S>(mut self, mut sink: S) -> ClientExit
    where
        S: Sink<Message> + Unpin,
    {
        let mut ping = interval_at(Instant::now() + self.ping_period, self.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                message = self.outbound.recv() => {
                    let Some(first) = message else {
                        let _ = self.write(&mut sink, Message::Close(None)).await;
                        break ClientExit::Evicted;
                    };
                    let frame = self.coalesce(first);
                    if !self.write(&mut sink, Message::Text(frame)).await {
                        break ClientExit::WriteFailed;
                    }
                }
                _ = ping.tick() => {
                    if !self.write(&mut sink, Message::Ping(Vec::new())).await {
                        break ClientExit::WriteFailed;
                    }
                }
            }
        };

        debug!(repo = self.hub.repo(), client = self.id, ?exit, "client send loop finished");
        self.hub.unregister(self.id);
        exit
    }

    fn coalesce(&mut self, first: Bytes) -> String {
        let mut frame = BytesMut::from(&first[..]);
        while let Ok(next) = self.outbound.try_recv() {
            frame.extend_from_slice(b"\n");
            frame.extend_from_slice(&next);
        }
        String::from_utf8_lossy(&frame).into_owned()
    }

    async fn write<S>(&self, sink: &mut S, message: Message) -> bool
    where
        S: Sink<Message> + Unpin,
    {
        matches!(
            tokio::time::timeout(self.write_wait, sink.send(message)).await,
            Ok(Ok(()))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SuperHub;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    fn settings() -> HubSettings {
        HubSettings {
            idle_timeout: None,
            ..HubSettings::default()
        }
    }

    #[tokio::test]
    async fn test_coalesces_queued_messages() {
        let hubs = SuperHub::new(settings());
        let sub = hubs.subscribe("demo");
        let hub = sub.hub.clone();
        let id = sub.id;

        for msg in ["a", "b", "c"] {
            hubs.publish("demo", Bytes::from(msg));
        }
        // Barrier: the count is answered after the broadcasts were applied.
        assert_eq!(hub.client_count().await, Some(1));

        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let client = Client::new(sub, hubs.settings());
        let task = tokio::spawn(client.run(sink));

        match frames.next().await {
            Some(Message::Text(text)) => assert_eq!(text, "a\nb\nc"),
            other => panic!("unexpected frame {:?}", other),
        }

        hub.unregister(id);
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
        assert_eq!(task.await.unwrap(), ClientExit::Evicted);
    }

    #[tokio::test]
    async fn test_write_failure_unregisters() {
        let hubs = SuperHub::new(settings());
        let sub = hubs.subscribe("demo");
        let hub = sub.hub.clone();

        let (sink, frames) = fmpsc::unbounded::<Message>();
        drop(frames);

        let client = Client::new(sub, hubs.settings());
        let task = tokio::spawn(client.run(sink));
        hubs.publish("demo", Bytes::from_static(b"lost"));

        assert_eq!(task.await.unwrap(), ClientExit::WriteFailed);
        assert_eq!(hub.client_count().await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_keepalive_ping() {
        let hubs = SuperHub::new(settings());
        let sub = hubs.subscribe("demo");
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let _task = tokio::spawn(Client::new(sub, hubs.settings()).run(sink));

        tokio::time::advance(Duration::from_secs(55)).await;
        assert!(matches!(frames.next().await, Some(Message::Ping(_))));
    }
}
