//! Per-repository notification hubs
//!
//! Each repository with live subscribers gets one [`Hub`] actor. The actor
//! owns the set of connected clients and applies register, unregister and
//! broadcast commands one at a time, in the order they were submitted, so the
//! client set needs no lock. [`SuperHub`] maps repository names to hubs and
//! creates them on first subscription.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub type ClientId = u64;

/// Tunables shared by every hub and client
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Outbound messages a client may have queued before it is evicted
    pub queue_capacity: usize,
    /// Keep-alive ping interval, must stay below `pong_wait`
    pub ping_period: Duration,
    /// How long a subscriber may stay silent before it is dropped
    pub pong_wait: Duration,
    /// Deadline for a single frame write
    pub write_wait: Duration,
    /// Largest frame accepted from a subscriber
    pub max_message_size: usize,
    /// Retire a hub after it has had no clients for this long (None = never)
    pub idle_timeout: Option<Duration>,
}

impl Default for HubSettings {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            queue_capacity: 256,
            ping_period: pong_wait * 9 / 10,
            pong_wait,
            write_wait: Duration::from_secs(10),
            max_message_size: 512,
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

enum Command {
    Register {
        client: ClientId,
        outbound: mpsc::Sender<Bytes>,
    },
    Unregister(ClientId),
    Broadcast(Bytes),
    ClientCount(oneshot::Sender<usize>),
}

/// Cheap, cloneable address of a running hub
#[derive(Clone)]
pub struct HubHandle {
    hub_id: u64,
    repo: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Remove a client and close its outbound queue. Unknown ids are ignored,
    /// so unregistering twice is harmless.
    pub fn unregister(&self, client: ClientId) {
        let _ = self.commands.send(Command::Unregister(client));
    }

    /// Queue a message for every live client. Returns false if the hub has
    /// already stopped.
    pub fn broadcast(&self, message: Bytes) -> bool {
        self.commands.send(Command::Broadcast(message)).is_ok()
    }

    /// Number of live clients once every previously submitted command has
    /// been applied.
    pub async fn client_count(&self) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::ClientCount(tx)).ok()?;
        rx.await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn register(&self, client: ClientId, outbound: mpsc::Sender<Bytes>) -> bool {
        self.commands
            .send(Command::Register { client, outbound })
            .is_ok()
    }
}

/// A client's end of a subscription: its id, its hub and the queue the hub
/// fills.
pub struct Subscription {
    pub id: ClientId,
    pub hub: HubHandle,
    pub outbound: mpsc::Receiver<Bytes>,
}

struct Registry {
    hubs: Mutex<HashMap<String, HubHandle>>,
    settings: HubSettings,
    next_hub_id: AtomicU64,
    next_client_id: AtomicU64,
}

impl Registry {
    fn hubs(&self) -> MutexGuard<'_, HashMap<String, HubHandle>> {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide map of repository name to hub
#[derive(Clone)]
pub struct SuperHub {
    inner: Arc<Registry>,
}

impl SuperHub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(Registry {
                hubs: Mutex::new(HashMap::new()),
                settings,
                next_hub_id: AtomicU64::new(1),
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// Register a new client with the repository's hub, starting the hub if
    /// this is its first subscriber.
    ///
    /// Lookup, creation and registration happen under the registry lock, so
    /// a hub can never retire between being found and receiving the client.
    pub fn subscribe(&self, repo: &str) -> Subscription {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outbound) = mpsc::channel(self.inner.settings.queue_capacity);

        let mut hubs = self.inner.hubs();
        let existing = hubs.get(repo).filter(|hub| !hub.is_closed()).cloned();
        let hub = match existing {
            Some(hub) => hub,
            None => {
                let hub = self.spawn_hub(repo);
                hubs.insert(repo.to_string(), hub.clone());
                hub
            }
        };
        if !hub.register(id, tx) {
            warn!(repo, client = id, "hub stopped before registration");
        }
        drop(hubs);

        debug!(repo, client = id, "client subscribed");
        Subscription { id, hub, outbound }
    }

    /// Fan a message out to the repository's subscribers. Repositories
    /// nobody is listening to have no hub and the message is dropped.
    pub fn publish(&self, repo: &str, message: Bytes) -> bool {
        let hub = self.inner.hubs().get(repo).cloned();
        match hub {
            Some(hub) => hub.broadcast(message),
            None => false,
        }
    }

    pub fn hub(&self, repo: &str) -> Option<HubHandle> {
        self.inner.hubs().get(repo).cloned()
    }

    pub fn hub_count(&self) -> usize {
        self.inner.hubs().len()
    }

    fn spawn_hub(&self, repo: &str) -> HubHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = HubHandle {
            hub_id: self.inner.next_hub_id.fetch_add(1, Ordering::Relaxed),
            repo: Arc::from(repo),
            commands,
        };

        let hub = Hub {
            hub_id: handle.hub_id,
            repo: handle.repo.clone(),
            clients: HashMap::new(),
            idle_since: Instant::now(),
            idle_timeout: self.inner.settings.idle_timeout,
            registry: Arc::downgrade(&self.inner),
        };
        tokio::spawn(hub.run(rx));

        handle
    }
}

impl Default for SuperHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

struct Hub {
    hub_id: u64,
    repo: Arc<str>,
    /// Owning the sender is what keeps a client's queue open; dropping the
    /// entry closes it.
    clients: HashMap<ClientId, mpsc::Sender<Bytes>>,
    idle_since: Instant,
    idle_timeout: Option<Duration>,
    registry: Weak<Registry>,
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(repo = %self.repo, "hub started");

        let mut idle_check = self.idle_timeout.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let command = match idle_check.as_mut() {
                Some(ticker) => tokio::select! {
                    command = rx.recv() => command,
                    _ = ticker.tick() => {
                        if self.try_retire(&rx) {
                            break;
                        }
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            match command {
                Some(command) => self.apply(command),
                None => break,
            }
        }

        info!(repo = %self.repo, "hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { client, outbound } => {
                self.clients.insert(client, outbound);
            }
            Command::Unregister(client) => {
                if self.clients.remove(&client).is_some() {
                    debug!(repo = %self.repo, client, "client unregistered");
                    self.mark_idle_if_empty();
                }
            }
            Command::Broadcast(message) => {
                let repo = &self.repo;
                self.clients
                    .retain(|client, outbound| match outbound.try_send(message.clone()) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            warn!(repo = %repo, client = *client, "client queue full, dropping subscriber");
                            false
                        }
                        Err(TrySendError::Closed(_)) => false,
                    });
                self.mark_idle_if_empty();
            }
            Command::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    fn mark_idle_if_empty(&mut self) {
        if self.clients.is_empty() {
            self.idle_since = Instant::now();
        }
    }

    /// Leave the registry if the hub has been idle long enough and nothing is
    /// waiting in its queue. Runs under the registry lock, which is also held
    /// while registering, so no client can slip in unnoticed.
    fn try_retire(&self, rx: &mpsc::UnboundedReceiver<Command>) -> bool {
        let Some(timeout) = self.idle_timeout else {
            return false;
        };
        if !self.clients.is_empty() || self.idle_since.elapsed() < timeout {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return true;
        };

        let mut hubs = registry.hubs();
        if !rx.is_empty() {
            return false;
        }
        if hubs.get(&*self.repo).map(|hub| hub.hub_id) == Some(self.hub_id) {
            hubs.remove(&*self.repo);
        }
        debug!(repo = %self.repo, "retiring idle hub");
        true
    }
}
