//! The kettle: one task per tea round, owning every drinker registered to it.
//!
//! All state changes arrive as [`KettleCommand`]s on a single bounded queue
//! and are applied strictly in arrival order. The loop never awaits a
//! drinker; outbound traffic is pushed into mailboxes with `try_send`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use brew_core::{DrinkRequest, DrinkerId, KettleError, KettleId, Response, RoundEvent};
use brew_settings::KettleSettings;
use brew_telemetry::metrics::{
    DRINK_REQUESTS_FORWARDED_TOTAL, KETTLES_ACTIVE, KETTLE_COMMANDS_TOTAL, MAILBOX_DROPS_TOTAL,
};

use crate::drinker::Drinker;
use crate::mirror::RoundMirror;

pub const ROUND_IN_PROGRESS: &str = "tea-round currently still in progress";
pub const NOBODY_OFFERING: &str = "nobody currently offering to make drinks";
pub const ENCODING_ERROR: &str = "error encoding drink request";
pub const MAKER_GONE: &str = "current maker has left the kettle";
pub const MAKER_BUSY: &str = "current maker is not accepting requests";

#[derive(Clone, Copy, Debug)]
pub struct KettleConfig {
    /// An offer younger than this blocks competing offers.
    pub offer_window: Duration,
    pub command_capacity: usize,
}

impl Default for KettleConfig {
    fn default() -> Self {
        Self {
            offer_window: Duration::from_secs(600),
            command_capacity: 64,
        }
    }
}

impl From<&KettleSettings> for KettleConfig {
    fn from(settings: &KettleSettings) -> Self {
        Self {
            offer_window: settings.offer_window(),
            command_capacity: settings.command_queue_capacity,
        }
    }
}

#[derive(Debug)]
pub enum KettleCommand {
    /// Acknowledged once the drinker is in the registered set. A dropped ack
    /// means the kettle retired first.
    Register(Drinker, oneshot::Sender<()>),
    Deregister(DrinkerId),
    Offer(DrinkerId),
    Request(DrinkRequest),
    RoundCompleted(DrinkerId),
    Snapshot(oneshot::Sender<RoundSnapshot>),
}

impl KettleCommand {
    fn kind(&self) -> &'static str {
        match self {
            Self::Register(..) => "register",
            Self::Deregister(_) => "deregister",
            Self::Offer(_) => "offer",
            Self::Request(_) => "request",
            Self::RoundCompleted(_) => "completion",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Idle,
    Offered,
}

/// Read-only view of a kettle, answered through the command queue.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub kettle_id: KettleId,
    pub name: String,
    pub drinkers: usize,
    pub status: RoundStatus,
    pub maker: Option<DrinkerId>,
    pub offered_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum RoundState {
    Idle,
    Offered {
        maker: DrinkerId,
        started: Instant,
        offered_at: DateTime<Utc>,
    },
}

/// Routing handle to a kettle. Sends fail with [`KettleError::Closed`] once
/// the kettle's loop has ended.
#[derive(Clone, Debug)]
pub struct KettleHandle {
    id: KettleId,
    name: Arc<str>,
    serial: u64,
    tx: mpsc::Sender<KettleCommand>,
}

impl KettleHandle {
    pub fn id(&self) -> &KettleId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: KettleCommand) -> Result<(), KettleError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| KettleError::Closed(self.id.clone()))
    }

    /// Resolves once the drinker is registered.
    pub async fn register(&self, drinker: Drinker) -> Result<(), KettleError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(KettleCommand::Register(drinker, ack_tx)).await?;
        ack_rx.await.map_err(|_| KettleError::Closed(self.id.clone()))
    }

    pub async fn deregister(&self, drinker: DrinkerId) -> Result<(), KettleError> {
        self.send(KettleCommand::Deregister(drinker)).await
    }

    pub async fn offer(&self, drinker: DrinkerId) -> Result<(), KettleError> {
        self.send(KettleCommand::Offer(drinker)).await
    }

    pub async fn request(&self, request: DrinkRequest) -> Result<(), KettleError> {
        self.send(KettleCommand::Request(request)).await
    }

    pub async fn round_completed(&self, drinker: DrinkerId) -> Result<(), KettleError> {
        self.send(KettleCommand::RoundCompleted(drinker)).await
    }

    pub async fn snapshot(&self) -> Result<RoundSnapshot, KettleError> {
        let (tx, rx) = oneshot::channel();
        self.send(KettleCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| KettleError::Closed(self.id.clone()))
    }

    /// A handle wired to a bare queue, for exercising callers without a kettle.
    #[cfg(test)]
    pub(crate) fn detached(
        id: KettleId,
        name: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<KettleCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id,
                name: Arc::from(name),
                serial: 0,
                tx,
            },
            rx,
        )
    }
}

/// Registry entries a kettle removes itself from when it empties.
pub(crate) type KettleMap = Arc<DashMap<KettleId, KettleHandle>>;

pub struct Kettle {
    id: KettleId,
    name: Arc<str>,
    serial: u64,
    config: KettleConfig,
    rx: mpsc::Receiver<KettleCommand>,
    drinkers: HashMap<DrinkerId, Drinker>,
    round: RoundState,
    registry: Option<KettleMap>,
    mirror: Option<RoundMirror>,
    /// Empty and waiting for a quiet queue before leaving the registry.
    retiring: bool,
}

impl Kettle {
    pub fn new(id: KettleId, name: &str, serial: u64, config: KettleConfig) -> (Self, KettleHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let name: Arc<str> = Arc::from(name);
        let handle = KettleHandle {
            id: id.clone(),
            name: name.clone(),
            serial,
            tx,
        };
        let kettle = Self {
            id,
            name,
            serial,
            config,
            rx,
            drinkers: HashMap::new(),
            round: RoundState::Idle,
            registry: None,
            mirror: None,
            retiring: false,
        };
        (kettle, handle)
    }

    pub(crate) fn with_registry(mut self, registry: KettleMap) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_mirror(mut self, mirror: RoundMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Process commands until the last drinker leaves.
    pub async fn run(mut self) {
        gauge!(KETTLES_ACTIVE).increment(1.0);
        info!(kettle_id = %self.id, name = %self.name, "kettle started");

        while let Some(command) = self.rx.recv().await {
            counter!(KETTLE_COMMANDS_TOTAL, "command" => command.kind()).increment(1);
            let departed = self.apply(command);
            self.retiring = self.drinkers.is_empty() && (departed || self.retiring);
            if self.retiring && self.retire() {
                break;
            }
        }

        self.discard_leftovers();
        gauge!(KETTLES_ACTIVE).decrement(1.0);
        info!(kettle_id = %self.id, "kettle stopped");
    }

    /// Returns `true` if any drinker left the registered set.
    fn apply(&mut self, command: KettleCommand) -> bool {
        match command {
            KettleCommand::Register(drinker, ack) => {
                debug!(kettle_id = %self.id, drinker_id = %drinker.id(), name = drinker.name(), "drinker registered");
                let _ = self.drinkers.insert(drinker.id().clone(), drinker);
                let _ = ack.send(());
                false
            }
            KettleCommand::Deregister(id) => match self.drinkers.remove(&id) {
                Some(drinker) => {
                    drinker.mailbox().close();
                    debug!(kettle_id = %self.id, drinker_id = %id, remaining = self.drinkers.len(), "drinker deregistered");
                    true
                }
                None => false,
            },
            KettleCommand::Offer(id) => {
                self.offer(id);
                false
            }
            KettleCommand::Request(request) => {
                self.request(request);
                false
            }
            KettleCommand::RoundCompleted(id) => self.complete(id),
            KettleCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                false
            }
        }
    }

    fn offer(&mut self, id: DrinkerId) {
        let Some(drinker) = self.drinkers.get(&id).cloned() else {
            warn!(kettle_id = %self.id, drinker_id = %id, "discarding offer from departed drinker");
            return;
        };

        if let RoundState::Offered { maker, started, .. } = &self.round {
            if started.elapsed() < self.config.offer_window {
                let _ = drinker.send_response(&Response::error(ROUND_IN_PROGRESS));
                return;
            }
            info!(kettle_id = %self.id, stale_maker = %maker, "taking over stale offer");
        }

        self.round = RoundState::Offered {
            maker: id.clone(),
            started: Instant::now(),
            offered_at: Utc::now(),
        };
        info!(kettle_id = %self.id, drinker_id = %id, "round offered");
        let _ = drinker.send_response(&Response::ok(""));
        if let Some(mirror) = &self.mirror {
            mirror.offered(&self.id, &id, drinker.name());
        }
    }

    fn request(&mut self, request: DrinkRequest) {
        let Some(requester) = self.drinkers.get(&request.drinker_id) else {
            warn!(kettle_id = %self.id, drinker_id = %request.drinker_id, "discarding drink request from departed drinker");
            return;
        };
        let RoundState::Offered { maker, .. } = &self.round else {
            let _ = requester.send_response(&Response::error(NOBODY_OFFERING));
            return;
        };

        let payload = match request.to_json() {
            Ok(payload) => Arc::new(payload),
            Err(e) => {
                error!(kettle_id = %self.id, drinker_id = %request.drinker_id, error = %e, "failed to encode drink request");
                let _ = requester.send_response(&Response::error(ENCODING_ERROR));
                return;
            }
        };

        let Some(maker) = self.drinkers.get(maker) else {
            warn!(kettle_id = %self.id, maker = %maker, "current maker no longer registered");
            let _ = requester.send_response(&Response::error(MAKER_GONE));
            return;
        };

        match maker.deliver(payload) {
            Ok(()) => {
                counter!(DRINK_REQUESTS_FORWARDED_TOTAL).increment(1);
                debug!(kettle_id = %self.id, from = %request.drinker_id, to = %maker.id(), "drink request forwarded");
                let _ = requester.send_response(&Response::ok(""));
            }
            Err(e) => {
                warn!(kettle_id = %self.id, maker = %maker.id(), reason = e.kind(), "dropping drink request");
                counter!(MAILBOX_DROPS_TOTAL, "kind" => "request").increment(1);
                let _ = requester.send_response(&Response::error(MAKER_BUSY));
            }
        }
    }

    /// Reset the round and tell everyone. Drinkers that cannot take the
    /// event are deregistered. Returns `true` if any were.
    fn complete(&mut self, by: DrinkerId) -> bool {
        if !self.drinkers.contains_key(&by) {
            warn!(kettle_id = %self.id, drinker_id = %by, "completion from departed drinker");
        }
        self.round = RoundState::Idle;
        info!(kettle_id = %self.id, drinker_id = %by, "round completed");
        if let Some(mirror) = &self.mirror {
            mirror.completed(&self.id);
        }

        let event = RoundEvent::Completed {
            kettle_id: self.id.clone(),
            completed_by: by,
            timestamp: Utc::now(),
        };
        let payload = match event.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                error!(kettle_id = %self.id, error = %e, "failed to encode round event");
                return false;
            }
        };

        let failed: Vec<DrinkerId> = self
            .drinkers
            .values()
            .filter(|d| d.deliver(payload.clone()).is_err())
            .map(|d| d.id().clone())
            .collect();
        for id in &failed {
            if let Some(drinker) = self.drinkers.remove(id) {
                drinker.mailbox().close();
                counter!(MAILBOX_DROPS_TOTAL, "kind" => "broadcast").increment(1);
                warn!(kettle_id = %self.id, drinker_id = %id, "removing drinker that could not take broadcast");
            }
        }
        !failed.is_empty()
    }

    fn snapshot(&self) -> RoundSnapshot {
        let (status, maker, offered_at) = match &self.round {
            RoundState::Idle => (RoundStatus::Idle, None, None),
            RoundState::Offered {
                maker, offered_at, ..
            } => (RoundStatus::Offered, Some(maker.clone()), Some(*offered_at)),
        };
        RoundSnapshot {
            kettle_id: self.id.clone(),
            name: self.name.to_string(),
            drinkers: self.drinkers.len(),
            status,
            maker,
            offered_at,
        }
    }

    /// Leave the registry if the queue is quiet. The check and the removal
    /// happen under the registry's per-key lock, so a handle can only be
    /// handed out before removal (and its send then lands in a non-empty
    /// queue) or after (and it resolves a fresh kettle).
    fn retire(&mut self) -> bool {
        let Some(registry) = &self.registry else {
            self.rx.close();
            return true;
        };

        let serial = self.serial;
        let rx = &mut self.rx;
        let mut busy = false;
        let _ = registry.remove_if(&self.id, |_, handle| {
            if handle.serial() != serial {
                return false;
            }
            if rx.is_empty() {
                rx.close();
                true
            } else {
                busy = true;
                false
            }
        });

        if busy {
            debug!(kettle_id = %self.id, "kettle empty but queue busy, staying up");
            return false;
        }
        self.rx.close();
        true
    }

    /// Commands that slipped in between retirement and closing the queue.
    /// Dropping them drops their reply channels, which callers see as `Closed`.
    fn discard_leftovers(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            debug!(kettle_id = %self.id, command = command.kind(), "discarding command sent to retired kettle");
        }
        for drinker in self.drinkers.values() {
            drinker.mailbox().close();
        }
    }
}
