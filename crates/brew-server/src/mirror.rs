//! Best-effort mirroring of round state into the store, plus offer
//! notifications to nearby participants.
//!
//! Kettles post operations without blocking; a single worker applies them in
//! arrival order so a completion can never overtake the offer it closes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use brew_core::{DrinkerId, KettleId};
use brew_store::KettleStore;

use crate::notify::Notifier;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub(crate) enum MirrorOp {
    Offered {
        kettle_id: KettleId,
        maker: DrinkerId,
        maker_name: String,
    },
    Completed {
        kettle_id: KettleId,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct MirrorConfig {
    pub notify_radius_metres: u32,
    pub queue_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            notify_radius_metres: 100,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Sending half held by every kettle.
#[derive(Clone, Debug)]
pub struct RoundMirror {
    tx: mpsc::Sender<MirrorOp>,
}

impl RoundMirror {
    pub fn offered(&self, kettle_id: &KettleId, maker: &DrinkerId, maker_name: &str) {
        self.post(MirrorOp::Offered {
            kettle_id: kettle_id.clone(),
            maker: maker.clone(),
            maker_name: maker_name.to_owned(),
        });
    }

    pub fn completed(&self, kettle_id: &KettleId) {
        self.post(MirrorOp::Completed {
            kettle_id: kettle_id.clone(),
        });
    }

    /// Operations queued but not yet applied.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn post(&self, op: MirrorOp) {
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(op)) => {
                warn!(?op, "mirror queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("mirror worker stopped");
            }
        }
    }
}

/// Start the mirror worker. It stops when `shutdown` fires, after applying
/// whatever was already queued.
pub fn spawn_mirror(
    store: Arc<dyn KettleStore>,
    notifier: Arc<dyn Notifier>,
    config: MirrorConfig,
    shutdown: CancellationToken,
) -> (RoundMirror, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let worker = MirrorWorker {
        store,
        notifier,
        radius: config.notify_radius_metres,
    };
    let task = tokio::spawn(worker.run(rx, shutdown));
    (RoundMirror { tx }, task)
}

struct MirrorWorker {
    store: Arc<dyn KettleStore>,
    notifier: Arc<dyn Notifier>,
    radius: u32,
}

impl MirrorWorker {
    async fn run(self, mut rx: mpsc::Receiver<MirrorOp>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                op = rx.recv() => match op {
                    Some(op) => self.apply(op).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    while let Ok(op) = rx.try_recv() {
                        self.apply(op).await;
                    }
                    break;
                }
            }
        }
        debug!("mirror worker stopped");
    }

    async fn apply(&self, op: MirrorOp) {
        match op {
            MirrorOp::Offered {
                kettle_id,
                maker,
                maker_name,
            } => {
                if let Err(e) = self.store.set_current_maker(&kettle_id, Some(&maker)).await {
                    warn!(kettle_id = %kettle_id, error = %e, "failed to record current maker");
                }
                self.notify_nearby(&kettle_id, &maker_name).await;
            }
            MirrorOp::Completed { kettle_id } => {
                if let Err(e) = self.store.set_current_maker(&kettle_id, None).await {
                    warn!(kettle_id = %kettle_id, error = %e, "failed to clear current maker");
                }
            }
        }
    }

    async fn notify_nearby(&self, kettle_id: &KettleId, maker_name: &str) {
        let kettle = match self.store.get_kettle(kettle_id).await {
            Ok(Some(kettle)) => kettle,
            Ok(None) => {
                debug!(kettle_id = %kettle_id, "kettle not stored, skipping notifications");
                return;
            }
            Err(e) => {
                warn!(kettle_id = %kettle_id, error = %e, "failed to load kettle");
                return;
            }
        };
        let Some(location) = kettle.location else {
            debug!(kettle_id = %kettle_id, "kettle has no location, skipping notifications");
            return;
        };
        let participants = match self
            .store
            .participants_within_radius(location, self.radius)
            .await
        {
            Ok(participants) => participants,
            Err(e) => {
                warn!(kettle_id = %kettle_id, error = %e, "radius lookup failed");
                return;
            }
        };

        let payload = HashMap::from([
            ("kettleId".to_string(), kettle_id.to_string()),
            ("kettleName".to_string(), kettle.name.clone()),
            ("type".to_string(), "offer".to_string()),
            ("makerName".to_string(), maker_name.to_string()),
        ]);
        let mut sent = 0usize;
        for participant in &participants {
            match self.notifier.notify(&participant.push_token, &payload).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(kettle_id = %kettle_id, recipient = %participant.nickname, error = %e, "notification failed");
                }
            }
        }
        info!(kettle_id = %kettle_id, sent, total = participants.len(), "offer notifications sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brew_store::{KettleRecord, Location, MemoryKettleStore, ParticipantRecord};
    use parking_lot::Mutex;

    use crate::notify::NotifyError;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, HashMap<String, String>)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            recipient: &str,
            payload: &HashMap<String, String>,
        ) -> Result<(), NotifyError> {
            if self.fail_for.as_deref() == Some(recipient) {
                return Err(NotifyError::Rejected(recipient.to_string()));
            }
            self.sent.lock().push((recipient.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn here() -> Location {
        Location::new(-2.2426, 53.4808)
    }

    fn nearby(token: &str) -> ParticipantRecord {
        ParticipantRecord::new(token, token).with_location(here())
    }

    async fn setup(
        notifier: Arc<RecordingNotifier>,
    ) -> (Arc<MemoryKettleStore>, RoundMirror, JoinHandle<()>, CancellationToken, KettleId) {
        let store = Arc::new(MemoryKettleStore::new());
        let kettle_id = KettleId::new();
        store
            .upsert_kettle(KettleRecord::new(kettle_id.clone(), "kitchen").with_location(here()))
            .await
            .unwrap();
        for participant in [
            nearby("tok-a"),
            nearby("tok-b"),
            ParticipantRecord::new("tok-far", "far").with_location(Location::new(0.0, 0.0)),
        ] {
            store.upsert_participant(participant).await.unwrap();
        }

        let token = CancellationToken::new();
        let (mirror, task) = spawn_mirror(
            store.clone(),
            notifier,
            MirrorConfig::default(),
            token.clone(),
        );
        (store, mirror, task, token, kettle_id)
    }

    #[tokio::test]
    async fn offer_sets_maker_and_notifies_nearby() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (store, mirror, task, token, kettle_id) = setup(notifier.clone()).await;
        let maker = DrinkerId::new();

        mirror.offered(&kettle_id, &maker, "ann");
        token.cancel();
        task.await.unwrap();

        let record = store.get_kettle(&kettle_id).await.unwrap().unwrap();
        assert_eq!(record.current_maker, Some(maker));

        let sent = notifier.sent.lock();
        let mut recipients: Vec<_> = sent.iter().map(|(r, _)| r.as_str()).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec!["tok-a", "tok-b"]);
        let payload = &sent[0].1;
        assert_eq!(payload["type"], "offer");
        assert_eq!(payload["kettleId"], kettle_id.as_str());
        assert_eq!(payload["kettleName"], "kitchen");
        assert_eq!(payload["makerName"], "ann");
    }

    #[tokio::test]
    async fn completion_after_offer_clears_maker() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (store, mirror, task, token, kettle_id) = setup(notifier).await;

        mirror.offered(&kettle_id, &DrinkerId::new(), "ann");
        mirror.completed(&kettle_id);
        token.cancel();
        task.await.unwrap();

        let record = store.get_kettle(&kettle_id).await.unwrap().unwrap();
        assert!(record.current_maker.is_none());
    }

    #[tokio::test]
    async fn one_failed_notification_does_not_stop_the_rest() {
        let notifier = Arc::new(RecordingNotifier {
            fail_for: Some("tok-a".into()),
            ..Default::default()
        });
        let (_store, mirror, task, token, kettle_id) = setup(notifier.clone()).await;

        mirror.offered(&kettle_id, &DrinkerId::new(), "ann");
        token.cancel();
        task.await.unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "tok-b");
    }

    #[tokio::test]
    async fn unknown_kettle_is_logged_not_fatal() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_store, mirror, task, token, _kettle_id) = setup(notifier.clone()).await;

        mirror.offered(&KettleId::new(), &DrinkerId::new(), "ann");
        token.cancel();
        task.await.unwrap();

        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn backlog_counts_unapplied_operations() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_store, mirror, task, token, kettle_id) = setup(notifier).await;
        assert_eq!(mirror.backlog(), 0);

        // Nothing is applied until the worker task gets to run.
        mirror.completed(&kettle_id);
        mirror.completed(&kettle_id);
        assert_eq!(mirror.backlog(), 2);

        token.cancel();
        task.await.unwrap();
        assert_eq!(mirror.backlog(), 0);
    }

    #[tokio::test]
    async fn posting_after_worker_stopped_is_harmless() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (_store, mirror, task, token, kettle_id) = setup(notifier).await;
        token.cancel();
        task.await.unwrap();
        mirror.completed(&kettle_id);
    }
}
