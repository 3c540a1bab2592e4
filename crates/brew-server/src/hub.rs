//! Process-wide registry of live kettles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use brew_core::{KettleError, KettleId};

use crate::drinker::Drinker;
use crate::kettle::{Kettle, KettleConfig, KettleHandle, KettleMap};
use crate::mirror::RoundMirror;

/// Attempts at registering with a kettle that retires underneath us.
const JOIN_ATTEMPTS: usize = 3;

/// Cheap to clone; all clones share one map.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    kettles: KettleMap,
    next_serial: AtomicU64,
    config: KettleConfig,
    mirror: Option<RoundMirror>,
}

impl Hub {
    pub fn new(config: KettleConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_mirror(config: KettleConfig, mirror: RoundMirror) -> Self {
        Self::build(config, Some(mirror))
    }

    fn build(config: KettleConfig, mirror: Option<RoundMirror>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                kettles: Arc::new(DashMap::new()),
                next_serial: AtomicU64::new(1),
                config,
                mirror,
            }),
        }
    }

    /// Start a kettle under a fresh id.
    pub fn create(&self, name: &str) -> KettleHandle {
        self.resolve(&KettleId::new(), name)
    }

    /// The live kettle for `id`, starting one if there is none.
    ///
    /// Check-then-create runs under the map's per-key lock, so concurrent
    /// first references agree on a single kettle.
    pub fn resolve(&self, id: &KettleId, name: &str) -> KettleHandle {
        match self.inner.kettles.entry(id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                warn!(kettle_id = %id, "replacing closed kettle entry");
                let handle = self.spawn(id.clone(), name);
                let _ = entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(id.clone(), name);
                let _ = entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Non-creating read.
    pub fn lookup(&self, id: &KettleId) -> Option<KettleHandle> {
        self.inner
            .kettles
            .get(id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Like [`Hub::lookup`], failing with [`KettleError::NotFound`].
    pub fn get(&self, id: &KettleId) -> Result<KettleHandle, KettleError> {
        self.lookup(id)
            .ok_or_else(|| KettleError::NotFound(id.clone()))
    }

    /// Mirror operations waiting to be applied to the store.
    pub fn mirror_backlog(&self) -> usize {
        self.inner.mirror.as_ref().map_or(0, RoundMirror::backlog)
    }

    pub fn kettle_count(&self) -> usize {
        self.inner.kettles.len()
    }

    /// Register `drinker` with the kettle for `id`, starting it if needed.
    ///
    /// A kettle may retire between resolution and registration; the
    /// registration then fails with `Closed` and is retried against a fresh
    /// kettle under the same id.
    pub async fn join(
        &self,
        id: &KettleId,
        name: &str,
        drinker: Drinker,
    ) -> Result<KettleHandle, KettleError> {
        let mut last_err = KettleError::Closed(id.clone());
        for attempt in 1..=JOIN_ATTEMPTS {
            let handle = self.resolve(id, name);
            match handle.register(drinker.clone()).await {
                Ok(()) => return Ok(handle),
                Err(e) => {
                    debug!(kettle_id = %id, attempt, error = %e, "kettle retired during join, retrying");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn spawn(&self, id: KettleId, name: &str) -> KettleHandle {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let (kettle, handle) = Kettle::new(id, name, serial, self.inner.config);
        let mut kettle = kettle.with_registry(self.inner.kettles.clone());
        if let Some(mirror) = &self.inner.mirror {
            kettle = kettle.with_mirror(mirror.clone());
        }
        let _task = tokio::spawn(kettle.run());
        info!(kettle_id = %handle.id(), name, serial, "kettle spawned");
        handle
    }
}
