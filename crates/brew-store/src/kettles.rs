//! Kettle and participant records and the async store seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use brew_core::{DrinkerId, KettleId};

use crate::error::Result;
use crate::geo::Location;

/// A kettle as the store sees it. Round state beyond the current maker is never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KettleRecord {
    pub id: KettleId,
    pub name: String,
    pub current_maker: Option<DrinkerId>,
    pub location: Option<Location>,
}

impl KettleRecord {
    pub fn new(id: KettleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            current_maker: None,
            location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Someone who can be told a round is starting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    /// Push-notification recipient token; unique per participant.
    pub push_token: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub last_known_location: Option<Location>,
}

impl ParticipantRecord {
    pub fn new(push_token: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            push_token: push_token.into(),
            nickname: nickname.into(),
            last_known_location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.last_known_location = Some(location);
        self
    }
}

#[async_trait]
pub trait KettleStore: Send + Sync {
    /// Insert a kettle, or update an existing one. An empty name or a missing
    /// location leaves the stored value untouched. The current maker is never
    /// changed by an upsert.
    async fn upsert_kettle(&self, kettle: KettleRecord) -> Result<()>;

    async fn get_kettle(&self, id: &KettleId) -> Result<Option<KettleRecord>>;

    /// Set (`Some`) or clear (`None`) the kettle's current maker.
    async fn set_current_maker(&self, id: &KettleId, maker: Option<&DrinkerId>) -> Result<()>;

    /// Kettles located within `metres` of `centre`, nearest first. Kettles
    /// without a location are never returned.
    async fn kettles_within_radius(
        &self,
        centre: Location,
        metres: u32,
    ) -> Result<Vec<KettleRecord>>;

    /// Insert a participant keyed by push token, or update an existing one.
    /// An empty nickname or a missing location leaves the stored value untouched.
    async fn upsert_participant(&self, participant: ParticipantRecord) -> Result<()>;

    /// Participants whose last known location lies within `metres` of `centre`,
    /// nearest first.
    async fn participants_within_radius(
        &self,
        centre: Location,
        metres: u32,
    ) -> Result<Vec<ParticipantRecord>>;
}
