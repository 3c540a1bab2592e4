//! In-process [`KettleStore`] backed by hash maps.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use brew_core::{DrinkerId, KettleId};

use crate::error::{Result, StoreError};
use crate::geo::Location;
use crate::kettles::{KettleRecord, KettleStore, ParticipantRecord};

#[derive(Default)]
pub struct MemoryKettleStore {
    kettles: RwLock<HashMap<KettleId, KettleRecord>>,
    participants: RwLock<HashMap<String, ParticipantRecord>>,
}

impl MemoryKettleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kettle_count(&self) -> usize {
        self.kettles.read().len()
    }
}

/// Records located within `metres` of `centre`, nearest first.
fn nearest<T>(
    records: impl Iterator<Item = (Option<Location>, T)>,
    centre: Location,
    metres: u32,
) -> Vec<T> {
    let mut found: Vec<(f64, T)> = records
        .filter_map(|(location, record)| {
            let location = location?;
            centre
                .is_within(&location, metres)
                .then(|| (centre.distance_metres(&location), record))
        })
        .collect();
    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    found.into_iter().map(|(_, record)| record).collect()
}

#[async_trait]
impl KettleStore for MemoryKettleStore {
    async fn upsert_kettle(&self, kettle: KettleRecord) -> Result<()> {
        let mut kettles = self.kettles.write();
        match kettles.get_mut(&kettle.id) {
            Some(existing) => {
                if !kettle.name.is_empty() {
                    existing.name = kettle.name;
                }
                if kettle.location.is_some() {
                    existing.location = kettle.location;
                }
            }
            None => {
                debug!(kettle_id = %kettle.id, name = %kettle.name, "kettle stored");
                let _ = kettles.insert(kettle.id.clone(), kettle);
            }
        }
        Ok(())
    }

    async fn get_kettle(&self, id: &KettleId) -> Result<Option<KettleRecord>> {
        Ok(self.kettles.read().get(id).cloned())
    }

    async fn set_current_maker(&self, id: &KettleId, maker: Option<&DrinkerId>) -> Result<()> {
        let mut kettles = self.kettles.write();
        let kettle = kettles
            .get_mut(id)
            .ok_or_else(|| StoreError::KettleNotFound(id.clone()))?;
        kettle.current_maker = maker.cloned();
        Ok(())
    }

    async fn kettles_within_radius(
        &self,
        centre: Location,
        metres: u32,
    ) -> Result<Vec<KettleRecord>> {
        let kettles = self.kettles.read();
        Ok(nearest(
            kettles.values().map(|k| (k.location, k.clone())),
            centre,
            metres,
        ))
    }

    async fn upsert_participant(&self, participant: ParticipantRecord) -> Result<()> {
        let mut participants = self.participants.write();
        match participants.get_mut(&participant.push_token) {
            Some(existing) => {
                if !participant.nickname.is_empty() {
                    existing.nickname = participant.nickname;
                }
                if participant.last_known_location.is_some() {
                    existing.last_known_location = participant.last_known_location;
                }
            }
            None => {
                debug!(nickname = %participant.nickname, "participant stored");
                let _ = participants.insert(participant.push_token.clone(), participant);
            }
        }
        Ok(())
    }

    async fn participants_within_radius(
        &self,
        centre: Location,
        metres: u32,
    ) -> Result<Vec<ParticipantRecord>> {
        let participants = self.participants.read();
        Ok(nearest(
            participants
                .values()
                .map(|p| (p.last_known_location, p.clone())),
            centre,
            metres,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> Location {
        Location::new(-1.8904, 52.4862)
    }

    fn participant(token: &str, location: Location) -> ParticipantRecord {
        ParticipantRecord::new(token, token.to_uppercase()).with_location(location)
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let store = MemoryKettleStore::new();
        let id = KettleId::new();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), "office"))
            .await
            .unwrap();

        let got = store.get_kettle(&id).await.unwrap().unwrap();
        assert_eq!(got.name, "office");
        assert!(got.current_maker.is_none());
        assert_eq!(store.kettle_count(), 1);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryKettleStore::new();
        assert!(store.get_kettle(&KettleId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_fields_left_blank() {
        let store = MemoryKettleStore::new();
        let id = KettleId::new();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), "office").with_location(office()))
            .await
            .unwrap();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), ""))
            .await
            .unwrap();

        let got = store.get_kettle(&id).await.unwrap().unwrap();
        assert_eq!(got.name, "office");
        assert_eq!(got.location, Some(office()));
    }

    #[tokio::test]
    async fn upsert_does_not_touch_maker() {
        let store = MemoryKettleStore::new();
        let id = KettleId::new();
        let maker = DrinkerId::new();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), "office"))
            .await
            .unwrap();
        store.set_current_maker(&id, Some(&maker)).await.unwrap();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), "renamed"))
            .await
            .unwrap();

        let got = store.get_kettle(&id).await.unwrap().unwrap();
        assert_eq!(got.name, "renamed");
        assert_eq!(got.current_maker, Some(maker));
    }

    #[tokio::test]
    async fn set_and_clear_current_maker() {
        let store = MemoryKettleStore::new();
        let id = KettleId::new();
        let maker = DrinkerId::new();
        store
            .upsert_kettle(KettleRecord::new(id.clone(), "office"))
            .await
            .unwrap();

        store.set_current_maker(&id, Some(&maker)).await.unwrap();
        assert_eq!(
            store.get_kettle(&id).await.unwrap().unwrap().current_maker,
            Some(maker)
        );

        store.set_current_maker(&id, None).await.unwrap();
        assert!(store
            .get_kettle(&id)
            .await
            .unwrap()
            .unwrap()
            .current_maker
            .is_none());
    }

    #[tokio::test]
    async fn set_maker_on_missing_kettle_fails() {
        let store = MemoryKettleStore::new();
        let err = store
            .set_current_maker(&KettleId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KettleNotFound(_)));
    }

    #[tokio::test]
    async fn radius_query_filters_and_orders_by_distance() {
        let store = MemoryKettleStore::new();
        let centre = office();
        for p in [
            participant("far", Location::new(centre.long, centre.lat + 0.01)),
            participant("mid", Location::new(centre.long, centre.lat + 0.0005)),
            participant("near", centre),
            ParticipantRecord::new("nowhere", "NOWHERE"),
        ] {
            store.upsert_participant(p).await.unwrap();
        }

        let found = store.participants_within_radius(centre, 100).await.unwrap();
        let tokens: Vec<_> = found.iter().map(|p| p.push_token.as_str()).collect();
        assert_eq!(tokens, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn participant_upsert_replaces_by_token() {
        let store = MemoryKettleStore::new();
        store
            .upsert_participant(participant("tok", Location::new(0.0, 10.0)))
            .await
            .unwrap();
        store
            .upsert_participant(participant("tok", office()))
            .await
            .unwrap();

        let found = store.participants_within_radius(office(), 100).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn participant_upsert_keeps_fields_left_blank() {
        let store = MemoryKettleStore::new();
        store
            .upsert_participant(participant("tok", office()))
            .await
            .unwrap();
        store
            .upsert_participant(ParticipantRecord::new("tok", ""))
            .await
            .unwrap();

        let found = store.participants_within_radius(office(), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nickname, "TOK");
        assert_eq!(found[0].last_known_location, Some(office()));
    }

    #[tokio::test]
    async fn kettle_radius_query_skips_unlocated_and_orders_by_distance() {
        let store = MemoryKettleStore::new();
        let centre = office();
        let near = KettleRecord::new(KettleId::new(), "near").with_location(centre);
        let mid = KettleRecord::new(KettleId::new(), "mid")
            .with_location(Location::new(centre.long, centre.lat + 0.0005));
        let far = KettleRecord::new(KettleId::new(), "far")
            .with_location(Location::new(centre.long, centre.lat + 0.01));
        let nowhere = KettleRecord::new(KettleId::new(), "nowhere");
        for k in [far, mid, near, nowhere] {
            store.upsert_kettle(k).await.unwrap();
        }

        let found = store.kettles_within_radius(centre, 100).await.unwrap();
        let names: Vec<_> = found.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["near", "mid"]);
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = KettleRecord::new(KettleId::from_raw("kettle_1"), "office");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "kettle_1");
        assert!(json["currentMaker"].is_null());
    }
}
