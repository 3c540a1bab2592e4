//! Participant and kettle directory routes.
//!
//! These feed the store that offer notifications are drawn from: a
//! participant registers a push token and last known location, and kettles
//! registered with a location can be found by radius before joining.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use brew_core::KettleId;
use brew_store::{KettleRecord, Location, ParticipantRecord};

use crate::error::ApiError;
use crate::server::AppState;

/// Largest radius a kettle listing may ask for.
pub const MAX_LIST_RADIUS_METRES: u32 = 100_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterParticipant {
    pub push_token: String,
    #[serde(default)]
    pub nickname: String,
    pub long: Option<f64>,
    pub lat: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRegistered {
    pub push_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterKettle {
    pub name: String,
    pub long: f64,
    pub lat: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KettleRegistered {
    pub kettle_id: KettleId,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyKettles {
    pub metre_radius: u32,
    pub long: f64,
    pub lat: f64,
}

/// Both coordinates or neither.
pub(crate) fn optional_location(
    long: Option<f64>,
    lat: Option<f64>,
) -> Result<Option<Location>, ApiError> {
    match (long, lat) {
        (None, None) => Ok(None),
        (Some(long), Some(lat)) => checked_location(long, lat).map(Some),
        _ => Err(ApiError::Invalid("long and lat must be given together".into())),
    }
}

fn checked_location(long: f64, lat: f64) -> Result<Location, ApiError> {
    let location = Location::new(long, lat);
    if location.is_valid() {
        Ok(location)
    } else {
        Err(ApiError::Invalid(format!("location out of range: {long},{lat}")))
    }
}

/// POST /users
///
/// Upserts by push token. A blank nickname or missing location keeps
/// whatever was stored before.
pub async fn register_participant(
    State(state): State<AppState>,
    Json(body): Json<RegisterParticipant>,
) -> Result<(StatusCode, Json<ParticipantRegistered>), ApiError> {
    let push_token = body.push_token.trim().to_owned();
    if push_token.is_empty() {
        return Err(ApiError::Invalid("pushToken must not be empty".into()));
    }
    let mut record = ParticipantRecord::new(push_token.clone(), body.nickname);
    record.last_known_location = optional_location(body.long, body.lat)?;

    state.store.upsert_participant(record).await?;
    Ok((StatusCode::CREATED, Json(ParticipantRegistered { push_token })))
}

/// POST /kettles
///
/// Records a kettle without starting it. It goes live on the first join.
pub async fn register_kettle(
    State(state): State<AppState>,
    Json(body): Json<RegisterKettle>,
) -> Result<(StatusCode, Json<KettleRegistered>), ApiError> {
    let name = body.name.trim().to_owned();
    if name.is_empty() {
        return Err(ApiError::Invalid("name must not be empty".into()));
    }
    let location = checked_location(body.long, body.lat)?;

    let kettle_id = KettleId::new();
    let record = KettleRecord::new(kettle_id.clone(), name.as_str()).with_location(location);
    state.store.upsert_kettle(record).await?;
    info!(kettle_id = %kettle_id, name = %name, "kettle registered");

    Ok((StatusCode::CREATED, Json(KettleRegistered { kettle_id, name })))
}

/// POST /kettles/list
///
/// Stored kettles within `metreRadius` of the point, nearest first.
pub async fn list_nearby_kettles(
    State(state): State<AppState>,
    Json(body): Json<NearbyKettles>,
) -> Result<Json<Vec<KettleRecord>>, ApiError> {
    if body.metre_radius == 0 || body.metre_radius > MAX_LIST_RADIUS_METRES {
        return Err(ApiError::Invalid(format!(
            "metreRadius must be between 1 and {MAX_LIST_RADIUS_METRES}"
        )));
    }
    let centre = checked_location(body.long, body.lat)?;
    let kettles = state
        .store
        .kettles_within_radius(centre, body.metre_radius)
        .await?;
    Ok(Json(kettles))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use brew_settings::BrewSettings;
    use brew_store::{KettleStore, MemoryKettleStore};

    use super::*;
    use crate::notify::LogNotifier;
    use crate::server::BrewServer;

    fn app() -> (Router, Arc<MemoryKettleStore>) {
        let store = Arc::new(MemoryKettleStore::new());
        let server = BrewServer::new(
            BrewSettings::default(),
            store.clone(),
            Arc::new(LogNotifier),
            None,
        );
        (server.router(), store)
    }

    async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn half_a_location_is_rejected() {
        assert!(optional_location(None, None).unwrap().is_none());
        assert!(optional_location(Some(0.1), Some(51.5)).unwrap().is_some());
        assert!(optional_location(Some(0.1), None).is_err());
        assert!(optional_location(Some(0.1), Some(91.0)).is_err());
    }

    #[tokio::test]
    async fn participant_registration_is_stored() {
        let (app, store) = app();
        let (status, body) = post(
            app,
            "/users",
            json!({"pushToken": "tok-1", "nickname": "ann", "long": -0.1276, "lat": 51.5072}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"pushToken": "tok-1"}));

        let nearby = store
            .participants_within_radius(Location::new(-0.1276, 51.5072), 10)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].nickname, "ann");
    }

    #[tokio::test]
    async fn blank_push_token_is_400() {
        let (app, _store) = app();
        let (status, body) = post(app, "/users", json!({"pushToken": "  "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn kettle_registration_returns_new_id() {
        let (app, store) = app();
        let (status, body) = post(
            app,
            "/kettles",
            json!({"name": "office", "long": -0.1276, "lat": 51.5072}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "office");

        let id: KettleId = body["kettleId"].as_str().unwrap().parse().unwrap();
        let stored = store.get_kettle(&id).await.unwrap().unwrap();
        assert_eq!(stored.location, Some(Location::new(-0.1276, 51.5072)));
    }

    #[tokio::test]
    async fn kettle_without_name_is_400() {
        let (app, _store) = app();
        let (status, _) = post(app, "/kettles", json!({"name": "", "long": 0.0, "lat": 0.0})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_returns_nearest_first() {
        let (app, store) = app();
        let here = Location::new(-0.1276, 51.5072);
        let near = KettleRecord::new(KettleId::new(), "near").with_location(here);
        let further = KettleRecord::new(KettleId::new(), "further")
            .with_location(Location::new(-0.1290, 51.5080));
        let far = KettleRecord::new(KettleId::new(), "far").with_location(Location::new(2.35, 48.85));
        for record in [further, far, near] {
            store.upsert_kettle(record).await.unwrap();
        }

        let (status, body) = post(
            app,
            "/kettles/list",
            json!({"metreRadius": 1000, "long": here.long, "lat": here.lat}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["near", "further"]);
    }

    #[tokio::test]
    async fn listing_rejects_zero_radius() {
        let (app, _store) = app();
        let (status, _) = post(
            app,
            "/kettles/list",
            json!({"metreRadius": 0, "long": 0.0, "lat": 0.0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_path_is_not_a_kettle_id() {
        let (app, _store) = app();
        let req = Request::builder()
            .uri("/kettles/list")
            .body(Body::empty())
            .unwrap();
        // GET on the listing route is the wrong method, not an unknown kettle.
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
