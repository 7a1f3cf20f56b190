use crate::profile::{Profile, ProfileCreateRequest, ProfileUpdateRequest};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use quickstart_lib::store::{self, Filter};
use quickstart_lib::{Collection, DocumentStore, Keyspace, StoreConfig, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, event, instrument, Level};
use uuid::Uuid;

pub const PROFILES_PATH: &str = "/api/v1/profiles";

const DEFAULT_LIMIT: usize = 5;
const SEARCH_FIELDS: [&str; 2] = ["firstName", "lastName"];

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
    keyspace: Arc<Keyspace>,
    password_cost: u32,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: &StoreConfig, password_cost: u32) -> Self {
        Self {
            store,
            keyspace: Arc::new(config.keyspace()),
            password_cost,
        }
    }

    fn profiles(&self) -> Collection<'_, dyn DocumentStore> {
        Collection::new(self.store.as_ref(), &self.keyspace)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("profile {0} already exists")]
    Conflict(String),
    #[error("Error in document store: {0}")]
    Store(StoreError),
    #[error("Error decoding stored profile: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },
    #[error("Error hashing password: {source}")]
    Hash {
        #[from]
        source: bcrypt::BcryptError,
    },
    #[error("Error joining hashing task: {source}")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DocumentNotFound(key) => {
                ApiError::NotFound(format!("profile {} not found", key))
            }
            StoreError::DocumentExists(key) => ApiError::Conflict(key),
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(_)
            | ApiError::Decode { .. }
            | ApiError::Hash { .. }
            | ApiError::Task { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Problem details body returned for every failed request.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            event!(Level::DEBUG, "Request rejected: {}", self);
        }
        let problem = Problem {
            kind: "about:blank".to_string(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
        };
        (status, Json(problem)).into_response()
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchParams {
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

#[instrument(skip(state))]
pub async fn search_profiles(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let needle = params
        .search
        .ok_or_else(|| ApiError::InvalidRequest("the `search` parameter is required".to_string()))?;

    let query = store::Query {
        keyspace: state.keyspace.as_ref().clone(),
        filter: Filter::ContainsIgnoreCase {
            fields: SEARCH_FIELDS.iter().map(|f| f.to_string()).collect(),
            needle: needle.to_lowercase(),
        },
        limit: params.limit.unwrap_or(DEFAULT_LIMIT),
        offset: params.skip.unwrap_or(0),
    };

    let rows: Vec<Value> = state.store.query(&query).await?.try_collect().await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound(format!("no profiles match `{}`", needle)));
    }

    let profiles = rows
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Profile>, _>>()?;
    Ok(Json(profiles))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Profile>, ApiError> {
    let profile = state.profiles().get::<Profile>(&id.to_string()).await?;
    Ok(Json(profile))
}

#[instrument(skip(state, request))]
pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cost = state.password_cost;
    let profile = tokio::task::spawn_blocking(move || request.into_profile(cost)).await??;

    state
        .profiles()
        .insert(&profile.pid.to_string(), &profile)
        .await?;
    event!(Level::INFO, pid = %profile.pid, "Created profile");

    let location = format!("{}/{}", PROFILES_PATH, profile.pid);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(profile)))
}

#[instrument(skip(state, request), fields(pid = %request.pid))]
pub async fn update_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileUpdateRequest>,
) -> Result<Json<Profile>, ApiError> {
    let key = request.pid.to_string();
    let profiles = state.profiles();

    // Existence check first so a missing profile is reported before hashing.
    profiles.get::<Value>(&key).await?;

    let cost = state.password_cost;
    let profile = tokio::task::spawn_blocking(move || request.into_profile(cost)).await??;
    profiles.replace(&key, &profile).await?;
    event!(Level::INFO, "Replaced profile");

    let stored = profiles.get::<Profile>(&key).await?;
    Ok(Json(stored))
}

#[instrument(skip(state))]
pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Uuid>, ApiError> {
    state.profiles().remove(&id.to_string()).await?;
    event!(Level::INFO, "Removed profile");
    Ok(Json(id))
}
