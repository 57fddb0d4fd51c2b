use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use governor_lease::{Error, Governor, GovernorStatus, Lease, Peer};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ApiState {
    pub governor: Arc<Governor>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(governor: Arc<Governor>) -> Self {
        Self {
            governor,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub governor: GovernorStatus,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseParams {
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Whether a lease on this node was removed. Releases of remote leases
    /// are forwarded to their owner and report `false`.
    pub released: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeersParams {
    #[serde(default = "default_max_peers")]
    pub max: usize,
}

fn default_max_peers() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A leasing failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NoCapacity | Error::NoRemoteFulfillment => StatusCode::SERVICE_UNAVAILABLE,
            Error::RequestPublishTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::InvalidConfig(_) | Error::DurationOutOfRange(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/lease", post(create_lease))
        .route("/release", post(release_lease))
        .route("/peers", get(list_peers))
        .with_state(state)
}

async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        governor: state.governor.status(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn create_lease(
    State(state): State<ApiState>,
    Json(params): Json<LeaseParams>,
) -> Result<Json<Lease>, ApiError> {
    let duration = Duration::from_secs(params.duration_secs);
    match state.governor.lease(duration).await {
        Ok(lease) => {
            info!(
                host = %lease.resource.host,
                resource = %lease.resource.id,
                expiration = %lease.expiration,
                "granted lease"
            );
            Ok(Json(lease))
        }
        Err(e) => {
            warn!(duration_secs = params.duration_secs, error = %e, "lease failed");
            Err(e.into())
        }
    }
}

async fn release_lease(
    State(state): State<ApiState>,
    Json(lease): Json<Lease>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let released = state.governor.release(&lease).await?;
    Ok(Json(ReleaseResponse { released }))
}

async fn list_peers(
    State(state): State<ApiState>,
    Query(params): Query<PeersParams>,
) -> Json<Vec<Peer>> {
    Json(state.governor.candidates(params.max).await)
}
