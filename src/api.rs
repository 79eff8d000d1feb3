//! HTTP control surface.
//!
//! Thin routing layer over [`Farm`]; all behavior lives in the service
//! object, handlers only translate between HTTP and its calls.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/` | POST | launch a device, answer `201` with its id |
//! | `/{id}` | DELETE | destroy a device, answer a confirmation line |
//! | `/app-candidate` | POST | resolve an application binary, `404` on miss |

// ============================================================================
// Imports
// ============================================================================

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::AppSearch;
use crate::error::Error;
use crate::farm::Farm;
use crate::identifiers::DeviceId;
use crate::launcher::DeviceSpec;

// ============================================================================
// Types
// ============================================================================

/// Body of a successful device creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedDevice {
    /// Id addressing the device on both the HTTP and realtime surfaces.
    pub id: DeviceId,
}

/// Wrapper mapping service failures onto HTTP responses.
///
/// Every error that escapes a handler is a launch or teardown failure, so
/// they all map to `500` with the error's display form; lookup misses are
/// handled in the individual handlers.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "Request failed");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the HTTP router over a farm.
#[must_use]
pub fn router(farm: Farm) -> Router {
    Router::new()
        .route("/", post(create_device))
        .route("/{id}", delete(destroy_device))
        .route("/app-candidate", post(app_candidate))
        .with_state(farm)
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /` launches a fresh device from the request body.
async fn create_device(
    State(farm): State<Farm>,
    Json(spec): Json<DeviceSpec>,
) -> Result<(StatusCode, Json<CreatedDevice>), ApiError> {
    let device = farm.create_device(&spec).await?;
    let id = device.id().clone();
    Ok((StatusCode::CREATED, Json(CreatedDevice { id })))
}

/// `DELETE /{id}` destroys a device.
///
/// Unknown ids are a no-op success, so deletes are idempotent.
async fn destroy_device(
    State(farm): State<Farm>,
    Path(id): Path<DeviceId>,
) -> Result<String, ApiError> {
    farm.release_device(&id).await?;
    Ok(format!("{id} is destroyed"))
}

/// `POST /app-candidate` resolves the first binary matching the search.
async fn app_candidate(
    State(farm): State<Farm>,
    Json(search): Json<AppSearch>,
) -> Result<Response, ApiError> {
    match farm.find_app_candidate(&search).await? {
        Some(candidate) => Ok(Json(candidate).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "No app candidate found").into_response()),
    }
}

// ============================================================================
// Tests
// ============================================================================
