use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, FromRequest, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::{
    config::Config,
    domain::{
        CreateFeatureRequest, DomainError, Feature, FeatureWithCount, NewFeature,
        parse_feature_id,
    },
    rate_limit::{RateLimitDecision, RateLimiter},
    store::FeatureStore,
    vote::{VoteError, cast_vote},
};

mod voter;

pub use voter::Voter;

const RATE_LIMITED_MESSAGE: &str = "Too many votes. Please try again later.";
const VOTE_RECORDED_MESSAGE: &str = "Vote recorded successfully";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: FeatureStore,
}

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
}

impl ApiError {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", StatusCode::CONFLICT, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new("rate_limited", StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApiError::new(value.code(), StatusCode::BAD_REQUEST, value.to_string())
    }
}

/// Response body shared by every endpoint.
#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!(code = self.code, status = %self.status, message = %self.message, "request failed");
        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            message: None,
        };
        (self.status, Json(body)).into_response()
    }
}

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        Ok(Self(value))
    }
}

pub fn build_router(config: Config, store: FeatureStore) -> Router {
    let vote_limiter = Arc::new(RateLimiter::new(
        config.vote_rate_limit_max,
        config.vote_rate_limit_window(),
    ));

    let app_state = AppState {
        config: Arc::new(config),
        store,
    };

    let api = Router::new()
        .route("/health", get(health))
        .route("/features", get(list_features).post(create_feature))
        .route("/features/:id", get(get_feature))
        .route(
            "/features/:id/vote",
            post(vote_feature)
                .route_layer(middleware::from_fn_with_state(vote_limiter, vote_rate_limit)),
        )
        .fallback(fallback_not_found);

    Router::new()
        .nest("/api", api)
        .fallback(fallback_not_found)
        .layer(Extension(app_state))
}

async fn vote_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = voter::rate_limit_key_from(req.headers(), req.extensions());
    let decision = limiter.check(key.as_str()).await;

    let mut res = if decision.allowed {
        next.run(req).await
    } else {
        warn!(source = %key, window_secs = limiter.window().as_secs(), "vote rate limit exceeded");
        ApiError::too_many_requests(RATE_LIMITED_MESSAGE).into_response()
    };
    apply_rate_limit_headers(res.headers_mut(), &decision);
    res
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset = decision.reset_after;
    let reset_secs = reset.as_secs() + u64::from(reset.subsec_nanos() > 0);

    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset_secs));
    if !decision.allowed {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_secs));
    }
}

async fn health(Extension(state): Extension<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "version": crate::version::VERSION,
            "voteRateLimit": {
                "max": state.config.vote_rate_limit_max,
                "windowSecs": state.config.vote_rate_limit_window_secs,
            },
        }
    }))
}

async fn fallback_not_found() -> ApiError {
    ApiError::not_found("not found")
}

async fn list_features(
    Extension(state): Extension<AppState>,
) -> Result<Json<Envelope<Vec<FeatureWithCount>>>, ApiError> {
    let features = state.store.list_features().await.map_err(|e| {
        error!(error = %e, "failed to fetch features");
        ApiError::internal("Failed to fetch features")
    })?;
    Ok(Json(Envelope::ok(features)))
}

async fn create_feature(
    Extension(state): Extension<AppState>,
    ApiJson(req): ApiJson<CreateFeatureRequest>,
) -> Result<(StatusCode, Json<Envelope<Feature>>), ApiError> {
    let new = NewFeature::validate(req)?;
    let feature = state.store.create_feature(&new).await.map_err(|e| {
        error!(error = %e, "failed to create feature");
        ApiError::internal("Failed to create feature")
    })?;
    debug!(feature_id = feature.id, "feature created");
    Ok((StatusCode::CREATED, Json(Envelope::ok(feature))))
}

async fn get_feature(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<FeatureWithCount>>, ApiError> {
    let feature_id = parse_feature_id(&id)?;
    let feature = state
        .store
        .get_feature(feature_id)
        .await
        .map_err(|e| {
            error!(feature_id, error = %e, "failed to fetch feature");
            ApiError::internal("Failed to fetch feature")
        })?
        .ok_or_else(|| ApiError::not_found("Feature not found"))?;
    Ok(Json(Envelope::ok(feature)))
}

async fn vote_feature(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Voter(voter): Voter,
) -> Result<Json<Envelope<Feature>>, ApiError> {
    let feature_id = parse_feature_id(&id)?;
    match cast_vote(&state.store, feature_id, &voter).await {
        Ok(feature) => {
            debug!(feature_id, votes = feature.votes, "vote recorded");
            Ok(Json(Envelope::ok(feature).with_message(VOTE_RECORDED_MESSAGE)))
        }
        Err(VoteError::NotFound { .. }) => Err(ApiError::not_found("Feature not found")),
        Err(VoteError::AlreadyVoted { .. }) => {
            Err(ApiError::conflict("You have already voted for this feature"))
        }
        Err(VoteError::Store(e)) => {
            error!(feature_id, voter = %voter, error = %e, "failed to record vote");
            Err(ApiError::internal("Failed to record vote"))
        }
    }
}
