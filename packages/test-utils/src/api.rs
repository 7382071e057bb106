//! In-process REST backend
//!
//! Serves the `/api` routes the SDK's `DuelClient` calls from in-memory data.
//! Authenticated routes require `Authorization: Bearer <token>` once a token is
//! configured. Every request is counted per route so tests can verify caching.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use duel_sdk::models::{
    ChallengeInvite, Friend, FriendRequest, LeaderboardEntry, MatchSummary, Notification,
    PublicProfile,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Backing data for the mock API
#[derive(Debug, Clone, Default)]
pub struct ApiData {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub profiles: HashMap<String, PublicProfile>,
    pub history: Vec<MatchSummary>,
    pub friends: Vec<Friend>,
    /// Usernames with a pending request to the authenticated user
    pub incoming_requests: Vec<String>,
    /// Usernames the authenticated user has asked to befriend
    pub outgoing_requests: Vec<String>,
    pub challenges: Vec<ChallengeInvite>,
    pub notifications: Vec<Notification>,
}

struct Inner {
    data: Mutex<ApiData>,
    token: Mutex<Option<String>>,
    healthy: AtomicBool,
    hits: Mutex<HashMap<&'static str, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the mock API state; cheap to clone
#[derive(Clone)]
pub struct MockApi {
    inner: Arc<Inner>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new(ApiData::default())
    }
}

impl MockApi {
    pub fn new(data: ApiData) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(data),
                token: Mutex::new(None),
                healthy: AtomicBool::new(true),
                hits: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Require this bearer token on authenticated routes
    pub fn require_token(&self, token: impl Into<String>) {
        *lock(&self.inner.token) = Some(token.into());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Mutate the backing data in place
    pub fn update(&self, f: impl FnOnce(&mut ApiData)) {
        f(&mut lock(&self.inner.data));
    }

    pub fn data(&self) -> ApiData {
        lock(&self.inner.data).clone()
    }

    /// Requests served by `route` so far
    pub fn hits(&self, route: &str) -> usize {
        lock(&self.inner.hits).get(route).copied().unwrap_or(0)
    }

    /// `/api/...` routes serving this backend
    pub fn routes<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/api/health", get(health))
            .route("/api/leaderboard", get(leaderboard))
            .route("/api/users/{username}/profile", get(profile))
            .route("/api/matches/history", get(match_history))
            .route("/api/friends", get(friends))
            .route("/api/friends/requests", post(send_friend_request))
            .route("/api/friends/requests/{from}/accept", put(accept_friend_request))
            .route("/api/friends/{username}", delete(remove_friend))
            .route("/api/challenges", get(challenges))
            .route("/api/notifications", get(notifications))
            .route("/api/notifications/{id}/read", put(mark_read))
            .with_state(self.clone())
    }

    fn hit(&self, route: &'static str) {
        *lock(&self.inner.hits).entry(route).or_insert(0) += 1;
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(token) = lock(&self.inner.token).clone() else {
            return Ok(());
        };
        let presented = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented == Some(token.as_str()) {
            Ok(())
        } else {
            Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
    }
}

/// JSON error body matching the real backend
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} not found", what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": self.status.as_u16(),
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    size: u32,
}

fn default_page_size() -> u32 {
    20
}

async fn health(State(api): State<MockApi>) -> Response {
    api.hit("health");
    if api.inner.healthy.load(Ordering::Relaxed) {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DOWN").into_response()
    }
}

async fn leaderboard(
    State(api): State<MockApi>,
    Query(query): Query<PageQuery>,
) -> Json<Vec<LeaderboardEntry>> {
    api.hit("leaderboard");
    let data = lock(&api.inner.data);
    let start = (query.page as usize).saturating_mul(query.size as usize);
    let page = data
        .leaderboard
        .iter()
        .skip(start)
        .take(query.size as usize)
        .cloned()
        .collect();
    Json(page)
}

async fn profile(
    State(api): State<MockApi>,
    Path(username): Path<String>,
) -> ApiResult<Json<PublicProfile>> {
    api.hit("profile");
    lock(&api.inner.data)
        .profiles
        .get(&username)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user"))
}

async fn match_history(
    State(api): State<MockApi>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<MatchSummary>>> {
    api.hit("history");
    api.authorize(&headers)?;
    Ok(Json(lock(&api.inner.data).history.clone()))
}

async fn friends(State(api): State<MockApi>, headers: HeaderMap) -> ApiResult<Json<Vec<Friend>>> {
    api.hit("friends");
    api.authorize(&headers)?;
    Ok(Json(lock(&api.inner.data).friends.clone()))
}

async fn send_friend_request(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Json(request): Json<FriendRequest>,
) -> ApiResult<StatusCode> {
    api.hit("friend_request");
    api.authorize(&headers)?;
    let mut data = lock(&api.inner.data);
    if !data.profiles.contains_key(&request.username) {
        return Err(ApiError::not_found("user"));
    }
    if data.friends.iter().any(|f| f.username == request.username) {
        return Err(ApiError::new(StatusCode::CONFLICT, "already friends"));
    }
    if !data.outgoing_requests.contains(&request.username) {
        data.outgoing_requests.push(request.username);
    }
    Ok(StatusCode::CREATED)
}

async fn accept_friend_request(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Path(from): Path<String>,
) -> ApiResult<StatusCode> {
    api.hit("accept_request");
    api.authorize(&headers)?;
    let mut data = lock(&api.inner.data);
    let Some(index) = data.incoming_requests.iter().position(|u| *u == from) else {
        return Err(ApiError::not_found("friend request"));
    };
    data.incoming_requests.remove(index);
    let rating = data.profiles.get(&from).map(|p| p.rating);
    data.friends.push(Friend {
        username: from,
        online: false,
        rating,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_friend(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    api.hit("remove_friend");
    api.authorize(&headers)?;
    let mut data = lock(&api.inner.data);
    let before = data.friends.len();
    data.friends.retain(|f| f.username != username);
    if data.friends.len() == before {
        return Err(ApiError::not_found("friend"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn challenges(
    State(api): State<MockApi>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ChallengeInvite>>> {
    api.hit("challenges");
    api.authorize(&headers)?;
    Ok(Json(lock(&api.inner.data).challenges.clone()))
}

async fn notifications(
    State(api): State<MockApi>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Notification>>> {
    api.hit("notifications");
    api.authorize(&headers)?;
    Ok(Json(lock(&api.inner.data).notifications.clone()))
}

async fn mark_read(
    State(api): State<MockApi>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    api.hit("mark_read");
    api.authorize(&headers)?;
    let mut data = lock(&api.inner.data);
    match data.notifications.iter_mut().find(|n| n.id == id) {
        Some(notification) => {
            notification.read = true;
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found("notification")),
    }
}
