use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStats, TtlCache};
use crate::error::{SdkError, SdkResult};
use crate::logger::Logger;
use crate::models::*;
use crate::resolver::AddressResolver;

/// How long leaderboard pages and public profiles stay cached
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// REST API client for the duel backend
///
/// The base address comes from the shared [`AddressResolver`], so the REST and
/// signaling clients always talk to the same backend.
#[derive(Clone)]
pub struct DuelClient {
    resolver: Arc<AddressResolver>,
    client: Client,
    token: Option<String>,
    leaderboard: TtlCache<LeaderboardPage, Vec<LeaderboardEntry>>,
    profiles: TtlCache<String, PublicProfile>,
    logger: Arc<dyn Logger>,
}

impl DuelClient {
    pub fn new(resolver: Arc<AddressResolver>, logger: Arc<dyn Logger>) -> Self {
        Self::with_cache_ttl(resolver, logger, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        resolver: Arc<AddressResolver>,
        logger: Arc<dyn Logger>,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            client: Client::new(),
            token: None,
            leaderboard: TtlCache::new("leaderboard", ttl, Arc::clone(&logger)),
            profiles: TtlCache::new("profiles", ttl, Arc::clone(&logger)),
            logger,
        }
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Health check
    pub async fn health(&self) -> SdkResult<String> {
        let response = self.get(&["health"]).await?.send().await?;
        Ok(check(response).await?.text().await?)
    }

    // ===== Public Endpoints =====

    /// Get one leaderboard page, served from cache while fresh
    pub async fn leaderboard(&self, page: LeaderboardPage) -> SdkResult<Vec<LeaderboardEntry>> {
        if let Some(entries) = self.leaderboard.get(&page) {
            return Ok(entries);
        }

        let request = self
            .get(&["leaderboard"])
            .await?
            .query(&[("page", page.page), ("size", page.size)]);
        let entries: Vec<LeaderboardEntry> = json(request.send().await?).await?;
        self.leaderboard.insert(page, entries.clone());
        Ok(entries)
    }

    /// Get a public profile, served from cache while fresh
    pub async fn profile(&self, username: &str) -> SdkResult<PublicProfile> {
        if let Some(profile) = self.profiles.get(&username.to_string()) {
            return Ok(profile);
        }

        let response = self
            .get(&["users", username, "profile"])
            .await?
            .send()
            .await?;
        let profile: PublicProfile = json(response).await?;
        self.profiles.insert(username.to_string(), profile.clone());
        Ok(profile)
    }

    /// Drop a cached profile, e.g. after a match changed its rating
    pub fn invalidate_profile(&self, username: &str) {
        self.profiles.remove(&username.to_string());
    }

    pub fn invalidate_leaderboard(&self) {
        self.leaderboard.clear();
    }

    pub fn leaderboard_cache_stats(&self) -> CacheStats {
        self.leaderboard.stats()
    }

    pub fn profile_cache_stats(&self) -> CacheStats {
        self.profiles.stats()
    }

    // ===== Authenticated Endpoints =====

    /// Matches played by the authenticated user, newest first
    pub async fn match_history(&self) -> SdkResult<Vec<MatchSummary>> {
        let response = self.get(&["matches", "history"]).await?.send().await?;
        json(response).await
    }

    pub async fn friends(&self) -> SdkResult<Vec<Friend>> {
        let response = self.get(&["friends"]).await?.send().await?;
        json(response).await
    }

    pub async fn send_friend_request(&self, username: &str) -> SdkResult<()> {
        let body = FriendRequest {
            username: username.to_string(),
        };
        let url = self.endpoint(&["friends", "requests"]).await?;
        let response = self.authorize(self.client.post(url)).json(&body).send().await?;
        check(response).await.map(drop)
    }

    pub async fn accept_friend_request(&self, from: &str) -> SdkResult<()> {
        let url = self.endpoint(&["friends", "requests", from, "accept"]).await?;
        let response = self.authorize(self.client.put(url)).send().await?;
        check(response).await.map(drop)
    }

    pub async fn remove_friend(&self, username: &str) -> SdkResult<()> {
        let url = self.endpoint(&["friends", username]).await?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        check(response).await.map(drop)
    }

    /// Pending challenges sent to or by the authenticated user
    pub async fn challenges(&self) -> SdkResult<Vec<ChallengeInvite>> {
        let response = self.get(&["challenges"]).await?.send().await?;
        json(response).await
    }

    pub async fn notifications(&self) -> SdkResult<Vec<Notification>> {
        let response = self.get(&["notifications"]).await?.send().await?;
        json(response).await
    }

    pub async fn mark_notification_read(&self, id: &str) -> SdkResult<()> {
        let url = self.endpoint(&["notifications", id, "read"]).await?;
        let response = self.authorize(self.client.put(url)).send().await?;
        check(response).await.map(drop)
    }

    /// Number of stored notifications not yet read
    pub async fn unread_count(&self) -> SdkResult<u32> {
        let unread = self
            .notifications()
            .await?
            .iter()
            .filter(|notification| !notification.read)
            .count();
        Ok(u32::try_from(unread).unwrap_or(u32::MAX))
    }

    // ===== Internal Helper Methods =====

    async fn get(&self, segments: &[&str]) -> SdkResult<RequestBuilder> {
        let url = self.endpoint(segments).await?;
        Ok(self.authorize(self.client.get(url)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn endpoint(&self, segments: &[&str]) -> SdkResult<Url> {
        let base = self.resolver.resolve().await.http_base;
        let url = api_url(&base, segments)?;
        self.logger.debug(&format!("REST {}", url));
        Ok(url)
    }
}

/// `{base}/api/{segments...}` with each segment percent-encoded
fn api_url(base: &str, segments: &[&str]) -> SdkResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| SdkError::ConnectionError(format!("invalid base address {:?}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| SdkError::ConnectionError(format!("base address {:?} cannot hold a path", base)))?
        .pop_if_empty()
        .push("api")
        .extend(segments);
    Ok(url)
}

async fn check(response: Response) -> SdkResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

async fn json<T: DeserializeOwned>(response: Response) -> SdkResult<T> {
    Ok(check(response).await?.json().await?)
}

/// Prefer the structured `message`/`error` field; fall back to the raw body
fn api_error(status: u16, body: &str) -> SdkError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    SdkError::ApiError { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_segments() {
        assert_eq!(
            api_url("http://localhost:8080", &["users", "alice", "profile"])
                .unwrap()
                .as_str(),
            "http://localhost:8080/api/users/alice/profile"
        );
        assert_eq!(
            api_url("https://duel.example.com/backend/", &["friends"])
                .unwrap()
                .as_str(),
            "https://duel.example.com/backend/api/friends"
        );
    }

    #[test]
    fn test_api_url_escapes_path_input() {
        let url = api_url("http://localhost:8080", &["friends", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/friends/a%2Fb%20c");
    }

    #[test]
    fn test_api_error_message_sources() {
        match api_error(404, r#"{"message":"user not found"}"#) {
            SdkError::ApiError { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "user not found");
            }
            other => panic!("unexpected {:?}", other),
        }
        match api_error(400, r#"{"error":"bad request"}"#) {
            SdkError::ApiError { message, .. } => assert_eq!(message, "bad request"),
            other => panic!("unexpected {:?}", other),
        }
        match api_error(502, "upstream down\n") {
            SdkError::ApiError { message, .. } => assert_eq!(message, "upstream down"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
