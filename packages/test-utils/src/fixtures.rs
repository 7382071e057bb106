use crate::{ApiData, TestServer};
use chrono::{DateTime, TimeZone, Utc};
use duel_sdk::{
    AddressResolver, ChallengeInvite, ClientEvent, ConnectionState, Difficulty, DuelClient,
    Friend, LeaderboardEntry, MatchOutcome, MatchSummary, NoopLogger, Notification,
    PublicProfile, SignalingClient, SignalingConfig, WsConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait used by fixture helpers
pub const WAIT: Duration = Duration::from_secs(5);

/// High-level fixture for SDK tests
///
/// Provides a running mock backend seeded with [`sample_data`], a resolver
/// pinned to it, and an authenticated REST client.
///
/// ```rust,ignore
/// let duel = TestDuel::new().await?;
/// let (alice, mut events) = duel.signaling_client("alice").await?;
///
/// duel.server.broker.publish_json(
///     "/topic/user/alice",
///     &serde_json::json!({"matchId": "m1", "opponent": "bob"}),
/// );
/// let found = next_event(&mut events, |e| matches!(e, ClientEvent::MatchFound { .. })).await?;
/// ```
pub struct TestDuel {
    pub server: TestServer,
    pub resolver: Arc<AddressResolver>,
    pub client: DuelClient,
}

pub const TEST_TOKEN: &str = "test-token";

impl TestDuel {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_data(sample_data()).await
    }

    pub async fn with_data(data: ApiData) -> anyhow::Result<Self> {
        let server = TestServer::with_data(data).await?;
        server.api.require_token(TEST_TOKEN);

        let resolver = Arc::new(AddressResolver::fixed(&server.base_url, Arc::new(NoopLogger))?);
        let client = DuelClient::new(resolver.clone(), Arc::new(NoopLogger)).with_token(TEST_TOKEN);

        Ok(Self {
            server,
            resolver,
            client,
        })
    }

    /// Signaling config suited to a local broker: short retry, no heart-beats
    pub fn signaling_config() -> SignalingConfig {
        SignalingConfig::default()
            .with_reconnect_interval(Duration::from_millis(200))
            .with_heartbeat(Duration::ZERO, Duration::ZERO)
    }

    /// Unconnected signaling client against this backend
    pub fn signaling(&self, config: SignalingConfig) -> SignalingClient {
        SignalingClient::new(config, self.resolver.clone(), WsConnector)
    }

    /// Signaling client connected as `identity`, with its personal channel live on the broker
    pub async fn signaling_client(
        &self,
        identity: &str,
    ) -> anyhow::Result<(SignalingClient, mpsc::UnboundedReceiver<ClientEvent>)> {
        let client = self.signaling(Self::signaling_config());
        let events = client.observe();
        client.connect(identity)?;

        wait_for_state(&client, ConnectionState::Connected).await?;
        self.server
            .broker
            .wait_for_subscribers(&format!("/topic/user/{}", identity), 1, WAIT)
            .await?;
        Ok((client, events))
    }
}

/// Wait until `client` reports `state`
pub async fn wait_for_state(client: &SignalingClient, state: ConnectionState) -> anyhow::Result<()> {
    let mut watch = client.state_watch();
    tokio::time::timeout(WAIT, watch.wait_for(|current| *current == state))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for {} (now {})", state, client.state()))?
        .map_err(|_| anyhow::anyhow!("signaling client shut down"))?;
    Ok(())
}

/// Next event matching `predicate`, skipping the rest
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    mut predicate: impl FnMut(&ClientEvent) -> bool,
) -> anyhow::Result<ClientEvent> {
    tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for event"))?
    .ok_or_else(|| anyhow::anyhow!("event stream closed"))
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn sample_profile(username: &str, rating: i32, wins: u32, losses: u32) -> PublicProfile {
    PublicProfile {
        username: username.to_string(),
        display_name: None,
        rating,
        rank: None,
        wins,
        losses,
        joined_at: Some(at(1, 9)),
        recent_matches: Vec::new(),
    }
}

/// Four ranked players, a match history for the authenticated user, one
/// friend, a pending request from dave and two notifications
pub fn sample_data() -> ApiData {
    let players = [
        ("alice", 1610, 12, 3),
        ("bob", 1540, 9, 6),
        ("carol", 1475, 5, 5),
        ("dave", 1200, 1, 4),
    ];

    let mut data = ApiData::default();
    for (rank, (username, rating, wins, losses)) in players.into_iter().enumerate() {
        let rank = rank as u32 + 1;
        data.leaderboard.push(LeaderboardEntry {
            rank,
            username: username.to_string(),
            rating,
            wins,
            losses,
        });
        let mut profile = sample_profile(username, rating, wins, losses);
        profile.rank = Some(rank);
        data.profiles.insert(username.to_string(), profile);
    }

    data.history = vec![
        MatchSummary {
            match_id: "m2".into(),
            opponent: "bob".into(),
            outcome: MatchOutcome::Win,
            difficulty: Some(Difficulty::Hard),
            rating_change: Some(16),
            played_at: at(3, 18),
        },
        MatchSummary {
            match_id: "m1".into(),
            opponent: "carol".into(),
            outcome: MatchOutcome::Loss,
            difficulty: Some(Difficulty::Easy),
            rating_change: Some(-9),
            played_at: at(2, 20),
        },
    ];
    data.friends = vec![Friend {
        username: "bob".into(),
        online: true,
        rating: Some(1540),
    }];
    data.incoming_requests = vec!["dave".into()];
    data.challenges = vec![ChallengeInvite {
        id: "c1".into(),
        from: "carol".into(),
        to: "alice".into(),
        difficulty: Some(Difficulty::Medium),
        created_at: at(4, 10),
    }];
    data.notifications = vec![
        Notification {
            id: "n1".into(),
            kind: "FRIEND_REQUEST".into(),
            message: "dave sent you a friend request".into(),
            read: false,
            created_at: at(4, 8),
        },
        Notification {
            id: "n2".into(),
            kind: "MATCH_RESULT".into(),
            message: "You beat bob".into(),
            read: true,
            created_at: at(3, 18),
        },
    ];
    data
}
