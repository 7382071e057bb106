//! REST payloads
//!
//! The backend speaks camelCase JSON with RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::Difficulty;

/// One row of the global ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub rating: i32,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
}

/// Leaderboard page selector, also the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaderboardPage {
    pub page: u32,
    pub size: u32,
}

impl Default for LeaderboardPage {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchOutcome::Win => "win",
            MatchOutcome::Loss => "loss",
            MatchOutcome::Draw => "draw",
        };
        f.write_str(s)
    }
}

/// A finished match from one player's point of view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: String,
    pub opponent: String,
    pub outcome: MatchOutcome,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub rating_change: Option<i32>,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub rating: i32,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recent_matches: Vec<MatchSummary>,
}

impl PublicProfile {
    /// Share of decided matches won, `None` before the first one
    pub fn win_rate(&self) -> Option<f64> {
        let played = self.wins + self.losses;
        (played > 0).then(|| f64::from(self.wins) / f64::from(played))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub username: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub rating: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub username: String,
}

/// Pending direct-match invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInvite {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub created_at: DateTime<Utc>,
}

/// Stored notification as listed by the REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Error body returned by the backend
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
