//! Duel messaging contract: topics, outbound actions and inbound payloads

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SdkResult;

/// Broker topic the client subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Personal channel carrying match-found pushes
    User(String),
    /// Per-match channel carrying the terminal result
    Match(String),
    /// Personal notification feed
    Notifications(String),
}

impl Topic {
    pub fn destination(&self) -> String {
        match self {
            Topic::User(identity) => format!("/topic/user/{}", identity),
            Topic::Match(match_id) => format!("/topic/match/{}", match_id),
            Topic::Notifications(identity) => format!("/topic/notifications/{}", identity),
        }
    }

    /// Parse a broker destination back into a topic
    pub fn from_destination(destination: &str) -> Option<Self> {
        let rest = destination.strip_prefix("/topic/")?;
        let (kind, key) = rest.split_once('/')?;
        if key.is_empty() {
            return None;
        }
        match kind {
            "user" => Some(Topic::User(key.to_string())),
            "match" => Some(Topic::Match(key.to_string())),
            "notifications" => Some(Topic::Notifications(key.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

/// Matchmaking difficulty tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty {:?}", other)),
        }
    }
}

/// Action name used in logs and drop signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    JoinQueue,
    LeaveQueue,
    SendChallenge,
    SubmitCode,
    Subscribe,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::JoinQueue => "queue.join",
            Action::LeaveQueue => "queue.leave",
            Action::SendChallenge => "challenge.send",
            Action::SubmitCode => "match.submit",
            Action::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent to an `/app/...` destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    JoinQueue {
        identity: String,
        difficulty: Difficulty,
    },
    LeaveQueue {
        identity: String,
    },
    SendChallenge {
        identity: String,
        target: String,
    },
    #[serde(rename_all = "camelCase")]
    SubmitCode {
        identity: String,
        match_id: String,
        code: String,
        language: String,
    },
}

impl OutboundMessage {
    pub fn action(&self) -> Action {
        match self {
            OutboundMessage::JoinQueue { .. } => Action::JoinQueue,
            OutboundMessage::LeaveQueue { .. } => Action::LeaveQueue,
            OutboundMessage::SendChallenge { .. } => Action::SendChallenge,
            OutboundMessage::SubmitCode { .. } => Action::SubmitCode,
        }
    }

    pub fn destination(&self) -> &'static str {
        match self {
            OutboundMessage::JoinQueue { .. } => "/app/queue/join",
            OutboundMessage::LeaveQueue { .. } => "/app/queue/leave",
            OutboundMessage::SendChallenge { .. } => "/app/challenge/send",
            OutboundMessage::SubmitCode { .. } => "/app/match/submit",
        }
    }

    pub fn body(&self) -> SdkResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Problem the match is played on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProblemRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Opponent has been paired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFound {
    pub match_id: String,
    pub opponent: String,
    #[serde(default)]
    pub problem: Option<ProblemRef>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// Match concluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: String,
    /// Absent for draws and abandoned matches
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// How a notification push changes the unread badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadUpdate {
    /// Server sent the authoritative count
    Absolute(u32),
    /// No count supplied; one new unread item
    Increment,
}

impl UnreadUpdate {
    /// Apply to a locally held count
    pub fn apply(&self, current: u32) -> u32 {
        match self {
            UnreadUpdate::Absolute(count) => *count,
            UnreadUpdate::Increment => current.saturating_add(1),
        }
    }
}

/// Generic notification pushed to the personal feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPush {
    pub kind: String,
    pub message: String,
    pub unread: UnreadUpdate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    unread_count: Option<u32>,
}

impl From<RawNotification> for NotificationPush {
    fn from(raw: RawNotification) -> Self {
        Self {
            kind: raw.kind,
            message: raw.message,
            unread: raw
                .unread_count
                .map_or(UnreadUpdate::Increment, UnreadUpdate::Absolute),
        }
    }
}

/// Decoded inbound push; the variant is chosen by the topic it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    MatchFound(MatchFound),
    MatchResult(MatchResult),
    Notification(NotificationPush),
}

impl InboundEvent {
    /// Decode a MESSAGE body received on `topic`
    pub fn decode(topic: &Topic, body: &str) -> SdkResult<Self> {
        Ok(match topic {
            Topic::User(_) => InboundEvent::MatchFound(serde_json::from_str(body)?),
            Topic::Match(_) => InboundEvent::MatchResult(serde_json::from_str(body)?),
            Topic::Notifications(_) => {
                InboundEvent::Notification(serde_json::from_str::<RawNotification>(body)?.into())
            }
        })
    }
}
