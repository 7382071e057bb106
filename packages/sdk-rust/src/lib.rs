//! Duel SDK
//!
//! Rust SDK for the code-duel backend.
//!
//! This SDK provides:
//! - Signaling client for matchmaking, match results and notifications over STOMP
//! - Backend address resolution with local-first probing
//! - REST client for leaderboard, profiles, friends and notifications
//! - Generic TTL cache
//! - Configurable logging
//!
//! # Example
//!
//! ```no_run
//! use duel_sdk::{
//!     AddressResolver, DuelClient, HttpProber, LeaderboardPage, ResolverConfig, SignalingClient,
//!     SignalingConfig, TracingLogger, WsConnector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> duel_sdk::SdkResult<()> {
//!     let logger = Arc::new(TracingLogger);
//!     let resolver = Arc::new(AddressResolver::new(
//!         ResolverConfig::new("https://duel.example.com"),
//!         Arc::new(HttpProber::default()),
//!         logger.clone(),
//!     )?);
//!
//!     let rest = DuelClient::new(resolver.clone(), logger);
//!     let top = rest.leaderboard(LeaderboardPage::default()).await?;
//!     println!("{} ranked players", top.len());
//!
//!     let signaling = SignalingClient::new(SignalingConfig::default(), resolver, WsConnector);
//!     signaling.connect("alice")?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod logger;
pub mod models;
pub mod protocol;
pub mod resolver;
pub mod signaling;
pub mod stomp;
pub mod transport;

pub use cache::{CacheStats, TtlCache};
pub use client::DuelClient;
pub use error::{SdkError, SdkResult};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use models::{
    ChallengeInvite, Friend, LeaderboardEntry, LeaderboardPage, MatchOutcome, MatchSummary,
    Notification, PublicProfile,
};
pub use protocol::{
    Action, Difficulty, InboundEvent, MatchFound, MatchResult, NotificationPush, OutboundMessage,
    ProblemRef, Topic, UnreadUpdate,
};
pub use resolver::{AddressResolver, AddressSource, BackendAddress, HttpProber, Prober, ResolverConfig};
pub use signaling::{ClientEvent, ConnectionState, SignalingClient, SignalingConfig};
pub use transport::{Connector, Transport, WsConnector, WsTransport};
