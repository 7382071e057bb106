mod config;
mod player;

use anyhow::{Context, Result};
use config::Config;
use duel_sdk::{
    AddressResolver, DuelClient, HttpProber, LeaderboardPage, SignalingClient, TracingLogger,
    WsConnector,
};
use player::{Player, PlayerConfig, Solution};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("⚔️  Starting Duel CLI");

    // Load configuration
    let config = Config::load().context("Failed to load apps/cli/config.toml")?;

    let resolver = Arc::new(
        AddressResolver::new(
            config.backend.clone(),
            Arc::new(HttpProber::default()),
            Arc::new(TracingLogger),
        )
        .context("Invalid backend address")?,
    );
    let address = resolver.resolve().await;
    info!("📡 Backend: {} ({:?})", address.http_base, address.source);
    info!("👤 Playing as {}", config.player.identity);

    let mut client = DuelClient::new(resolver.clone(), Arc::new(TracingLogger));
    client.set_token(config.player.token.clone());

    match client.leaderboard(LeaderboardPage { page: 0, size: 5 }).await {
        Ok(entries) => {
            for entry in entries {
                info!("#{} {} ({})", entry.rank, entry.username, entry.rating);
            }
        }
        Err(e) => warn!("Leaderboard unavailable: {}", e),
    }

    if config.player.token.is_some() {
        match client.unread_count().await {
            Ok(count) => info!("🔔 {} unread notifications", count),
            Err(e) => warn!("Notifications unavailable: {}", e),
        }
    }

    let solution = match &config.solution {
        Some(section) => Some(Solution {
            language: section.language.clone(),
            code: section.read()?,
        }),
        None => None,
    };

    let signaling = SignalingClient::new(config.signaling.clone(), resolver, WsConnector);

    let player = Player::new(
        PlayerConfig {
            identity: config.player.identity.clone(),
            difficulty: config.player.difficulty,
            rounds: config.player.rounds,
            notifications: config.player.token.is_some(),
            solution,
        },
        signaling,
    );

    let records = player.run().await?;
    let wins = records
        .iter()
        .filter(|r| r.won_by(&config.player.identity))
        .count();
    for record in &records {
        info!(
            "{} vs {}: {}",
            record.match_id,
            record.opponent,
            record.winner.as_deref().unwrap_or("no winner")
        );
    }
    info!("✅ Finished {} matches, won {}", records.len(), wins);

    Ok(())
}
