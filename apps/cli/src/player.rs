//! Automated player: queue, play, report, repeat

use anyhow::{bail, Result};
use duel_sdk::{
    ClientEvent, ConnectionState, Difficulty, MatchFound, SdkError, SdkResult, SignalingClient,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Code submitted as soon as a match starts
#[derive(Debug, Clone)]
pub struct Solution {
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub identity: String,
    pub difficulty: Difficulty,
    pub rounds: u32,
    /// Follow the notification feed; it has to be re-subscribed after every reconnect
    pub notifications: bool,
    pub solution: Option<Solution>,
}

/// Outcome of one finished match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: String,
    pub opponent: String,
    pub winner: Option<String>,
}

impl MatchRecord {
    pub fn won_by(&self, identity: &str) -> bool {
        self.winner.as_deref() == Some(identity)
    }
}

/// Match in progress
struct ActiveMatch {
    found: MatchFound,
    submitted: bool,
}

pub struct Player {
    config: PlayerConfig,
    client: SignalingClient,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    current: Option<ActiveMatch>,
    records: Vec<MatchRecord>,
}

impl Player {
    pub fn new(config: PlayerConfig, client: SignalingClient) -> Self {
        let events = client.observe();
        Self {
            config,
            client,
            events,
            current: None,
            records: Vec::new(),
        }
    }

    /// Play `rounds` matches, then disconnect
    pub async fn run(mut self) -> Result<Vec<MatchRecord>> {
        self.client.connect(self.config.identity.clone())?;

        while (self.records.len() as u32) < self.config.rounds {
            let Some(event) = self.events.recv().await else {
                bail!("signaling client stopped");
            };
            self.handle(event)?;
        }

        self.client.disconnect().await;
        Ok(self.records)
    }

    fn handle(&mut self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::StateChanged(ConnectionState::Connected) => {
                if self.config.notifications {
                    offline_ok(
                        "subscribe to notifications",
                        self.client.subscribe_to_notifications(),
                    )?;
                }
                match self.current.as_ref().map(|active| active.found.match_id.clone()) {
                    // Match subscriptions do not survive a reconnect
                    Some(match_id) => {
                        info!("🔁 Reconnected during match {}", match_id);
                        self.play_current()?;
                    }
                    None => {
                        info!("🎯 Connected, joining {:?} queue", self.config.difficulty);
                        offline_ok("join queue", self.client.join_queue(self.config.difficulty))?;
                    }
                }
            }
            ClientEvent::StateChanged(ConnectionState::Failed) => {
                bail!("gave up reconnecting to the broker");
            }
            ClientEvent::StateChanged(state) => debug!("state: {}", state),
            ClientEvent::MatchFound { payload, .. } => {
                info!("⚔️  Matched against {} (match {})", payload.opponent, payload.match_id);
                self.current = Some(ActiveMatch {
                    found: payload,
                    submitted: false,
                });
                self.play_current()?;
            }
            ClientEvent::MatchResult { payload, .. } => {
                let Some(active) = self
                    .current
                    .take_if(|active| active.found.match_id == payload.match_id)
                else {
                    debug!("result for untracked match {}", payload.match_id);
                    return Ok(());
                };
                let record = MatchRecord {
                    match_id: active.found.match_id,
                    opponent: active.found.opponent,
                    winner: payload.winner,
                };
                if record.won_by(&self.config.identity) {
                    info!("🏆 Won match {}", record.match_id);
                } else {
                    info!("Match {} over, winner: {:?}", record.match_id, record.winner);
                }

                self.client.clear_match_data();
                offline_ok("leave match", self.client.unsubscribe_from_match(&record.match_id))?;
                self.records.push(record);
                if (self.records.len() as u32) < self.config.rounds {
                    // Offline here means the next Connected event re-queues
                    offline_ok("join queue", self.client.join_queue(self.config.difficulty))?;
                }
            }
            ClientEvent::Notification { payload, .. } => {
                info!("🔔 {}: {}", payload.kind, payload.message);
            }
            ClientEvent::SendDropped { action } => warn!("{} dropped while offline", action),
            ClientEvent::Malformed { topic, error } => {
                warn!("malformed message on {:?}: {}", topic, error)
            }
            ClientEvent::BrokerError { message } => warn!("broker error: {}", message),
        }
        Ok(())
    }

    /// Listen for the current match result and submit the solution once
    fn play_current(&mut self) -> Result<()> {
        let Some(active) = self.current.as_mut() else {
            return Ok(());
        };
        let match_id = active.found.match_id.clone();
        if !offline_ok("subscribe to match", self.client.subscribe_to_match(&match_id))? {
            return Ok(());
        }

        if let (Some(solution), false) = (&self.config.solution, active.submitted) {
            let submitted = offline_ok(
                "submit solution",
                self.client.submit_code(&match_id, &solution.code, &solution.language),
            )?;
            if submitted {
                info!("📤 Submitted {} solution", solution.language);
                active.submitted = true;
            }
        }
        Ok(())
    }
}

/// `Ok(false)` when the action was refused for lack of a session; the next
/// `Connected` event retries it
fn offline_ok(what: &str, result: SdkResult<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(SdkError::NotConnected { state }) => {
            warn!("could not {} while {}", what, state);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_test_utils::{TestDuel, WAIT};
    use serde_json::json;

    fn config(rounds: u32, solution: Option<Solution>) -> PlayerConfig {
        PlayerConfig {
            identity: "alice".into(),
            difficulty: Difficulty::Easy,
            rounds,
            notifications: false,
            solution,
        }
    }

    #[tokio::test]
    async fn test_plays_one_round() {
        let duel = TestDuel::new().await.unwrap();
        let broker = duel.server.broker.clone();
        let solution = Solution {
            language: "python".into(),
            code: "print(42)".into(),
        };
        let player = Player::new(
            config(1, Some(solution)),
            duel.signaling(TestDuel::signaling_config()),
        );
        let run = tokio::spawn(player.run());

        let joins = broker.wait_for_sends("/app/queue/join", 1, WAIT).await.unwrap();
        assert_eq!(joins[0], json!({"identity": "alice", "difficulty": "easy"}));

        broker.publish_json("/topic/user/alice", &json!({"matchId": "m1", "opponent": "bob"}));
        broker
            .wait_for_subscribers("/topic/match/m1", 1, WAIT)
            .await
            .unwrap();
        let submits = broker.wait_for_sends("/app/match/submit", 1, WAIT).await.unwrap();
        assert_eq!(submits[0]["code"], "print(42)");

        broker.publish_json("/topic/match/m1", &json!({"matchId": "m1", "winner": "alice"}));
        let records = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].won_by("alice"));
        assert_eq!(records[0].opponent, "bob");
    }

    #[tokio::test]
    async fn test_resumes_match_after_connection_drop() {
        let duel = TestDuel::new().await.unwrap();
        let broker = duel.server.broker.clone();
        let solution = Solution {
            language: "rust".into(),
            code: "fn main() {}".into(),
        };
        let player = Player::new(
            config(1, Some(solution)),
            duel.signaling(TestDuel::signaling_config()),
        );
        let run = tokio::spawn(player.run());

        broker.wait_for_sends("/app/queue/join", 1, WAIT).await.unwrap();
        broker.publish_json("/topic/user/alice", &json!({"matchId": "m1", "opponent": "bob"}));
        broker.drop_connections();

        broker.wait_for_connections(2, WAIT).await.unwrap();
        broker
            .wait_for_subscribers("/topic/match/m1", 1, WAIT)
            .await
            .unwrap();
        broker.wait_for_sends("/app/match/submit", 1, WAIT).await.unwrap();
        assert!(!run.is_finished());

        broker.publish_json("/topic/match/m1", &json!({"matchId": "m1", "winner": "bob"}));
        let records = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].winner.as_deref(), Some("bob"));
        // Still in the match after reconnecting, so no second queue join
        assert_eq!(broker.sent_to("/app/queue/join").len(), 1);
    }

    #[test]
    fn test_offline_refusal_is_not_fatal() {
        let refused = Err(SdkError::NotConnected {
            state: ConnectionState::Reconnecting,
        });
        assert!(!offline_ok("join queue", refused).unwrap());
        assert!(offline_ok("join queue", Ok(())).unwrap());
        assert!(offline_ok("join queue", Err(SdkError::ClientClosed)).is_err());
    }

    #[tokio::test]
    async fn test_requeues_between_rounds_and_ignores_stray_results() {
        let duel = TestDuel::new().await.unwrap();
        let broker = duel.server.broker.clone();
        let player = Player::new(config(2, None), duel.signaling(TestDuel::signaling_config()));
        let run = tokio::spawn(player.run());

        for (round, match_id) in ["m1", "m2"].into_iter().enumerate() {
            broker
                .wait_for_sends("/app/queue/join", round + 1, WAIT)
                .await
                .unwrap();
            broker.publish_json(
                "/topic/user/alice",
                &json!({"matchId": match_id, "opponent": "carol"}),
            );
            let topic = format!("/topic/match/{}", match_id);
            broker.wait_for_subscribers(&topic, 1, WAIT).await.unwrap();
            broker.publish_json(&topic, &json!({"matchId": "other", "winner": "carol"}));
            broker.publish_json(&topic, &json!({"matchId": match_id, "winner": "carol"}));
        }

        let records = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.match_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(records.iter().all(|r| !r.won_by("alice")));
        assert!(broker.sent_to("/app/match/submit").is_empty());
    }
}
