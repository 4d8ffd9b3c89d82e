//! Registry of live matches, indexed by match id and by player id

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ws::protocol::MatchType;

use super::events::EventSink;
use super::lifecycle::{LifecycleConfig, MatchInfo};
use super::r#match::{GameMatch, MatchHandle};

/// Request to create one match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub id: Uuid,
    pub player1: Uuid,
    pub player2: Uuid,
    pub match_type: MatchType,
    pub tournament_id: Option<Uuid>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("match {0} already exists")]
    AlreadyExists(Uuid),

    #[error("player {0} is already in a match")]
    PlayerBusy(Uuid),

    #[error("a match needs two distinct players")]
    SamePlayer,

    #[error("match {0} not found")]
    NotFound(Uuid),
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    player_matches: DashMap<Uuid, Uuid>,
    config: LifecycleConfig,
    sink: Arc<dyn EventSink>,
}

impl MatchRegistry {
    pub fn new(config: LifecycleConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            matches: DashMap::new(),
            player_matches: DashMap::new(),
            config,
            sink,
        }
    }

    /// Create a match and spawn its task. The match removes itself when it ends.
    pub fn create_match(self: &Arc<Self>, request: NewMatch) -> Result<MatchHandle, RegistryError> {
        if request.player1 == request.player2 {
            return Err(RegistryError::SamePlayer);
        }

        let players = [request.player1, request.player2];
        let slot = match self.matches.entry(request.id) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyExists(request.id)),
            Entry::Vacant(slot) => slot,
        };

        // Claim both players while the match slot is held.
        for (i, player) in players.iter().enumerate() {
            match self.player_matches.entry(*player) {
                Entry::Occupied(_) => {
                    for claimed in &players[..i] {
                        self.player_matches.remove(claimed);
                    }
                    return Err(RegistryError::PlayerBusy(*player));
                }
                Entry::Vacant(entry) => {
                    entry.insert(request.id);
                }
            }
        }

        let info = MatchInfo {
            id: request.id,
            players,
            match_type: request.match_type,
            tournament_id: request.tournament_id,
            is_final: request.is_final,
        };
        let seed = rand::random::<u64>();
        let (game_match, handle) =
            GameMatch::new(info, self.config.clone(), self.sink.clone(), seed);
        slot.insert(handle.clone());

        info!(
            match_id = %request.id,
            player1 = %request.player1,
            player2 = %request.player2,
            match_type = ?request.match_type,
            "Created new match"
        );

        let registry = Arc::clone(self);
        let match_id = request.id;
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove_match(&match_id);
            info!(match_id = %match_id, "Match removed from registry");
        });

        Ok(handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn lookup(&self, id: &Uuid) -> Result<MatchHandle, RegistryError> {
        self.get(id).ok_or(RegistryError::NotFound(*id))
    }

    #[cfg(test)]
    pub fn match_for_player(&self, player_id: &Uuid) -> Option<MatchHandle> {
        let match_id = *self.player_matches.get(player_id)?.value();
        self.get(&match_id)
    }

    /// Forget a match and release its players
    pub fn remove_match(&self, id: &Uuid) -> Option<MatchHandle> {
        let (_, handle) = self.matches.remove(id)?;
        for player in handle.info.players {
            if self
                .player_matches
                .remove_if(&player, |_, match_id| match_id == id)
                .is_none()
            {
                warn!(match_id = %id, player = %player, "Player was not indexed to this match");
            }
        }
        Some(handle)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn players_in_matches(&self) -> usize {
        self.player_matches.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::game::events::RecordingSink;
    use crate::game::r#match::MatchCommand;
    use crate::ws::protocol::Side;

    fn registry() -> Arc<MatchRegistry> {
        Arc::new(MatchRegistry::new(
            LifecycleConfig::default(),
            Arc::new(RecordingSink::default()),
        ))
    }

    fn request(player1: Uuid, player2: Uuid) -> NewMatch {
        NewMatch {
            id: Uuid::new_v4(),
            player1,
            player2,
            match_type: MatchType::Quick,
            tournament_id: None,
            is_final: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_indexes_by_match_and_player() {
        let registry = registry();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let handle = assert_ok!(registry.create_match(request(a, b)));

        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.players_in_matches(), 2);
        assert!(registry.get(&handle.id()).is_some());
        assert_eq!(
            registry.match_for_player(&b).map(|h| h.id()),
            Some(handle.id())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ids_and_busy_players_are_refused() {
        let registry = registry();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let first = request(a, b);
        assert_ok!(registry.create_match(first.clone()));

        let duplicate = NewMatch {
            player1: c,
            player2: Uuid::new_v4(),
            ..first
        };
        assert_eq!(
            assert_err!(registry.create_match(duplicate)),
            RegistryError::AlreadyExists(first.id)
        );

        assert_eq!(
            assert_err!(registry.create_match(request(c, b))),
            RegistryError::PlayerBusy(b)
        );
        // The refused request must not leave `c` claimed.
        assert!(registry.match_for_player(&c).is_none());
        assert_eq!(
            assert_err!(registry.create_match(request(c, c))),
            RegistryError::SamePlayer
        );
        assert_eq!(registry.active_matches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_match_removes_itself() {
        let registry = registry();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let handle = assert_ok!(registry.create_match(request(a, b)));

        let socket = handle.open_socket(Side::P1);
        handle
            .send(MatchCommand::Connected {
                side: Side::P1,
                socket,
            })
            .await;
        handle.send(MatchCommand::Surrender(Side::P1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(registry.active_matches(), 0);
        assert!(registry.match_for_player(&a).is_none());
        // Players are free again.
        assert_ok!(registry.create_match(request(a, b)));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_match_is_not_found() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert!(registry.remove_match(&id).is_none());
        assert_eq!(
            assert_err!(registry.lookup(&id)),
            RegistryError::NotFound(id)
        );
    }
}
