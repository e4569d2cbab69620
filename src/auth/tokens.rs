use diesel::prelude::*;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::auth::tokens_match;
use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::models::PlayerToken;

/// In-memory map of player id to its single valid credential.
///
/// The database copy is written by the player service before this map changes, so a
/// restart never resurrects a rotated or revoked token.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(pool: &DbPool) -> Result<Self, AppError> {
        let rows = db::interact(pool, |conn| {
            use crate::schema::player_tokens::dsl::*;
            Ok(player_tokens
                .select(PlayerToken::as_select())
                .load::<PlayerToken>(conn)?)
        })
        .await?;

        let tokens = rows
            .into_iter()
            .map(|row| (row.player_id, row.token))
            .collect();
        Ok(Self {
            tokens: RwLock::new(tokens),
        })
    }

    /// True iff `token` is the current credential for `player_id`.
    pub async fn verify(&self, player_id: &str, token: &str) -> bool {
        let tokens = self.tokens.read().await;
        match tokens.get(player_id) {
            Some(expected) => tokens_match(expected, token),
            None => false,
        }
    }

    /// Installs `token` as the only valid credential for `player_id`.
    pub async fn set(&self, player_id: &str, token: String) {
        self.tokens
            .write()
            .await
            .insert(player_id.to_string(), token);
    }

    /// Every registered player holds a token, so this doubles as a registration check.
    pub async fn contains(&self, player_id: &str) -> bool {
        self.tokens.read().await.contains_key(player_id)
    }

    pub async fn remove(&self, player_id: &str) -> bool {
        self.tokens.write().await.remove(player_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}
