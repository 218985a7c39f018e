//! In-memory store backends

use super::{CredentialStore, TokenStore};
use crate::error::AuthError;
use crate::models::{AccessToken, NewUser, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    id_by_email: HashMap<String, Uuid>,
}

/// Credential store kept in process memory
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<UserTable>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        let mut table = self.users.write().await;

        if table.id_by_email.contains_key(&user.email) {
            return Err(AuthError::EmailExists);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };

        table.id_by_email.insert(user.email.clone(), user.id);
        table.by_id.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let table = self.users.read().await;
        Ok(table
            .id_by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, AuthError> {
        let mut table = self.users.write().await;

        Ok(table.by_id.get_mut(&id).map(|user| {
            user.password_hash = password_hash.to_string();
            user.updated_at = Utc::now();
            user.clone()
        }))
    }
}

#[derive(Default)]
struct TokenTable {
    by_id: HashMap<Uuid, AccessToken>,
    id_by_hash: HashMap<String, Uuid>,
}

impl TokenTable {
    fn remove(&mut self, id: &Uuid) -> Option<AccessToken> {
        let token = self.by_id.remove(id)?;
        self.id_by_hash.remove(&token.token_hash);
        Some(token)
    }

    fn remove_where(&mut self, pred: impl Fn(&AccessToken) -> bool) -> u64 {
        let ids: Vec<Uuid> = self
            .by_id
            .values()
            .filter(|t| pred(t))
            .map(|t| t.id)
            .collect();

        for id in &ids {
            self.remove(id);
        }
        ids.len() as u64
    }
}

/// Token store kept in process memory
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<TokenTable>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing rotation
    pub async fn insert(&self, token: AccessToken) {
        let mut table = self.tokens.write().await;
        table.id_by_hash.insert(token.token_hash.clone(), token.id);
        table.by_id.insert(token.id, token);
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn rotate_for_user(&self, user_id: Uuid, token: &AccessToken) -> Result<(), AuthError> {
        let mut table = self.tokens.write().await;
        let now = Utc::now();

        if table.id_by_hash.contains_key(&token.token_hash) {
            return Err(AuthError::Internal("duplicate token hash".to_string()));
        }

        // Records revoked by the previous rotation, or expired, are dropped
        table.remove_where(|t| t.user_id == user_id && !t.is_active_at(now));

        for existing in table.by_id.values_mut() {
            if existing.user_id == user_id {
                existing.revoked_at = Some(now);
            }
        }

        table
            .id_by_hash
            .insert(token.token_hash.clone(), token.id);
        table.by_id.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>, AuthError> {
        let table = self.tokens.read().await;
        Ok(table
            .id_by_hash
            .get(token_hash)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AuthError> {
        Ok(self.tokens.write().await.remove(&id).is_some())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        Ok(self
            .tokens
            .write()
            .await
            .remove_where(|t| t.user_id == user_id))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<AccessToken>, AuthError> {
        let mut list: Vec<AccessToken> = self
            .tokens
            .read()
            .await
            .by_id
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(list)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(token) = self.tokens.write().await.by_id.get_mut(&id) {
            token.last_used_at = Some(at);
        }
        Ok(())
    }
}
