//! In-process auth provider used by tests. Stores real Argon2 hashes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::auth::{hash_password, verify_password, AuthProvider};

#[derive(Default)]
pub struct MemoryAuthProvider {
    /// email -> (principal, hash)
    accounts: Mutex<HashMap<String, (Uuid, String)>>,
}

impl MemoryAuthProvider {
    pub fn has_account(&self, principal: Uuid) -> bool {
        self.accounts
            .lock()
            .unwrap()
            .values()
            .any(|(id, _)| *id == principal)
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AppError> {
        let hash = hash_password(password).await?;
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(email) {
            return Err(AppError::Conflict(format!("{email} is already registered")));
        }
        let principal = Uuid::new_v4();
        accounts.insert(email.to_string(), (principal, hash));
        Ok(principal)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Uuid, AppError> {
        let found = self.accounts.lock().unwrap().get(email).cloned();
        let Some((principal, hash)) = found else {
            return Err(AppError::Unauthorized);
        };
        if verify_password(password, &hash).await? {
            Ok(principal)
        } else {
            Err(AppError::Unauthorized)
        }
    }

    async fn change_password(&self, principal: Uuid, new_password: &str) -> Result<(), AppError> {
        let hash = hash_password(new_password).await?;
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.values_mut().find(|(id, _)| *id == principal) {
            Some(entry) => {
                entry.1 = hash;
                Ok(())
            }
            None => Err(AppError::not_found("Account", principal)),
        }
    }

    async fn delete_account(&self, principal: Uuid) -> Result<(), AppError> {
        self.accounts
            .lock()
            .unwrap()
            .retain(|_, (id, _)| *id != principal);
        Ok(())
    }
}
