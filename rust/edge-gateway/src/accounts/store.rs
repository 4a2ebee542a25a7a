//! Account persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{normalize_email, AdminRecord, NewAdmin, Principal, Updates};
use crate::error::AccountError;

/// CRUD surface the gateway needs over admin accounts.
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn get_by_id(&self, id: &Uuid) -> Result<AdminRecord, AccountError>;

    /// Lookup by email. The argument is normalized before comparison.
    async fn get_by_email(&self, email: &str) -> Result<AdminRecord, AccountError>;

    async fn get_by_user_name(&self, user_name: &str) -> Result<AdminRecord, AccountError>;

    /// Hash the password and persist a new account. Email and username must
    /// both be unused.
    async fn insert(&self, new_admin: NewAdmin) -> Result<Principal, AccountError>;

    async fn update(&self, id: &Uuid, updates: &Updates) -> Result<Principal, AccountError>;

    async fn delete(&self, id: &Uuid) -> Result<(), AccountError>;
}

/// In-process account store.
#[derive(Debug, Default)]
pub struct MemoryAdminStore {
    admins: RwLock<HashMap<Uuid, AdminRecord>>,
}

impl MemoryAdminStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.admins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.read().is_empty()
    }

    fn find(&self, pred: impl Fn(&AdminRecord) -> bool) -> Result<AdminRecord, AccountError> {
        self.admins
            .read()
            .values()
            .find(|record| pred(record))
            .cloned()
            .ok_or(AccountError::NotFound)
    }
}

#[async_trait]
impl AdminStore for MemoryAdminStore {
    async fn get_by_id(&self, id: &Uuid) -> Result<AdminRecord, AccountError> {
        self.admins
            .read()
            .get(id)
            .cloned()
            .ok_or(AccountError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<AdminRecord, AccountError> {
        let email = normalize_email(email);
        self.find(|record| record.principal.email == email)
    }

    async fn get_by_user_name(&self, user_name: &str) -> Result<AdminRecord, AccountError> {
        self.find(|record| record.principal.user_name == user_name)
    }

    async fn insert(&self, new_admin: NewAdmin) -> Result<Principal, AccountError> {
        let record = new_admin.into_record_blocking().await?;

        let mut admins = self.admins.write();
        for existing in admins.values() {
            if existing.principal.email == record.principal.email {
                return Err(AccountError::DuplicateEmail);
            }
            if existing.principal.user_name == record.principal.user_name {
                return Err(AccountError::DuplicateUserName);
            }
        }
        let principal = record.principal.clone();
        admins.insert(principal.id, record);
        Ok(principal)
    }

    async fn update(&self, id: &Uuid, updates: &Updates) -> Result<Principal, AccountError> {
        let mut admins = self.admins.write();
        let record = admins.get_mut(id).ok_or(AccountError::NotFound)?;
        updates.apply(&mut record.principal);
        Ok(record.principal.clone())
    }

    async fn delete(&self, id: &Uuid) -> Result<(), AccountError> {
        self.admins
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(AccountError::NotFound)
    }
}
