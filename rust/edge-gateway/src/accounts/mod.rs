//! Admin accounts.
//!
//! The gateway only needs a narrow CRUD surface over accounts ([`AdminStore`]);
//! this module also holds the account validation rules and password hashing.
//! [`Principal`] is the public view of an account: it is what sessions hold,
//! what handlers return, and what travels in the identity header. Password
//! material lives only in [`AdminRecord`].

pub mod store;

use std::sync::LazyLock;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AccountError, ValidationError};

pub use store::{AdminStore, MemoryAdminStore};

/// Base URL for generated avatar images.
const AVATAR_BASE_URL: &str = "https://www.gravatar.com/avatar/";

/// Minimum password length for new accounts.
const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s<>]+@[^@\s<>]+\.[^@\s<>]+$").expect("email pattern is valid")
});

/// Public view of an admin account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

impl Principal {
    /// "<first> <last>", without a dangling space when either is empty.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Stored account: the principal plus its password hash.
#[derive(Clone)]
pub struct AdminRecord {
    pub principal: Principal,
    pass_hash: String,
}

impl std::fmt::Debug for AdminRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminRecord")
            .field("principal", &self.principal)
            .field("pass_hash", &"<redacted>")
            .finish()
    }
}

impl AdminRecord {
    /// Check a plaintext password against the stored hash.
    pub fn authenticate(&self, password: &str) -> Result<(), AccountError> {
        verify_password(&self.pass_hash, password)
    }

    /// [`Self::authenticate`] on the blocking pool.
    pub async fn authenticate_blocking(&self, password: String) -> Result<(), AccountError> {
        let pass_hash = self.pass_hash.clone();
        run_blocking(move || verify_password(&pass_hash, &password)).await
    }
}

/// Login request body. Absent fields decode as empty and fail to
/// authenticate rather than failing to decode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Sign-up request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewAdmin {
    pub email: String,
    pub password: String,
    pub password_conf: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewAdmin {
    /// Check the sign-up rules, reporting the first one violated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !EMAIL_PATTERN.is_match(self.email.trim()) {
            return Err(ValidationError::new(format!(
                "Invalid email address: {}",
                self.email
            )));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.password != self.password_conf {
            return Err(ValidationError::new(
                "Password must match password confirmation",
            ));
        }
        if self.user_name.is_empty() {
            return Err(ValidationError::new("Username must be non-zero length"));
        }
        if self.first_name.is_empty() {
            return Err(ValidationError::new("First name must be non-zero length"));
        }
        if self.last_name.is_empty() {
            return Err(ValidationError::new("Last name must be non-zero length"));
        }
        Ok(())
    }

    /// Build the stored record: fresh id, normalized email, avatar URL and
    /// password hash.
    pub fn into_record(self) -> Result<AdminRecord, AccountError> {
        let email = normalize_email(&self.email);
        let photo_url = avatar_url(&email);
        Ok(AdminRecord {
            principal: Principal {
                id: Uuid::new_v4(),
                email,
                user_name: self.user_name,
                first_name: self.first_name,
                last_name: self.last_name,
                photo_url,
            },
            pass_hash: hash_password(&self.password)?,
        })
    }

    /// [`Self::into_record`] on the blocking pool.
    pub async fn into_record_blocking(self) -> Result<AdminRecord, AccountError> {
        run_blocking(move || self.into_record()).await
    }
}

/// Allowed profile updates.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Updates {
    pub first_name: String,
    pub last_name: String,
}

impl Updates {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.first_name.is_empty() {
            return Err(ValidationError::new("First name must be non-zero length"));
        }
        if self.last_name.is_empty() {
            return Err(ValidationError::new("Last name must be non-zero length"));
        }
        Ok(())
    }

    pub fn apply(&self, principal: &mut Principal) {
        principal.first_name.clone_from(&self.first_name);
        principal.last_name.clone_from(&self.last_name);
    }
}

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn avatar_url(normalized_email: &str) -> String {
    let digest = Sha256::digest(normalized_email.as_bytes());
    format!("{AVATAR_BASE_URL}{}", hex::encode(digest))
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| AccountError::Hashing(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

fn verify_password(pass_hash: &str, password: &str) -> Result<(), AccountError> {
    let parsed = PasswordHash::new(pass_hash).map_err(|e| AccountError::Hashing(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AccountError::InvalidPassword)
}

/// Run argon2 work off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T, AccountError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AccountError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AccountError::Hashing(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_new_admin() -> NewAdmin {
        NewAdmin {
            email: "  Front.Desk@Example.COM ".to_string(),
            password: "secret1".to_string(),
            password_conf: "secret1".to_string(),
            user_name: "frontdesk".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    #[test]
    fn test_valid_new_admin() {
        assert!(valid_new_admin().validate().is_ok());
    }

    #[test]
    fn test_validation_rules() {
        let cases: Vec<(fn(&mut NewAdmin), &str)> = vec![
            (|a| a.email = "not-an-email".into(), "Invalid email"),
            (
                |a| {
                    a.password = "abc".into();
                    a.password_conf = "abc".into();
                },
                "at least 6",
            ),
            (|a| a.password_conf = "different".into(), "must match"),
            (|a| a.user_name.clear(), "Username"),
            (|a| a.first_name.clear(), "First name"),
            (|a| a.last_name.clear(), "Last name"),
        ];

        for (mutate, expected) in cases {
            let mut admin = valid_new_admin();
            mutate(&mut admin);
            let err = admin.validate().unwrap_err();
            assert!(err.0.contains(expected), "{err} should mention {expected}");
        }
    }

    #[test]
    fn test_into_record_normalizes_email_and_hashes_password() {
        let record = valid_new_admin().into_record().unwrap();
        assert_eq!(record.principal.email, "front.desk@example.com");
        assert!(record
            .principal
            .photo_url
            .starts_with("https://www.gravatar.com/avatar/"));
        assert_ne!(record.pass_hash, "secret1");
        assert!(record.authenticate("secret1").is_ok());
        assert!(matches!(
            record.authenticate("wrong"),
            Err(AccountError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn test_hashing_on_blocking_pool() {
        let record = valid_new_admin().into_record_blocking().await.unwrap();
        assert_eq!(record.principal.user_name, "frontdesk");

        record
            .authenticate_blocking("secret1".to_string())
            .await
            .unwrap();
        assert!(matches!(
            record.authenticate_blocking("wrong".to_string()).await,
            Err(AccountError::InvalidPassword)
        ));
    }

    #[test]
    fn test_principal_json_has_no_password_material() {
        let record = valid_new_admin().into_record().unwrap();
        let json = serde_json::to_value(&record.principal).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(
            keys.len(),
            6,
            "unexpected keys in principal json: {keys:?}"
        );
        assert!(json.get("photoURL").is_some());
        assert!(json.get("userName").is_some());
        assert!(!json.to_string().contains("argon2"));
    }

    #[test]
    fn test_full_name() {
        let mut principal = valid_new_admin().into_record().unwrap().principal;
        assert_eq!(principal.full_name(), "Ada Lovelace");
        principal.last_name.clear();
        assert_eq!(principal.full_name(), "Ada");
    }

    #[test]
    fn test_updates_apply() {
        let mut principal = valid_new_admin().into_record().unwrap().principal;
        let updates = Updates {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
        };
        updates.validate().unwrap();
        updates.apply(&mut principal);
        assert_eq!(principal.full_name(), "Grace Hopper");
    }
}
