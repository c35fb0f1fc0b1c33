use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::policy::{self, Caller, Operation};
use crate::store::{
    crypto::{self, EncryptionKey},
    token, InsertOutcome, SecretInfo, SecretRecord, SecretStatus, SecretSummary, Store,
};

/// Bounded retries when a freshly generated token collides with an
/// existing one. With 128-bit tokens a single collision is already
/// astronomically unlikely.
const TOKEN_RETRY_LIMIT: usize = 3;

/// Errors surfaced to the delivery layer. `Deleted` secrets present as
/// `NotFound` so existence is never leaked, and `NotFound` always takes
/// precedence over password errors.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("secret not found")]
    NotFound,
    #[error("secret has expired")]
    Expired,
    #[error("secret has already been viewed")]
    AlreadyViewed,
    #[error("password required")]
    PasswordRequired,
    #[error("invalid password")]
    InvalidPassword,
    #[error("forbidden")]
    Forbidden,
    #[error("secret data is corrupt")]
    CorruptData,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Policy limits applied at creation.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum content length in characters.
    pub max_content_chars: usize,
    /// Maximum retention window in milliseconds.
    pub max_expires_in_ms: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_content_chars: 10_000,
            max_expires_in_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Creation request.
#[derive(Debug)]
pub struct NewSecret {
    pub content: String,
    pub is_one_time_view: bool,
    /// Relative lifetime in milliseconds; `None` means no expiration.
    pub expires_in_ms: Option<i64>,
    pub password: Option<String>,
}

/// Creation result. Deliberately excludes any echo of the content.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSecret {
    pub id: String,
    pub token: String,
    pub url: String,
}

/// Successful redemption.
#[derive(Debug, Serialize)]
pub struct RedeemedSecret {
    pub content: String,
    pub created_at: i64,
    pub owner_display: String,
    pub is_one_time_view: bool,
}

/// The secret lifecycle engine: creation, availability evaluation, the
/// consume-on-read protocol, deletion, and listing. All mutation goes
/// through the store's conditional status update.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    key: Arc<EncryptionKey>,
    limits: Limits,
}

impl Engine {
    pub fn new(store: Store, key: EncryptionKey, limits: Limits) -> Self {
        Self {
            store,
            key: Arc::new(key),
            limits,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a secret and return its public token. The content is
    /// encrypted before it touches the store; the password, if any, is
    /// stored only as a salted Argon2id hash.
    pub fn create(&self, req: NewSecret, caller: &Caller) -> Result<CreatedSecret, SecretError> {
        if req.content.is_empty() {
            return Err(SecretError::InvalidInput("content must not be empty".into()));
        }
        if req.content.chars().count() > self.limits.max_content_chars {
            return Err(SecretError::InvalidInput(format!(
                "content exceeds {} characters",
                self.limits.max_content_chars
            )));
        }
        if let Some(expires_in) = req.expires_in_ms {
            if expires_in <= 0 {
                return Err(SecretError::InvalidInput(
                    "expires_in_ms must be positive".into(),
                ));
            }
            if expires_in > self.limits.max_expires_in_ms {
                return Err(SecretError::InvalidInput(format!(
                    "expires_in_ms exceeds maximum of {} ms",
                    self.limits.max_expires_in_ms
                )));
            }
        }
        if matches!(req.password.as_deref(), Some("")) {
            return Err(SecretError::InvalidInput(
                "password must not be empty".into(),
            ));
        }

        let now = Store::now();
        let (content_encrypted, nonce) = crypto::encrypt(&self.key, req.content.as_bytes())?;
        let password_hash = req
            .password
            .as_deref()
            .map(crypto::hash_password)
            .transpose()?;
        let has_password = password_hash.is_some();
        let expires_at = req.expires_in_ms.map(|ms| now + ms);

        // Regenerate on token collision, a bounded number of times.
        for _ in 0..TOKEN_RETRY_LIMIT {
            let record = SecretRecord {
                id: token::generate_secret_id(),
                token: token::generate_token(),
                content_encrypted: content_encrypted.clone(),
                nonce,
                has_password,
                password_hash: password_hash.clone(),
                is_one_time_view: req.is_one_time_view,
                expires_at,
                status: SecretStatus::Active,
                is_viewed: false,
                viewed_at: None,
                created_at: now,
                owner_id: caller.owner_id.clone(),
                owner_display: caller.display.clone(),
            };

            match self.store.insert(&record)? {
                InsertOutcome::Inserted => {
                    debug!(id = %record.id, one_time = record.is_one_time_view, "created secret");
                    return Ok(CreatedSecret {
                        url: format!("/secret/{}", record.token),
                        id: record.id.clone(),
                        token: record.token.clone(),
                    });
                }
                InsertOutcome::Conflict => continue,
            }
        }

        Err(SecretError::Internal(anyhow::anyhow!(
            "token generation exhausted after {TOKEN_RETRY_LIMIT} collisions"
        )))
    }

    /// Public preview: policy flags and availability, never the content.
    /// Read-only — expiry is folded into the derived fields without
    /// writing anything.
    pub fn get_info(&self, token: &str) -> Result<SecretInfo, SecretError> {
        let record = self
            .store
            .find_by_token(token)?
            .ok_or(SecretError::NotFound)?;

        // A deleted secret is indistinguishable from an unknown token.
        if record.status == SecretStatus::Deleted {
            return Err(SecretError::NotFound);
        }

        Ok(SecretInfo::from_record(&record, Store::now()))
    }

    /// Redeem a secret: evaluate availability, verify the password, and
    /// for one-time secrets consume it atomically before decrypting.
    ///
    /// The `Active → Viewed` transition is a compare-and-swap in the
    /// store; of N concurrent redemptions exactly one wins and decrypts,
    /// the rest fail with `AlreadyViewed`. Decryption happens strictly
    /// after the transition commits, so no failure path leaks content.
    ///
    /// Once this returns content for a one-time secret it is consumed:
    /// the delivery layer must respond reliably, because an aborted
    /// response loses the secret permanently.
    pub fn redeem(&self, token: &str, password: Option<&str>) -> Result<RedeemedSecret, SecretError> {
        let record = self
            .store
            .find_by_token(token)?
            .ok_or(SecretError::NotFound)?;
        let now = Store::now();

        // Lazy expiry: transition and fail. Idempotent under races — a
        // concurrent reader or the sweep may already have moved it.
        if record.status == SecretStatus::Active && record.is_expired(now) {
            self.store.conditional_update_status(
                &record.id,
                SecretStatus::Active,
                SecretStatus::Expired,
            )?;
            return Err(SecretError::Expired);
        }

        match record.status {
            SecretStatus::Active => {}
            SecretStatus::Viewed => return Err(SecretError::AlreadyViewed),
            SecretStatus::Expired => return Err(SecretError::Expired),
            SecretStatus::Deleted => return Err(SecretError::NotFound),
        }

        if record.has_password {
            let attempt = match password {
                Some(p) if !p.is_empty() => p,
                _ => return Err(SecretError::PasswordRequired),
            };
            let stored = record
                .password_hash
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("has_password set but hash missing"))?;
            if !crypto::verify_password(attempt, stored)? {
                return Err(SecretError::InvalidPassword);
            }
        }

        if record.is_one_time_view {
            // Consume-on-read: exactly one caller wins this swap. The
            // loser must never see plaintext.
            let won = self.store.conditional_update_status(
                &record.id,
                SecretStatus::Active,
                SecretStatus::Viewed,
            )?;
            if !won {
                return Err(SecretError::AlreadyViewed);
            }
        }

        let plaintext = crypto::decrypt(&self.key, &record.content_encrypted, &record.nonce)
            .map_err(|_| SecretError::CorruptData)?;
        let content = String::from_utf8(plaintext).map_err(|_| SecretError::CorruptData)?;

        Ok(RedeemedSecret {
            content,
            created_at: record.created_at,
            owner_display: record
                .owner_display
                .clone()
                .unwrap_or_else(|| "Anonymous".to_owned()),
            is_one_time_view: record.is_one_time_view,
        })
    }

    /// Owner-initiated delete: a status transition, never a row removal.
    /// Allowed from any state (content in terminal states is already
    /// unreachable); idempotent on an already-deleted secret.
    pub fn delete(&self, id: &str, caller: &Caller) -> Result<(), SecretError> {
        let record = self.store.find_by_id(id)?.ok_or(SecretError::NotFound)?;

        if !policy::allows(caller, record.owner_id.as_deref(), Operation::Delete) {
            return Err(SecretError::Forbidden);
        }

        let mut current = record.status;
        for _ in 0..TOKEN_RETRY_LIMIT {
            if current == SecretStatus::Deleted {
                return Ok(());
            }
            if self
                .store
                .conditional_update_status(id, current, SecretStatus::Deleted)?
            {
                return Ok(());
            }
            // Lost a race with another transition; re-read and retry.
            current = self
                .store
                .find_by_id(id)?
                .ok_or(SecretError::NotFound)?
                .status;
        }
        Err(SecretError::Internal(anyhow::anyhow!(
            "delete transition kept losing races"
        )))
    }

    /// List the caller's own secrets, newest first, with `is_expired`
    /// derived at query time. Summaries never carry ciphertext or the
    /// password hash.
    pub fn list_owned(&self, caller: &Caller) -> Result<Vec<SecretSummary>, SecretError> {
        if !policy::allows(caller, None, Operation::ListOwned) {
            return Err(SecretError::Forbidden);
        }
        let owner_id = caller.owner_id.as_deref().ok_or(SecretError::Forbidden)?;

        let now = Store::now();
        let records = self.store.list_by_owner(owner_id)?;
        Ok(records
            .iter()
            .map(|r| SecretSummary::from_record(r, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_engine() -> (Engine, Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let engine = Engine::new(store.clone(), crypto::generate_key(), Limits::default());
        (engine, store, dir)
    }

    fn alice() -> Caller {
        Caller {
            owner_id: Some("alice".into()),
            display: Some("Alice".into()),
        }
    }

    fn plain_secret(content: &str, one_time: bool) -> NewSecret {
        NewSecret {
            content: content.into(),
            is_one_time_view: one_time,
            expires_in_ms: None,
            password: None,
        }
    }

    #[test]
    fn create_then_info_reports_available() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(plain_secret("hello", false), &Caller::anonymous())
            .unwrap();

        let info = engine.get_info(&created.token).unwrap();
        assert!(info.is_available);
        assert!(!info.has_password);
        assert!(!info.is_expired);
        assert_eq!(info.owner_display, "Anonymous");
    }

    #[test]
    fn create_rejects_bad_input() {
        let (engine, _store, _dir) = make_engine();
        let anon = Caller::anonymous();

        let empty = engine.create(plain_secret("", false), &anon);
        assert!(matches!(empty, Err(SecretError::InvalidInput(_))));

        let oversized = engine.create(plain_secret(&"x".repeat(10_001), false), &anon);
        assert!(matches!(oversized, Err(SecretError::InvalidInput(_))));

        let bad_ttl = engine.create(
            NewSecret {
                content: "x".into(),
                is_one_time_view: false,
                expires_in_ms: Some(-5),
                password: None,
            },
            &anon,
        );
        assert!(matches!(bad_ttl, Err(SecretError::InvalidInput(_))));

        let long_ttl = engine.create(
            NewSecret {
                content: "x".into(),
                is_one_time_view: false,
                expires_in_ms: Some(8 * 24 * 60 * 60 * 1000),
                password: None,
            },
            &anon,
        );
        assert!(matches!(long_ttl, Err(SecretError::InvalidInput(_))));

        let empty_password = engine.create(
            NewSecret {
                content: "x".into(),
                is_one_time_view: false,
                expires_in_ms: None,
                password: Some(String::new()),
            },
            &anon,
        );
        assert!(matches!(empty_password, Err(SecretError::InvalidInput(_))));
    }

    #[test]
    fn one_time_scenario() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(plain_secret("launch codes: 1234", true), &Caller::anonymous())
            .unwrap();

        let first = engine.redeem(&created.token, None).unwrap();
        assert_eq!(first.content, "launch codes: 1234");
        assert!(first.is_one_time_view);

        let second = engine.redeem(&created.token, None);
        assert!(matches!(second, Err(SecretError::AlreadyViewed)));

        let info = engine.get_info(&created.token).unwrap();
        assert!(!info.is_available);
    }

    #[test]
    fn non_one_time_redeems_repeatedly() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(plain_secret("sticky", false), &Caller::anonymous())
            .unwrap();
        for _ in 0..3 {
            assert_eq!(engine.redeem(&created.token, None).unwrap().content, "sticky");
        }
        assert!(engine.get_info(&created.token).unwrap().is_available);
    }

    #[test]
    fn concurrent_one_time_redeem_is_exactly_once() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(plain_secret("raced", true), &Caller::anonymous())
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let token = created.token.clone();
            handles.push(std::thread::spawn(move || engine.redeem(&token, None)));
        }

        let mut won = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(redeemed) => {
                    assert_eq!(redeemed.content, "raced");
                    won += 1;
                }
                Err(SecretError::AlreadyViewed) => lost += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(lost, 7);
    }

    #[test]
    fn password_gate() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(
                NewSecret {
                    content: "guarded".into(),
                    is_one_time_view: false,
                    expires_in_ms: None,
                    password: Some("swordfish".into()),
                },
                &Caller::anonymous(),
            )
            .unwrap();

        assert!(engine.get_info(&created.token).unwrap().has_password);

        let missing = engine.redeem(&created.token, None);
        assert!(matches!(missing, Err(SecretError::PasswordRequired)));

        let wrong = engine.redeem(&created.token, Some("wrong"));
        assert!(matches!(wrong, Err(SecretError::InvalidPassword)));

        let right = engine.redeem(&created.token, Some("swordfish")).unwrap();
        assert_eq!(right.content, "guarded");
    }

    #[test]
    fn unknown_token_beats_password_errors() {
        let (engine, _store, _dir) = make_engine();
        // Wrong token with a password attempt must report NotFound, not
        // anything password-related.
        let result = engine.redeem("feedfacefeedfacefeedfacefeedface", Some("pw"));
        assert!(matches!(result, Err(SecretError::NotFound)));
    }

    #[test]
    fn expired_secret_fails_and_transitions() {
        let (engine, store, _dir) = make_engine();
        let gone = engine
            .create(
                NewSecret {
                    content: "gone".into(),
                    is_one_time_view: false,
                    expires_in_ms: Some(1),
                    password: None,
                },
                &Caller::anonymous(),
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let result = engine.redeem(&gone.token, None);
        assert!(matches!(result, Err(SecretError::Expired)));
        assert_eq!(
            store.find_by_id(&gone.id).unwrap().unwrap().status,
            SecretStatus::Expired
        );

        // Second attempt observes the terminal state.
        let again = engine.redeem(&gone.token, None);
        assert!(matches!(again, Err(SecretError::Expired)));

        let info = engine.get_info(&gone.token).unwrap();
        assert!(info.is_expired);
        assert!(!info.is_available);
    }

    #[test]
    fn secret_alive_before_expiry() {
        let (engine, _store, _dir) = make_engine();
        let created = engine
            .create(
                NewSecret {
                    content: "still here".into(),
                    is_one_time_view: false,
                    expires_in_ms: Some(60_000),
                    password: None,
                },
                &Caller::anonymous(),
            )
            .unwrap();
        assert_eq!(engine.redeem(&created.token, None).unwrap().content, "still here");
    }

    #[test]
    fn delete_is_owner_only_and_idempotent() {
        let (engine, _store, _dir) = make_engine();
        let created = engine.create(plain_secret("mine", false), &alice()).unwrap();

        let bob = Caller {
            owner_id: Some("bob".into()),
            display: None,
        };
        assert!(matches!(
            engine.delete(&created.id, &bob),
            Err(SecretError::Forbidden)
        ));
        assert!(matches!(
            engine.delete(&created.id, &Caller::anonymous()),
            Err(SecretError::Forbidden)
        ));

        engine.delete(&created.id, &alice()).unwrap();
        // Idempotent.
        engine.delete(&created.id, &alice()).unwrap();

        // Deleted presents as NotFound everywhere public.
        assert!(matches!(
            engine.get_info(&created.token),
            Err(SecretError::NotFound)
        ));
        assert!(matches!(
            engine.redeem(&created.token, None),
            Err(SecretError::NotFound)
        ));
    }

    #[test]
    fn delete_allowed_from_terminal_states() {
        let (engine, _store, _dir) = make_engine();
        let created = engine.create(plain_secret("view me", true), &alice()).unwrap();
        engine.redeem(&created.token, None).unwrap();

        // Viewed -> Deleted still succeeds, for listing hygiene.
        engine.delete(&created.id, &alice()).unwrap();
    }

    #[test]
    fn list_owned_newest_first_without_sensitive_fields() {
        let (engine, _store, _dir) = make_engine();
        let first = engine.create(plain_secret("one", false), &alice()).unwrap();
        let second = engine.create(plain_secret("two", true), &alice()).unwrap();
        engine
            .create(plain_secret("other", false), &Caller::anonymous())
            .unwrap();

        let listed = engine.list_owned(&alice()).unwrap();
        assert_eq!(listed.len(), 2);
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&first.id.as_str()));
        assert!(ids.contains(&second.id.as_str()));
        // created_at has millisecond resolution; both entries may share a
        // timestamp, so just check ordering is non-increasing.
        assert!(listed[0].created_at >= listed[1].created_at);

        assert!(matches!(
            engine.list_owned(&Caller::anonymous()),
            Err(SecretError::Forbidden)
        ));
    }

    #[test]
    fn deleted_secret_still_visible_to_owner_listing() {
        let (engine, _store, _dir) = make_engine();
        let created = engine.create(plain_secret("gone", false), &alice()).unwrap();
        engine.delete(&created.id, &alice()).unwrap();

        let listed = engine.list_owned(&alice()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SecretStatus::Deleted);
    }
}
