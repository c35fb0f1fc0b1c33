use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Lifecycle state of a secret. `Active` is the only non-terminal
/// state; every transition out of it is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretStatus {
    Active,
    Viewed,
    Expired,
    Deleted,
}

impl SecretStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Viewed => "VIEWED",
            Self::Expired => "EXPIRED",
            Self::Deleted => "DELETED",
        }
    }
}

/// Stored in redb as bincode-encoded bytes, keyed by `id`.
/// `content_encrypted` is ChaCha20Poly1305 ciphertext over the submitted
/// text; the plaintext is never persisted. All metadata is plaintext so
/// availability can be evaluated without decrypting.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// Internal identifier, assigned at insert. Never exposed in redemption URLs.
    pub id: String,
    /// Public handle: 16 CSPRNG bytes, hex encoded. Unique, never recycled.
    pub token: String,
    /// ChaCha20Poly1305 ciphertext (content + tag).
    pub content_encrypted: Vec<u8>,
    /// Per-record random 12-byte nonce.
    pub nonce: [u8; 12],
    pub has_password: bool,
    /// Argon2id PHC string; present iff `has_password`.
    pub password_hash: Option<String>,
    /// Immutable policy flag: consume on first successful redemption.
    pub is_one_time_view: bool,
    /// Unix timestamp (milliseconds); `None` means no expiration.
    pub expires_at: Option<i64>,
    #[zeroize(skip)]
    pub status: SecretStatus,
    /// Set exactly once, for one-time secrets, at consumption.
    pub is_viewed: bool,
    pub viewed_at: Option<i64>,
    /// Unix timestamp (milliseconds).
    pub created_at: i64,
    /// Opaque owner identifier; `None` for anonymous creation.
    pub owner_id: Option<String>,
    /// Display name shown to recipients ("Anonymous" when absent).
    pub owner_display: Option<String>,
}

impl SecretRecord {
    /// Returns true if the record's expiry timestamp has passed.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// A secret is available when it is `Active`, not past expiry, and
    /// not an already-consumed one-time secret.
    pub fn is_available(&self, now: i64) -> bool {
        self.status == SecretStatus::Active
            && !self.is_expired(now)
            && !(self.is_one_time_view && self.is_viewed)
    }
}

/// Public preview of a secret, returned without redeeming it.
/// Never carries ciphertext or the password hash — only the boolean
/// `has_password` is exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretInfo {
    pub has_password: bool,
    pub is_one_time_view: bool,
    pub expires_at: Option<i64>,
    pub is_expired: bool,
    pub is_available: bool,
    pub created_at: i64,
    pub owner_display: String,
}

impl SecretInfo {
    pub fn from_record(record: &SecretRecord, now: i64) -> Self {
        Self {
            has_password: record.has_password,
            is_one_time_view: record.is_one_time_view,
            expires_at: record.expires_at,
            is_expired: record.is_expired(now),
            is_available: record.is_available(now),
            created_at: record.created_at,
            owner_display: record
                .owner_display
                .clone()
                .unwrap_or_else(|| "Anonymous".to_owned()),
        }
    }
}

/// Owner-facing listing entry. `is_expired` is derived at query time,
/// not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSummary {
    pub id: String,
    pub token: String,
    pub url: String,
    pub has_password: bool,
    pub is_one_time_view: bool,
    pub expires_at: Option<i64>,
    pub is_viewed: bool,
    pub viewed_at: Option<i64>,
    pub status: SecretStatus,
    pub created_at: i64,
    pub is_expired: bool,
}

impl SecretSummary {
    pub fn from_record(record: &SecretRecord, now: i64) -> Self {
        Self {
            id: record.id.clone(),
            token: record.token.clone(),
            url: format!("/secret/{}", record.token),
            has_password: record.has_password,
            is_one_time_view: record.is_one_time_view,
            expires_at: record.expires_at,
            is_viewed: record.is_viewed,
            viewed_at: record.viewed_at,
            status: record.status,
            created_at: record.created_at,
            is_expired: record.is_expired(now),
        }
    }
}
