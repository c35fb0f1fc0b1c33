pub mod crypto;
pub mod db;
pub mod model;
pub mod token;

pub use db::{InsertOutcome, Store};
pub use model::{SecretInfo, SecretRecord, SecretStatus, SecretSummary};
