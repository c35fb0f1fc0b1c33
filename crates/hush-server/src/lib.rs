pub mod auth;
pub mod dirs;
pub mod engine;
pub mod handlers;
pub mod policy;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: engine::Engine,
    /// Whether unauthenticated callers may create secrets.
    pub allow_anonymous: bool,
}

pub use engine::{CreatedSecret, Engine, Limits, NewSecret, RedeemedSecret, SecretError};
pub use policy::Caller;
pub use server::{run, ServerConfig};
