//! Request authentication: signing and session key storage.

pub mod signer;
pub mod store;

pub use signer::{
    compute_signature, derive_session_key, http_date, AuthSettings, Authenticator,
    SESSION_AUTH_HEADER, SESSION_SEED_HEADER,
};
pub use store::{MemorySessionStore, SessionStore};
