//! SSO authentication and downstream token management

pub mod session;
pub mod sso;
pub mod token_store;

pub use session::{SessionManager, SessionStatus};
pub use sso::{IdentityProvider, SsoClient, SsoSession};
pub use token_store::{Token, TokenStore};
