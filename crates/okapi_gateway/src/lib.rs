//! Okapi Gateway
//!
//! Local authenticating reverse proxy. Holds one SSO session, keeps a cached
//! downstream API token fresh, and forwards `/api` calls to the backend API
//! gateway with that token attached.
//!
//! # Features
//! - SSO login with MFA through `/authenticate`
//! - Token caching with coalesced refresh
//! - Transparent streaming proxy for `/api/*`
//! - Detached background launch

pub mod auth;
pub mod config;
pub mod error;
pub mod launcher;
pub mod proxy;
pub mod server;

pub use auth::{IdentityProvider, SessionManager, SessionStatus, SsoClient, Token, TokenStore};
pub use config::{GatewayConfig, LaunchArgs, ServerArgs};
pub use server::{start_server, AppState};
