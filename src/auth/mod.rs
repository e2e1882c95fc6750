//! Inbound authentication.
//!
//! # Data Flow
//! ```text
//! HTTP request (protected route)
//!     → http/auth.rs (headers → CredentialsBundle)
//!     → orchestrator.rs (fallback chain over registered strategies)
//!         → strategies.rs (token lists, basic users)
//!     → 401 JSON, or the request continues with AuthenticatedUser attached
//! ```

pub mod orchestrator;
pub mod strategies;

pub use orchestrator::{
    AuthError, AuthMethod, AuthOrchestrator, AuthOutcome, AuthResolution, AuthStrategy,
    AuthenticatedUser, Credential, CredentialsBundle,
};
pub use strategies::{BasicCredentialStrategy, StaticTokenStrategy};
