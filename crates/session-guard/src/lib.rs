//! Session guard: resolves the authenticated principal for the client.
//!
//! The guard asks the identity provider who the current session belongs
//! to. Without a principal the sync engine is never established; the
//! consumer redirects to login instead. The browser-redirect login flow
//! itself lives outside this workspace.

mod error;
mod guard;

pub use error::{AuthError, AuthResult};
pub use guard::SessionGuard;
