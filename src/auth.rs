//! Identity primitives: identifiers, email addresses, scopes, roles, secrets, and token claims.

pub mod claims;
pub mod email;
pub mod id;
pub mod role;
pub mod scope;
pub mod secret;

pub use claims::*;
pub use email::*;
pub use id::*;
pub use role::*;
pub use scope::*;
pub use secret::*;
