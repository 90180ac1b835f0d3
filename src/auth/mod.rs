//! Authentication Module
//!
//! Method negotiation handlers, credential stores and the directory-backed
//! store with its result cache.

pub mod authenticator;
pub mod cache;
pub mod directory;
pub mod ldap;
pub mod manager;
pub mod store;
pub mod types;

pub use authenticator::{AsyncStream, Authenticator, NoAuthAuthenticator, UserPassAuthenticator};
pub use cache::{hash_password, CredentialCache};
pub use directory::{Directory, DirectoryCredentials, DirectoryError};
pub use ldap::{LdapDirectory, LdapSettings};
pub use manager::AuthManager;
pub use store::{CredentialStore, CredentialTable, StaticCredentials};
pub use types::{AuthContext, Outcome, USERNAME_KEY};
