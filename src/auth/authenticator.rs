//! Authentication methods offered during method negotiation

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::store::CredentialStore;
use super::types::AuthContext;
use crate::protocol::{codec, method, Socks5Error};

/// Byte stream an authenticator can run its sub-negotiation over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Handler for one SOCKS5 authentication method code
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Method code announced in the method selection message
    fn code(&self) -> u8;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Run the method's sub-negotiation after the method has been selected
    async fn authenticate(&self, stream: &mut dyn AsyncStream) -> Result<AuthContext, Socks5Error>;
}

/// Method 0x00: no authentication required
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthAuthenticator;

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    fn code(&self) -> u8 {
        method::NO_AUTH
    }

    fn name(&self) -> &'static str {
        "none"
    }

    async fn authenticate(&self, _stream: &mut dyn AsyncStream) -> Result<AuthContext, Socks5Error> {
        Ok(AuthContext::no_auth())
    }
}

/// Method 0x02: username/password (RFC 1929) checked against a [`CredentialStore`]
#[derive(Clone)]
pub struct UserPassAuthenticator {
    credentials: Arc<dyn CredentialStore>,
}

impl UserPassAuthenticator {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Authenticator for UserPassAuthenticator {
    fn code(&self) -> u8 {
        method::USER_PASS
    }

    fn name(&self) -> &'static str {
        "userpass"
    }

    async fn authenticate(&self, stream: &mut dyn AsyncStream) -> Result<AuthContext, Socks5Error> {
        let (username, password) = codec::read_credentials(stream).await?;

        let valid = !username.is_empty() && self.credentials.validate(&username, &password).await;
        codec::write_auth_status(stream, valid).await?;

        if valid {
            info!(user = %username, "Authentication succeeded");
            Ok(AuthContext::user_pass(username))
        } else {
            warn!(user = %username, "Authentication failed");
            Err(Socks5Error::AuthenticationFailed(username))
        }
    }
}
