use std::{path::PathBuf, sync::Arc};

use russh::{
    client::{self, AuthResult},
    keys::{self, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::SessionHandle;
use tokio::fs;
use tracing::{info, warn};

type Result<T> = crate::ClientResult<T>;

/// One way of proving who we are. Tried in order until one succeeds.
#[derive(Clone)]
pub enum Credentials {
    Password(SecretString),
    PrivateKey(Arc<keys::PrivateKey>),
    PrivateKeyFile { path: PathBuf, passphrase: Option<SecretString> },
}

impl Credentials {
    fn label(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::PrivateKey(_) | Credentials::PrivateKeyFile { .. } => "publickey",
        }
    }
}

/// Try each credential against the server in order.
pub async fn authenticate<H>(
    session: &mut SessionHandle<H>,
    username: &str,
    credentials: &[Credentials],
) -> Result<()>
where
    H: client::Handler + Send,
{
    if credentials.is_empty() {
        return Err(crate::ClientError::AuthFailed(
            "no authentication methods configured; supply a password or private key".to_string(),
        ));
    }

    let rsa_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for credential in credentials {
        let label = credential.label();
        match try_credential(session, username, credential, rsa_hint).await {
            Ok(AuthResult::Success) => {
                info!(method = label, "authentication succeeded");
                return Ok(());
            }
            Ok(AuthResult::Failure { .. }) => {
                warn!(method = label, "authentication rejected by server");
            }
            Err(err) => {
                warn!(method = label, error = ?err, "authentication attempt failed");
            }
        }
    }

    Err(crate::ClientError::AuthFailed(
        "all authentication methods were rejected by the server".to_string(),
    ))
}

async fn try_credential<H>(
    session: &mut SessionHandle<H>,
    username: &str,
    credential: &Credentials,
    rsa_hint: Option<HashAlg>,
) -> Result<AuthResult>
where
    H: client::Handler + Send,
{
    match credential {
        Credentials::Password(password) => session
            .authenticate_password(username.to_string(), password.expose_secret().to_string())
            .await
            .map_err(Into::into),
        Credentials::PrivateKey(key) => {
            authenticate_with_key(session, username, key.clone(), rsa_hint).await
        }
        Credentials::PrivateKeyFile { path, passphrase } => {
            let data = fs::read_to_string(path).await?;
            let key =
                keys::decode_secret_key(&data, passphrase.as_ref().map(|p| p.expose_secret()))?;
            authenticate_with_key(session, username, Arc::new(key), rsa_hint).await
        }
    }
}

async fn authenticate_with_key<H>(
    session: &mut SessionHandle<H>,
    username: &str,
    key: Arc<keys::PrivateKey>,
    rsa_hint: Option<HashAlg>,
) -> Result<AuthResult>
where
    H: client::Handler + Send,
{
    let key = PrivateKeyWithHashAlg::new(key, rsa_hint);
    session
        .authenticate_publickey(username.to_string(), key)
        .await
        .map_err(Into::into)
}
