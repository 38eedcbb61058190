//! Credential sources
//!
//! A [`CredentialSource`] wraps the caller-supplied token and identity of one
//! upload and presents it to the storage client as a refreshable credentials
//! provider.
//!
//! # Overview
//!
//! - [`CredentialMaterial`]: the externally issued token, identity id and provider name
//! - [`CredentialSource`]: holds the latest material; implements [`ProvideCredentials`]
//! - [`IdentityBroker`]: exchanges the material for signing credentials
//! - [`CognitoIdentityBroker`]: the default broker, backed by Cognito Identity
//! - [`StaticIdentityBroker`]: fixed credentials, for tests and local endpoints
//!
//! The source never authenticates the token itself. Every time the storage
//! client needs credentials the source re-surfaces the latest material and
//! hands it to the broker; an expired token therefore fails there and shows
//! up as an authentication error of the next storage operation.

use crate::region::Region;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use arc_swap::ArcSwap;
use aws_credential_types::Credentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{self, ProvideCredentials};
use tracing::debug;
use zeroize::Zeroizing;

/// Login key of developer-authenticated identities.
pub const COGNITO_LOGIN_KEY: &str = "cognito-identity.amazonaws.com";

/// Externally issued identity material.
///
/// The token is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct CredentialMaterial {
    token: Zeroizing<String>,
    identity_id: String,
    provider_name: String,
    identity_pool_id: Option<String>,
}

impl CredentialMaterial {
    #[must_use]
    pub fn new(token: impl Into<String>, identity_id: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            identity_id: identity_id.into(),
            provider_name: provider_name.into(),
            identity_pool_id: None,
        }
    }

    #[must_use]
    pub fn with_identity_pool_id(mut self, identity_pool_id: Option<String>) -> Self {
        self.identity_pool_id = identity_pool_id;
        self
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    #[must_use]
    pub fn identity_pool_id(&self) -> Option<&str> {
        self.identity_pool_id.as_deref()
    }
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("token", &"[redacted]")
            .field("identity_id", &self.identity_id)
            .field("provider_name", &self.provider_name)
            .field("identity_pool_id", &self.identity_pool_id)
            .finish()
    }
}

/// Exchanges identity material for request-signing credentials.
///
/// This is the boundary to the identity service; implementations may perform
/// network I/O. The SDK's identity cache decides how often it is called.
#[async_trait::async_trait]
pub trait IdentityBroker: Send + Sync + fmt::Debug + 'static {
    /// Exchanges `material` for credentials valid in `region`.
    ///
    /// # Errors
    /// Returns a [`CredentialsError`] if the identity service rejects the
    /// material or cannot be reached.
    async fn exchange(&self, region: Region, material: &CredentialMaterial) -> Result<Credentials, CredentialsError>;
}

/// A refreshable credential source bound to one upload.
pub struct CredentialSource {
    region: Region,
    material: ArcSwap<CredentialMaterial>,
    broker: Arc<dyn IdentityBroker>,
    refreshes: AtomicU64,
}

impl CredentialSource {
    #[must_use]
    pub fn new(material: CredentialMaterial, region: Region, broker: Arc<dyn IdentityBroker>) -> Self {
        Self {
            region,
            material: ArcSwap::from_pointee(material),
            broker,
            refreshes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub fn current_token(&self) -> String {
        self.material.load().token().to_owned()
    }

    #[must_use]
    pub fn current_identity_id(&self) -> String {
        self.material.load().identity_id().to_owned()
    }

    /// The provider name, passed through unchanged.
    #[must_use]
    pub fn provider_name(&self) -> String {
        self.material.load().provider_name().to_owned()
    }

    /// Re-surfaces the latest token. Never performs network I/O.
    #[must_use]
    pub fn refresh(&self) -> String {
        self.latest().token().to_owned()
    }

    /// Number of times the material has been re-read on behalf of the storage client.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Replaces the token and identity id seen by subsequent refreshes.
    ///
    /// The provider name and identity pool stay unchanged.
    pub fn update(&self, token: impl Into<String>, identity_id: impl Into<String>) {
        let current = self.material.load();
        let next = CredentialMaterial::new(token, identity_id, current.provider_name())
            .with_identity_pool_id(current.identity_pool_id.clone());
        self.material.store(Arc::new(next));
        debug!(region = %self.region, "credential material updated");
    }

    fn latest(&self) -> Arc<CredentialMaterial> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let material = self.material.load_full();
        debug!(
            identity_id = material.identity_id(),
            provider = material.provider_name(),
            "refreshing credentials"
        );
        material
    }

    async fn load_credentials(&self) -> Result<Credentials, CredentialsError> {
        let material = self.latest();
        self.broker.exchange(self.region, &material).await
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("region", &self.region)
            .field("material", &*self.material.load())
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

impl ProvideCredentials for CredentialSource {
    fn provide_credentials<'a>(&'a self) -> provider::future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        provider::future::ProvideCredentials::new(self.load_credentials())
    }
}

/// Broker backed by Cognito Identity `GetCredentialsForIdentity`.
///
/// The token is sent as the login for [`COGNITO_LOGIN_KEY`], i.e. the enhanced
/// flow for developer-authenticated identities. The call is unsigned.
#[derive(Debug, Default)]
pub struct CognitoIdentityBroker {
    endpoint_url: Option<String>,
    clients: Mutex<HashMap<Region, aws_sdk_cognitoidentity::Client>>,
}

impl CognitoIdentityBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends identity requests to a custom endpoint.
    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    fn client(&self, region: Region) -> aws_sdk_cognitoidentity::Client {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(region)
            .or_insert_with(|| {
                let mut builder = aws_sdk_cognitoidentity::Config::builder()
                    .behavior_version(aws_sdk_cognitoidentity::config::BehaviorVersion::latest())
                    .region(aws_sdk_cognitoidentity::config::Region::from_static(region.as_str()));
                if let Some(url) = &self.endpoint_url {
                    builder = builder.endpoint_url(url);
                }
                aws_sdk_cognitoidentity::Client::from_conf(builder.build())
            })
            .clone()
    }
}

#[async_trait::async_trait]
impl IdentityBroker for CognitoIdentityBroker {
    async fn exchange(&self, region: Region, material: &CredentialMaterial) -> Result<Credentials, CredentialsError> {
        if let Some(pool) = material.identity_pool_id() {
            debug!(identity_pool_id = pool, "exchanging developer identity");
        }

        let output = self
            .client(region)
            .get_credentials_for_identity()
            .identity_id(material.identity_id())
            .logins(COGNITO_LOGIN_KEY, material.token())
            .send()
            .await
            .map_err(CredentialsError::provider_error)?;

        let creds = output
            .credentials()
            .ok_or_else(|| CredentialsError::provider_error("identity service returned no credentials"))?;
        let (Some(access_key_id), Some(secret_key)) = (creds.access_key_id(), creds.secret_key()) else {
            return Err(CredentialsError::provider_error("identity service returned incomplete credentials"));
        };
        let expiry = creds.expiration().and_then(|t| SystemTime::try_from(*t).ok());

        Ok(Credentials::new(
            access_key_id,
            secret_key,
            creds.session_token().map(str::to_owned),
            expiry,
            "CognitoIdentity",
        ))
    }
}

/// Broker that always returns the same credentials.
#[derive(Debug, Clone)]
pub struct StaticIdentityBroker {
    credentials: Credentials,
}

impl StaticIdentityBroker {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait::async_trait]
impl IdentityBroker for StaticIdentityBroker {
    async fn exchange(&self, _: Region, _: &CredentialMaterial) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}
