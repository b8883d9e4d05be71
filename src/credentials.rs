//! Credential resolution and the session it produces.
//!
//! Sources are consulted in order and the first one that yields an API
//! identity wins. An HMAC key seen in any source up to and including the
//! winning one is kept for URL signing.

use std::{fmt, path::PathBuf};

use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::{model::error::StorageError, signer::HmacKey, util::object::Provider};

const ADC_RELATIVE_PATH: &str = ".config/gcloud/application_default_credentials.json";
const AWS_CREDENTIALS_RELATIVE_PATH: &str = ".aws/credentials";

/// How the session authenticates API calls.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    ServiceAccountFile(PathBuf),
    ServiceAccountJson(String),
    /// S3 access key pair, also used for signing.
    AccessKey(HmacKey),
    /// Platform default chain (gcloud ADC, metadata server, AWS profile).
    Ambient,
    Anonymous,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::ServiceAccountFile(path) => {
                f.debug_tuple("ServiceAccountFile").field(path).finish()
            }
            Identity::ServiceAccountJson(_) => f.write_str("ServiceAccountJson(<redacted>)"),
            Identity::AccessKey(key) => f.debug_tuple("AccessKey").field(key).finish(),
            Identity::Ambient => f.write_str("Ambient"),
            Identity::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExplicitCredentials {
    pub service_account_file: Option<PathBuf>,
    pub hmac_key: Option<HmacKey>,
}

#[derive(Clone, Debug)]
pub enum CredentialSource {
    Explicit(ExplicitCredentials),
    Environment,
    Ambient,
}

impl CredentialSource {
    fn name(&self) -> &'static str {
        match self {
            CredentialSource::Explicit(_) => "explicit",
            CredentialSource::Environment => "environment",
            CredentialSource::Ambient => "ambient",
        }
    }
}

/// Authenticated handle owned by exactly one client.
pub struct Session {
    provider: Provider,
    identity: Identity,
    signing_key: Option<HmacKey>,
    runtime: Runtime,
}

impl Session {
    pub fn new(
        provider: Provider,
        identity: Identity,
        signing_key: Option<HmacKey>,
    ) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| StorageError::Backend(format!("failed to start runtime: {}", err)))?;

        Ok(Self {
            provider,
            identity,
            signing_key,
            runtime,
        })
    }

    /// Session for reading public objects only.
    pub fn anonymous(provider: Provider) -> Result<Self, StorageError> {
        Self::new(provider, Identity::Anonymous, None)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn signing_key(&self) -> Option<&HmacKey> {
        self.signing_key.as_ref()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider)
            .field("identity", &self.identity)
            .field("signing_key", &self.signing_key)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct CredentialProvider {
    provider: Provider,
    sources: Vec<CredentialSource>,
}

impl CredentialProvider {
    pub fn new(provider: Provider, sources: Vec<CredentialSource>) -> Self {
        Self { provider, sources }
    }

    /// Explicit settings, then the environment, then the platform identity.
    pub fn default_chain(provider: Provider, explicit: ExplicitCredentials) -> Self {
        Self::new(
            provider,
            vec![
                CredentialSource::Explicit(explicit),
                CredentialSource::Environment,
                CredentialSource::Ambient,
            ],
        )
    }

    pub fn resolve(&self) -> Result<Session, StorageError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, env: F) -> Result<Session, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut signing_key = None;

        for source in &self.sources {
            let (identity, hmac_key) = match source {
                CredentialSource::Explicit(explicit) => self.explicit_identity(explicit),
                CredentialSource::Environment => self.environment_identity(&env),
                CredentialSource::Ambient => (self.ambient_identity(&env), None),
            };

            if signing_key.is_none() {
                signing_key = hmac_key;
            }

            if let Some(identity) = identity {
                info!(
                    provider = %self.provider,
                    source = source.name(),
                    signing = signing_key.is_some(),
                    "resolved credentials"
                );
                return Session::new(self.provider, identity, signing_key);
            }

            debug!(provider = %self.provider, source = source.name(), "no credentials");
        }

        Err(StorageError::Unauthenticated(format!(
            "no {} credentials found in {} source(s)",
            self.provider,
            self.sources.len()
        )))
    }

    fn explicit_identity(&self, explicit: &ExplicitCredentials) -> (Option<Identity>, Option<HmacKey>) {
        let identity = match (self.provider, &explicit.service_account_file, &explicit.hmac_key) {
            (Provider::Gcs, Some(path), _) => Some(Identity::ServiceAccountFile(path.clone())),
            (Provider::S3, _, Some(key)) => Some(Identity::AccessKey(key.clone())),
            _ => None,
        };

        (identity, explicit.hmac_key.clone())
    }

    fn environment_identity<F>(&self, env: &F) -> (Option<Identity>, Option<HmacKey>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pair = |id: &str, secret: &str| match (non_empty(env, id), non_empty(env, secret)) {
            (Some(id), Some(secret)) => Some(HmacKey::new(id, secret)),
            _ => None,
        };

        match self.provider {
            Provider::Gcs => {
                let identity = non_empty(env, "GOOGLE_APPLICATION_CREDENTIALS")
                    .map(|path| Identity::ServiceAccountFile(PathBuf::from(path)))
                    .or_else(|| {
                        non_empty(env, "GOOGLE_APPLICATION_CREDENTIALS_JSON")
                            .map(Identity::ServiceAccountJson)
                    });
                (identity, pair("GCS_HMAC_ACCESS_ID", "GCS_HMAC_SECRET"))
            }
            Provider::S3 => {
                let key = pair("AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY");
                (key.clone().map(Identity::AccessKey), key)
            }
        }
    }

    fn ambient_identity<F>(&self, env: &F) -> Option<Identity>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home_file = |relative: &str| {
            non_empty(env, "HOME")
                .map(|home| PathBuf::from(home).join(relative))
                .filter(|path| path.is_file())
        };

        let found = match self.provider {
            Provider::Gcs => {
                non_empty(env, "GCE_METADATA_HOST").is_some()
                    || home_file(ADC_RELATIVE_PATH).is_some()
            }
            Provider::S3 => {
                [
                    "AWS_PROFILE",
                    "AWS_WEB_IDENTITY_TOKEN_FILE",
                    "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
                    "AWS_CONTAINER_CREDENTIALS_FULL_URI",
                ]
                .iter()
                .any(|name| non_empty(env, name).is_some())
                    || home_file(AWS_CREDENTIALS_RELATIVE_PATH).is_some()
            }
        };

        found.then_some(Identity::Ambient)
    }
}

fn non_empty<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name).filter(|value| !value.is_empty())
}
