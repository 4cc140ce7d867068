use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thermostat::{Error, Result};
use tracing::info;

use crate::config::Config;

const KEY_VAULT_API_VERSION: &str = "7.4";

/// Supplies the opaque connection string a sink is built from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Where the secret comes from, for logs. Never the secret itself.
    fn describe(&self) -> String;

    async fn resolve(&self) -> Result<String>;
}

fn non_empty(secret: String, source: &str) -> Result<String> {
    let secret = secret.trim().to_string();
    if secret.is_empty() {
        return Err(Error::Configuration(format!("{} yielded an empty secret", source)));
    }
    Ok(secret)
}

pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    fn describe(&self) -> String {
        "command line".to_string()
    }

    async fn resolve(&self) -> Result<String> {
        non_empty(self.0.clone(), "--connection-string")
    }
}

/// Secret stored in a file, e.g. one mounted by a vault agent.
pub struct FileCredential {
    path: PathBuf,
}

impl FileCredential {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialSource for FileCredential {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn resolve(&self) -> Result<String> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Configuration(format!("failed to read {}: {}", self.path.display(), e)))?;
        non_empty(contents, &self.describe())
    }
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

/// Secret held in Azure Key Vault, fetched with a caller-supplied bearer token.
pub struct KeyVaultCredential {
    client: reqwest::Client,
    vault_url: String,
    secret_name: String,
    access_token: String,
}

impl KeyVaultCredential {
    pub fn new(vault_name: &str, secret_name: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            vault_url: format!("https://{}.vault.azure.net", vault_name),
            secret_name: secret_name.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn secret_url(&self) -> String {
        format!(
            "{}/secrets/{}?api-version={}",
            self.vault_url, self.secret_name, KEY_VAULT_API_VERSION
        )
    }
}

#[async_trait]
impl CredentialSource for KeyVaultCredential {
    fn describe(&self) -> String {
        format!("Key Vault secret {} in {}", self.secret_name, self.vault_url)
    }

    async fn resolve(&self) -> Result<String> {
        let response = self
            .client
            .get(self.secret_url())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::Configuration(format!("Key Vault request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Configuration(format!(
                "Key Vault returned {} for secret {}",
                status, self.secret_name
            )));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| Error::Configuration(format!("unexpected Key Vault response: {}", e)))?;
        non_empty(bundle.value, &self.describe())
    }
}

/// Picks the credential source from the configuration: an explicit
/// connection string, then a secret file, then Key Vault.
pub fn from_config(config: &Config) -> Result<Box<dyn CredentialSource>> {
    if let Some(raw) = &config.connection_string {
        return Ok(Box::new(StaticCredential::new(raw.clone())));
    }
    if let Some(path) = &config.secret_file {
        return Ok(Box::new(FileCredential::new(path.clone())));
    }
    if let (Some(vault), Some(secret)) = (&config.key_vault_name, &config.secret_name) {
        let token = config.vault_token.as_deref().ok_or_else(|| {
            Error::Configuration("Key Vault lookup needs a bearer token (AZURE_ACCESS_TOKEN)".to_string())
        })?;
        return Ok(Box::new(KeyVaultCredential::new(vault, secret, token)?));
    }
    Err(Error::Configuration(
        "no credentials: set --connection-string, --secret-file or --key-vault-name".to_string(),
    ))
}

/// Resolves the connection string or fails; the caller treats failure as fatal.
pub async fn resolve(config: &Config) -> Result<String> {
    let source = from_config(config)?;
    let secret = source.resolve().await?;
    info!("Connection string retrieved from {}", source.describe());
    Ok(secret)
}
