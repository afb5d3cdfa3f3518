//! ProviderConfig custom resource and credential loading
//!
//! A `ProviderConfig` names where the AWS credentials for a set of managed
//! resources come from. Three sources are supported:
//!
//! - `Secret`: an INI profile stored under a key of a Kubernetes Secret
//! - `IRSA`: the default credential chain, which picks up the web-identity
//!   token projected into the pod
//! - `AssumeRole`: the default chain assumes `assumeRoleARN` through STS
//!
//! Managed resources without a `providerConfigRef` use the config named
//! `default`.

use crate::error::validation_messages;
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use stratus_core::error::{ProviderError, Result};
use stratus_core::resource::SecretKeySelector;
use stratus_core::store::StoreSet;
use tracing::debug;
use validator::{Validate, ValidationError};

/// IAM role ARN, including partitions such as aws-cn and aws-us-gov
static ROLE_ARN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^arn:aws[a-z-]*:iam::\d{12}:role/[\w+=,.@/-]+$").unwrap());

fn validate_role_arn(value: &str) -> std::result::Result<(), ValidationError> {
    if ROLE_ARN_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_role_arn")
            .with_message(format!("'{}' is not an IAM role ARN", value).into()))
    }
}

fn validate_endpoint(value: &str) -> std::result::Result<(), ValidationError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_endpoint")
            .with_message(format!("'{}' must be an http(s) URL", value).into()))
    }
}

fn validate_credentials(spec: &ProviderConfigSpec) -> std::result::Result<(), ValidationError> {
    match spec.credentials.source {
        CredentialsSource::Secret if spec.credentials.secret_ref.is_none() => {
            Err(ValidationError::new("missing_secret_ref")
                .with_message("credentials.secretRef is required for the Secret source".into()))
        }
        CredentialsSource::AssumeRole if spec.assume_role_arn.is_none() => {
            Err(ValidationError::new("missing_role_arn")
                .with_message("assumeRoleARN is required for the AssumeRole source".into()))
        }
        _ => Ok(()),
    }
}

/// ProviderConfig custom resource definition
///
/// Cluster-scoped. Referenced by managed resources through
/// `spec.providerConfigRef.name`.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "aws.stratus.dev",
    version = "v1beta1",
    kind = "ProviderConfig",
    plural = "providerconfigs",
    printcolumn = r#"{"name":"Source", "type":"string", "jsonPath":".spec.credentials.source"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_credentials"))]
pub struct ProviderConfigSpec {
    pub credentials: ProviderCredentials,

    /// Role to assume with the default credential chain
    #[serde(rename = "assumeRoleARN", default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_role_arn"))]
    pub assume_role_arn: Option<String>,

    /// External ID passed to AssumeRole
    #[serde(rename = "externalID", default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 1224, message = "externalID must be 2-1224 characters"))]
    pub external_id: Option<String>,

    /// Endpoint override, e.g. for a local emulator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_endpoint"))]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub source: CredentialsSource,

    /// Secret key holding an INI profile; required for the Secret source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CredentialsSource {
    Secret,
    #[serde(rename = "IRSA")]
    Irsa,
    AssumeRole,
}

impl CredentialsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialsSource::Secret => "Secret",
            CredentialsSource::Irsa => "IRSA",
            CredentialsSource::AssumeRole => "AssumeRole",
        }
    }
}

/// Access keys read from an INI profile
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***REDACTED***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

/// Parse the `default` profile (or the only profile) of an AWS INI file
pub fn parse_profile(ini: &str) -> Result<StaticCredentials> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current = String::from("default");
    for line in ini.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = section.trim().trim_start_matches("profile ").to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let profile = match sections.remove("default") {
        Some(profile) => profile,
        None if sections.len() == 1 => sections.into_values().next().unwrap_or_default(),
        None => {
            return Err(ProviderError::Auth(
                "credentials profile has no [default] section".into(),
            ))
        }
    };
    let field = |key: &str| profile.get(key).filter(|v| !v.is_empty()).cloned();
    let access_key_id = field("aws_access_key_id")
        .ok_or_else(|| ProviderError::Auth("credentials profile lacks aws_access_key_id".into()))?;
    let secret_access_key = field("aws_secret_access_key").ok_or_else(|| {
        ProviderError::Auth("credentials profile lacks aws_secret_access_key".into())
    })?;
    Ok(StaticCredentials {
        access_key_id,
        secret_access_key: SecretString::from(secret_access_key),
        session_token: field("aws_session_token").map(SecretString::from),
    })
}

/// Where the credentials for one client come from
#[derive(Debug)]
pub enum CredentialSource {
    Static(StaticCredentials),
    Ambient,
    AssumeRole {
        role_arn: String,
        external_id: Option<String>,
    },
}

/// A ProviderConfig with its credential material loaded
#[derive(Debug)]
pub struct ResolvedConfig {
    pub name: String,
    pub credentials: CredentialSource,
    pub endpoint: Option<String>,
    /// Changes whenever anything that affects the client changes
    pub fingerprint: String,
}

/// SHA-256 over everything that shapes the client built from a config
pub fn fingerprint(name: &str, spec: &ProviderConfigSpec, secret: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    let mut field = |value: &[u8]| {
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    };
    field(name.as_bytes());
    field(spec.credentials.source.as_str().as_bytes());
    field(spec.assume_role_arn.as_deref().unwrap_or_default().as_bytes());
    field(spec.external_id.as_deref().unwrap_or_default().as_bytes());
    field(spec.endpoint.as_deref().unwrap_or_default().as_bytes());
    field(secret.unwrap_or_default());
    hex::encode(hasher.finalize())
}

/// Read one key of a namespaced Secret
pub async fn secret_value(stores: &StoreSet, selector: &SecretKeySelector) -> Result<SecretString> {
    let secret = stores
        .secrets()
        .get(&selector.namespace, &selector.name)
        .await?
        .ok_or_else(|| {
            ProviderError::NotFound(format!(
                "secret {}/{}",
                selector.namespace, selector.name
            ))
        })?;
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(&selector.key))
        .map(|b| b.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(&selector.key))
                .map(|s| s.clone().into_bytes())
        })
        .ok_or_else(|| {
            ProviderError::NotFound(format!(
                "key {} in secret {}/{}",
                selector.key, selector.namespace, selector.name
            ))
        })?;
    let value = String::from_utf8(bytes).map_err(|_| {
        ProviderError::Validation(format!(
            "key {} in secret {}/{} is not valid UTF-8",
            selector.key, selector.namespace, selector.name
        ))
    })?;
    Ok(SecretString::from(value))
}

/// Load the named ProviderConfig and its credential material
pub async fn resolve(stores: &StoreSet, name: &str) -> Result<ResolvedConfig> {
    let config = stores
        .store::<ProviderConfig>()
        .get(name)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("ProviderConfig {name}")))?;

    config.spec.validate().map_err(|errors| {
        ProviderError::Validation(format!(
            "ProviderConfig {name}: {}",
            validation_messages(&errors)
        ))
    })?;

    let spec = &config.spec;
    let (credentials, secret) = match spec.credentials.source {
        CredentialsSource::Secret => {
            let selector = spec.credentials.secret_ref.as_ref().ok_or_else(|| {
                ProviderError::Validation(format!("ProviderConfig {name}: missing secretRef"))
            })?;
            let ini = secret_value(stores, selector).await?;
            let creds = parse_profile(ini.expose_secret())?;
            (CredentialSource::Static(creds), Some(ini))
        }
        CredentialsSource::Irsa => (CredentialSource::Ambient, None),
        CredentialsSource::AssumeRole => {
            let role_arn = spec.assume_role_arn.clone().ok_or_else(|| {
                ProviderError::Validation(format!("ProviderConfig {name}: missing assumeRoleARN"))
            })?;
            (
                CredentialSource::AssumeRole {
                    role_arn,
                    external_id: spec.external_id.clone(),
                },
                None,
            )
        }
    };

    let fingerprint = fingerprint(
        name,
        spec,
        secret.as_ref().map(|s| s.expose_secret().as_bytes()),
    );
    debug!(provider_config = %name, source = spec.credentials.source.as_str(), "Resolved provider config");
    Ok(ResolvedConfig {
        name: name.to_string(),
        credentials,
        endpoint: spec.endpoint.clone(),
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(source: CredentialsSource) -> ProviderConfigSpec {
        ProviderConfigSpec {
            credentials: ProviderCredentials {
                source,
                secret_ref: None,
            },
            assume_role_arn: None,
            external_id: None,
            endpoint: None,
        }
    }

    fn secret_spec() -> ProviderConfigSpec {
        ProviderConfigSpec {
            credentials: ProviderCredentials {
                source: CredentialsSource::Secret,
                secret_ref: Some(SecretKeySelector {
                    name: "aws-creds".into(),
                    namespace: "stratus-system".into(),
                    key: "credentials".into(),
                }),
            },
            ..spec(CredentialsSource::Secret)
        }
    }

    const PROFILE: &str = "[default]\n\
        aws_access_key_id = AKIAEXAMPLE\n\
        aws_secret_access_key = wJalrXUtnFEMI\n";

    #[test]
    fn test_parse_profile() {
        let creds = parse_profile(PROFILE).unwrap();
        assert_eq!(creds.access_key_id, "AKIAEXAMPLE");
        assert_eq!(creds.secret_access_key.expose_secret(), "wJalrXUtnFEMI");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn test_parse_profile_with_token_and_comments() {
        let ini = "# managed by ops\n[default]\n; keys\nAWS_ACCESS_KEY_ID=AKIA2\n\
                   aws_secret_access_key=s3cr3t\naws_session_token = tok\n";
        let creds = parse_profile(ini).unwrap();
        assert_eq!(creds.access_key_id, "AKIA2");
        assert_eq!(creds.session_token.unwrap().expose_secret(), "tok");
    }

    #[test]
    fn test_parse_single_named_profile() {
        let ini = "[profile prod]\naws_access_key_id=A\naws_secret_access_key=B\n";
        assert_eq!(parse_profile(ini).unwrap().access_key_id, "A");
    }

    #[test]
    fn test_parse_profile_missing_secret_key() {
        let err = parse_profile("[default]\naws_access_key_id=A\n").unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = parse_profile(PROFILE).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("wJalrXUtnFEMI"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_validation_requires_source_fields() {
        assert!(spec(CredentialsSource::Irsa).validate().is_ok());
        assert!(spec(CredentialsSource::Secret).validate().is_err());
        assert!(spec(CredentialsSource::AssumeRole).validate().is_err());

        let mut assume = spec(CredentialsSource::AssumeRole);
        assume.assume_role_arn = Some("arn:aws:iam::123456789012:role/stratus".into());
        assert!(assume.validate().is_ok());

        assume.assume_role_arn = Some("stratus".into());
        assert!(assume.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_secret_rotation() {
        let spec = secret_spec();
        let a = fingerprint("default", &spec, Some(b"v1"));
        let b = fingerprint("default", &spec, Some(b"v2"));
        assert_ne!(a, b);
        assert_eq!(a, fingerprint("default", &spec, Some(b"v1")));
        assert_ne!(a, fingerprint("other", &spec, Some(b"v1")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_source_serializes_irsa_uppercase() {
        assert_eq!(
            serde_json::to_value(CredentialsSource::Irsa).unwrap(),
            serde_json::json!("IRSA")
        );
    }

    #[tokio::test]
    async fn test_resolve_secret_config() {
        let stores = StoreSet::memory();
        let StoreSet::Memory(registry) = &stores else {
            unreachable!()
        };
        registry.memory_secrets().put(
            "stratus-system",
            "aws-creds",
            BTreeMap::from([("credentials".to_string(), PROFILE.to_string())]),
        );
        registry
            .memory_store::<ProviderConfig>()
            .create(ProviderConfig::new("default", secret_spec()))
            .unwrap();

        let resolved = resolve(&stores, "default").await.unwrap();
        assert!(matches!(resolved.credentials, CredentialSource::Static(_)));
        assert_eq!(
            resolved.fingerprint,
            fingerprint("default", &secret_spec(), Some(PROFILE.as_bytes()))
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_config() {
        let stores = StoreSet::memory();
        let err = resolve(&stores, "default").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
