//! `azuread_application_certificate`: a certificate credential on an application
//!
//! The certificate value may be given as PEM, base64 DER or hex DER; it is sent
//! to Graph as base64 DER and never read back.

use crate::error::{ProviderError, ProviderResult};
use crate::graph::models::{KeyCredential, Sensitive};
use crate::reconcile::DeleteOutcome;
use crate::resources::credential_dates::{self, format_date};
use crate::resources::ids::{CredentialId, CredentialKind};
use crate::resources::{record_operation, ProviderContext, Resource, Validate};
use crate::validation::values;
use async_trait::async_trait;
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

const KEY_TYPES: &[&str] = &["AsymmetricX509Cert", "Symmetric"];
const ENCODINGS: &[&str] = &["pem", "base64", "hex"];

fn default_key_type() -> String {
    "AsymmetricX509Cert".to_string()
}

fn default_encoding() -> String {
    "pem".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CertificateConfig {
    pub application_object_id: String,
    /// Generated when omitted
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default = "default_key_type", rename = "type")]
    pub key_type: String,
    /// `pem`, `base64` or `hex`
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[schemars(with = "String")]
    pub value: Sensitive,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// e.g. `8760h`
    #[serde(default)]
    pub end_date_relative: Option<String>,
}

impl Validate for CertificateConfig {
    fn validate(&self) -> ProviderResult<()> {
        values::uuid("application_object_id", &self.application_object_id)?;
        if let Some(key_id) = &self.key_id {
            values::uuid("key_id", key_id)?;
        }
        values::one_of("type", &self.key_type, KEY_TYPES)?;
        values::one_of("encoding", &self.encoding, ENCODINGS)?;
        decode_certificate(&self.encoding, self.value.expose())?;
        credential_dates::validate(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            self.end_date_relative.as_deref(),
        )
    }
}

/// Decode a certificate into base64-encoded DER
///
/// # Errors
///
/// [`ProviderError::Validation`] on `value` when the input does not decode
pub fn decode_certificate(encoding: &str, value: &str) -> ProviderResult<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let der = match encoding {
        "pem" => {
            let parsed = pem::parse(value.trim())
                .map_err(|e| ProviderError::validation("value", format!("invalid PEM: {e}")))?;
            parsed.contents().to_vec()
        }
        "base64" => {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            engine
                .decode(compact)
                .map_err(|e| ProviderError::validation("value", format!("invalid base64: {e}")))?
        }
        "hex" => {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(compact)
                .map_err(|e| ProviderError::validation("value", format!("invalid hex: {e}")))?
        }
        other => {
            return Err(ProviderError::validation(
                "encoding",
                format!("unsupported encoding {other:?}"),
            ));
        }
    };
    if der.is_empty() {
        return Err(ProviderError::validation("value", "certificate is empty"));
    }
    Ok(engine.encode(der))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateState {
    pub id: String,
    pub application_object_id: String,
    pub key_id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub start_date: String,
    pub end_date: String,
}

impl CertificateState {
    fn from_model(object_id: &str, credential: &KeyCredential) -> ProviderResult<Self> {
        let key_id = credential.key_id.clone().ok_or_else(|| {
            ProviderError::bad_response(
                "Reading certificate credential",
                object_id,
                "credential has no key ID",
            )
        })?;
        Ok(Self {
            id: CredentialId::new(object_id, CredentialKind::Certificate, &key_id).to_string(),
            application_object_id: object_id.to_string(),
            key_id,
            key_type: credential.key_type.clone().unwrap_or_default(),
            start_date: credential.start_date_time.map(format_date).unwrap_or_default(),
            end_date: credential.end_date_time.map(format_date).unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct CertificateResource;

#[async_trait]
impl Resource for CertificateResource {
    const KIND: &'static str = "azuread_application_certificate";

    type Config = CertificateConfig;
    type State = CertificateState;

    fn id(state: &Self::State) -> String {
        state.id.clone()
    }

    /// Credentials are immutable once added
    fn requires_replacement(prior: &Self::Config, desired: &Self::Config) -> bool {
        prior != desired
    }

    async fn create(ctx: &ProviderContext, config: &Self::Config) -> ProviderResult<Self::State> {
        config.validate()?;
        let window = credential_dates::resolve(
            config.start_date.as_deref(),
            config.end_date.as_deref(),
            config.end_date_relative.as_deref(),
            chrono::Utc::now(),
        )?;
        let key = decode_certificate(&config.encoding, config.value.expose())?;

        let credential = KeyCredential {
            key_id: config.key_id.clone(),
            display_name: None,
            start_date_time: window.start,
            end_date_time: window.end,
            key_type: Some(config.key_type.clone()),
            usage: Some("Verify".to_string()),
            key: Some(Sensitive::new(key)),
        };

        let object_id = &config.application_object_id;
        let created = ctx.sub_resources().create(object_id, credential).await?;
        record_operation(Self::KIND, "create");
        CertificateState::from_model(object_id, &created)
    }

    async fn read(ctx: &ProviderContext, id: &str) -> ProviderResult<Option<Self::State>> {
        let id = CredentialId::parse_kind(id, CredentialKind::Certificate)?;
        let credential: Option<KeyCredential> =
            ctx.sub_resources().read(&id.object_id, &id.key_id).await?;
        match credential {
            Some(credential) => Ok(Some(CertificateState::from_model(&id.object_id, &credential)?)),
            None => {
                info!("Certificate credential {id} was not found, removing from state");
                Ok(None)
            }
        }
    }

    async fn update(
        ctx: &ProviderContext,
        id: &str,
        _prior: &Self::Config,
        _desired: &Self::Config,
    ) -> ProviderResult<Option<Self::State>> {
        Self::read(ctx, id).await
    }

    async fn delete(ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let id = CredentialId::parse_kind(id, CredentialKind::Certificate)?;
        let outcome = ctx
            .sub_resources()
            .delete::<KeyCredential>(&id.object_id, &id.key_id)
            .await?;
        if outcome == DeleteOutcome::Gone {
            info!("Certificate credential {id} was already gone");
        }
        record_operation(Self::KIND, "delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DER: &[u8] = &[0x30, 0x82, 0x01, 0x0a, 0x02, 0x82, 0x01, 0x01];

    fn pem_value() -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", DER.to_vec()))
    }

    #[test]
    fn test_encodings_agree() {
        let engine = base64::engine::general_purpose::STANDARD;
        let expected = engine.encode(DER);

        assert_eq!(decode_certificate("pem", &pem_value()).unwrap(), expected);
        assert_eq!(decode_certificate("base64", &expected).unwrap(), expected);
        assert_eq!(decode_certificate("hex", &hex::encode(DER)).unwrap(), expected);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(decode_certificate("pem", "not a certificate").is_err());
        assert!(decode_certificate("base64", "***").is_err());
        assert!(decode_certificate("hex", "zz").is_err());
        assert!(decode_certificate("der", "00").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_encoding_before_network() {
        let config = CertificateConfig {
            application_object_id: "00000000-0000-0000-0000-0000000000aa".to_string(),
            key_id: None,
            key_type: default_key_type(),
            encoding: "hex".to_string(),
            value: Sensitive::new("not hex"),
            start_date: None,
            end_date: None,
            end_date_relative: Some("8760h".to_string()),
        };
        assert!(matches!(
            config.validate(),
            Err(ProviderError::Validation { ref attr, .. }) if attr == "value"
        ));
    }

    #[test]
    fn test_any_change_requires_replacement() {
        let config = CertificateConfig {
            application_object_id: "00000000-0000-0000-0000-0000000000aa".to_string(),
            key_id: None,
            key_type: default_key_type(),
            encoding: default_encoding(),
            value: Sensitive::new(pem_value()),
            start_date: None,
            end_date: None,
            end_date_relative: None,
        };
        let mut changed = config.clone();
        changed.end_date_relative = Some("1d".to_string());
        assert!(!CertificateResource::requires_replacement(&config, &config));
        assert!(CertificateResource::requires_replacement(&config, &changed));
    }
}
