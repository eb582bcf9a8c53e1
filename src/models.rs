//! Data models for the launcher backend's requests and responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length the backend accepts for each credential field.
pub const MAX_CREDENTIAL_LEN: usize = 128;

/// Numeric state code the cloud provider reports for a running instance.
pub const RUNNING_CODE: i64 = 16;

/// Cloud credentials captured from the operator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Check both fields are present and within the backend's length limit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.is_empty() {
                return Err(ValidationError::Missing(field));
            }
            if value.chars().count() > MAX_CREDENTIAL_LEN {
                return Err(ValidationError::TooLong {
                    field,
                    max: MAX_CREDENTIAL_LEN,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Identity of the instance created for this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceDetails {
    pub instance_id: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub region: String,
}

/// Instance state as reported by create, stop and check-status calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VmStatus {
    #[serde(default, deserialize_with = "lenient_code")]
    pub code: i64,
    #[serde(default)]
    pub name: String,
    /// Machine-readable state token, e.g. `running` or `stopped`.
    #[serde(default)]
    pub raw: String,
    #[serde(rename = "PublicIP", default, deserialize_with = "nullable_string")]
    pub public_ip: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub instance_type: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub region: String,
}

impl VmStatus {
    /// Placeholder shown before the first status arrives.
    pub fn launching() -> Self {
        Self {
            code: 0,
            name: "Launching server".to_string(),
            raw: String::new(),
            public_ip: String::new(),
            instance_type: String::new(),
            region: String::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.code == RUNNING_CODE
    }
}

impl Default for VmStatus {
    fn default() -> Self {
        Self::launching()
    }
}

/// Body of `POST /ec2/create-vm`.
#[derive(Serialize)]
pub(crate) struct CreateRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

/// Body of `POST /ec2/stop-instance` and `POST /ec2/check-status`.
#[derive(Serialize)]
pub(crate) struct InstanceRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub instance_id: &'a str,
}

// The backend sends `null` for the public IP of a stopped instance.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// The backend falls back to an empty string when the provider omits the code.
fn lenient_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
        Missing(()),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Number(n) => n,
        Code::Text(s) => s.trim().parse().unwrap_or(0),
        Code::Missing(()) => 0,
    })
}
