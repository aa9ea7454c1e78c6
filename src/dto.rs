use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use utoipa::ToSchema;

/// One address (or comma separated list), or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Non-blank entries, trimmed.
    pub fn into_addresses(self) -> Vec<String> {
        let entries = match self {
            Self::One(entry) => vec![entry],
            Self::Many(entries) => entries,
        };
        entries
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SendEmailRequest {
    /// Recipient address or list of addresses
    #[serde(default, deserialize_with = "lenient")]
    pub to: Option<Recipients>,
    /// Subject line
    #[serde(default, deserialize_with = "lenient")]
    pub subject: Option<String>,
    /// HTML body
    #[serde(default, deserialize_with = "lenient")]
    pub html: Option<String>,
    /// Optional plain text alternative
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
    /// Shared API secret
    #[serde(default, deserialize_with = "lenient")]
    pub secret: Option<String>,
}

// A field of the wrong JSON type reads as absent so the secret is still checked first.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub success: bool,
    pub message: String,
    /// Message identifier of the accepted email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Upstream error description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Required fields absent from the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

impl SendEmailResponse {
    pub fn sent(message_id: String) -> Self {
        Self {
            success: true,
            message: "Email sent successfully!".to_string(),
            message_id: Some(message_id),
            error: None,
            missing: None,
        }
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            message_id: None,
            error: None,
            missing: None,
        }
    }

    pub fn missing_fields(message: &str, missing: &[&str]) -> Self {
        Self {
            missing: Some(missing.iter().map(|field| (*field).to_string()).collect()),
            ..Self::rejected(message)
        }
    }

    pub fn send_failed(error: String) -> Self {
        Self {
            success: false,
            message: "Failed to send email.".to_string(),
            message_id: None,
            error: Some(error),
            missing: None,
        }
    }
}
