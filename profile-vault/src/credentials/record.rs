//! Credential records and conversion between the two recognised shapes.
//!
//! Wrapped:
//! `{"claudeAiOauth": {"accessToken", "refreshToken", "expiresAt", "scopes", "subscriptionType"}}`
//!
//! Flat legacy:
//! `{"access_token", "refresh_token", "expiry_date", "scopes", "subscriptionType"}`

use super::Platform;
use serde_json::{json, Map, Value};

/// Key holding the token object in the wrapped shape.
pub const WRAPPER_KEY: &str = "claudeAiOauth";

const FLAT_FIELDS: [&str; 3] = ["access_token", "refresh_token", "expiry_date"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialShape {
    Wrapped,
    FlatLegacy,
    Unknown,
}

/// Values filled in when a legacy record lacks them.
#[derive(Debug, Clone)]
pub struct CredentialDefaults {
    pub scope: String,
    pub subscription_type: String,
}

impl Default for CredentialDefaults {
    fn default() -> Self {
        Self {
            scope: "user:inference".to_string(),
            subscription_type: "max".to_string(),
        }
    }
}

/// A credential document as stored by either platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    value: Value,
}

impl CredentialRecord {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text.trim()).map(Self::new)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn to_json(&self) -> String {
        self.value.to_string()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.value)
    }

    pub fn shape(&self) -> CredentialShape {
        let Some(object) = self.value.as_object() else {
            return CredentialShape::Unknown;
        };
        if object.get(WRAPPER_KEY).is_some_and(Value::is_object) {
            CredentialShape::Wrapped
        } else if FLAT_FIELDS.iter().any(|f| object.contains_key(*f)) {
            CredentialShape::FlatLegacy
        } else {
            CredentialShape::Unknown
        }
    }

    /// Convert into the canonical shape of `target`.
    ///
    /// Both platforms use the wrapped shape, so wrapped and unrecognised
    /// records pass through and legacy records are lifted field by field.
    pub fn convert(&self, target: Platform, defaults: &CredentialDefaults) -> CredentialRecord {
        match (self.shape(), target) {
            (CredentialShape::FlatLegacy, Platform::Keychain | Platform::File) => {
                self.lift_legacy(defaults)
            }
            _ => self.clone(),
        }
    }

    fn lift_legacy(&self, defaults: &CredentialDefaults) -> CredentialRecord {
        let flat = self.value.as_object().cloned().unwrap_or_default();
        let field = |name: &str| flat.get(name).cloned().unwrap_or(Value::Null);
        let non_null = |value: Value| (!value.is_null()).then_some(value);

        let expires_at = non_null(field("expiry_date"))
            .or_else(|| non_null(field("expiresAt")))
            .unwrap_or(Value::Null);
        let scopes = non_null(field("scopes")).unwrap_or_else(|| json!([defaults.scope]));
        let subscription = non_null(field("subscriptionType"))
            .unwrap_or_else(|| Value::String(defaults.subscription_type.clone()));

        let mut inner = Map::new();
        inner.insert("accessToken".into(), field("access_token"));
        inner.insert("refreshToken".into(), field("refresh_token"));
        inner.insert("expiresAt".into(), expires_at);
        inner.insert("scopes".into(), scopes);
        inner.insert("subscriptionType".into(), subscription);

        CredentialRecord::new(json!({ WRAPPER_KEY: Value::Object(inner) }))
    }

    /// Token object after resolving either shape.
    fn tokens(&self) -> Option<(Option<&str>, Option<&str>)> {
        let object = self.value.as_object()?;
        match self.shape() {
            CredentialShape::Wrapped => {
                let inner = object.get(WRAPPER_KEY)?.as_object()?;
                Some((
                    inner.get("accessToken").and_then(Value::as_str),
                    inner.get("refreshToken").and_then(Value::as_str),
                ))
            }
            CredentialShape::FlatLegacy => Some((
                object.get("access_token").and_then(Value::as_str),
                object.get("refresh_token").and_then(Value::as_str),
            )),
            CredentialShape::Unknown => None,
        }
    }

    /// Both tokens present and non-empty.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.tokens(),
            Some((Some(access), Some(refresh))) if !access.is_empty() && !refresh.is_empty()
        )
    }

    /// Names of the token fields that are missing or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        match self.tokens() {
            None => vec!["accessToken", "refreshToken"],
            Some((access, refresh)) => {
                let mut missing = Vec::new();
                if access.map_or(true, str::is_empty) {
                    missing.push("accessToken");
                }
                if refresh.map_or(true, str::is_empty) {
                    missing.push("refreshToken");
                }
                missing
            }
        }
    }
}
