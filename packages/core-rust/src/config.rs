//! Tagged configuration families for a channel's pipeline stages.
//!
//! Each family (source, filter, transformer, destination) is a closed enum
//! whose wire form is a JSON object carrying a `type` discriminant next to
//! the variant's own fields. Variants are resolved once, at the serde
//! boundary, never by inspecting raw maps at use time.
//!
//! Two resolution modes exist:
//!
//! - **Strict** ([`SourceConfig::resolve`] and friends): used when building a
//!   channel from a request payload. Unknown tags are a
//!   [`ConfigurationError::UnknownDiscriminant`].
//! - **Lenient** (the `Deserialize` impls): used when reading persisted
//!   records. Unknown tags become an explicit `Unrecognized` variant that
//!   keeps the raw object so it round-trips unchanged and the pipeline can
//!   report it instead of dropping it.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ConfigurationError;

/// Name of the discriminant field on every configuration object.
pub const TYPE_FIELD: &str = "type";

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Reads the string discriminant from a configuration object.
fn discriminant(value: &Value, family: &'static str) -> Result<String, ConfigurationError> {
    let object = value.as_object().ok_or_else(|| ConfigurationError::NotAnObject {
        path: family.to_string(),
    })?;
    object
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigurationError::MissingDiscriminant {
            path: family.to_string(),
        })
}

/// Decodes the variant fields of a recognized configuration object.
///
/// The `type` field is left in place; variant structs ignore it.
fn decode_fields<T: DeserializeOwned>(
    value: Value,
    family: &'static str,
    kind: &str,
) -> Result<T, ConfigurationError> {
    serde_json::from_value(value).map_err(|e| ConfigurationError::InvalidFields {
        path: family.to_string(),
        family,
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Encodes variant fields and stamps the canonical discriminant.
fn encode_fields<T: Serialize>(inner: &T, tag: &str) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(inner)?;
    if let Value::Object(map) = &mut value {
        map.insert(TYPE_FIELD.to_string(), Value::String(tag.to_string()));
    }
    Ok(value)
}

/// Generates a tagged configuration enum with strict and lenient resolution.
///
/// Each variant maps one canonical tag (plus optional aliases) to a struct
/// holding the variant fields. An `Unrecognized` variant is always appended.
macro_rules! tagged_config {
    (
        $(#[$meta:meta])*
        $name:ident, family = $family:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident($inner:ty) => $tag:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant($inner),
            )+
            /// A configuration whose tag this build does not recognize.
            /// The raw object is preserved verbatim.
            Unrecognized { kind: String, raw: Value },
        }

        impl $name {
            /// Family name used in error paths and logs.
            pub const FAMILY: &'static str = $family;

            /// The wire tag of this configuration.
            #[must_use]
            pub fn kind(&self) -> &str {
                match self {
                    $( Self::$variant(_) => $tag, )+
                    Self::Unrecognized { kind, .. } => kind.as_str(),
                }
            }

            #[must_use]
            pub fn is_recognized(&self) -> bool {
                !matches!(self, Self::Unrecognized { .. })
            }

            /// Strictly resolves a generic mapping into a concrete variant.
            ///
            /// # Errors
            ///
            /// Fails when the value is not an object, the discriminant is
            /// missing or unknown, or the variant fields do not decode.
            pub fn resolve(value: &Value) -> Result<Self, ConfigurationError> {
                match Self::resolve_lenient(value.clone())? {
                    Self::Unrecognized { kind, .. } => {
                        Err(ConfigurationError::UnknownDiscriminant {
                            path: $family.to_string(),
                            family: $family,
                            kind,
                        })
                    }
                    resolved => Ok(resolved),
                }
            }

            fn resolve_lenient(value: Value) -> Result<Self, ConfigurationError> {
                let kind = discriminant(&value, $family)?;
                match kind.as_str() {
                    $(
                        $tag $(| $alias)* => {
                            decode_fields::<$inner>(value, $family, &kind).map(Self::$variant)
                        }
                    )+
                    _ => Ok(Self::Unrecognized {
                        kind: kind.clone(),
                        raw: value,
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self {
                    $(
                        Self::$variant(inner) => encode_fields(inner, $tag)
                            .map_err(serde::ser::Error::custom)?
                            .serialize(serializer),
                    )+
                    Self::Unrecognized { raw, .. } => raw.serialize(serializer),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = Value::deserialize(deserializer)?;
                Self::resolve_lenient(value).map_err(serde::de::Error::custom)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Common field types
// ---------------------------------------------------------------------------

/// HTTP methods accepted by HTTP sources and destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Inbound HTTP endpoint descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub path: String,
    pub method: HttpMethod,
}

/// Inbound TCP listener descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSource {
    #[serde(default = "default_bind_host")]
    pub host: String,
    pub port: u16,
    /// Whether inbound messages use MLLP block framing.
    #[serde(default, alias = "use_mllp")]
    pub use_framing: bool,
}

tagged_config! {
    /// Where a channel's messages conceptually originate. Descriptive only.
    SourceConfig, family = "source" {
        Http(HttpSource) => "http",
        Tcp(TcpSource) => "tcp",
    }
}

impl SourceConfig {
    #[must_use]
    pub fn http(path: impl Into<String>, method: HttpMethod) -> Self {
        Self::Http(HttpSource {
            path: path.into(),
            method,
        })
    }

    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16, use_framing: bool) -> Self {
        Self::Tcp(TcpSource {
            host: host.into(),
            port,
            use_framing,
        })
    }
}

// ---------------------------------------------------------------------------
// Filters and transformers
// ---------------------------------------------------------------------------

/// Script that decides whether a message continues through the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFilter {
    pub script: String,
}

/// Script that may replace the in-flight message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptTransformer {
    pub script: String,
}

tagged_config! {
    /// A filter stage.
    FilterConfig, family = "filter" {
        Script(ScriptFilter) => "script" | "python_script",
    }
}

tagged_config! {
    /// A transformer stage.
    TransformerConfig, family = "transformer" {
        Script(ScriptTransformer) => "script" | "python_script",
    }
}

impl FilterConfig {
    #[must_use]
    pub fn script(script: impl Into<String>) -> Self {
        Self::Script(ScriptFilter {
            script: script.into(),
        })
    }
}

impl TransformerConfig {
    #[must_use]
    pub fn script(script: impl Into<String>) -> Self {
        Self::Script(ScriptTransformer {
            script: script.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Outbound HTTP target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpDestination {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Outbound TCP target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpDestination {
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "use_mllp")]
    pub use_framing: bool,
}

tagged_config! {
    /// A delivery target for processed messages.
    DestinationConfig, family = "destination" {
        Http(HttpDestination) => "http",
        Tcp(TcpDestination) => "tcp",
    }
}

impl DestinationConfig {
    /// HTTP destination with the default method (`POST`) and no headers.
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http(HttpDestination {
            url: url.into(),
            method: HttpMethod::default(),
            headers: None,
        })
    }

    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16, use_framing: bool) -> Self {
        Self::Tcp(TcpDestination {
            host: host.into(),
            port,
            use_framing,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
