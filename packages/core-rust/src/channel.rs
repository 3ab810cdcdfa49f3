//! The channel record and its construction-time validation.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::{DestinationConfig, FilterConfig, SourceConfig, TransformerConfig};
use crate::error::{ChannelError, ChannelResult, ConfigurationError};

/// Maximum length of a channel name, in characters.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum length of a channel description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Fields a construction payload must carry.
const REQUIRED_FIELDS: [&str; 3] = ["name", "source", "destinations"];

fn default_enabled() -> bool {
    true
}

/// Treats an explicit `null` sequence the same as an absent one.
fn null_as_empty<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A named path from a message source to one or more destinations.
///
/// `Deserialize` is lenient about configuration tags so persisted records
/// always load; use [`Channel::from_payload`] for untrusted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub source: SourceConfig,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filters: Vec<FilterConfig>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub transformers: Vec<TransformerConfig>,
    pub destinations: Vec<DestinationConfig>,
}

impl Channel {
    /// Creates an enabled channel with no filters or transformers.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: SourceConfig,
        destinations: Vec<DestinationConfig>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            source,
            filters: Vec::new(),
            transformers: Vec::new(),
            destinations,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: TransformerConfig) -> Self {
        self.transformers.push(transformer);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds a channel from an untrusted JSON payload.
    ///
    /// Every configuration object is resolved strictly, at every nesting
    /// level. The payload must already carry an `id`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidData`] when the payload or a scalar field has
    ///   the wrong JSON type.
    /// - [`ChannelError::Validation`] when a domain rule is violated.
    /// - [`ChannelError::Configuration`] when a tagged configuration cannot
    ///   be resolved.
    pub fn from_payload(payload: &Value) -> ChannelResult<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| ChannelError::invalid_data("payload must be a JSON object"))?;

        for field in REQUIRED_FIELDS {
            if present(object, field).is_none() {
                return Err(ChannelError::validation(
                    field,
                    format!("Field '{field}' is required"),
                ));
            }
        }

        let id = match present(object, "id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::String(_)) | None => {
                return Err(ChannelError::validation("id", "Channel ID cannot be empty"))
            }
            Some(_) => return Err(ChannelError::invalid_data("'id' must be a string")),
        };

        let name = match present(object, "name") {
            Some(Value::String(name)) => validate_name(name)?,
            _ => return Err(ChannelError::invalid_data("'name' must be a string")),
        };

        let description = match present(object, "description") {
            None => None,
            Some(Value::String(text)) => Some(validate_description(text)?),
            Some(_) => return Err(ChannelError::invalid_data("'description' must be a string")),
        };

        let enabled = match present(object, "enabled") {
            None => true,
            Some(Value::Bool(enabled)) => *enabled,
            Some(_) => return Err(ChannelError::invalid_data("'enabled' must be a boolean")),
        };

        let raw_destinations = sequence(object, "destinations")?;
        if raw_destinations.is_empty() {
            return Err(ChannelError::validation(
                "destinations",
                "At least one destination is required",
            ));
        }

        let source = SourceConfig::resolve(&object["source"]).map_err(|e| e.at("source"))?;
        let filters = resolve_all(&sequence(object, "filters")?, "filters", FilterConfig::resolve)?;
        let transformers = resolve_all(
            &sequence(object, "transformers")?,
            "transformers",
            TransformerConfig::resolve,
        )?;
        let destinations =
            resolve_all(&raw_destinations, "destinations", DestinationConfig::resolve)?;

        Ok(Self {
            id,
            name,
            description,
            enabled,
            source,
            filters,
            transformers,
            destinations,
        })
    }

    /// Checks the domain rules on an already-typed channel.
    ///
    /// # Errors
    ///
    /// Returns a validation or configuration error for the first rule broken.
    pub fn validate(&self) -> ChannelResult<()> {
        if self.id.trim().is_empty() {
            return Err(ChannelError::validation("id", "Channel ID cannot be empty"));
        }
        validate_name(&self.name)?;
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        if self.destinations.is_empty() {
            return Err(ChannelError::validation(
                "destinations",
                "At least one destination is required",
            ));
        }

        reject_unrecognized(std::slice::from_ref(&self.source), "source", |s| {
            (s.is_recognized(), s.kind(), SourceConfig::FAMILY)
        })?;
        reject_unrecognized(&self.filters, "filters", |f| {
            (f.is_recognized(), f.kind(), FilterConfig::FAMILY)
        })?;
        reject_unrecognized(&self.transformers, "transformers", |t| {
            (t.is_recognized(), t.kind(), TransformerConfig::FAMILY)
        })?;
        reject_unrecognized(&self.destinations, "destinations", |d| {
            (d.is_recognized(), d.kind(), DestinationConfig::FAMILY)
        })?;
        Ok(())
    }

    /// Merges a partial update into this channel and re-validates the result.
    ///
    /// Any `id` in the patch is ignored; the identifier never changes.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::from_payload`] for the merged document.
    pub fn merge_patch(&self, patch: &Value) -> ChannelResult<Self> {
        let patch = patch
            .as_object()
            .ok_or_else(|| ChannelError::invalid_data("update must be a JSON object"))?;

        let mut merged = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ChannelError::invalid_data("channel did not serialize to an object")),
            Err(e) => return Err(ChannelError::invalid_data(e)),
        };
        for (key, value) in patch {
            if key != "id" {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.insert("id".to_string(), Value::String(self.id.clone()));

        Self::from_payload(&Value::Object(merged))
    }
}

/// Returns a field when it is present and not `null`.
fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|v| !v.is_null())
}

/// Reads an optional array field; absent or `null` reads as empty.
fn sequence(object: &Map<String, Value>, field: &str) -> ChannelResult<Vec<Value>> {
    match present(object, field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ChannelError::invalid_data(format!("'{field}' must be an array"))),
    }
}

fn resolve_all<T>(
    items: &[Value],
    field: &str,
    resolve: impl Fn(&Value) -> Result<T, ConfigurationError>,
) -> ChannelResult<Vec<T>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| resolve(item).map_err(|e| e.at(format!("{field}[{i}]")).into()))
        .collect()
}

fn reject_unrecognized<T>(
    items: &[T],
    field: &str,
    describe: impl Fn(&T) -> (bool, &str, &'static str),
) -> ChannelResult<()> {
    for (i, item) in items.iter().enumerate() {
        let (recognized, kind, family) = describe(item);
        if !recognized {
            let path = if field == "source" {
                field.to_string()
            } else {
                format!("{field}[{i}]")
            };
            return Err(ConfigurationError::UnknownDiscriminant {
                path,
                family,
                kind: kind.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> ChannelResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ChannelError::validation("name", "Name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ChannelError::validation(
            "name",
            format!("Name cannot exceed {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_description(description: &str) -> ChannelResult<String> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ChannelError::validation(
            "description",
            format!("Description cannot exceed {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
    Ok(description.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
