//! Domain errors for channel management and configuration resolution.

/// Failure to resolve a tagged configuration object into a concrete variant.
///
/// `path` names the offending position inside the channel payload, e.g.
/// `source` or `destinations[1]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{path}: configuration must be an object")]
    NotAnObject { path: String },
    #[error("{path}: missing string discriminant `type`")]
    MissingDiscriminant { path: String },
    #[error("{path}: unknown {family} type '{kind}'")]
    UnknownDiscriminant {
        path: String,
        family: &'static str,
        kind: String,
    },
    #[error("{path}: invalid {family} '{kind}' configuration: {reason}")]
    InvalidFields {
        path: String,
        family: &'static str,
        kind: String,
        reason: String,
    },
}

impl ConfigurationError {
    /// Returns the payload path the error refers to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::NotAnObject { path }
            | Self::MissingDiscriminant { path }
            | Self::UnknownDiscriminant { path, .. }
            | Self::InvalidFields { path, .. } => path,
        }
    }

    /// Re-anchors the error at a new payload path.
    #[must_use]
    pub fn at(mut self, new_path: impl Into<String>) -> Self {
        let new_path = new_path.into();
        match &mut self {
            Self::NotAnObject { path }
            | Self::MissingDiscriminant { path }
            | Self::UnknownDiscriminant { path, .. }
            | Self::InvalidFields { path, .. } => *path = new_path,
        }
        self
    }
}

/// Errors surfaced by channel management and the checked pipeline entry points.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel with ID '{id}' not found")]
    NotFound { id: String },
    #[error("channel with ID '{id}' already exists")]
    AlreadyExists { id: String },
    #[error("invalid channel data: {message}")]
    InvalidData { message: String },
    #[error("validation error for field '{field}': {message}")]
    Validation { field: String, message: String },
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("channel with ID '{id}' is disabled")]
    Disabled { id: String },
    #[error("channel store failure: {0}")]
    Store(#[source] anyhow::Error),
}

impl ChannelError {
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    #[must_use]
    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    #[must_use]
    pub fn invalid_data(message: impl std::fmt::Display) -> Self {
        Self::InvalidData {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wraps a storage backend failure.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::Store(err.into())
    }

    /// Short machine-readable tag for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidData { .. } => "invalid_data",
            Self::Validation { .. } => "validation_error",
            Self::Configuration(_) => "configuration_error",
            Self::Disabled { .. } => "channel_disabled",
            Self::Store(_) => "store_error",
        }
    }
}

/// Result alias for channel management operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
