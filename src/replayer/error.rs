use thiserror::Error;
use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
use crate::replayer::contexts::descriptor_ctx::views::ViewKind;

/// Failure classes of a replay run. These travel inside `eyre::Report` and can be
/// recovered with `Report::downcast_ref::<ReplayError>()`.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Missing or invalid declared field, or an unrecognized token.
    #[error("invalid {context}: {message}")]
    Config {
        context: String,
        message: String,
    },

    #[error("could not find resource named \"{0}\"")]
    NotFound(String),

    /// Device-side allocation or view creation failed.
    #[error("failed to create {what} for \"{name}\": {reason}")]
    ResourceCreation {
        name: String,
        what: &'static str,
        reason: String,
    },

    /// A view requires a residency state incompatible with the one already committed.
    #[error("resource \"{resource}\" is committed to {committed:?}, {requested:?} view needs {required:?}")]
    StateConflict {
        resource: String,
        requested: ViewKind,
        committed: ResidencyState,
        required: ResidencyState,
    },

    /// Declared initial data disagrees with the declared extents.
    #[error("bad initial data for \"{resource}\": {message}")]
    Data {
        resource: String,
        message: String,
    },

    /// Submission, wait, or readback failed during an iteration.
    #[error("{stage} failed: {reason}")]
    Execution {
        stage: &'static str,
        reason: String,
    },
}

impl ReplayError {
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(context: impl Into<String>, field: &str) -> Self {
        Self::Config {
            context: context.into(),
            message: format!("missing required field \"{}\"", field),
        }
    }

    pub fn creation(name: &str, what: &'static str, reason: impl ToString) -> Self {
        Self::ResourceCreation {
            name: name.to_string(),
            what,
            reason: reason.to_string(),
        }
    }

    pub fn data(resource: &str, message: impl Into<String>) -> Self {
        Self::Data {
            resource: resource.to_string(),
            message: message.into(),
        }
    }

    pub fn execution(stage: &'static str, reason: impl ToString) -> Self {
        Self::Execution {
            stage,
            reason: reason.to_string(),
        }
    }
}
