//! Store construction options.

use crate::model::issue::is_valid_id_prefix;
use std::time::Duration;

pub const DEFAULT_ID_PREFIX: &str = "bd";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options applied when opening an issue store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Prefix of allocated ids, e.g. `bd` for `bd-12`.
    pub id_prefix: String,
    /// How long a write waits on a locked database file.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl StoreOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Returns a human-readable reason when the options are unusable.
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_id_prefix(&self.id_prefix) {
            return Err(format!(
                "id prefix `{}` must be non-empty and contain only [A-Za-z0-9_]",
                self.id_prefix
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StoreOptions;

    #[test]
    fn default_options_are_valid() {
        assert!(StoreOptions::default().validate().is_ok());
    }

    #[test]
    fn prefix_with_separator_is_rejected() {
        let err = StoreOptions::with_prefix("my-proj").validate().unwrap_err();
        assert!(err.contains("my-proj"));
    }
}
