//! Context options

use serde::{Deserialize, Serialize};

use crate::Result;

/// Opt-ins for operations that touch many rows at once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Allow `truncate()`
    pub allow_truncation: bool,
    /// Allow explicit updates without a where condition
    pub allow_update_all: bool,
    /// Re-read inserted records when the table has virtual columns
    pub refetch_virtual_columns: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            allow_truncation: false,
            allow_update_all: false,
            refetch_virtual_columns: true,
        }
    }
}

impl ContextOptions {
    /// Parse options from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn allow_truncation(mut self, allow: bool) -> Self {
        self.allow_truncation = allow;
        self
    }

    pub fn allow_update_all(mut self, allow: bool) -> Self {
        self.allow_update_all = allow;
        self
    }

    pub fn refetch_virtual_columns(mut self, refetch: bool) -> Self {
        self.refetch_virtual_columns = refetch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ContextOptions::default();
        assert!(!options.allow_truncation);
        assert!(!options.allow_update_all);
        assert!(options.refetch_virtual_columns);
    }

    #[test]
    fn test_from_json_keeps_missing_defaults() {
        let options = ContextOptions::from_json(r#"{"allow_truncation": true}"#).unwrap();
        assert!(options.allow_truncation);
        assert!(options.refetch_virtual_columns);

        let err = ContextOptions::from_json("{").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }
}
