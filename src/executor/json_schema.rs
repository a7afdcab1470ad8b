use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};
use crate::models::DatabaseInfo;

/// Pre-exported schema descriptions used when the live database is
/// unreachable (spec.md §4.2 "fall back to a pre-exported JSON
/// description file for `database_id`"). Each file is
/// `{directory}/{database_id}.json`, deserialising directly to a
/// [`DatabaseInfo`] — the same shape `introspect` would have produced.
pub struct JsonSchemaSource {
    directory: PathBuf,
}

impl JsonSchemaSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn load(&self, database_id: &str) -> CoreResult<DatabaseInfo> {
        let path = self.directory.join(format!("{database_id}.json"));
        let bytes = std::fs::read_to_string(&path)
            .map_err(|_| CoreError::DatabaseNotFound(database_id.to_string()))?;
        serde_json::from_str(&bytes)
            .map_err(|e| CoreError::IntrospectionFailed(format!("malformed schema export for `{database_id}`: {e}")))
    }
}
