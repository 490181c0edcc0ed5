//! Alias paths
//!
//! Every column emitted to the adapter carries an alias that encodes where it
//! sits in the relationship tree: root columns keep their field name, related
//! columns are prefixed with the relationship names leading to them
//! (`Books<|Publisher<|Name`). Joined tables get `__Books<|Publisher__`.
//! Names may not contain the separator, which keeps the mapping injective.

use crate::{Error, Result};

/// Separates path segments inside an alias
pub const SEPARATOR: &str = "<|";

/// Leading character of aggregate pseudo-columns
pub const AGGREGATE_MARKER: char = '$';

/// Separates path segments in caller supplied field references (`Books.Title`)
pub const REFERENCE_SEPARATOR: char = '.';

/// Command alias of `field` in the table reached through `path`
pub fn column_alias(path: &[String], field: &str) -> String {
    if path.is_empty() {
        return field.to_string();
    }
    let mut alias = path.join(SEPARATOR);
    alias.push_str(SEPARATOR);
    alias.push_str(field);
    alias
}

/// Table alias of the table reached through a non-empty `path`
pub fn table_alias(path: &[String]) -> String {
    format!("__{}__", path.join(SEPARATOR))
}

/// Alias of an aggregate over the column aliased `column_alias`
/// (`$count<|Books<|Id`)
pub fn aggregate_alias(function: &str, column_alias: &str) -> String {
    format!("{}{}{}{}", AGGREGATE_MARKER, function, SEPARATOR, column_alias)
}

/// Whether an alias names an aggregate pseudo-column
pub fn is_aggregate(alias: &str) -> bool {
    alias.starts_with(AGGREGATE_MARKER)
}

/// Reject names that would break alias uniqueness
pub fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_query(format!("{} name cannot be empty", what)));
    }
    if name.contains(SEPARATOR) {
        return Err(Error::invalid_query(format!(
            "{} name '{}' cannot contain '{}'",
            what, name, SEPARATOR
        )));
    }
    if name.contains(REFERENCE_SEPARATOR) {
        return Err(Error::invalid_query(format!(
            "{} name '{}' cannot contain '{}'",
            what, name, REFERENCE_SEPARATOR
        )));
    }
    if name.starts_with(AGGREGATE_MARKER) {
        return Err(Error::invalid_query(format!(
            "{} name '{}' cannot start with '{}'",
            what, name, AGGREGATE_MARKER
        )));
    }
    Ok(())
}
