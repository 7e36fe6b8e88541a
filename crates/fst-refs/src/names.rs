//! Workspace name validation.
//!
//! Valid workspace names:
//! - Must be non-empty and at most 64 characters
//! - Must not contain whitespace, `/`, `\`, or control characters
//! - Must not start with `.` or `-`

use crate::error::{RefError, Result};

const MAX_NAME_LEN: usize = 64;

/// Validate a workspace name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use fst_refs::names::validate_workspace_name;
///
/// assert!(validate_workspace_name("main").is_ok());
/// assert!(validate_workspace_name("agent-2").is_ok());
/// assert!(validate_workspace_name("").is_err());
/// assert!(validate_workspace_name("a/b").is_err());
/// ```
pub fn validate_workspace_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| RefError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 64 characters"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '/' || *c == '\\')
    {
        return Err(invalid(&format!("contains forbidden character: {ch:?}")));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(invalid("must not start with '.' or '-'"));
    }
    Ok(())
}
