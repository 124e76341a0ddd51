//! Project-management core.
//!
//! Every operation takes the connection pool explicitly. Authorization lives in
//! [`access`]; the lifecycle operations in [`tasks`] and [`projects`] assume the
//! caller has already been checked and only receive the facts they need (for
//! example the [`EditScope`] of a task update).

pub mod access;
pub mod attachments;
pub mod comments;
pub mod error;
pub mod notifications;
pub mod projects;
pub mod stats;
pub mod storage;
pub mod sweepers;
pub mod tasks;
pub mod tree;
pub mod users;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;

pub use error::{PmError, PmResult};
pub use platform_authz::{EditScope, PolicyEngine, Principal, ProjectPolicy};

pub(crate) fn now() -> DateTimeWithTimeZone {
    Utc::now().into()
}

/// Trims `value` and enforces a non-empty, bounded string.
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> PmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PmError::Validation(format!("{field} cannot be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(PmError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trims optional free text; blank collapses to `None`.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("title", "  Ship it ", 255).unwrap(), "Ship it");
        assert!(matches!(
            required_text("title", "   ", 255),
            Err(PmError::Validation(_))
        ));
        let long = "x".repeat(256);
        assert!(required_text("title", &long, 255).is_err());
    }

    #[test]
    fn optional_text_drops_blank() {
        assert_eq!(optional_text(Some("  ".into())), None);
        assert_eq!(optional_text(Some(" notes ".into())), Some("notes".into()));
        assert_eq!(optional_text(None), None);
    }
}
