use crate::error::{AppError, AppResult};

/// Trimmed, non-empty text or a 400 with `message`.
pub fn required(value: Option<&str>, message: &str) -> AppResult<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(message))
}

/// `None` when the caller omitted the field or sent only whitespace.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> AppResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::bad_request("Please provide a valid email address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required(Some("  Asha "), "name").unwrap(), "Asha");
        assert!(required(Some("   "), "name").is_err());
        let err = required(None, "Name is required").unwrap_err();
        assert_eq!(err.to_string(), "Name is required");
    }

    #[test]
    fn optional_drops_blank_values() {
        assert_eq!(optional(Some(" x ")), Some("x".to_string()));
        assert_eq!(optional(Some("")), None);
        assert_eq!(optional(None), None);
    }

    #[test]
    fn emails_are_lowercased_and_trimmed() {
        assert_eq!(normalize_email("  Asha@Example.COM "), "asha@example.com");
    }

    #[test]
    fn email_needs_local_part_and_domain() {
        assert!(validate_email("a@b").is_ok());
        assert!(validate_email("ab").is_err());
        assert!(validate_email("@b").is_err());
        assert!(validate_email("a@").is_err());
    }
}
