//! Path-segment and DNS-label-like name validation used by the store's keying scheme.
use crate::error::ApiError;

/// Validates that `name` is safe to embed as a single key path segment:
/// non-empty, no `/`, no `.`/`..` components, no control characters.
pub fn validate_path_segment(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    if name == "." || name == ".." {
        return Err(ApiError::BadRequest(format!("name may not be \"{name}\"")));
    }
    if name.contains('/') {
        return Err(ApiError::BadRequest("name may not contain '/'".into()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ApiError::BadRequest(
            "name may not contain control characters".into(),
        ));
    }
    Ok(())
}

/// A conservative DNS-label check: lowercase alphanumerics and `-`, must
/// start/end alphanumeric, max 253 chars. Used to validate fully-resolved
/// (post `generateName`) names.
pub fn is_dns_label_like(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    let bytes = name.as_bytes();
    let valid_char = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-';
    bytes.iter().all(|&b| valid_char(b))
        && bytes.first().is_some_and(|b| b.is_ascii_alphanumeric())
        && bytes.last().is_some_and(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_path_segment("..").is_err());
        assert!(validate_path_segment(".").is_err());
        assert!(validate_path_segment("a/b").is_err());
        assert!(validate_path_segment("").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_path_segment("my-object").is_ok());
        assert!(validate_path_segment("my.object").is_ok());
    }

    #[test]
    fn dns_label_like_rejects_uppercase_and_underscore() {
        assert!(!is_dns_label_like("My_Object"));
        assert!(is_dns_label_like("my-object-1"));
    }
}
