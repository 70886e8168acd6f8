//! Target domain validation
//!
//! Scan targets are bare hostnames. Each dot-separated label is 1-63 ASCII
//! alphanumeric or hyphen characters and may not start or end with a hyphen.
//! Schemes, paths, ports and whitespace are all rejected.

use crate::{CoreError, CoreResult};

const MAX_LABEL_LEN: usize = 63;

/// Validate a scan target hostname, normalizing to lowercase.
pub fn validate_domain(input: &str) -> CoreResult<String> {
    if input.is_empty() {
        return Err(CoreError::InvalidDomain);
    }

    for label in input.split('.') {
        if !is_valid_label(label) {
            return Err(CoreError::InvalidDomain);
        }
    }

    Ok(input.to_ascii_lowercase())
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_hostnames() {
        assert_eq!(validate_domain("example.com").unwrap(), "example.com");
        assert_eq!(validate_domain("sub.Example.COM").unwrap(), "sub.example.com");
        assert!(validate_domain("xn--bcher-kva.example").is_ok());
        assert!(validate_domain("a.b.c.d.e").is_ok());
        assert!(validate_domain("localhost").is_ok());
        assert!(validate_domain("my-site.co.uk").is_ok());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(validate_domain(""), Err(CoreError::InvalidDomain)));
    }

    #[test]
    fn rejects_urls_and_paths() {
        assert!(validate_domain("http://example.com").is_err());
        assert!(validate_domain("example.com/path").is_err());
        assert!(validate_domain("example.com:8080").is_err());
    }

    #[test]
    fn rejects_hyphen_edges() {
        assert!(validate_domain("-bad-.com").is_err());
        assert!(validate_domain("-example.com").is_err());
        assert!(validate_domain("example-.com").is_err());
    }

    #[test]
    fn rejects_empty_labels() {
        assert!(validate_domain(".example.com").is_err());
        assert!(validate_domain("example.com.").is_err());
        assert!(validate_domain("example..com").is_err());
    }

    #[test]
    fn rejects_overlong_labels() {
        let long = "a".repeat(64);
        assert!(validate_domain(&format!("{long}.com")).is_err());
        let ok = "a".repeat(63);
        assert!(validate_domain(&format!("{ok}.com")).is_ok());
    }

    #[test]
    fn rejects_whitespace_and_unicode() {
        assert!(validate_domain("exa mple.com").is_err());
        assert!(validate_domain("exämple.com").is_err());
    }
}
