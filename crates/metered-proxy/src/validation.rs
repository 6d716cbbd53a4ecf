use url::Url;

use crate::error::GatewayError;

/// Maximum length of an endpoint id.
const MAX_ENDPOINT_ID_LEN: usize = 64;

/// Endpoint ids appear as a path segment, so keep them to `[A-Za-z0-9_-]`.
pub fn validate_endpoint_id(id: &str) -> Result<(), GatewayError> {
    if id.is_empty() {
        return Err(GatewayError::InvalidEndpoint(
            "id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ENDPOINT_ID_LEN {
        return Err(GatewayError::InvalidEndpoint(format!(
            "id must be at most {} characters",
            MAX_ENDPOINT_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(GatewayError::InvalidEndpoint(
            "id may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

/// Upstream base URLs must be absolute http(s) URLs with a host and no query or fragment.
pub fn validate_upstream_url(url: &str) -> Result<(), GatewayError> {
    let parsed = Url::parse(url)
        .map_err(|_| GatewayError::InvalidEndpoint("invalid URL format".to_string()))?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(GatewayError::InvalidEndpoint(
            "upstream must use http or https".to_string(),
        ));
    }
    if parsed.host().is_none() {
        return Err(GatewayError::InvalidEndpoint(
            "upstream URL must have a host".to_string(),
        ));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(GatewayError::InvalidEndpoint(
            "upstream URL must not carry a query or fragment".to_string(),
        ));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(GatewayError::InvalidEndpoint(
            "upstream URL must not embed credentials".to_string(),
        ));
    }
    Ok(())
}

/// Maximum length of an account identifier.
const MAX_ACCOUNT_LEN: usize = 128;

/// Account identifiers are plain alphanumeric strings.
pub fn validate_account(account: &str) -> Result<(), GatewayError> {
    if account.is_empty() || account.len() > MAX_ACCOUNT_LEN {
        return Err(GatewayError::InvalidAccount(format!(
            "account must be 1 to {} characters",
            MAX_ACCOUNT_LEN
        )));
    }
    if !account.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::InvalidAccount(
            "account may only contain letters and digits".to_string(),
        ));
    }
    Ok(())
}

/// Check a forwarded path against traversal and authority injection.
///
/// Validates the fully decoded form and returns the path unchanged;
/// [`crate::proxy::upstream_url`] escapes any `?` or `#` it still contains.
pub fn sanitize_path(path: &str) -> Result<String, GatewayError> {
    let decoded = urlencoding::decode(path)
        .map_err(|_| GatewayError::InvalidPath("invalid URL encoding in path".to_string()))?;

    if decoded.split('/').any(|segment| segment == "..") {
        return Err(GatewayError::InvalidPath(
            "path traversal not allowed".to_string(),
        ));
    }
    if decoded.starts_with('/') {
        return Err(GatewayError::InvalidPath(
            "path must not start with /".to_string(),
        ));
    }
    if decoded.contains('@') {
        return Err(GatewayError::InvalidPath(
            "path must not contain @".to_string(),
        ));
    }
    if decoded.contains('\r') || decoded.contains('\n') || decoded.contains('\0') {
        return Err(GatewayError::InvalidPath(
            "path must not contain control characters".to_string(),
        ));
    }

    Ok(path.to_string())
}

/// Strip any fragment from a query string and reject CRLF and NUL injection.
pub fn sanitize_query(query: &str) -> Result<String, GatewayError> {
    let sanitized = match query.find('#') {
        Some(idx) => &query[..idx],
        None => query,
    };

    if sanitized.contains('\r') || sanitized.contains('\n') || sanitized.contains('\0') {
        return Err(GatewayError::InvalidPath(
            "query string must not contain control characters".to_string(),
        ));
    }

    Ok(sanitized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_ids() {
        assert!(validate_endpoint_id("a").is_ok());
        assert!(validate_endpoint_id("weather-api_v2").is_ok());
        assert!(validate_endpoint_id("").is_err());
        assert!(validate_endpoint_id("has space").is_err());
        assert!(validate_endpoint_id("slash/inside").is_err());
        assert!(validate_endpoint_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_upstream_urls() {
        assert!(validate_upstream_url("https://alpha-api-nightly.mol.ai").is_ok());
        assert!(validate_upstream_url("http://127.0.0.1:9000/base").is_ok());
        assert!(validate_upstream_url("ftp://example.com").is_err());
        assert!(validate_upstream_url("not a url").is_err());
        assert!(validate_upstream_url("https://example.com/?a=b").is_err());
        assert!(validate_upstream_url("https://user:pw@example.com").is_err());
    }

    #[test]
    fn test_accounts() {
        assert!(validate_account(
            "FMYHLHBSJJMJZNPVUOKDCUSFOPQAGPBSPOPMFVBGXUUDFPEWPXREZFQKGKSNHZWDMODRDYWIXQT9CLVBXGPANCSYBW"
        )
        .is_ok());
        assert!(validate_account("").is_err());
        assert!(validate_account("abc def").is_err());
        assert!(validate_account(&"A".repeat(129)).is_err());
    }

    #[test]
    fn test_sanitize_path_accepts_normal_paths() {
        assert_eq!(sanitize_path("v1/status").unwrap(), "v1/status");
        assert_eq!(sanitize_path("").unwrap(), "");
        assert_eq!(sanitize_path("files/a%20b").unwrap(), "files/a%20b");
        assert_eq!(sanitize_path("v1/file..txt").unwrap(), "v1/file..txt");
    }

    #[test]
    fn test_sanitize_path_rejects_traversal() {
        assert!(sanitize_path("../etc/passwd").is_err());
        assert!(sanitize_path("v1/%2e%2e/secret").is_err());
        assert!(sanitize_path("/evil.com").is_err());
        assert!(sanitize_path("user@evil.com").is_err());
        assert!(sanitize_path("a%0d%0aHost:x").is_err());
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("a=1&b=2").unwrap(), "a=1&b=2");
        assert_eq!(sanitize_query("a=1#frag").unwrap(), "a=1");
        assert!(sanitize_query("a=1\r\nX: y").is_err());
    }
}
