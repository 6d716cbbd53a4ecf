use actix_web::HttpRequest;
use sha2::{Digest, Sha256};

/// Constant-time byte comparison that does not leak input lengths.
/// Both inputs are hashed to fixed-length digests before comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    let mut result = 0u8;
    for (x, y) in ha.iter().zip(hb.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// True when the request carries `Authorization: Bearer <expected>`.
pub fn bearer_matches(req: &HttpRequest, expected: &str) -> bool {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token-but-longer"));
    }

    #[test]
    fn test_bearer_matches() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_http_request();
        assert!(bearer_matches(&req, "s3cret"));
        assert!(!bearer_matches(&req, "other"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic s3cret"))
            .to_http_request();
        assert!(!bearer_matches(&req, "s3cret"));

        let req = TestRequest::default().to_http_request();
        assert!(!bearer_matches(&req, "s3cret"));
    }
}
