/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `etags`: etag:{host/owner/repo} -> cache token (string)
/// - `issues`: issues:{host/owner/repo} -> IssueSnapshot (JSON)

/// Encode a cache token key: etag:{path}
pub fn encode_etag_key(path: &str) -> Vec<u8> {
    format!("etag:{}", path).into_bytes()
}

/// Decode a cache token key: etag:{path} -> path
pub fn decode_etag_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("etag:").map(String::from)
}

/// Encode an issue snapshot key: issues:{path}
pub fn encode_issues_key(path: &str) -> Vec<u8> {
    format!("issues:{}", path).into_bytes()
}
