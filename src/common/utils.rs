//! Utility functions for worldsync

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::future::Future;
use std::time::Duration;

/// Encode file content for a JSON body
pub fn encode_content(content: &[u8]) -> String {
    STANDARD.encode(content)
}

/// Decode file content received in a JSON body
pub fn decode_content(encoded: &str) -> crate::Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| crate::Error::Corrupted(format!("invalid base64 content: {}", e)))
}

/// BLAKE3 digest of file content, hex encoded
pub fn content_digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Turn `host:port` or a URL into a base URL without trailing slash
pub fn normalize_base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Retry with a fixed delay between attempts.
///
/// Only [`Error::is_retryable`](crate::Error::is_retryable) errors are retried; the last
/// one is returned once `attempts` are used up.
pub async fn retry_fixed<F, Fut, T>(mut f: F, attempts: usize, delay: Duration) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}
