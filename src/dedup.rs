use sha2::{Digest, Sha256};

/// Characters of the last message that feed the fingerprint.
const TEXT_PREFIX_CHARS: usize = 50;

/// Fingerprint of a webhook snapshot, used to debounce repeated deliveries.
///
/// Hashes `phone | message count | first 50 chars of the last message`. The
/// count is `-` when neither the scraper nor a carried log supplied one. Two
/// snapshots that only differ after the first 50 characters collapse to the
/// same fingerprint; this is a debounce, not an integrity check.
pub fn snapshot_fingerprint(phone: &str, message_count: Option<usize>, last_text: &str) -> String {
    let count = message_count
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    let prefix: String = last_text.trim().chars().take(TEXT_PREFIX_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(phone.as_bytes());
    hasher.update(b"|");
    hasher.update(count.as_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());
    hex::encode(hasher.finalize())
}

/// True when the stored fingerprint matches the incoming one.
pub fn is_duplicate(stored: Option<&str>, incoming: &str) -> bool {
    stored == Some(incoming)
}
