use sha2::{Digest, Sha256};

use crate::issue::IssueKey;

/// Length of the hex fingerprint emitted next to each issue key.
pub const FINGERPRINT_LEN: usize = 12;

/// Stable short fingerprint for an issue key.
///
/// Derived only from the key text, so the same logical problem carries the same
/// fingerprint in every run and on every host.
pub fn issue_fingerprint(key: &IssueKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueKind;

    #[test]
    fn fingerprint_is_stable_and_key_sensitive() {
        let a = IssueKey::new("portal", IssueKind::HealthUnhealthy, "/health");
        let b = IssueKey::new("portal", IssueKind::HealthUnhealthy, "/health");
        let c = IssueKey::new("review", IssueKind::HealthUnhealthy, "/health");
        assert_eq!(issue_fingerprint(&a), issue_fingerprint(&b));
        assert_ne!(issue_fingerprint(&a), issue_fingerprint(&c));
        assert_eq!(issue_fingerprint(&a).len(), FINGERPRINT_LEN);
    }
}
