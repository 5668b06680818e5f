use std::time::{SystemTime, UNIX_EPOCH};

/// Branch name reduced to a container-name-safe slug: anything outside
/// `[a-zA-Z0-9._-]` becomes `-`, and the result never starts or ends with
/// a separator.
pub fn branch_slug(branch: &str) -> String {
    let slug: String = branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = slug.trim_matches(|c| c == '-' || c == '.' || c == '_');
    if trimmed.is_empty() {
        "branch".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Derive a fresh environment id: branch slug, 7-char commit prefix, and a
/// 6-hex random suffix so the same branch can hold several live
/// environments. The store's create still rejects duplicates defensively.
pub fn derive_env_id(branch: &str, commit: &str) -> String {
    let slug = branch_slug(branch);
    let short = &commit[..7.min(commit.len())];

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id();
    let suffix = &blake3::hash(format!("{branch}\0{commit}\0{nanos}\0{pid}").as_bytes()).to_hex()
        [..6];

    format!("{slug}-{short}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_flattens_separators() {
        assert_eq!(branch_slug("feature/x"), "feature-x");
        assert_eq!(branch_slug("fix/login bug"), "fix-login-bug");
        assert_eq!(branch_slug("main"), "main");
    }

    #[test]
    fn slug_trims_edge_separators() {
        assert_eq!(branch_slug("/weird/"), "weird");
        assert_eq!(branch_slug("---"), "branch");
    }

    #[test]
    fn env_id_carries_branch_and_commit() {
        let id = derive_env_id("feature/x", "abc1234def5678");
        assert!(id.starts_with("feature-x-abc1234-"));
    }

    #[test]
    fn env_id_suffix_is_six_hex_chars() {
        let id = derive_env_id("main", "abc1234def5678");
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn env_id_tolerates_short_commits() {
        let id = derive_env_id("main", "ab12");
        assert!(id.starts_with("main-ab12-"));
    }

    #[test]
    fn consecutive_ids_differ() {
        let a = derive_env_id("main", "abc1234def5678");
        let b = derive_env_id("main", "abc1234def5678");
        assert_ne!(a, b, "random suffix must separate repeat provisions");
    }
}
