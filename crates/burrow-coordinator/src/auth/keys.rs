//! Authorized key parsing and comparison

use russh::keys::{parse_public_key_base64, PublicKey};

/// A registered key parsed from its OpenSSH text form
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// Parsed public key
    pub key: PublicKey,
    /// Key comment (if any)
    pub comment: Option<String>,
}

impl AuthorizedKey {
    /// Parse an authorized key line
    ///
    /// Accepts both the full `type base64 [comment]` form and a bare base64
    /// blob. Returns `None` for blank lines, comments and unparsable keys.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let key = match PublicKey::from_openssh(line) {
            Ok(key) => key,
            Err(_) => parse_public_key_base64(line).ok()?,
        };
        let comment = Some(key.comment().trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Some(Self { key, comment })
    }

    /// Whether `offered` is the same key, ignoring comments
    pub fn matches(&self, offered: &PublicKey) -> bool {
        same_key(&self.key, offered)
    }
}

/// Structural key equality over the key material
pub fn same_key(a: &PublicKey, b: &PublicKey) -> bool {
    a.key_data() == b.key_data()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line_with_comment() {
        let key = test_keys::generate();
        let line = test_keys::openssh_line(&key, "worker@build-01");

        let parsed = AuthorizedKey::parse(&line).unwrap();
        assert!(parsed.matches(&key));
        assert_eq!(parsed.comment.as_deref(), Some("worker@build-01"));
    }

    #[test]
    fn test_parse_bare_base64() {
        use russh::keys::PublicKeyBase64;

        let key = test_keys::generate();
        let parsed = AuthorizedKey::parse(&key.public_key_base64()).unwrap();
        assert!(parsed.matches(&key));
        assert!(parsed.comment.is_none());
    }

    #[test]
    fn test_skips_comments_and_garbage() {
        assert!(AuthorizedKey::parse("").is_none());
        assert!(AuthorizedKey::parse("# ssh-ed25519 AAAA").is_none());
        assert!(AuthorizedKey::parse("ssh-ed25519 not-base64!!").is_none());
    }

    #[test]
    fn test_different_keys_do_not_match() {
        let a = test_keys::generate();
        let b = test_keys::generate();
        let parsed = AuthorizedKey::parse(&test_keys::openssh_line(&a, "a")).unwrap();

        assert!(parsed.matches(&a));
        assert!(!parsed.matches(&b));
    }
}
