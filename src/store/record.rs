use crate::error::MailpoolError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;

const AT_TOKEN: &str = "_at_";

/// Account identifier: a validated email address.
///
/// The on-disk file stem is derived from it deterministically, so no index
/// beyond a directory listing is ever needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(email: impl AsRef<str>) -> Result<Self, MailpoolError> {
        let email = email.as_ref().trim();
        let invalid = |reason: &str| MailpoolError::InvalidRequest(format!("{reason}: {email:?}"));

        let Some((local, domain)) = email.split_once('@') else {
            return Err(invalid("email must contain '@'"));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(invalid("email must have exactly one '@' between non-empty parts"));
        }
        if domain.contains('_') {
            return Err(invalid("email domain must not contain '_'"));
        }
        if email.starts_with('.')
            || email
                .chars()
                .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
        {
            return Err(invalid("email contains characters not allowed in a file name"));
        }
        Ok(Self(email.to_string()))
    }

    /// Inverse of [`AccountId::file_stem`]. Splits on the last `_at_`; `parse`
    /// rejects underscores in the domain, so the split is unambiguous.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (local, domain) = stem.rsplit_once(AT_TOKEN)?;
        Self::parse(format!("{local}@{domain}")).ok()
    }

    pub fn file_stem(&self) -> String {
        self.0.replace('@', AT_TOKEN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted half of the account state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Live,
    Retired,
}

/// One account's credentials as stored on disk.
#[derive(Deserialize)]
pub struct CredentialRecord {
    #[serde(default)]
    pub email: String,
    #[serde(default = "empty_secret")]
    pub password: SecretString,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "empty_secret")]
    pub refresh_token: SecretString,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl CredentialRecord {
    pub fn from_json(identifier: &AccountId, bytes: &[u8]) -> Result<Self, MailpoolError> {
        let record: CredentialRecord =
            serde_json::from_slice(bytes).map_err(|e| MailpoolError::MalformedRecord {
                identifier: identifier.clone(),
                reason: e.to_string(),
            })?;
        record.validate(identifier)?;
        Ok(record)
    }

    fn validate(&self, identifier: &AccountId) -> Result<(), MailpoolError> {
        let missing = |field: &str| MailpoolError::MalformedRecord {
            identifier: identifier.clone(),
            reason: format!("missing '{field}'"),
        };
        if self.client_id.trim().is_empty() {
            return Err(missing("client_id"));
        }
        if self.refresh_token.expose_secret().trim().is_empty() {
            return Err(missing("refresh_token"));
        }
        Ok(())
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("email", &self.email)
            .field("client_id", &self.client_id)
            .field("password", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_round_trips_through_identifier() {
        let id = AccountId::parse("alice@example.com").unwrap();
        assert_eq!(id.file_stem(), "alice_at_example.com");
        assert_eq!(AccountId::from_file_stem("alice_at_example.com"), Some(id));
    }

    #[test]
    fn stem_with_at_token_in_local_part_splits_on_last() {
        let id = AccountId::parse("john_at_home@example.com").unwrap();
        let stem = id.file_stem();
        assert_eq!(stem, "john_at_home_at_example.com");
        assert_eq!(AccountId::from_file_stem(&stem), Some(id));
    }

    #[test]
    fn stem_without_marker_is_not_an_account() {
        assert_eq!(AccountId::from_file_stem("readme"), None);
    }

    #[test]
    fn rejects_path_like_identifiers() {
        assert!(AccountId::parse("../etc@passwd").is_err());
        assert!(AccountId::parse("a/b@example.com").is_err());
        assert!(AccountId::parse(".hidden@example.com").is_err());
        assert!(AccountId::parse("no-at-sign").is_err());
        assert!(AccountId::parse("a@b@c").is_err());
        assert!(AccountId::parse("@example.com").is_err());
    }

    #[test]
    fn distinct_identifiers_never_share_a_stem() {
        assert!(AccountId::parse("a@b_at_c.com").is_err());
        assert!(AccountId::parse("a@my_host.com").is_err());

        let id = AccountId::parse("a_at_b@c.com").unwrap();
        assert_eq!(id.file_stem(), "a_at_b_at_c.com");
        assert_eq!(AccountId::from_file_stem("a_at_b_at_c.com"), Some(id));
    }

    #[test]
    fn record_requires_client_id_and_refresh_token() {
        let id = AccountId::parse("a@example.com").unwrap();
        let ok = br#"{"email":"a@example.com","password":"p","client_id":"c","refresh_token":"r"}"#;
        let rec = CredentialRecord::from_json(&id, ok).unwrap();
        assert_eq!(rec.client_id, "c");
        assert_eq!(rec.refresh_token.expose_secret(), "r");

        let no_token = br#"{"email":"a@example.com","client_id":"c"}"#;
        assert!(matches!(
            CredentialRecord::from_json(&id, no_token),
            Err(MailpoolError::MalformedRecord { .. })
        ));

        assert!(matches!(
            CredentialRecord::from_json(&id, b"not json"),
            Err(MailpoolError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let id = AccountId::parse("a@example.com").unwrap();
        let raw = br#"{"email":"a@example.com","password":"hunter2","client_id":"c","refresh_token":"tok-123"}"#;
        let rec = CredentialRecord::from_json(&id, raw).unwrap();
        let dbg = format!("{rec:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("tok-123"));
    }
}
