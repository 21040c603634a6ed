// AT-URI parsing: `at://<authority>/<collection>/<rkey>`.
//
// Records are referenced across repositories by AT-URI: likes point at the
// liked post, replies point at their parent. Only the canonical three-segment
// record form is accepted here.

use std::fmt;

/// A parsed record AT-URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

/// Why an AT-URI failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed AT-URI {uri:?}: {reason}")]
pub struct AtUriError {
    pub uri: String,
    pub reason: &'static str,
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self, AtUriError> {
        let fail = |reason| AtUriError {
            uri: uri.to_string(),
            reason,
        };

        let rest = uri.strip_prefix("at://").ok_or_else(|| fail("missing at:// scheme"))?;
        let mut segments = rest.split('/');

        let authority = segments.next().unwrap_or_default();
        let collection = segments.next().unwrap_or_default();
        let rkey = segments.next().unwrap_or_default();

        if authority.is_empty() {
            return Err(fail("missing authority"));
        }
        if collection.is_empty() {
            return Err(fail("missing collection"));
        }
        if rkey.is_empty() {
            return Err(fail("missing record key"));
        }
        if segments.next().is_some() {
            return Err(fail("too many path segments"));
        }

        Ok(Self {
            authority: authority.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    /// Build the URI of a record from its repository and MST path.
    pub fn from_repo_path(repo: &str, path: &str) -> Result<Self, AtUriError> {
        Self::parse(&format!("at://{repo}/{path}"))
    }

    /// The repository path of the record (`<collection>/<rkey>`).
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.rkey)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

/// Record key from an MST path: the segment after the last `/`.
pub fn rkey_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_record_uri() {
        let uri = AtUri::parse("at://did:plc:xyz/app.bsky.feed.post/abc123").unwrap();
        assert_eq!(uri.authority, "did:plc:xyz");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "abc123");
        assert_eq!(uri.path(), "app.bsky.feed.post/abc123");
        assert_eq!(uri.to_string(), "at://did:plc:xyz/app.bsky.feed.post/abc123");
    }

    #[test]
    fn rejects_missing_rkey() {
        let err = AtUri::parse("at://did:plc:xyz/app.bsky.feed.post").unwrap_err();
        assert_eq!(err.reason, "missing record key");
        assert!(AtUri::parse("at://did:plc:xyz/app.bsky.feed.post/").is_err());
    }

    #[test]
    fn rejects_wrong_scheme_and_empty_authority() {
        assert!(AtUri::parse("https://did:plc:xyz/app.bsky.feed.post/abc").is_err());
        assert!(AtUri::parse("at:///app.bsky.feed.post/abc").is_err());
        assert!(AtUri::parse("").is_err());
    }

    #[test]
    fn rejects_extra_segments() {
        assert!(AtUri::parse("at://did:plc:xyz/app.bsky.feed.post/abc/extra").is_err());
    }

    #[test]
    fn builds_from_repo_and_path() {
        let uri = AtUri::from_repo_path("did:plc:abc", "app.bsky.feed.post/3k1").unwrap();
        assert_eq!(uri.to_string(), "at://did:plc:abc/app.bsky.feed.post/3k1");
    }

    #[test]
    fn rkey_of_takes_last_segment() {
        assert_eq!(rkey_of("app.bsky.feed.post/3k1"), "3k1");
        assert_eq!(rkey_of("plain"), "plain");
    }
}
