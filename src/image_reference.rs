use crate::error::ResolveError;
use std::fmt;

pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const DEFAULT_ORGANIZATION: &str = "library";
pub const DIGEST_MARKER: &str = "@sha256";

const LATEST_TAG: &str = "latest";

/// What an image reference is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pin {
    Tag(String),
    Digest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The image string exactly as found in the container spec
    pub raw_url: String,
    pub domain: String,
    pub organization: String,
    pub software: String,
    pub pin: Pin,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_url)
    }
}

impl ImageReference {
    /// Parses `[[domain/]org/]software(:tag|@sha256:...)`.
    ///
    /// One path segment means `docker.io/library/<software>`, two mean
    /// `docker.io/<org>/<software>`. A missing tag is treated as `latest`,
    /// which is always rejected.
    pub fn parse(s: &str) -> Result<Self, ResolveError> {
        let (repository, pin) = match s.find(DIGEST_MARKER) {
            Some(pos) => {
                let (repository, _) = split_tag(&s[..pos]);
                (repository, Pin::Digest(s[pos + 1..].to_string()))
            }
            None => match split_tag(s) {
                (_, None) => return Err(latest_tag_error()),
                (_, Some(tag)) if tag == LATEST_TAG => return Err(latest_tag_error()),
                (repository, Some(tag)) => (repository, Pin::Tag(tag.to_string())),
            },
        };

        let segments: Vec<&str> = repository.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid_format_error());
        }

        let (domain, organization, software) = match segments.as_slice() {
            [software] => (DEFAULT_DOMAIN, DEFAULT_ORGANIZATION, *software),
            [organization, software] => (DEFAULT_DOMAIN, *organization, *software),
            [domain, organization, software] => (*domain, *organization, *software),
            _ => return Err(invalid_format_error()),
        };

        Ok(Self {
            raw_url: s.to_string(),
            domain: domain.to_string(),
            organization: organization.to_string(),
            software: software.to_string(),
            pin,
        })
    }

    /// `{domain}/{organization}/{software}@{digest}`
    pub fn with_digest(&self, digest: &str) -> String {
        format!(
            "{}/{}/{}@{}",
            self.domain, self.organization, self.software, digest
        )
    }
}

/// Splits off a tag, ignoring colons that belong to a registry port.
fn split_tag(s: &str) -> (&str, Option<&str>) {
    match s.rfind(':') {
        Some(pos) if pos > s.rfind('/').unwrap_or(0) => (&s[..pos], Some(&s[pos + 1..])),
        _ => (s, None),
    }
}

fn latest_tag_error() -> ResolveError {
    ResolveError::InvalidReference("Can not use latest tag".to_string())
}

fn invalid_format_error() -> ResolveError {
    ResolveError::InvalidReference("An image URL must have format hub/org/software".to_string())
}
