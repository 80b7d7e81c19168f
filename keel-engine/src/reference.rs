//! Image reference resolution
//!
//! Normalizes an image reference the way the Docker CLI does: the default
//! registry is `docker.io`, official images live under `library/`, and a
//! reference without tag or digest is pinned to `:latest`.
//!
//! ```text
//! reference := name [ ":" tag ] [ "@" digest ]
//! name      := [ domain "/" ] path-component { "/" path-component }
//! ```

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{EngineError, Result};

const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const DEFAULT_TAG: &str = "latest";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("path component pattern")
});

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    let component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    Regex::new(&format!(r"^{component}(?:\.{component})*(?::[0-9]+)?$")).expect("domain pattern")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern"));

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
        .expect("digest pattern")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("identifier pattern"));

/// A resolved image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Fully qualified reference including an explicit tag (or digest)
    pub canonical: String,
    /// Registry domain used to look up credentials
    pub domain: String,
    /// Whether the reference floats on the `latest` tag
    pub latest: bool,
}

/// Parses an image reference into its canonical form
pub fn parse_image(reference: &str) -> Result<ImageReference> {
    if reference.is_empty() {
        return Err(EngineError::invalid_reference(reference, "reference is empty"));
    }
    if IDENTIFIER.is_match(reference) {
        return Err(EngineError::invalid_reference(
            reference,
            "cannot specify 64-byte hexadecimal strings",
        ));
    }

    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => {
            if !DIGEST.is_match(digest) {
                return Err(EngineError::invalid_reference(reference, "invalid digest"));
            }
            (name, Some(digest))
        }
        None => (reference, None),
    };

    // a colon after the last slash separates the tag; earlier colons belong
    // to a registry port
    let (name, tag) = match name.rfind(':') {
        Some(idx) if !name[idx..].contains('/') => {
            let tag = &name[idx + 1..];
            if !TAG.is_match(tag) {
                return Err(EngineError::invalid_reference(reference, "invalid tag"));
            }
            (&name[..idx], Some(tag))
        }
        _ => (name, None),
    };

    let (domain, path) = split_domain(name);
    if !DOMAIN.is_match(&domain) {
        return Err(EngineError::invalid_reference(reference, "invalid domain"));
    }
    if path.to_lowercase() != path {
        return Err(EngineError::invalid_reference(
            reference,
            "repository name must be lowercase",
        ));
    }
    if !path.split('/').all(|component| PATH_COMPONENT.is_match(component)) {
        return Err(EngineError::invalid_reference(
            reference,
            "invalid repository name",
        ));
    }
    if domain.len() + 1 + path.len() > NAME_TOTAL_LENGTH_MAX {
        return Err(EngineError::invalid_reference(
            reference,
            format!("repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters"),
        ));
    }

    let mut canonical = format!("{domain}/{path}");
    match (tag, digest) {
        (None, None) => {
            canonical.push(':');
            canonical.push_str(DEFAULT_TAG);
        }
        (tag, digest) => {
            if let Some(tag) = tag {
                canonical.push(':');
                canonical.push_str(tag);
            }
            if let Some(digest) = digest {
                canonical.push('@');
                canonical.push_str(digest);
            }
        }
    }

    let latest = canonical.ends_with(":latest");
    Ok(ImageReference {
        canonical,
        domain,
        latest,
    })
}

/// Splits a repository name into registry domain and remainder
///
/// The first component is a domain only if it looks like a host: it contains
/// a dot or a port, is `localhost`, or has uppercase letters (which a path
/// component cannot).
fn split_domain(name: &str) -> (String, String) {
    let (mut domain, mut path) = match name.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':'])
                || first == "localhost"
                || first.to_lowercase() != first =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    if domain == LEGACY_DEFAULT_DOMAIN {
        domain = DEFAULT_DOMAIN.to_string();
    }
    if domain == DEFAULT_DOMAIN && !path.contains('/') {
        path = format!("{OFFICIAL_REPO_PREFIX}{path}");
    }

    (domain, path)
}
