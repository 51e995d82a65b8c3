//! Container image references and the Vault server version encoded in their
//! tag.
//!
//! Parsing is purely syntactic and follows the grammar of the Docker
//! distribution reference format:
//!
//! ```text
//! reference := name [ ":" tag ] [ "@" digest ]
//! name      := [ domain "/" ] path-component [ "/" path-component ]*
//! ```
//!
//! A bare 64 character hex string is accepted as well and treated as an image
//! ID, which like any digest-only reference carries no tag.

use std::{fmt::Display, str::FromStr, sync::LazyLock};

use const_format::concatcp;
use regex::Regex;
use semver::Version;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

const ALPHANUMERIC_FMT: &str = "[a-z0-9]+";
const SEPARATOR_FMT: &str = "(?:[._]|__|[-]+)";
const PATH_COMPONENT_FMT: &str = concatcp!(ALPHANUMERIC_FMT, "(?:", SEPARATOR_FMT, ALPHANUMERIC_FMT, ")*");
const DOMAIN_COMPONENT_FMT: &str = "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
const DOMAIN_FMT: &str = concatcp!(
    "(?:",
    DOMAIN_COMPONENT_FMT,
    "(?:\\.",
    DOMAIN_COMPONENT_FMT,
    ")*|\\[[a-fA-F0-9:]+\\])(?::[0-9]+)?"
);
const NAME_FMT: &str = concatcp!(
    "(?:",
    DOMAIN_FMT,
    "/)?",
    PATH_COMPONENT_FMT,
    "(?:/",
    PATH_COMPONENT_FMT,
    ")*"
);
const TAG_FMT: &str = "[\\w][\\w.-]{0,127}";
const DIGEST_FMT: &str = "[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

/// Repository names longer than this are rejected by registries.
const NAME_MAX_LENGTH: usize = 255;

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "^(?P<name>{NAME_FMT})(?::(?P<tag>{TAG_FMT}))?(?:@(?P<digest>{DIGEST_FMT}))?$"
    ))
    .expect("failed to compile image reference regex")
});

static IMAGE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-f0-9]{64}$").expect("failed to compile image ID regex"));

static LOOSE_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(?P<core>[0-9]+(?:\.[0-9]+){0,2})(?P<rest>[-+].*)?$")
        .expect("failed to compile version regex")
});

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse {reference:?} as an image reference"))]
    InvalidReference { reference: String },

    #[snafu(display(
        "image reference {reference:?} has a name of {length} characters, at most {NAME_MAX_LENGTH} are allowed"
    ))]
    NameTooLong { reference: String, length: usize },

    #[snafu(display("image reference {reference:?} does not have a tag"))]
    MissingTag { reference: String },

    #[snafu(display("failed to parse image tag {tag:?} as a semantic version"))]
    InvalidVersion { source: semver::Error, tag: String },
}

/// A parsed container image reference, e.g.
/// `ghcr.io/bank-vaults/bank-vaults:1.20.0@sha256:...`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageReference {
    /// The registry domain, e.g. `ghcr.io` or `localhost:5000`. [`None`] for
    /// images on the default registry.
    pub domain: Option<String>,

    /// The repository path without the domain, e.g. `hashicorp/vault`.
    pub path: String,

    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self> {
        if IMAGE_ID_REGEX.is_match(reference) {
            return Ok(Self {
                domain: None,
                path: String::new(),
                tag: None,
                digest: Some(format!("sha256:{reference}")),
            });
        }

        let captures = REFERENCE_REGEX
            .captures(reference)
            .context(InvalidReferenceSnafu { reference })?;
        let name = captures
            .name("name")
            .context(InvalidReferenceSnafu { reference })?
            .as_str();
        ensure!(
            name.len() <= NAME_MAX_LENGTH,
            NameTooLongSnafu {
                reference,
                length: name.len()
            }
        );

        let (domain, path) = split_domain(name);
        // Without a domain the first component could only match as one
        ensure!(
            !path.chars().any(|c| c.is_ascii_uppercase()),
            InvalidReferenceSnafu { reference }
        );

        Ok(Self {
            domain: domain.map(ToOwned::to_owned),
            path: path.to_owned(),
            tag: captures.name("tag").map(|tag| tag.as_str().to_owned()),
            digest: captures.name("digest").map(|digest| digest.as_str().to_owned()),
        })
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(domain) = &self.domain {
            write!(f, "{domain}/")?;
        }
        f.write_str(&self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl ImageReference {
    /// Parses the tag of this reference as a semantic version.
    pub fn version(&self) -> Result<Version> {
        let tag = self.tag.as_deref().context(MissingTagSnafu {
            reference: self.to_string(),
        })?;
        parse_version(tag)
    }
}

/// Returns the Vault server version encoded in the tag of `image`.
///
/// Digest-only references are rejected, as they don't say anything about the
/// version they point to.
///
/// ```
/// # use vault_operator::image::server_version;
/// let version = server_version("hashicorp/vault:1.15.2").unwrap();
/// assert_eq!(version, semver::Version::new(1, 15, 2));
///
/// assert!(server_version("hashicorp/vault").is_err());
/// assert!(server_version("hashicorp/vault:latest").is_err());
/// ```
pub fn server_version(image: &str) -> Result<Version> {
    image.parse::<ImageReference>()?.version()
}

/// Parses a tag as semantic version.
///
/// A leading `v` is accepted and missing minor and patch components default
/// to `0`, so `v1.14` is read as `1.14.0`.
pub fn parse_version(tag: &str) -> Result<Version> {
    let normalized = match LOOSE_VERSION_REGEX.captures(tag) {
        Some(captures) => {
            let core = captures.name("core").map_or("", |core| core.as_str());
            let rest = captures.name("rest").map_or("", |rest| rest.as_str());
            let padding = match core.matches('.').count() {
                0 => ".0.0",
                1 => ".0",
                _ => "",
            };
            format!("{core}{padding}{rest}")
        }
        None => tag.to_owned(),
    };

    Version::parse(&normalized).context(InvalidVersionSnafu { tag })
}

/// Splits the repository name into domain and path. The first component is
/// only a domain if it looks like a host name, i.e. contains a `.` or `:`, or
/// is `localhost`.
fn split_domain(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':']) || first == "localhost" || first.starts_with('[') =>
        {
            (Some(first), rest)
        }
        _ => (None, name),
    }
}
