//! Repository identifiers and exclusion patterns

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid repository {0:?}; expected owner/repo or a github.com URL")]
    Repository(String),

    #[error("invalid exclusion pattern {0:?}; expected owner/repo, owner/*, */repo or */*")]
    Pattern(String),
}

/// A GitHub repository, `owner/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Case-folded `owner/name`, the identity GitHub uses and the key
    /// persisted state is stored under
    pub fn key(&self) -> String {
        self.full_name().to_ascii_lowercase()
    }

    /// Parse `owner/repo`, `github.com/owner/repo` or a full GitHub URL,
    /// with an optional `.git` suffix or trailing slash
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim();
        let invalid = || ParseError::Repository(input.to_string());

        if input.is_empty() {
            return Err(invalid());
        }
        if !input.contains("github.com") {
            return parse_owner_repo(input).ok_or_else(invalid);
        }

        let with_scheme = if input.starts_with("http://") || input.starts_with("https://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };

        let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
        if url.host_str() != Some("github.com") {
            return Err(invalid());
        }

        let path = url.path().trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        parse_owner_repo(path).ok_or_else(invalid)
    }
}

fn parse_owner_repo(input: &str) -> Option<RepoId> {
    let (owner, name) = input.trim_matches('/').split_once('/')?;
    let (owner, name) = (owner.trim(), name.trim());

    let valid = |part: &str| {
        !part.is_empty() && !part.contains('/') && !part.contains(char::is_whitespace)
    };
    (valid(owner) && valid(name)).then(|| RepoId::new(owner, name))
}

impl FromStr for RepoId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A validated exclusion pattern: `owner/repo`, `owner/*`, `*/repo` or `*/*`.
/// Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionPattern {
    owner: Segment,
    name: Segment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Any,
    Exact(String),
}

impl Segment {
    fn parse(part: &str) -> Option<Self> {
        if part == "*" {
            return Some(Self::Any);
        }
        is_valid_identifier(part).then(|| Self::Exact(part.to_string()))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected.eq_ignore_ascii_case(value),
        }
    }
}

fn is_valid_identifier(part: &str) -> bool {
    !part.is_empty()
        && !part.starts_with(['-', '.'])
        && !part.contains("..")
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl ExclusionPattern {
    pub fn matches(&self, repo: &RepoId) -> bool {
        self.owner.matches(&repo.owner) && self.name.matches(&repo.name)
    }
}

impl FromStr for ExclusionPattern {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = s.trim();
        let invalid = || ParseError::Pattern(pattern.to_string());

        let (owner, name) = pattern.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            owner: Segment::parse(owner).ok_or_else(invalid)?,
            name: Segment::parse(name).ok_or_else(invalid)?,
        })
    }
}

impl fmt::Display for ExclusionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |segment: &Segment| match segment {
            Segment::Any => "*".to_string(),
            Segment::Exact(value) => value.clone(),
        };
        write!(f, "{}/{}", part(&self.owner), part(&self.name))
    }
}

/// Drop repositories matched by any of `patterns`
pub fn filter_excluded(repos: Vec<RepoId>, patterns: &[ExclusionPattern]) -> Vec<RepoId> {
    repos
        .into_iter()
        .filter(|repo| !patterns.iter().any(|p| p.matches(repo)))
        .collect()
}

/// Drop repeated repositories, keeping the first spelling of each
pub fn dedup_repos(repos: Vec<RepoId>) -> Vec<RepoId> {
    let mut seen = HashSet::new();
    repos.into_iter().filter(|repo| seen.insert(repo.key())).collect()
}
