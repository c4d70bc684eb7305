//! Buildkite pipelines and the repository matching used to pick them.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Pipelines carrying this env key may be built on demand from a PR branch.
pub const BRANCH_BUILD_MARKER: &str = "GH_CONTROL_IS_VALID_BRANCH_BUILD";
/// Templated documentation URL replacing the default description lookup.
pub const README_OVERRIDE_KEY: &str = "GH_CONTROL_README_URL";

/// Subset of https://buildkite.com/docs/apis/rest-api/pipelines the bot reads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Pipeline {
    pub slug: String,
    pub repository: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, Value>>,
}

impl Pipeline {
    pub fn is_branch_build_enabled(&self) -> bool {
        self.env
            .as_ref()
            .is_some_and(|env| env.contains_key(BRANCH_BUILD_MARKER))
    }

    pub fn readme_override(&self) -> Option<&str> {
        self.env
            .as_ref()
            .and_then(|env| env.get(README_OVERRIDE_KEY))
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
    }

    pub fn description_text(&self) -> &str {
        self.description.as_deref().map(str::trim).unwrap_or_default()
    }
}

/// Owner and name of a repository, independent of how its remote is spelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    /// Parses SCP-like (`user@host:owner/name.git`) and URL
    /// (`ssh://host/owner/name.git`, `https://host/owner/name`) remotes.
    ///
    /// Returns `None` for anything without an owner/name path, and for
    /// remotes with more than one `@`.
    pub fn parse(remote: &str) -> Option<Self> {
        let remote = remote.trim();
        let without_scheme = match remote.find("://") {
            Some(index) => &remote[index + 3..],
            None => remote,
        };

        let mut parts = without_scheme.split('@');
        let first = parts.next()?;
        let host_and_path = match (parts.next(), parts.next()) {
            (None, _) => first,
            (Some(rest), None) => rest,
            (Some(_), Some(_)) => return None,
        };

        let separator = host_and_path.find([':', '/'])?;
        let mut path = &host_and_path[separator + 1..];
        // ssh://host:22/owner/name
        if host_and_path[separator..].starts_with(':') {
            if let Some((port, rest)) = path.split_once('/') {
                if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                    path = rest;
                }
            }
        }

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut segments = path.rsplit('/').filter(|segment| !segment.is_empty());
        let name = segments.next()?;
        let owner = segments.next()?;

        Some(Self {
            owner: owner.to_ascii_lowercase(),
            name: name.to_ascii_lowercase(),
        })
    }
}

/// Pipelines enabled for branch builds whose repository is `repository_remote`.
///
/// Order follows the input; callers sort for display.
pub fn matching_pipelines(pipelines: Vec<Pipeline>, repository_remote: &str) -> Vec<Pipeline> {
    let Some(target) = RepoIdentity::parse(repository_remote) else {
        return Vec::new();
    };
    pipelines
        .into_iter()
        .filter(Pipeline::is_branch_build_enabled)
        .filter(|pipeline| RepoIdentity::parse(&pipeline.repository).as_ref() == Some(&target))
        .collect()
}
