//! Graph options and file-backed configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::GraphMetrics;
use crate::schema::{EDGE_VIEW_NAME, VERTEX_VIEW_NAME};

/// What `commit` does when an individual save fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Keep draining; failures are listed in the commit report.
    #[default]
    BestEffort,
    /// Stop at the first failed save and revert everything still queued.
    AbortOnFailure,
}

impl CommitPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Some(CommitPolicy::BestEffort),
            "abort_on_failure" | "abort" => Some(CommitPolicy::AbortOnFailure),
            _ => None,
        }
    }
}

/// Configuration options supplied when opening a [`crate::Graph`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Whether queued documents are locked. `None` asks the store.
    pub document_locking: Option<bool>,
    /// Failure handling during commit.
    pub commit_policy: CommitPolicy,
    /// View used to enumerate vertices.
    pub vertex_view_name: String,
    /// View used to enumerate edges.
    pub edge_view_name: String,
    /// Whether dirty adjacency sets are written back during commit.
    pub flush_adjacency_on_commit: bool,
    /// Whether derived keys are checked against the stored source key.
    pub detect_key_collisions: bool,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn GraphMetrics>>,
}

impl GraphOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self {
            document_locking: None,
            commit_policy: CommitPolicy::BestEffort,
            vertex_view_name: VERTEX_VIEW_NAME.to_owned(),
            edge_view_name: EDGE_VIEW_NAME.to_owned(),
            flush_adjacency_on_commit: true,
            detect_key_collisions: true,
            metrics: None,
        }
    }

    /// Forces document locking on or off regardless of the store setting.
    pub fn document_locking(mut self, enabled: bool) -> Self {
        self.document_locking = Some(enabled);
        self
    }

    /// Sets the commit failure policy.
    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    /// Overrides the vertex view name.
    pub fn vertex_view_name(mut self, name: impl Into<String>) -> Self {
        self.vertex_view_name = name.into();
        self
    }

    /// Overrides the edge view name.
    pub fn edge_view_name(mut self, name: impl Into<String>) -> Self {
        self.edge_view_name = name.into();
        self
    }

    /// Enables or disables the adjacency flush at commit.
    pub fn flush_adjacency_on_commit(mut self, enabled: bool) -> Self {
        self.flush_adjacency_on_commit = enabled;
        self
    }

    /// Enables or disables derived-key collision checks.
    pub fn detect_key_collisions(mut self, enabled: bool) -> Self {
        self.detect_key_collisions = enabled;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GraphOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOptions")
            .field("document_locking", &self.document_locking)
            .field("commit_policy", &self.commit_policy)
            .field("vertex_view_name", &self.vertex_view_name)
            .field("edge_view_name", &self.edge_view_name)
            .field("flush_adjacency_on_commit", &self.flush_adjacency_on_commit)
            .field("detect_key_collisions", &self.detect_key_collisions)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// `commit_policy` names an unknown policy.
    #[error("unknown commit policy {value:?}")]
    InvalidPolicy {
        /// Offending value.
        value: String,
    },
}

/// File-backed graph configuration.
///
/// ```toml
/// [graph]
/// document_locking = true
/// commit_policy = "abort_on_failure"
/// vertex_view = "(Vertices)"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphConfig {
    /// Explicit locking setting.
    pub document_locking: Option<bool>,
    /// Commit failure policy override.
    pub commit_policy: Option<CommitPolicy>,
    /// Vertex view override.
    pub vertex_view: Option<String>,
    /// Edge view override.
    pub edge_view: Option<String>,
    /// Adjacency flush override.
    pub flush_adjacency_on_commit: Option<bool>,
    /// Collision check override.
    pub detect_key_collisions: Option<bool>,
}

impl GraphConfig {
    /// Reads and parses `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Parses configuration from an in-memory TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let section = raw.graph;
        let commit_policy = section
            .commit_policy
            .as_deref()
            .map(|value| {
                CommitPolicy::parse(value).ok_or_else(|| ConfigError::InvalidPolicy {
                    value: value.to_owned(),
                })
            })
            .transpose()?;
        Ok(Self {
            document_locking: section.document_locking,
            commit_policy,
            vertex_view: section.vertex_view,
            edge_view: section.edge_view,
            flush_adjacency_on_commit: section.flush_adjacency_on_commit,
            detect_key_collisions: section.detect_key_collisions,
        })
    }

    /// Applies this configuration on top of `base`.
    pub fn apply(&self, mut base: GraphOptions) -> GraphOptions {
        if let Some(locking) = self.document_locking {
            base.document_locking = Some(locking);
        }
        if let Some(policy) = self.commit_policy {
            base.commit_policy = policy;
        }
        if let Some(name) = &self.vertex_view {
            base.vertex_view_name = name.clone();
        }
        if let Some(name) = &self.edge_view {
            base.edge_view_name = name.clone();
        }
        if let Some(flush) = self.flush_adjacency_on_commit {
            base.flush_adjacency_on_commit = flush;
        }
        if let Some(detect) = self.detect_key_collisions {
            base.detect_key_collisions = detect;
        }
        base
    }

    /// Options built from the defaults plus this configuration.
    pub fn into_options(self) -> GraphOptions {
        self.apply(GraphOptions::new())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    graph: GraphSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct GraphSection {
    document_locking: Option<bool>,
    commit_policy: Option<String>,
    vertex_view: Option<String>,
    edge_view: Option<String>,
    flush_adjacency_on_commit: Option<bool>,
    detect_key_collisions: Option<bool>,
}
