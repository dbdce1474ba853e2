//! Source types and service tiers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A data source a task collects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Website,
    AmazonReviews,
    Reddit,
    YoutubeComments,
    PersonaSynthesis,
}

impl SourceType {
    /// Every source, in step order.
    pub const ALL: [SourceType; 5] = [
        SourceType::Website,
        SourceType::AmazonReviews,
        SourceType::Reddit,
        SourceType::YoutubeComments,
        SourceType::PersonaSynthesis,
    ];

    /// Sources seeded when a job is submitted.
    pub const COLLECTION: [SourceType; 4] = [
        SourceType::Website,
        SourceType::AmazonReviews,
        SourceType::Reddit,
        SourceType::YoutubeComments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Website => "website",
            SourceType::AmazonReviews => "amazon_reviews",
            SourceType::Reddit => "reddit",
            SourceType::YoutubeComments => "youtube_comments",
            SourceType::PersonaSynthesis => "persona_synthesis",
        }
    }

    /// Whether a terminal failure of this source fails the whole job.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, SourceType::Website | SourceType::AmazonReviews)
    }

    /// Whether this source runs after collection rather than at submission.
    pub fn is_continuation(&self) -> bool {
        matches!(self, SourceType::PersonaSynthesis)
    }

    /// Default deadline for a single worker invocation.
    pub fn default_timeout(&self) -> Duration {
        match self {
            SourceType::Website | SourceType::AmazonReviews => Duration::from_secs(60),
            SourceType::Reddit | SourceType::YoutubeComments => Duration::from_secs(30),
            SourceType::PersonaSynthesis => Duration::from_secs(60),
        }
    }

    /// Name of the debug step recording this source.
    pub fn step_name(&self) -> String {
        match self {
            SourceType::PersonaSynthesis => self.as_str().to_string(),
            other => format!("collect_{}", other.as_str()),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| PipelineError::invalid_job(format!("unknown source type: {s}")))
    }
}

/// Service tier controlling how many items each source collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceTier {
    #[default]
    Basic,
    Premium,
    Enterprise,
    Pro,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTier::Basic => "basic",
            ServiceTier::Premium => "premium",
            ServiceTier::Enterprise => "enterprise",
            ServiceTier::Pro => "pro",
        }
    }

    /// Total item cap for the tier.
    pub fn item_limit(&self) -> u32 {
        match self {
            ServiceTier::Basic => 20,
            ServiceTier::Premium | ServiceTier::Enterprise | ServiceTier::Pro => 200,
        }
    }

    /// Item cap handed to a given source.
    ///
    /// Social sources share the tier total evenly.
    pub fn limit_for(&self, source: SourceType) -> u32 {
        match source {
            SourceType::Reddit | SourceType::YoutubeComments => self.item_limit() / 2,
            _ => self.item_limit(),
        }
    }
}

impl From<&str> for ServiceTier {
    /// Unknown tiers fall back to basic.
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "premium" => ServiceTier::Premium,
            "enterprise" => ServiceTier::Enterprise,
            "pro" => ServiceTier::Pro,
            _ => ServiceTier::Basic,
        }
    }
}

impl From<String> for ServiceTier {
    fn from(s: String) -> Self {
        ServiceTier::from(s.as_str())
    }
}

impl From<ServiceTier> for String {
    fn from(tier: ServiceTier) -> Self {
        tier.as_str().to_string()
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
