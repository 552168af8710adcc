//! Deployment identity and lifecycle record.

use deployd_sdk::objects::{DeploymentStatus, StatusResponse};
use std::borrow::Borrow;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque identifier of one deployment attempt.
///
/// Generated from a UUIDv7, so ids are never reused and sort by creation
/// time. Any string received from a client can be wrapped for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeploymentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeploymentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Borrow<str> for DeploymentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a deployment's lifecycle.
///
/// `status` only moves forward: `Running` first, then exactly one of
/// `Completed`/`Failed`. `end_time` is set in the same transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl DeploymentRecord {
    pub fn new(id: DeploymentId) -> Self {
        Self {
            id,
            status: DeploymentStatus::Running,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration(&self) -> Option<time::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn to_response(&self) -> StatusResponse {
        StatusResponse {
            deployment_id: self.id.to_string(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_secs: self.duration().map(|d| d.as_seconds_f64()),
            error: self.error.clone(),
        }
    }
}

/// Owner and name of a repository URL such as
/// `https://github.com/acme/shop.git`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinates {
    pub owner: String,
    pub name: String,
}

impl RepoCoordinates {
    /// Parse the first two path segments of `repo_url`, stripping `.git`.
    pub fn parse(repo_url: &str) -> Option<Self> {
        let url = url::Url::parse(repo_url).ok()?;
        let path = url.path().trim_start_matches('/').trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let name = segments.next()?;
        Some(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = DeploymentId::generate();
        let b = DeploymentId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_by_str() {
        let id = DeploymentId::from("dep-1");
        let mut map = HashMap::new();
        map.insert(id.clone(), 1);
        assert_eq!(map.get("dep-1"), Some(&1));
    }

    #[test]
    fn test_record_response() {
        let mut record = DeploymentRecord::new(DeploymentId::from("dep-1"));
        assert!(record.to_response().duration_secs.is_none());

        record.status = DeploymentStatus::Failed;
        record.end_time = Some(record.start_time + time::Duration::seconds(90));
        record.error = Some("disk full".into());

        let resp = record.to_response();
        assert_eq!(resp.deployment_id, "dep-1");
        assert_eq!(resp.duration_secs, Some(90.0));
        assert_eq!(resp.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_repo_coordinates() {
        let repo = RepoCoordinates::parse("https://github.com/acme/shop.git").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "shop");

        let repo = RepoCoordinates::parse("https://github.com/acme/shop/").unwrap();
        assert_eq!(repo.name, "shop");

        assert!(RepoCoordinates::parse("https://github.com/acme").is_none());
        assert!(RepoCoordinates::parse("not a url").is_none());
    }
}
