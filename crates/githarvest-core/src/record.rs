use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity types the ingestion pipeline knows about. Doubles as the batch
/// writer's buffer key and the table selector in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Repository,
    Contributor,
    Organization,
    RepoContribution,
    OrgMembership,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Repository => "repository",
            EntityKind::Contributor => "contributor",
            EntityKind::Organization => "organization",
            EntityKind::RepoContribution => "repo_contribution",
            EntityKind::OrgMembership => "org_membership",
        }
    }

    pub const ALL: [EntityKind; 5] = [
        EntityKind::Repository,
        EntityKind::Contributor,
        EntityKind::Organization,
        EntityKind::RepoContribution,
        EntityKind::OrgMembership,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub github_id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub owner_login: String,
    pub owner_id: i64,
    pub owner_type: String,
    pub license: Option<String>,
    pub topics: Vec<String>,
    pub is_fork: bool,
    pub is_archived: bool,
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub github_id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub bio: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub public_repos: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub github_id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub followers: i64,
    pub public_repos: i64,
    pub is_verified: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Contributor-to-repository link. Composite natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoContribution {
    pub contributor_id: i64,
    pub repository_id: i64,
    pub commit_count: i64,
}

/// Contributor-to-organization link. Composite natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub contributor_id: i64,
    pub organization_id: i64,
}

/// One normalized record headed for the store. Closed set: the batch writer
/// and the store match on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Repository(Repository),
    Contributor(Contributor),
    Organization(Organization),
    RepoContribution(RepoContribution),
    OrgMembership(OrgMembership),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Repository(_) => EntityKind::Repository,
            Record::Contributor(_) => EntityKind::Contributor,
            Record::Organization(_) => EntityKind::Organization,
            Record::RepoContribution(_) => EntityKind::RepoContribution,
            Record::OrgMembership(_) => EntityKind::OrgMembership,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind() {
        let record = Record::RepoContribution(RepoContribution {
            contributor_id: 1,
            repository_id: 2,
            commit_count: 3,
        });
        assert_eq!(record.kind(), EntityKind::RepoContribution);
        assert_eq!(record.kind().as_str(), "repo_contribution");
    }
}
