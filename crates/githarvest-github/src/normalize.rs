//! Turns raw API payloads into the closed record set. Kept free of I/O so
//! cached payloads normalize identically to fresh ones.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use githarvest_core::{Contributor, Organization, Repository};

/// Search item or repository payload into a `Repository` record.
pub fn repository(data: &Value) -> Result<Repository> {
    let owner = data.get("owner").cloned().unwrap_or(Value::Null);
    Ok(Repository {
        github_id: require_i64(data, "id")?,
        name: str_field(data, "name").unwrap_or_default(),
        full_name: str_field(data, "full_name").unwrap_or_default(),
        description: str_field(data, "description"),
        language: str_field(data, "language"),
        stars: i64_field(data, "stargazers_count"),
        forks: i64_field(data, "forks_count"),
        watchers: i64_field(data, "watchers_count"),
        open_issues: i64_field(data, "open_issues_count"),
        created_at: time_field(data, "created_at"),
        updated_at: time_field(data, "updated_at"),
        owner_login: str_field(&owner, "login").unwrap_or_default(),
        owner_id: i64_field(&owner, "id"),
        owner_type: str_field(&owner, "type").unwrap_or_else(|| "User".to_string()),
        license: data
            .get("license")
            .filter(|l| !l.is_null())
            .and_then(|l| str_field(l, "key")),
        topics: data
            .get("topics")
            .and_then(Value::as_array)
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        is_fork: bool_field(data, "fork"),
        is_archived: bool_field(data, "archived"),
        homepage: str_field(data, "homepage"),
    })
}

/// Full user payload (`/users/{login}`) into a `Contributor` record.
/// Country code and region stay empty; the enrichment pass fills them.
pub fn contributor(data: &Value) -> Result<Contributor> {
    Ok(Contributor {
        github_id: require_i64(data, "id")?,
        login: str_field(data, "login").unwrap_or_default(),
        name: str_field(data, "name"),
        email: str_field(data, "email"),
        company: str_field(data, "company"),
        blog: str_field(data, "blog"),
        location: str_field(data, "location"),
        country_code: None,
        region: None,
        bio: str_field(data, "bio"),
        followers: i64_field(data, "followers"),
        following: i64_field(data, "following"),
        public_repos: i64_field(data, "public_repos"),
        created_at: time_field(data, "created_at"),
        updated_at: time_field(data, "updated_at"),
    })
}

/// Organization payload (`/orgs/{login}`) into an `Organization` record.
pub fn organization(data: &Value) -> Result<Organization> {
    Ok(Organization {
        github_id: require_i64(data, "id")?,
        login: str_field(data, "login").unwrap_or_default(),
        name: str_field(data, "name"),
        email: str_field(data, "email"),
        blog: str_field(data, "blog"),
        location: str_field(data, "location"),
        country_code: None,
        region: None,
        description: str_field(data, "description"),
        followers: i64_field(data, "followers"),
        public_repos: i64_field(data, "public_repos"),
        is_verified: bool_field(data, "is_verified"),
        created_at: time_field(data, "created_at"),
        updated_at: time_field(data, "updated_at"),
    })
}

/// Contributor stubs from `/repos/{full_name}/contributors`: login plus
/// commit count. The full profile comes from a separate `/users` call.
pub fn contributor_stubs(body: &str) -> Result<Vec<(i64, String, i64)>> {
    let items: Vec<Value> = serde_json::from_str(body)?;
    let mut stubs = Vec::with_capacity(items.len());
    for item in &items {
        // Anonymous contributors carry no id; skip them.
        let Some(id) = item.get("id").and_then(Value::as_i64) else {
            continue;
        };
        let login = str_field(item, "login").unwrap_or_default();
        let contributions = i64_field(item, "contributions");
        stubs.push((id, login, contributions));
    }
    Ok(stubs)
}

/// Organization stubs from `/users/{login}/orgs`: (id, login) pairs.
pub fn org_stubs(body: &str) -> Result<Vec<(i64, String)>> {
    let items: Vec<Value> = serde_json::from_str(body)?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_i64)?;
            let login = str_field(item, "login")?;
            Some((id, login))
        })
        .collect())
}

fn require_i64(data: &Value, key: &str) -> Result<i64> {
    data.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Malformed(format!("missing numeric field '{}'", key)))
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn i64_field(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn bool_field(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn time_field(data: &Value, key: &str) -> Option<DateTime<Utc>> {
    data.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repository_from_search_item() {
        let data = json!({
            "id": 1296269,
            "name": "Hello-World",
            "full_name": "octocat/Hello-World",
            "description": "My first repository",
            "language": "Rust",
            "stargazers_count": 80,
            "forks_count": 9,
            "watchers_count": 80,
            "open_issues_count": 2,
            "created_at": "2011-01-26T19:01:12Z",
            "updated_at": "2011-01-26T19:14:43Z",
            "owner": {"login": "octocat", "id": 1, "type": "User"},
            "license": {"key": "mit", "name": "MIT License"},
            "topics": ["octocat", "api"],
            "fork": false,
            "archived": false,
            "homepage": "https://github.com"
        });

        let repo = repository(&data).unwrap();
        assert_eq!(repo.github_id, 1296269);
        assert_eq!(repo.full_name, "octocat/Hello-World");
        assert_eq!(repo.stars, 80);
        assert_eq!(repo.license.as_deref(), Some("mit"));
        assert_eq!(repo.topics, vec!["octocat", "api"]);
        assert_eq!(repo.owner_login, "octocat");
        assert!(!repo.is_fork);
        assert_eq!(
            repo.created_at.unwrap().to_rfc3339(),
            "2011-01-26T19:01:12+00:00"
        );
    }

    #[test]
    fn test_repository_null_license() {
        let data = json!({"id": 5, "name": "x", "full_name": "a/x", "license": null, "owner": {}});
        let repo = repository(&data).unwrap();
        assert_eq!(repo.license, None);
        assert_eq!(repo.stars, 0);
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let data = json!({"name": "broken"});
        assert!(repository(&data).is_err());
    }

    #[test]
    fn test_contributor_from_user_payload() {
        let data = json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "company": "@github",
            "location": "San Francisco",
            "bio": null,
            "followers": 3938,
            "following": 9,
            "public_repos": 8,
            "created_at": "2011-01-25T18:44:36Z"
        });

        let user = contributor(&data).unwrap();
        assert_eq!(user.github_id, 583231);
        assert_eq!(user.location.as_deref(), Some("San Francisco"));
        assert_eq!(user.country_code, None);
        assert_eq!(user.bio, None);
        assert_eq!(user.followers, 3938);
    }

    #[test]
    fn test_contributor_stubs_skip_anonymous() {
        let body = r#"[
            {"id": 1, "login": "alice", "contributions": 42},
            {"type": "Anonymous", "contributions": 3},
            {"id": 2, "login": "bob", "contributions": 7}
        ]"#;
        let stubs = contributor_stubs(body).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0], (1, "alice".to_string(), 42));
        assert_eq!(stubs[1], (2, "bob".to_string(), 7));
    }

    #[test]
    fn test_org_stubs() {
        let body = r#"[{"id": 9919, "login": "github"}]"#;
        assert_eq!(org_stubs(body).unwrap(), vec![(9919, "github".to_string())]);
    }

    #[test]
    fn test_organization_verified_flag() {
        let data = json!({"id": 9919, "login": "github", "is_verified": true});
        let org = organization(&data).unwrap();
        assert!(org.is_verified);
        assert_eq!(org.login, "github");
    }
}
