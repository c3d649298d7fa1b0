//! Tag authorization.
//!
//! Machines may request any tags; only those named in the organization's
//! `tagOwners` policy take effect. The requested set is stored verbatim so a
//! later policy change can validate tags that were invalid when set.

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::storage::{AclPolicy, ControlDatabase, Machine, Organization};

/// Requested tags split by whether the policy knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResolution {
    pub allowed_tags: Vec<String>,
    pub invalid_tags: Vec<String>,
    pub has_tags: bool,
}

/// Partition `requested` against `policy`, preserving order within each bucket.
pub fn resolve_tags(policy: &AclPolicy, requested: &[String]) -> TagResolution {
    let (allowed_tags, invalid_tags) = requested
        .iter()
        .cloned()
        .partition(|tag| policy.tag_owners.contains_key(tag));
    TagResolution {
        allowed_tags,
        invalid_tags,
        has_tags: !requested.is_empty(),
    }
}

/// Store `tags` on the machine and resolve them against its organization.
pub async fn set_tags(
    db: &ControlDatabase,
    machine: &mut Machine,
    org: &Organization,
    tags: Vec<String>,
) -> Result<TagResolution> {
    db.set_tags(machine.id, &tags).await?;
    let resolution = resolve_tags(&org.policy(), &tags);
    machine.forced_tags = serde_json::to_string(&tags)?;
    info!(
        machine_id = machine.id,
        allowed = resolution.allowed_tags.len(),
        invalid = resolution.invalid_tags.len(),
        "Machine tags updated"
    );
    Ok(resolution)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_helpers::{seed_machine, seed_org_user, test_db};

    fn policy(owners: &[&str]) -> AclPolicy {
        AclPolicy {
            tag_owners: owners
                .iter()
                .map(|t| ((*t).to_string(), Vec::new()))
                .collect(),
        }
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn partition_preserves_order() {
        let res = resolve_tags(
            &policy(&["tag:a", "tag:c"]),
            &tags(&["tag:c", "tag:b", "tag:a", "tag:d"]),
        );
        assert_eq!(res.allowed_tags, tags(&["tag:c", "tag:a"]));
        assert_eq!(res.invalid_tags, tags(&["tag:b", "tag:d"]));
        assert!(res.has_tags);
    }

    #[test]
    fn empty_request_has_no_tags() {
        let res = resolve_tags(&policy(&["tag:a"]), &[]);
        assert_eq!(res, TagResolution::default());
    }

    #[tokio::test]
    async fn stored_set_is_the_raw_request() {
        let db = test_db().await;
        let (org, user) = seed_org_user(&db).await;
        db.update_acl_policy(org.id, r#"{"tagOwners":{"tag:a":["alice"]}}"#)
            .await
            .unwrap();
        let org = db.get_organization(org.id).await.unwrap();
        let mut machine = seed_machine(&db, &user, 1).await;

        let res = set_tags(&db, &mut machine, &org, tags(&["tag:a", "tag:b"]))
            .await
            .unwrap();

        assert_eq!(res.allowed_tags, tags(&["tag:a"]));
        assert_eq!(res.invalid_tags, tags(&["tag:b"]));
        let stored = db.get_machine(machine.id).await.unwrap().forced_tags();
        assert_eq!(stored, tags(&["tag:a", "tag:b"]));
        assert_eq!(machine.forced_tags(), stored);
    }
}
