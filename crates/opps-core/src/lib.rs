//! Domain model for the opportunity sync service.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "opps-core";

/// Source marker written on records imported from the external job board.
pub const EXTERNAL_SOURCE: &str = "Getro";

/// Sponsor whose opportunities are always published as featured.
pub const FEATURED_SPONSOR: &str = "Solana Foundation";

/// Fallback skill when classification and the store both come up empty.
pub const DEFAULT_SKILL: &str = "Other";

/// Marker string written into the `deleted` column on soft-delete.
pub const SOFT_DELETE_MARKER: &str = "getro-deleted";

pub const DEFAULT_SPONSOR_TWITTER: &str = "https://twitter.com/superteamdao";
pub const DEFAULT_SPONSOR_SITE: &str = "https://earn.superteam.fun";

/// Listing category, matching the records-store table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Jobs,
    Bounties,
    Grants,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Jobs, Category::Bounties, Category::Grants];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Jobs => "Jobs",
            Category::Bounties => "Bounties",
            Category::Grants => "Grants",
        }
    }
}

/// Denormalized sponsor fields carried on every published record. The records
/// store only holds a sponsor reference; expansion happens at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorDetails {
    #[serde(rename = "sponsorName", default)]
    pub name: String,
    #[serde(rename = "sponsorUrl", default)]
    pub logo_url: String,
    #[serde(rename = "sponsorIndustry", default)]
    pub industry: String,
    #[serde(rename = "sponsorBio", default)]
    pub bio: String,
    #[serde(rename = "sponsorTwitter", default)]
    pub twitter: String,
    #[serde(rename = "sponsorSite", default)]
    pub site: String,
}

/// One published posting, in the shape the search index and edge cache consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Row id assigned by the records store; the primary key everywhere.
    #[serde(rename = "objectID")]
    pub object_id: String,
    /// Provider name for externally-sourced rows, absent for internal ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Natural key within an external source. Unique per source, not globally.
    #[serde(rename = "externalId", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub location: String,
    /// Parent skill names resolved from the store's skill references.
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(flatten)]
    pub sponsor: SponsorDetails,
    // Published payloads historically carry the category under both keys.
    #[serde(rename = "type")]
    pub record_type: Category,
    pub category: Category,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<String>,
}

impl ListingRecord {
    pub fn is_external(&self) -> bool {
        self.source.as_deref() == Some(EXTERNAL_SOURCE)
    }
}

/// Sponsor row from the records store. Read-only to this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sponsor {
    pub record_id: String,
    pub name: String,
    pub twitter: Option<String>,
    pub site: Option<String>,
    pub logo_url: Option<String>,
    pub industry: Option<String>,
    pub bio: Option<String>,
}

/// Skill row from the records store. Skills form a one-level hierarchy; a
/// skill without an explicit parent is its own parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub record_id: String,
    pub name: String,
    pub parents: Vec<String>,
}

/// One raw job entry from the external job board.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalJob {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub job_functions: Vec<String>,
    pub company: ExternalCompany,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalCompany {
    pub name: String,
}

/// A create candidate for the records store, mapped from an [`ExternalJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewJobRecord {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub sponsor_id: String,
    pub location: String,
    pub skill_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SoftDeleteReason {
    /// The store holds more than one record with this external id.
    Duplicate,
    /// The external source no longer advertises this id.
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftDelete {
    pub object_id: String,
    pub external_id: Option<String>,
    pub reason: SoftDeleteReason,
}

/// Output of the reconciliation engine: which external jobs to create in the
/// store and which existing rows to flag as deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub to_create: Vec<NewJobRecord>,
    pub to_soft_delete: Vec<SoftDelete>,
}

/// Digest payload pushed to the edge worker: the full shuffled per-category
/// lists plus a capped `main` view for the landing page.
#[derive(Debug, Clone, Serialize)]
pub struct ListingDigest {
    pub keepalive: String,
    pub jobs: Vec<ListingRecord>,
    pub bounties: Vec<ListingRecord>,
    pub grants: Vec<ListingRecord>,
    pub main: DigestMain,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestMain {
    pub jobs: Vec<ListingRecord>,
    pub bounties: Vec<ListingRecord>,
    pub grants: Vec<ListingRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(object_id: &str) -> ListingRecord {
        ListingRecord {
            object_id: object_id.to_string(),
            source: Some(EXTERNAL_SOURCE.to_string()),
            external_id: Some("42".to_string()),
            title: "Backend Engineer".to_string(),
            description: "desc".to_string(),
            url: "https://jobs.example.com/42".to_string(),
            location: "Remote".to_string(),
            skills: vec!["Back-End Dev".to_string()],
            sponsor: SponsorDetails {
                name: "Acme".to_string(),
                ..SponsorDetails::default()
            },
            record_type: Category::Jobs,
            category: Category::Jobs,
            featured: false,
            private: false,
            deleted: None,
        }
    }

    #[test]
    fn category_serializes_as_table_name() {
        assert_eq!(
            serde_json::to_string(&Category::Bounties).unwrap(),
            "\"Bounties\""
        );
        assert_eq!(Category::Grants.as_str(), "Grants");
    }

    #[test]
    fn listing_record_flattens_sponsor_and_renames_keys() {
        let value = serde_json::to_value(record("rec1")).unwrap();
        assert_eq!(value["objectID"], "rec1");
        assert_eq!(value["externalId"], "42");
        assert_eq!(value["sponsorName"], "Acme");
        assert_eq!(value["type"], "Jobs");
        assert_eq!(value["category"], "Jobs");
        assert!(value.get("object_id").is_none());
    }

    #[test]
    fn external_marker_matches_source() {
        let mut rec = record("rec1");
        assert!(rec.is_external());
        rec.source = None;
        assert!(!rec.is_external());
    }
}
