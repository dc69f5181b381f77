//! Typed clients for the external platforms: the records store, the job
//! board, the search index, the edge cache, the error notifier, and the
//! direct-message sender. Every external schema gets explicit structs and a
//! mapping function at the boundary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use opps_core::{
    Category, ExternalJob, ListingDigest, ListingRecord, NewJobRecord, Skill, Sponsor,
    SponsorDetails, DEFAULT_SKILL, DEFAULT_SPONSOR_SITE, DEFAULT_SPONSOR_TWITTER,
    FEATURED_SPONSOR, SOFT_DELETE_MARKER,
};
use opps_http::{FetchError, HttpFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "opps-adapters";

// ---------------------------------------------------------------------------
// Records store (Airtable)
// ---------------------------------------------------------------------------

pub const AIRTABLE_ENDPOINT: &str = "https://api.airtable.com/v0";

pub const SPONSORS_TABLE: &str = "Sponsors";
pub const SPONSORS_VIEW: &str = "Sponsors Full List";
pub const SKILLS_TABLE: &str = "Skills";
pub const SKILLS_VIEW: &str = "Skills";
pub const WHITELIST_TABLE: &str = "Directory Whitelist";
pub const WHITELIST_VIEW: &str = "Whitelist";
pub const JOBS_TABLE: &str = "Jobs";

/// Table and view backing each listing category.
pub fn category_view(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::Jobs => ("Jobs", "Active Jobs"),
        Category::Bounties => ("Bounties", "Active Bounties"),
        Category::Grants => ("Grants", "Active Grants"),
    }
}

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub endpoint: String,
}

impl AirtableConfig {
    pub fn new(api_key: impl Into<String>, base_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_id: base_id.into(),
            endpoint: AIRTABLE_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct AirtableRow<T> {
    pub id: String,
    #[serde(default)]
    pub fields: T,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
struct SelectPage<T> {
    #[serde(default = "Vec::new")]
    records: Vec<AirtableRow<T>>,
    offset: Option<String>,
}

#[derive(Debug, Serialize)]
struct FieldsEnvelope<T> {
    fields: T,
}

#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachment {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SponsorFields {
    #[serde(rename = "Company Name")]
    pub name: Option<String>,
    #[serde(rename = "Company Twitter")]
    pub twitter: Option<String>,
    #[serde(rename = "Company URL")]
    pub site: Option<String>,
    #[serde(rename = "Logo", default)]
    pub logo: Vec<Attachment>,
    #[serde(rename = "Industry", default)]
    pub industry: Vec<String>,
    #[serde(rename = "Company Short Bio")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillFields {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Parent Skill")]
    pub parents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhitelistFields {
    #[serde(rename = "email")]
    pub email: Option<String>,
    #[serde(rename = "address")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpportunityFields {
    #[serde(rename = "Source")]
    pub source: Option<String>,
    #[serde(rename = "externalId")]
    pub external_id: Option<String>,
    #[serde(rename = "Opportunity Title")]
    pub title: Option<String>,
    #[serde(rename = "Opportunity Description")]
    pub description: Option<String>,
    #[serde(rename = "Application Link")]
    pub url: Option<String>,
    #[serde(rename = "Location")]
    pub location: Option<String>,
    #[serde(rename = "Sponsor (Linked from Sponsors Table)", default)]
    pub sponsor: Vec<String>,
    #[serde(rename = "Skills Needed", default)]
    pub skills: Vec<String>,
    #[serde(rename = "deleted")]
    pub deleted: Option<String>,
    #[serde(rename = "featured", default)]
    pub featured: bool,
    #[serde(rename = "private", default)]
    pub private: bool,
}

/// Create payload for the Jobs table, field names exactly as the store
/// defines them.
#[derive(Debug, Clone, Serialize)]
pub struct NewOpportunityFields {
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(rename = "Opportunity Title")]
    pub title: String,
    #[serde(rename = "Opportunity Description")]
    pub description: String,
    #[serde(rename = "Application Link")]
    pub url: String,
    #[serde(rename = "Sponsor (Linked from Sponsors Table)")]
    pub sponsor: Vec<String>,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Skills Needed")]
    pub skills: Vec<String>,
}

impl From<&NewJobRecord> for NewOpportunityFields {
    fn from(record: &NewJobRecord) -> Self {
        Self {
            source: record.source.clone(),
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            url: record.url.clone(),
            sponsor: vec![record.sponsor_id.clone()],
            location: record.location.clone(),
            skills: record.skill_ids.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SoftDeleteFields {
    #[serde(rename = "deleted")]
    deleted: &'static str,
}

#[derive(Debug, Clone)]
pub struct AirtableClient {
    http: Arc<HttpFetcher>,
    config: AirtableConfig,
}

impl AirtableClient {
    pub fn new(http: Arc<HttpFetcher>, config: AirtableConfig) -> Self {
        Self { http, config }
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint, self.config.base_id, table
        )
    }

    async fn select_all<T>(&self, table: &str, view: &str) -> Result<Vec<AirtableRow<T>>>
    where
        T: DeserializeOwned + Default,
    {
        let url = self.table_url(table);
        let mut rows = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let cursor = offset.clone();
            let page: SelectPage<T> = self
                .http
                .execute_json("airtable", |client| {
                    let mut request = client
                        .get(&url)
                        .bearer_auth(&self.config.api_key)
                        .query(&[("view", view)]);
                    if let Some(cursor) = &cursor {
                        request = request.query(&[("offset", cursor)]);
                    }
                    request
                })
                .await
                .with_context(|| format!("selecting rows from {table}"))?;

            rows.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(rows)
    }

    async fn create<T: Serialize>(&self, table: &str, fields: &T) -> Result<String> {
        let url = self.table_url(table);
        let body = FieldsEnvelope { fields };
        let created: CreatedRow = self
            .http
            .execute_json("airtable", |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
            })
            .await
            .with_context(|| format!("creating row in {table}"))?;
        Ok(created.id)
    }

    async fn update<T: Serialize>(&self, table: &str, row_id: &str, fields: &T) -> Result<()> {
        let url = format!("{}/{}", self.table_url(table), row_id);
        let body = FieldsEnvelope { fields };
        self.http
            .execute("airtable", |client| {
                client
                    .patch(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
            })
            .await
            .with_context(|| format!("updating row {row_id} in {table}"))?;
        Ok(())
    }

    pub async fn sponsors(&self) -> Result<Vec<Sponsor>> {
        let rows = self
            .select_all::<SponsorFields>(SPONSORS_TABLE, SPONSORS_VIEW)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.fields.name?;
                Some(Sponsor {
                    record_id: row.id,
                    name,
                    twitter: row.fields.twitter,
                    site: row.fields.site,
                    logo_url: row.fields.logo.first().map(|a| a.url.clone()),
                    industry: row.fields.industry.first().cloned(),
                    bio: row.fields.bio,
                })
            })
            .collect())
    }

    pub async fn skills(&self) -> Result<Vec<Skill>> {
        let rows = self
            .select_all::<SkillFields>(SKILLS_TABLE, SKILLS_VIEW)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.fields.name?;
                let parents = match row.fields.parents {
                    Some(parents) if !parents.is_empty() => parents,
                    _ if !name.is_empty() => vec![name.clone()],
                    _ => vec![DEFAULT_SKILL.to_string()],
                };
                Some(Skill {
                    record_id: row.id,
                    name,
                    parents,
                })
            })
            .collect())
    }

    /// Whitelisted directory addresses.
    pub async fn talent_whitelist(&self) -> Result<HashSet<String>> {
        let rows = self
            .select_all::<WhitelistFields>(WHITELIST_TABLE, WHITELIST_VIEW)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.fields.address)
            .collect())
    }

    /// Fetch all three listing tables and expand sponsor and skill references
    /// into publishable records. Returns records in fetch order, duplicates
    /// included; deduplication belongs to the reconciliation engine.
    pub async fn listing_snapshot(&self) -> Result<Vec<ListingRecord>> {
        let sponsors_by_id: HashMap<String, Sponsor> = self
            .sponsors()
            .await?
            .into_iter()
            .map(|s| (s.record_id.clone(), s))
            .collect();
        let skills_by_id: HashMap<String, Skill> = self
            .skills()
            .await?
            .into_iter()
            .map(|s| (s.record_id.clone(), s))
            .collect();

        let mut records = Vec::new();
        for category in Category::ALL {
            let (table, view) = category_view(category);
            let rows = self.select_all::<OpportunityFields>(table, view).await?;
            records.extend(rows.iter().filter_map(|row| {
                expand_opportunity(row, category, &sponsors_by_id, &skills_by_id)
            }));
        }
        info!(records = records.len(), "fetched listing snapshot");
        Ok(records)
    }

    pub async fn create_job(&self, record: &NewJobRecord) -> Result<String> {
        self.create(JOBS_TABLE, &NewOpportunityFields::from(record))
            .await
    }

    /// Flag a row as deleted. Rows are never physically removed.
    pub async fn soft_delete(&self, row_id: &str) -> Result<()> {
        self.update(
            JOBS_TABLE,
            row_id,
            &SoftDeleteFields {
                deleted: SOFT_DELETE_MARKER,
            },
        )
        .await
    }
}

/// Expand one store row into a publishable record. Rows with no title, no
/// link, and no sponsor are treated as blank filler and dropped.
pub fn expand_opportunity(
    row: &AirtableRow<OpportunityFields>,
    category: Category,
    sponsors_by_id: &HashMap<String, Sponsor>,
    skills_by_id: &HashMap<String, Skill>,
) -> Option<ListingRecord> {
    let fields = &row.fields;
    if fields.title.is_none() && fields.url.is_none() && fields.sponsor.is_empty() {
        return None;
    }

    let sponsor = expand_sponsor(fields.sponsor.first().map(String::as_str), sponsors_by_id);
    let featured = fields.featured || sponsor.name == FEATURED_SPONSOR;

    let skills = fields
        .skills
        .iter()
        .filter_map(|skill_id| match skills_by_id.get(skill_id) {
            Some(skill) => Some(skill.parents.clone()),
            None => {
                warn!(skill_id, row_id = %row.id, "unknown skill reference");
                None
            }
        })
        .flatten()
        .collect();

    Some(ListingRecord {
        object_id: row.id.clone(),
        source: fields.source.clone(),
        external_id: fields.external_id.clone(),
        title: fields.title.clone().unwrap_or_default(),
        description: fields.description.clone().unwrap_or_default(),
        url: fields.url.clone().unwrap_or_default(),
        location: fields.location.clone().unwrap_or_default(),
        skills,
        sponsor,
        record_type: category,
        category,
        featured,
        private: fields.private,
        deleted: fields.deleted.clone(),
    })
}

fn expand_sponsor(
    sponsor_id: Option<&str>,
    sponsors_by_id: &HashMap<String, Sponsor>,
) -> SponsorDetails {
    let Some(sponsor_id) = sponsor_id else {
        return SponsorDetails::default();
    };
    let sponsor = sponsors_by_id.get(sponsor_id);
    SponsorDetails {
        name: sponsor.map(|s| s.name.clone()).unwrap_or_default(),
        logo_url: sponsor
            .and_then(|s| s.logo_url.clone())
            .unwrap_or_default(),
        industry: sponsor
            .and_then(|s| s.industry.clone())
            .unwrap_or_default(),
        bio: sponsor.and_then(|s| s.bio.clone()).unwrap_or_default(),
        twitter: sponsor
            .and_then(|s| s.twitter.clone())
            .unwrap_or_else(|| DEFAULT_SPONSOR_TWITTER.to_string()),
        site: sponsor
            .and_then(|s| s.site.clone())
            .unwrap_or_else(|| DEFAULT_SPONSOR_SITE.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Job board (Getro)
// ---------------------------------------------------------------------------

pub const GETRO_ENDPOINT: &str = "https://api.getro.com/v2";
pub const GETRO_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct GetroConfig {
    pub network_id: String,
    pub email: String,
    pub token: String,
    pub endpoint: String,
}

impl GetroConfig {
    pub fn new(
        network_id: impl Into<String>,
        email: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            email: email.into(),
            token: token.into(),
            endpoint: GETRO_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct JobsPageMeta {
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    #[serde(default)]
    meta: JobsPageMeta,
    #[serde(default)]
    items: Vec<ExternalJob>,
}

#[derive(Debug, Clone)]
pub struct GetroClient {
    http: Arc<HttpFetcher>,
    config: GetroConfig,
}

impl GetroClient {
    pub fn new(http: Arc<HttpFetcher>, config: GetroConfig) -> Self {
        Self { http, config }
    }

    async fn fetch_page(&self, page: usize, companies: &str) -> Result<(usize, Vec<ExternalJob>)> {
        let url = format!(
            "{}/networks/{}/jobs",
            self.config.endpoint, self.config.network_id
        );
        let per_page = GETRO_PAGE_SIZE.to_string();
        let page_param = page.to_string();
        let response: JobsPage = self
            .http
            .execute_json("getro", |client| {
                client
                    .get(&url)
                    .header("X-User-Email", &self.config.email)
                    .header("X-User-Token", &self.config.token)
                    .query(&[
                        ("per_page", per_page.as_str()),
                        ("page", page_param.as_str()),
                        ("companies", companies),
                    ])
            })
            .await
            .with_context(|| format!("fetching job board page {page}"))?;
        Ok((response.meta.total, response.items))
    }

    /// Fetch every page for the given company filter. A failed page aborts
    /// the fetch: a partial result is indistinguishable from mass removal
    /// downstream and would trigger wrongful soft-deletes.
    pub async fn fetch_all(&self, companies: &str) -> Result<Vec<ExternalJob>> {
        let (total, mut jobs) = self.fetch_page(1, companies).await?;
        let mut page = 2;
        while jobs.len() < total {
            let (_, page_jobs) = self.fetch_page(page, companies).await?;
            if page_jobs.is_empty() {
                break;
            }
            jobs.extend(page_jobs);
            page += 1;
        }
        info!(jobs = jobs.len(), total, "fetched job board listings");
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Search index (Algolia)
// ---------------------------------------------------------------------------

const ALGOLIA_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct AlgoliaConfig {
    pub app_id: String,
    pub admin_key: String,
    pub index: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
struct AlgoliaBatch<'a> {
    requests: Vec<AlgoliaOperation<'a>>,
}

#[derive(Debug, Serialize)]
struct AlgoliaOperation<'a> {
    action: &'static str,
    body: &'a ListingRecord,
}

#[derive(Debug, Clone)]
pub struct AlgoliaClient {
    http: Arc<HttpFetcher>,
    config: AlgoliaConfig,
}

impl AlgoliaClient {
    pub fn new(http: Arc<HttpFetcher>, config: AlgoliaConfig) -> Self {
        Self { http, config }
    }

    fn index_url(&self, operation: &str) -> String {
        let endpoint = match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.algolia.net", self.config.app_id),
        };
        format!("{}/1/indexes/{}/{}", endpoint, self.config.index, operation)
    }

    async fn post(&self, url: &str, body: &impl Serialize) -> Result<(), FetchError> {
        self.http
            .execute("algolia", |client| {
                client
                    .post(url)
                    .header("X-Algolia-Application-Id", &self.config.app_id)
                    .header("X-Algolia-API-Key", &self.config.admin_key)
                    .json(body)
            })
            .await?;
        Ok(())
    }

    pub async fn clear_index(&self) -> Result<()> {
        self.post(&self.index_url("clear"), &serde_json::json!({}))
            .await
            .context("clearing search index")
    }

    pub async fn save_records(&self, records: &[ListingRecord]) -> Result<()> {
        for chunk in records.chunks(ALGOLIA_BATCH_SIZE) {
            let batch = AlgoliaBatch {
                requests: chunk
                    .iter()
                    .map(|body| AlgoliaOperation {
                        action: "updateObject",
                        body,
                    })
                    .collect(),
            };
            self.post(&self.index_url("batch"), &batch)
                .await
                .context("saving search index batch")?;
        }
        Ok(())
    }

    /// Full-replace semantics: prior contents are cleared before the new set
    /// is written.
    pub async fn replace_all(&self, records: &[ListingRecord]) -> Result<()> {
        self.clear_index().await?;
        self.save_records(records).await?;
        info!(records = records.len(), "wrote search index");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Edge cache (Cloudflare KV + worker)
// ---------------------------------------------------------------------------

pub const CLOUDFLARE_ENDPOINT: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub namespace: String,
    pub token: String,
    /// Edge worker URL receiving the listing digest.
    pub worker_url: String,
    /// Shared secret the worker checks on the digest POST.
    pub worker_auth_token: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvItem {
    pub key: String,
    pub value: String,
    pub expiration_ttl: u64,
}

#[derive(Debug, Clone)]
pub struct CloudflareClient {
    http: Arc<HttpFetcher>,
    config: CloudflareConfig,
}

impl CloudflareClient {
    pub fn new(http: Arc<HttpFetcher>, config: CloudflareConfig) -> Self {
        Self { http, config }
    }

    pub async fn put_bulk(&self, items: &[KvItem]) -> Result<()> {
        let url = format!(
            "{}/accounts/{}/storage/kv/namespaces/{}/bulk",
            self.config.endpoint, self.config.account_id, self.config.namespace
        );
        self.http
            .execute("cloudflare", |client| {
                client
                    .put(&url)
                    .bearer_auth(&self.config.token)
                    .json(&items)
            })
            .await
            .context("writing edge cache keys")?;
        info!(keys = items.len(), "wrote edge cache keys");
        Ok(())
    }

    pub async fn push_digest(&self, digest: &ListingDigest) -> Result<()> {
        self.http
            .execute("cloudflare", |client| {
                client
                    .post(&self.config.worker_url)
                    .header("AUTH_TOKEN", &self.config.worker_auth_token)
                    .json(digest)
            })
            .await
            .context("pushing listing digest to edge worker")?;
        info!("pushed listing digest to edge worker");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error notifier (Slack webhook)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: Arc<HttpFetcher>,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(http: Arc<HttpFetcher>, webhook_url: Option<String>) -> Self {
        let webhook_url = webhook_url.filter(|url| !url.is_empty());
        Self { http, webhook_url }
    }

    async fn post(&self, url: &str, text: &str) -> Result<(), FetchError> {
        self.http
            .execute("slack", |client| {
                client.post(url).json(&SlackMessage { text })
            })
            .await?;
        Ok(())
    }

    /// Report a message to the error channel. Notifier failures are logged
    /// and swallowed; error reporting must never take the sync down with it.
    pub async fn notify(&self, message: &str) {
        warn!(message, "reporting to error channel");
        let Some(url) = &self.webhook_url else {
            warn!("no error webhook configured");
            return;
        };
        if let Err(err) = self.post(url, message).await {
            warn!(error = %err, "error webhook delivery failed");
            let _ = self.post(url, "Error sending message to error channel").await;
        }
    }
}

// ---------------------------------------------------------------------------
// Direct messages (Twitter)
// ---------------------------------------------------------------------------

pub const TWITTER_ENDPOINT: &str = "https://api.twitter.com/1.1";

#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub bearer_token: String,
    /// Onboarding form linked in the approval message.
    pub form_url: String,
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id_str: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct DmEventEnvelope<'a> {
    event: DmEvent<'a>,
}

#[derive(Debug, Serialize)]
struct DmEvent<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    message_create: DmMessageCreate<'a>,
}

#[derive(Debug, Serialize)]
struct DmMessageCreate<'a> {
    target: DmTarget<'a>,
    message_data: DmMessageData<'a>,
}

#[derive(Debug, Serialize)]
struct DmTarget<'a> {
    recipient_id: &'a str,
}

#[derive(Debug, Serialize)]
struct DmMessageData<'a> {
    text: &'a str,
}

#[derive(Debug, Error)]
pub enum DmError {
    #[error("Could not find user")]
    UserNotFound,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone)]
pub struct TwitterDm {
    http: Arc<HttpFetcher>,
    config: TwitterConfig,
}

impl TwitterDm {
    pub fn new(http: Arc<HttpFetcher>, config: TwitterConfig) -> Self {
        Self { http, config }
    }

    async fn lookup_user(&self, handle: &str) -> Result<Option<TwitterUser>, FetchError> {
        let url = format!("{}/users/lookup.json", self.config.endpoint);
        let users: Vec<TwitterUser> = self
            .http
            .execute_json("twitter", |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.bearer_token)
                    .query(&[("screen_name", handle)])
            })
            .await?;
        Ok(users.into_iter().next())
    }

    /// Look the applier up by handle and send the templated approval message.
    pub async fn send_grant_dm(&self, applier: &str, tweet: &str) -> Result<String, DmError> {
        let user = self
            .lookup_user(applier)
            .await?
            .ok_or(DmError::UserNotFound)?;

        let text = grant_dm_text(&user.name, &self.config.form_url, tweet);
        let url = format!("{}/direct_messages/events/new.json", self.config.endpoint);
        let envelope = DmEventEnvelope {
            event: DmEvent {
                event_type: "message_create",
                message_create: DmMessageCreate {
                    target: DmTarget {
                        recipient_id: &user.id_str,
                    },
                    message_data: DmMessageData { text: &text },
                },
            },
        };
        self.http
            .execute("twitter", |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.config.bearer_token)
                    .json(&envelope)
            })
            .await?;

        info!(applier, "sent grant approval message");
        Ok("DM sent".to_string())
    }
}

pub fn grant_dm_text(name: &str, form_url: &str, tweet: &str) -> String {
    format!(
        "Congratulations {name}, your Instagrant has been approved! Please fill in this form \
         to claim the grant and start onboarding -- {form_url}. For any further communication \
         you can write to hello@earn.community. {tweet}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sponsors() -> HashMap<String, Sponsor> {
        let mut map = HashMap::new();
        map.insert(
            "recSponsor1".to_string(),
            Sponsor {
                record_id: "recSponsor1".to_string(),
                name: "Acme".to_string(),
                twitter: Some("https://twitter.com/acme".to_string()),
                site: Some("https://acme.example.com".to_string()),
                logo_url: Some("https://cdn.example.com/acme.png".to_string()),
                industry: Some("Infrastructure".to_string()),
                bio: Some("Builds things".to_string()),
            },
        );
        map.insert(
            "recSponsor2".to_string(),
            Sponsor {
                record_id: "recSponsor2".to_string(),
                name: FEATURED_SPONSOR.to_string(),
                twitter: None,
                site: None,
                logo_url: None,
                industry: None,
                bio: None,
            },
        );
        map
    }

    fn skills() -> HashMap<String, Skill> {
        let mut map = HashMap::new();
        map.insert(
            "recSkill1".to_string(),
            Skill {
                record_id: "recSkill1".to_string(),
                name: "Rust".to_string(),
                parents: vec!["Back-End Dev".to_string()],
            },
        );
        map
    }

    fn job_row(sponsor: &str) -> AirtableRow<OpportunityFields> {
        AirtableRow {
            id: "recJob1".to_string(),
            fields: OpportunityFields {
                source: Some(EXTERNAL_SOURCE_TEST.to_string()),
                external_id: Some("42".to_string()),
                title: Some("Backend Engineer".to_string()),
                description: Some("desc".to_string()),
                url: Some("https://jobs.example.com/42".to_string()),
                location: Some("Remote".to_string()),
                sponsor: vec![sponsor.to_string()],
                skills: vec!["recSkill1".to_string()],
                deleted: None,
                featured: false,
                private: false,
            },
        }
    }

    const EXTERNAL_SOURCE_TEST: &str = opps_core::EXTERNAL_SOURCE;

    #[test]
    fn expansion_resolves_sponsor_and_skill_parents() {
        let record =
            expand_opportunity(&job_row("recSponsor1"), Category::Jobs, &sponsors(), &skills())
                .expect("record");
        assert_eq!(record.object_id, "recJob1");
        assert_eq!(record.sponsor.name, "Acme");
        assert_eq!(record.sponsor.industry, "Infrastructure");
        assert_eq!(record.skills, vec!["Back-End Dev".to_string()]);
        assert!(!record.featured);
    }

    #[test]
    fn featured_is_forced_for_the_sentinel_sponsor() {
        let record =
            expand_opportunity(&job_row("recSponsor2"), Category::Jobs, &sponsors(), &skills())
                .expect("record");
        assert!(record.featured);
    }

    #[test]
    fn unresolved_sponsor_still_gets_community_fallbacks() {
        let record =
            expand_opportunity(&job_row("recMissing"), Category::Jobs, &sponsors(), &skills())
                .expect("record");
        assert_eq!(record.sponsor.name, "");
        assert_eq!(record.sponsor.twitter, DEFAULT_SPONSOR_TWITTER);
        assert_eq!(record.sponsor.site, DEFAULT_SPONSOR_SITE);
    }

    #[test]
    fn blank_rows_are_dropped() {
        let row = AirtableRow {
            id: "recEmpty".to_string(),
            fields: OpportunityFields::default(),
        };
        assert!(expand_opportunity(&row, Category::Jobs, &sponsors(), &skills()).is_none());
    }

    #[test]
    fn create_payload_uses_store_column_names() {
        let record = NewJobRecord {
            source: EXTERNAL_SOURCE_TEST.to_string(),
            external_id: "42".to_string(),
            title: "Backend Engineer".to_string(),
            description: "desc".to_string(),
            url: "https://jobs.example.com/42".to_string(),
            sponsor_id: "recSponsor1".to_string(),
            location: "Remote".to_string(),
            skill_ids: vec!["recSkill1".to_string()],
        };
        let value = serde_json::to_value(NewOpportunityFields::from(&record)).unwrap();
        assert_eq!(value["Opportunity Title"], "Backend Engineer");
        assert_eq!(value["Application Link"], "https://jobs.example.com/42");
        assert_eq!(value["Sponsor (Linked from Sponsors Table)"][0], "recSponsor1");
        assert_eq!(value["Skills Needed"][0], "recSkill1");
        assert_eq!(value["externalId"], "42");
    }

    #[test]
    fn external_job_page_deserializes_board_payload() {
        let payload = serde_json::json!({
            "meta": { "total": 1 },
            "items": [{
                "id": 42,
                "title": "Backend Engineer",
                "url": "https://jobs.example.com/42",
                "locations": ["Remote"],
                "job_functions": [],
                "company": { "name": "Acme" }
            }]
        });
        let page: JobsPage = serde_json::from_value(payload).unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].id, 42);
        assert_eq!(page.items[0].company.name, "Acme");
    }

    #[test]
    fn kv_items_serialize_with_ttl() {
        let item = KvItem {
            key: "recJob1".to_string(),
            value: "{}".to_string(),
            expiration_ttl: 36_000,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["expiration_ttl"], 36_000);
    }

    #[test]
    fn grant_message_carries_name_form_and_tweet() {
        let text = grant_dm_text("Ada", "https://forms.example.com/grant", "great work!");
        assert!(text.starts_with("Congratulations Ada"));
        assert!(text.contains("https://forms.example.com/grant"));
        assert!(text.ends_with("great work!"));
    }
}
