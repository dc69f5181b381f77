//! Sync pipeline: skill classification, record reconciliation against the
//! records store, and publication to the search index and edge cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use opps_adapters::{
    AirtableClient, AirtableConfig, AlgoliaClient, AlgoliaConfig, CloudflareClient,
    CloudflareConfig, DmError, GetroClient, GetroConfig, KvItem, SlackNotifier, TwitterConfig,
    TwitterDm, CLOUDFLARE_ENDPOINT, TWITTER_ENDPOINT,
};
use opps_core::{
    Category, DigestMain, ExternalJob, ListingDigest, ListingRecord, NewJobRecord,
    ReconciliationPlan, Skill, SoftDelete, SoftDeleteReason, Sponsor, DEFAULT_SKILL,
    EXTERNAL_SOURCE,
};
use opps_http::{HttpClientConfig, HttpFetcher};
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "opps-sync";

/// Cap on the `main` digest job list.
pub const MAIN_JOBS_CAP: usize = 50;

/// Expiration for edge cache entries, in seconds.
pub const CACHE_TTL_SECS: u64 = 36_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth_token: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    /// Jobs whose application link matches this pattern point back at our own
    /// domain and are never re-imported.
    pub internal_url_pattern: String,
    pub airtable_api_key: String,
    pub airtable_base_id: String,
    pub getro_network_id: String,
    pub getro_email: String,
    pub getro_token: String,
    pub algolia_app_id: String,
    pub algolia_admin_key: String,
    pub algolia_index: String,
    pub cloudflare_account_id: String,
    pub cloudflare_namespace: String,
    pub cloudflare_token: String,
    pub cloudflare_worker_url: String,
    pub slack_error_webhook: Option<String>,
    pub twitter_bearer_token: String,
    pub instagrant_form: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            auth_token: std::env::var("AUTH_TOKEN").unwrap_or_default(),
            http_timeout_secs: std::env::var("OPPS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("OPPS_USER_AGENT")
                .unwrap_or_else(|_| "opps-bot/0.1".to_string()),
            internal_url_pattern: std::env::var("OPPS_INTERNAL_URL_PATTERN")
                .unwrap_or_else(|_| "superteam.fun".to_string()),
            airtable_api_key: std::env::var("AIRTABLE_API_KEY").unwrap_or_default(),
            airtable_base_id: std::env::var("AIRTABLE_BASE_ID").unwrap_or_default(),
            getro_network_id: std::env::var("GETRO_ID").unwrap_or_default(),
            getro_email: std::env::var("GETRO_EMAIL").unwrap_or_default(),
            getro_token: std::env::var("GETRO_TOKEN").unwrap_or_default(),
            algolia_app_id: std::env::var("ALGOLIA_APPLICATION_ID").unwrap_or_default(),
            algolia_admin_key: std::env::var("ALGOLIA_ADMIN_KEY").unwrap_or_default(),
            algolia_index: std::env::var("ALGOLIA_INDEX_NAME").unwrap_or_default(),
            cloudflare_account_id: std::env::var("CLOUDFLARE_ACCOUNT_ID").unwrap_or_default(),
            cloudflare_namespace: std::env::var("CLOUDFLARE_KV_NAMESPACE").unwrap_or_default(),
            cloudflare_token: std::env::var("CLOUDFLARE_TOKEN").unwrap_or_default(),
            cloudflare_worker_url: std::env::var("CLOUDFLARE_URL").unwrap_or_default(),
            slack_error_webhook: std::env::var("SLACK_ERROR_WEBHOOK").ok(),
            twitter_bearer_token: std::env::var("TWITTER_BEARER_TOKEN").unwrap_or_default(),
            instagrant_form: std::env::var("INSTAGRANT_FORM").unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Skill classifier
// ---------------------------------------------------------------------------

/// Maps free-text job titles and board category tags onto the internal skill
/// taxonomy. Rules are independent; a title may contribute several skills.
#[derive(Debug)]
pub struct SkillClassifier {
    title_rules: Vec<(Regex, &'static str)>,
    tag_map: HashMap<&'static str, &'static str>,
}

impl Default for SkillClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillClassifier {
    pub fn new() -> Self {
        let title_rules = [
            (r"(?i)content|vfx|artist", "Content"),
            (r"(?i)contract|solidity|rust|blockchain", "Blockchain Dev"),
            (
                r"(?i)infrastructure|devops|qa|android|back-end|engineer|reliability|software|dev ops",
                "Back-End Dev",
            ),
            (r"(?i)full stack|fullstack|backend|full-stack", "Back-End Dev"),
        ]
        .into_iter()
        .map(|(pattern, skill)| {
            (
                Regex::new(pattern).expect("static classifier pattern"),
                skill,
            )
        })
        .collect();

        let tag_map = HashMap::from([
            ("Software Engineering", "Front-End Dev"),
            ("Other Engineering", "Back-End Dev"),
            ("Data Science", "Back-End Dev"),
            ("IT", "Back-End Dev"),
            ("Marketing & Communications", "Growth"),
            ("Product", "Growth"),
            ("Design", "Design"),
            ("Content", "Content"),
            ("Administration", DEFAULT_SKILL),
            (DEFAULT_SKILL, DEFAULT_SKILL),
        ]);

        Self {
            title_rules,
            tag_map,
        }
    }

    /// Classify a title plus raw board tags into skill row ids. Total: when
    /// nothing matches, the default skill is returned. The result is deduped
    /// and never empty.
    pub fn classify(
        &self,
        title: &str,
        raw_tags: &[String],
        skills_by_name: &HashMap<String, String>,
        default_skill_id: &str,
    ) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut add = |skill_name: &str, out: &mut Vec<String>| {
            let id = skills_by_name
                .get(skill_name)
                .cloned()
                .unwrap_or_else(|| default_skill_id.to_string());
            if !out.contains(&id) {
                out.push(id);
            }
        };

        for (rule, skill_name) in &self.title_rules {
            if rule.is_match(title) {
                add(skill_name, &mut out);
            }
        }

        for tag in raw_tags {
            let internal = self.tag_map.get(tag.trim()).copied().unwrap_or(DEFAULT_SKILL);
            add(internal, &mut out);
        }

        if out.is_empty() {
            out.push(default_skill_id.to_string());
        }
        out
    }
}

/// Name-to-row-id lookup for the skill taxonomy.
pub fn skills_by_name(skills: &[Skill]) -> HashMap<String, String> {
    skills
        .iter()
        .map(|s| (s.name.clone(), s.record_id.clone()))
        .collect()
}

/// Lowercased-name lookup used to resolve board company names to sponsors.
pub fn sponsors_by_name(sponsors: &[Sponsor]) -> HashMap<String, Sponsor> {
    sponsors
        .iter()
        .map(|s| (s.name.to_lowercase(), s.clone()))
        .collect()
}

/// Company filter for the job board query: all sponsor names joined with `|`.
pub fn company_filter(sponsors: &[Sponsor]) -> String {
    sponsors
        .iter()
        .map(|s| s.name.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

/// Map one raw board job onto a create candidate. Fails when the company has
/// no matching sponsor; callers skip and report, one bad entry must not abort
/// the batch.
pub fn map_external_job(
    job: &ExternalJob,
    sponsors: &HashMap<String, Sponsor>,
    classifier: &SkillClassifier,
    skill_ids: &HashMap<String, String>,
    default_skill_id: &str,
) -> Result<NewJobRecord> {
    let company = job.company.name.trim().to_lowercase();
    let sponsor = sponsors
        .get(&company)
        .with_context(|| format!("no sponsor matches company {:?}", job.company.name))?;

    Ok(NewJobRecord {
        source: EXTERNAL_SOURCE.to_string(),
        external_id: job.id.to_string(),
        title: job.title.clone(),
        description: sponsor.bio.clone().unwrap_or_default(),
        url: job.url.clone(),
        sponsor_id: sponsor.record_id.clone(),
        location: job.locations.join(","),
        skill_ids: classifier.classify(&job.title, &job.job_functions, skill_ids, default_skill_id),
    })
}

// ---------------------------------------------------------------------------
// Reconciliation engine
// ---------------------------------------------------------------------------

struct CanonicalEntry<'a> {
    object_id: &'a str,
    external: bool,
}

/// Reconcile freshly fetched board jobs against the store snapshot. Pure
/// function of its inputs; a single pass over one authoritative
/// external-id map drives duplicate, create, and withdrawal detection.
pub fn reconcile(
    candidates: &[NewJobRecord],
    snapshot: &[ListingRecord],
    internal_url_pattern: &str,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    // First occurrence of an external id in the store is canonical; later
    // externally-sourced occurrences are data-entry duplicates.
    let mut canonical: HashMap<&str, CanonicalEntry<'_>> = HashMap::new();
    let mut canonical_order: Vec<&str> = Vec::new();
    for record in snapshot {
        if record.category != Category::Jobs {
            continue;
        }
        let Some(external_id) = record.external_id.as_deref() else {
            continue;
        };
        if canonical.contains_key(external_id) {
            if record.is_external() {
                plan.to_soft_delete.push(SoftDelete {
                    object_id: record.object_id.clone(),
                    external_id: Some(external_id.to_string()),
                    reason: SoftDeleteReason::Duplicate,
                });
            }
        } else {
            canonical.insert(
                external_id,
                CanonicalEntry {
                    object_id: &record.object_id,
                    external: record.is_external(),
                },
            );
            canonical_order.push(external_id);
        }
    }

    // Withdrawal detection compares against everything the board advertised,
    // including self-referential postings that are filtered from creation.
    let fetched: HashSet<&str> = candidates.iter().map(|c| c.external_id.as_str()).collect();

    let mut batch_seen: HashSet<&str> = HashSet::new();
    for candidate in candidates {
        if !internal_url_pattern.is_empty() && candidate.url.contains(internal_url_pattern) {
            continue;
        }
        if !batch_seen.insert(&candidate.external_id) {
            continue;
        }
        if !canonical.contains_key(candidate.external_id.as_str()) {
            plan.to_create.push(candidate.clone());
        }
    }

    for external_id in canonical_order {
        let entry = &canonical[external_id];
        if entry.external && !fetched.contains(external_id) {
            plan.to_soft_delete.push(SoftDelete {
                object_id: entry.object_id.to_string(),
                external_id: Some(external_id.to_string()),
                reason: SoftDeleteReason::Withdrawn,
            });
        }
    }

    plan
}

/// Drop later externally-keyed duplicates from a listing, keeping the first
/// occurrence. Bounties and grants carry no external id and pass through.
pub fn dedup_listing(records: &[ListingRecord]) -> Vec<ListingRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    records
        .iter()
        .filter(|record| {
            if record.category != Category::Jobs {
                return true;
            }
            match &record.external_id {
                None => true,
                Some(external_id) => seen.insert(external_id.clone()),
            }
        })
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Publication pipeline
// ---------------------------------------------------------------------------

/// Featured-first ordering: shuffle each side independently, featured ahead.
/// The shuffle is unseeded; every publication reorders.
pub fn featured_first(records: Vec<ListingRecord>) -> Vec<ListingRecord> {
    let (mut featured, mut normal): (Vec<_>, Vec<_>) =
        records.into_iter().partition(|record| record.featured);
    fastrand::shuffle(&mut featured);
    fastrand::shuffle(&mut normal);
    featured.extend(normal);
    featured
}

pub fn build_digest(
    jobs: Vec<ListingRecord>,
    bounties: Vec<ListingRecord>,
    grants: Vec<ListingRecord>,
) -> ListingDigest {
    ListingDigest {
        keepalive: "keepalive".to_string(),
        main: DigestMain {
            jobs: jobs.iter().take(MAIN_JOBS_CAP).cloned().collect(),
            bounties: bounties.clone(),
            grants: grants.clone(),
        },
        jobs,
        bounties,
        grants,
    }
}

/// Cache key for a sponsor's aggregated listings.
pub fn normalize_sponsor_key(name: &str) -> String {
    name.replace(' ', "").to_lowercase()
}

/// One cache entry per record keyed by object id, plus one aggregated entry
/// per sponsor for the non-job categories.
pub fn kv_items(records: &[ListingRecord], ttl: u64) -> Result<Vec<KvItem>> {
    let mut items = Vec::with_capacity(records.len());
    let mut by_sponsor: BTreeMap<String, Vec<&ListingRecord>> = BTreeMap::new();

    for record in records {
        items.push(KvItem {
            key: record.object_id.clone(),
            value: serde_json::to_string(record).context("encoding cache record")?,
            expiration_ttl: ttl,
        });
        if record.category != Category::Jobs {
            by_sponsor
                .entry(normalize_sponsor_key(&record.sponsor.name))
                .or_default()
                .push(record);
        }
    }

    for (key, group) in by_sponsor {
        items.push(KvItem {
            key,
            value: serde_json::to_string(&group).context("encoding sponsor cache group")?,
            expiration_ttl: ttl,
        });
    }

    Ok(items)
}

fn category_listing(records: &[ListingRecord], category: Category) -> Vec<ListingRecord> {
    featured_first(
        records
            .iter()
            .filter(|record| record.category == category)
            .cloned()
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Sync orchestration
// ---------------------------------------------------------------------------

/// Seam between the HTTP layer and the sync routines, so handler tests can
/// supply fakes instead of live platform clients.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Refresh the search index and edge cache from the records store.
    async fn update_index(&self) -> Result<String>;
    /// Pull the job board and reconcile it into the records store.
    async fn sync_board_jobs(&self) -> Result<String>;
    /// Re-publish the edge cache only.
    async fn publish_cache_index(&self) -> Result<String>;
    /// Send the grant-approval direct message.
    async fn send_grant_dm(&self, applier: &str, tweet: &str) -> Result<String>;
}

pub struct SyncRunner {
    airtable: Arc<AirtableClient>,
    getro: GetroClient,
    algolia: AlgoliaClient,
    cloudflare: CloudflareClient,
    notifier: SlackNotifier,
    twitter: TwitterDm,
    classifier: SkillClassifier,
    internal_url_pattern: String,
}

impl SyncRunner {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);

        Ok(Self {
            airtable: Arc::new(AirtableClient::new(
                http.clone(),
                AirtableConfig::new(&config.airtable_api_key, &config.airtable_base_id),
            )),
            getro: GetroClient::new(
                http.clone(),
                GetroConfig::new(&config.getro_network_id, &config.getro_email, &config.getro_token),
            ),
            algolia: AlgoliaClient::new(
                http.clone(),
                AlgoliaConfig {
                    app_id: config.algolia_app_id.clone(),
                    admin_key: config.algolia_admin_key.clone(),
                    index: config.algolia_index.clone(),
                    endpoint: None,
                },
            ),
            cloudflare: CloudflareClient::new(
                http.clone(),
                CloudflareConfig {
                    account_id: config.cloudflare_account_id.clone(),
                    namespace: config.cloudflare_namespace.clone(),
                    token: config.cloudflare_token.clone(),
                    worker_url: config.cloudflare_worker_url.clone(),
                    worker_auth_token: config.auth_token.clone(),
                    endpoint: CLOUDFLARE_ENDPOINT.to_string(),
                },
            ),
            notifier: SlackNotifier::new(http.clone(), config.slack_error_webhook.clone()),
            twitter: TwitterDm::new(
                http,
                TwitterConfig {
                    bearer_token: config.twitter_bearer_token.clone(),
                    form_url: config.instagrant_form.clone(),
                    endpoint: TWITTER_ENDPOINT.to_string(),
                },
            ),
            classifier: SkillClassifier::new(),
            internal_url_pattern: config.internal_url_pattern.clone(),
        })
    }

    async fn publish_search(&self, records: &[ListingRecord]) {
        if let Err(err) = self.algolia.replace_all(records).await {
            error!(error = ?err, "search index publish failed");
            self.notifier
                .notify(&format!("search index publish failed: {err:#}"))
                .await;
        }
    }

    async fn publish_cache(&self, records: &[ListingRecord]) {
        if let Err(err) = self.try_publish_cache(records).await {
            error!(error = ?err, "edge cache publish failed");
            self.notifier
                .notify(&format!("edge cache publish failed: {err:#}"))
                .await;
        }
    }

    async fn try_publish_cache(&self, records: &[ListingRecord]) -> Result<()> {
        let jobs = category_listing(records, Category::Jobs);
        let bounties = category_listing(records, Category::Bounties);
        let grants = category_listing(records, Category::Grants);

        let digest = build_digest(jobs, bounties, grants);
        self.cloudflare.push_digest(&digest).await?;

        let items = kv_items(records, CACHE_TTL_SECS)?;
        self.cloudflare.put_bulk(&items).await?;
        Ok(())
    }

    async fn run_board_sync(&self) -> Result<String> {
        let sponsors = self.airtable.sponsors().await?;
        let sponsor_lookup = sponsors_by_name(&sponsors);
        let skills = self.airtable.skills().await?;
        let skill_lookup = skills_by_name(&skills);
        let default_skill_id = skill_lookup
            .get(DEFAULT_SKILL)
            .cloned()
            .context("default skill missing from the records store")?;

        let jobs = self.getro.fetch_all(&company_filter(&sponsors)).await?;
        if jobs.is_empty() {
            self.notifier.notify("No jobs found from getro").await;
            return Ok("No jobs found from getro".to_string());
        }

        let mut candidates = Vec::with_capacity(jobs.len());
        for job in &jobs {
            match map_external_job(
                job,
                &sponsor_lookup,
                &self.classifier,
                &skill_lookup,
                &default_skill_id,
            ) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    warn!(job_id = job.id, error = ?err, "skipping unmappable board job");
                    self.notifier
                        .notify(&format!("skipping board job {}: {err:#}", job.id))
                        .await;
                }
            }
        }

        let snapshot = self.airtable.listing_snapshot().await?;
        let plan = reconcile(&candidates, &snapshot, &self.internal_url_pattern);
        info!(
            to_create = plan.to_create.len(),
            to_soft_delete = plan.to_soft_delete.len(),
            "reconciliation plan computed"
        );

        let created = self.apply_creates(plan.to_create).await;
        let deleted = self.apply_soft_deletes(plan.to_soft_delete).await;
        info!(created, deleted, "board sync complete");
        Ok("Success".to_string())
    }

    /// Issue all creates concurrently and join before reporting completion,
    /// so partial failures are observable. Per-record failures are reported
    /// and do not abort the batch.
    async fn apply_creates(&self, to_create: Vec<NewJobRecord>) -> usize {
        let mut tasks = JoinSet::new();
        for record in to_create {
            let airtable = self.airtable.clone();
            let notifier = self.notifier.clone();
            tasks.spawn(async move {
                match airtable.create_job(&record).await {
                    Ok(_) => 1usize,
                    Err(err) => {
                        notifier
                            .notify(&format!(
                                "creating job {} failed: {err:#}",
                                record.external_id
                            ))
                            .await;
                        0
                    }
                }
            });
        }

        let mut created = 0;
        while let Some(joined) = tasks.join_next().await {
            created += joined.unwrap_or(0);
        }
        created
    }

    async fn apply_soft_deletes(&self, to_soft_delete: Vec<SoftDelete>) -> usize {
        let mut tasks = JoinSet::new();
        for delete in to_soft_delete {
            let airtable = self.airtable.clone();
            let notifier = self.notifier.clone();
            tasks.spawn(async move {
                match airtable.soft_delete(&delete.object_id).await {
                    Ok(()) => 1usize,
                    Err(err) => {
                        notifier
                            .notify(&format!(
                                "soft-deleting record {} failed: {err:#}",
                                delete.object_id
                            ))
                            .await;
                        0
                    }
                }
            });
        }

        let mut deleted = 0;
        while let Some(joined) = tasks.join_next().await {
            deleted += joined.unwrap_or(0);
        }
        deleted
    }
}

#[async_trait]
impl SyncService for SyncRunner {
    async fn update_index(&self) -> Result<String> {
        let refreshed: Result<()> = async {
            let snapshot = self.airtable.listing_snapshot().await?;
            let records = dedup_listing(&snapshot);
            self.publish_cache(&records).await;
            self.publish_search(&records).await;
            Ok(())
        }
        .await;

        match refreshed {
            Ok(()) => Ok("Updated".to_string()),
            Err(err) => {
                error!(error = ?err, "index update failed");
                self.notifier
                    .notify(&format!("index update failed: {err:#}"))
                    .await;
                Err(anyhow!("Error"))
            }
        }
    }

    async fn sync_board_jobs(&self) -> Result<String> {
        match self.run_board_sync().await {
            Ok(message) => Ok(message),
            Err(err) => {
                error!(error = ?err, "board sync failed");
                self.notifier
                    .notify(&format!("board sync failed: {err:#}"))
                    .await;
                Err(anyhow!("Error"))
            }
        }
    }

    async fn publish_cache_index(&self) -> Result<String> {
        match self.airtable.listing_snapshot().await {
            Ok(snapshot) => {
                let records = dedup_listing(&snapshot);
                self.publish_cache(&records).await;
            }
            Err(err) => {
                error!(error = ?err, "snapshot fetch for cache publish failed");
                self.notifier
                    .notify(&format!("cache publish failed: {err:#}"))
                    .await;
            }
        }
        Ok("Updated".to_string())
    }

    async fn send_grant_dm(&self, applier: &str, tweet: &str) -> Result<String> {
        match self.twitter.send_grant_dm(applier, tweet).await {
            Ok(message) => Ok(message),
            Err(DmError::UserNotFound) => {
                warn!(applier, "grant message target not found");
                Err(anyhow!("Could not find user"))
            }
            Err(DmError::Fetch(err)) => {
                error!(error = ?err, "grant message delivery failed");
                self.notifier
                    .notify(&format!("grant message to {applier} failed: {err:#}"))
                    .await;
                Err(anyhow!("Error"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opps_core::SponsorDetails;

    fn skill_lookup() -> HashMap<String, String> {
        HashMap::from([
            ("Content".to_string(), "recContent".to_string()),
            ("Blockchain Dev".to_string(), "recBlockchain".to_string()),
            ("Back-End Dev".to_string(), "recBackEnd".to_string()),
            ("Front-End Dev".to_string(), "recFrontEnd".to_string()),
            ("Growth".to_string(), "recGrowth".to_string()),
            ("Design".to_string(), "recDesign".to_string()),
            (DEFAULT_SKILL.to_string(), "recOther".to_string()),
        ])
    }

    fn store_record(
        object_id: &str,
        external_id: Option<&str>,
        source: Option<&str>,
        category: Category,
    ) -> ListingRecord {
        ListingRecord {
            object_id: object_id.to_string(),
            source: source.map(str::to_string),
            external_id: external_id.map(str::to_string),
            title: format!("title {object_id}"),
            description: String::new(),
            url: format!("https://jobs.example.com/{object_id}"),
            location: "Remote".to_string(),
            skills: vec!["Back-End Dev".to_string()],
            sponsor: SponsorDetails {
                name: "Acme".to_string(),
                ..SponsorDetails::default()
            },
            record_type: category,
            category,
            featured: false,
            private: false,
            deleted: None,
        }
    }

    fn candidate(external_id: &str, url: &str) -> NewJobRecord {
        NewJobRecord {
            source: EXTERNAL_SOURCE.to_string(),
            external_id: external_id.to_string(),
            title: format!("job {external_id}"),
            description: String::new(),
            url: url.to_string(),
            sponsor_id: "recSponsor1".to_string(),
            location: "Remote".to_string(),
            skill_ids: vec!["recBackEnd".to_string()],
        }
    }

    fn external_job(id: u64, title: &str, functions: &[&str]) -> ExternalJob {
        ExternalJob {
            id,
            title: title.to_string(),
            url: format!("https://jobs.example.com/{id}"),
            locations: vec!["Remote".to_string()],
            job_functions: functions.iter().map(|f| f.to_string()).collect(),
            company: opps_core::ExternalCompany {
                name: "Acme".to_string(),
            },
        }
    }

    // -- classifier --------------------------------------------------------

    #[test]
    fn backend_engineer_title_classifies_as_back_end() {
        let classifier = SkillClassifier::new();
        let skills = classifier.classify("Backend Engineer", &[], &skill_lookup(), "recOther");
        assert_eq!(skills, vec!["recBackEnd".to_string()]);
    }

    #[test]
    fn title_may_match_several_rules() {
        let classifier = SkillClassifier::new();
        let skills =
            classifier.classify("Rust Infrastructure Artist", &[], &skill_lookup(), "recOther");
        assert_eq!(skills.len(), 3);
        assert!(skills.contains(&"recContent".to_string()));
        assert!(skills.contains(&"recBlockchain".to_string()));
        assert!(skills.contains(&"recBackEnd".to_string()));
    }

    #[test]
    fn board_tags_map_through_the_taxonomy_table() {
        let classifier = SkillClassifier::new();
        let tags = vec!["Software Engineering".to_string(), "Product".to_string()];
        let skills = classifier.classify("Ambassador", &tags, &skill_lookup(), "recOther");
        assert_eq!(
            skills,
            vec!["recFrontEnd".to_string(), "recGrowth".to_string()]
        );
    }

    #[test]
    fn unknown_tags_fall_back_to_the_default_skill() {
        let classifier = SkillClassifier::new();
        let tags = vec!["Underwater Basket Weaving".to_string()];
        let skills = classifier.classify("Ambassador", &tags, &skill_lookup(), "recOther");
        assert_eq!(skills, vec!["recOther".to_string()]);
    }

    #[test]
    fn classification_is_total() {
        let classifier = SkillClassifier::new();
        let skills = classifier.classify("", &[], &skill_lookup(), "recOther");
        assert_eq!(skills, vec!["recOther".to_string()]);
    }

    #[test]
    fn result_set_is_deduplicated() {
        let classifier = SkillClassifier::new();
        // "backend engineer" matches two Back-End rules, and the tag maps to
        // the same skill again.
        let tags = vec!["IT".to_string()];
        let skills = classifier.classify("Backend Engineer", &tags, &skill_lookup(), "recOther");
        assert_eq!(skills, vec!["recBackEnd".to_string()]);
    }

    // -- candidate mapping -------------------------------------------------

    #[test]
    fn mapping_joins_locations_and_classifies_title() {
        let sponsors = sponsors_by_name(&[Sponsor {
            record_id: "recSponsor1".to_string(),
            name: "Acme".to_string(),
            twitter: None,
            site: None,
            logo_url: None,
            industry: None,
            bio: Some("Builds things".to_string()),
        }]);
        let mut job = external_job(42, "Backend Engineer", &[]);
        job.locations = vec!["Remote".to_string(), "Lisbon".to_string()];

        let record = map_external_job(
            &job,
            &sponsors,
            &SkillClassifier::new(),
            &skill_lookup(),
            "recOther",
        )
        .expect("candidate");

        assert_eq!(record.external_id, "42");
        assert_eq!(record.location, "Remote,Lisbon");
        assert_eq!(record.description, "Builds things");
        assert_eq!(record.skill_ids, vec!["recBackEnd".to_string()]);
    }

    #[test]
    fn mapping_fails_for_unknown_company() {
        let job = external_job(42, "Backend Engineer", &[]);
        let err = map_external_job(
            &job,
            &HashMap::new(),
            &SkillClassifier::new(),
            &skill_lookup(),
            "recOther",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Acme"));
    }

    // -- reconciliation ----------------------------------------------------

    #[test]
    fn unseen_external_jobs_are_created_exactly_once() {
        let snapshot = vec![store_record(
            "rec1",
            Some("7"),
            Some(EXTERNAL_SOURCE),
            Category::Jobs,
        )];
        let candidates = vec![
            candidate("42", "https://jobs.example.com/42"),
            candidate("42", "https://jobs.example.com/42-mirror"),
            candidate("7", "https://jobs.example.com/7"),
        ];
        let plan = reconcile(&candidates, &snapshot, "superteam.fun");
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].external_id, "42");
        assert!(plan.to_soft_delete.is_empty());
    }

    #[test]
    fn withdrawn_external_ids_are_soft_deleted() {
        let snapshot = vec![
            store_record("rec1", Some("7"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec2", Some("8"), Some(EXTERNAL_SOURCE), Category::Jobs),
        ];
        let candidates = vec![candidate("7", "https://jobs.example.com/7")];
        let plan = reconcile(&candidates, &snapshot, "superteam.fun");
        assert!(plan.to_create.is_empty());
        assert_eq!(
            plan.to_soft_delete,
            vec![SoftDelete {
                object_id: "rec2".to_string(),
                external_id: Some("8".to_string()),
                reason: SoftDeleteReason::Withdrawn,
            }]
        );
    }

    #[test]
    fn second_store_duplicate_is_soft_deleted_first_is_untouched() {
        let snapshot = vec![
            store_record("rec1", Some("99"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec2", Some("99"), Some(EXTERNAL_SOURCE), Category::Jobs),
        ];
        let candidates = vec![candidate("99", "https://jobs.example.com/99")];
        let plan = reconcile(&candidates, &snapshot, "superteam.fun");
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_soft_delete.len(), 1);
        assert_eq!(plan.to_soft_delete[0].object_id, "rec2");
        assert_eq!(plan.to_soft_delete[0].reason, SoftDeleteReason::Duplicate);
    }

    #[test]
    fn internal_rows_are_never_soft_deleted() {
        let snapshot = vec![
            store_record("rec1", Some("99"), None, Category::Jobs),
            store_record("rec2", Some("99"), None, Category::Jobs),
        ];
        let plan = reconcile(&[], &snapshot, "superteam.fun");
        assert!(plan.to_soft_delete.is_empty());
    }

    #[test]
    fn self_referential_postings_are_not_created_but_count_as_advertised() {
        let snapshot = vec![store_record(
            "rec1",
            Some("7"),
            Some(EXTERNAL_SOURCE),
            Category::Jobs,
        )];
        let candidates = vec![candidate("7", "https://earn.superteam.fun/listing/7")];
        let plan = reconcile(&candidates, &snapshot, "superteam.fun");
        // Not re-created, and not treated as withdrawn either: the board
        // still advertises it.
        assert!(plan.to_create.is_empty());
        assert!(plan.to_soft_delete.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let snapshot = vec![
            store_record("rec1", Some("7"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec2", Some("7"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec3", Some("8"), Some(EXTERNAL_SOURCE), Category::Jobs),
        ];
        let candidates = vec![
            candidate("7", "https://jobs.example.com/7"),
            candidate("42", "https://jobs.example.com/42"),
        ];
        let first = reconcile(&candidates, &snapshot, "superteam.fun");
        let second = reconcile(&candidates, &snapshot, "superteam.fun");
        assert_eq!(first, second);
        assert_eq!(first.to_create.len(), 1);
        assert_eq!(first.to_soft_delete.len(), 2);
    }

    #[test]
    fn mapped_board_job_lands_in_the_create_plan() {
        let job = external_job(42, "Backend Engineer", &[]);
        let sponsors = sponsors_by_name(&[Sponsor {
            record_id: "recSponsor1".to_string(),
            name: "Acme".to_string(),
            twitter: None,
            site: None,
            logo_url: None,
            industry: None,
            bio: None,
        }]);
        let record = map_external_job(
            &job,
            &sponsors,
            &SkillClassifier::new(),
            &skill_lookup(),
            "recOther",
        )
        .expect("candidate");
        let plan = reconcile(&[record], &[], "superteam.fun");
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].skill_ids, vec!["recBackEnd".to_string()]);
    }

    // -- publication -------------------------------------------------------

    fn listing(featured_count: usize, normal_count: usize) -> Vec<ListingRecord> {
        let mut records = Vec::new();
        for i in 0..featured_count {
            let mut record = store_record(&format!("feat{i}"), None, None, Category::Jobs);
            record.featured = true;
            records.push(record);
        }
        for i in 0..normal_count {
            records.push(store_record(&format!("norm{i}"), None, None, Category::Jobs));
        }
        records
    }

    #[test]
    fn featured_records_precede_non_featured() {
        let shuffled = featured_first(listing(3, 5));
        assert_eq!(shuffled.len(), 8);
        assert!(shuffled[..3].iter().all(|r| r.featured));
        assert!(shuffled[3..].iter().all(|r| !r.featured));
    }

    #[test]
    fn shuffle_preserves_membership_and_counts() {
        let input = listing(2, 4);
        let mut expected: Vec<String> = input.iter().map(|r| r.object_id.clone()).collect();
        let mut got: Vec<String> = featured_first(input)
            .iter()
            .map(|r| r.object_id.clone())
            .collect();
        expected.sort();
        got.sort();
        assert_eq!(expected, got);
    }

    #[test]
    fn digest_caps_main_jobs_at_fifty() {
        let jobs = listing(10, 60);
        let digest = build_digest(featured_first(jobs), Vec::new(), Vec::new());
        assert_eq!(digest.jobs.len(), 70);
        assert_eq!(digest.main.jobs.len(), MAIN_JOBS_CAP);
        assert_eq!(digest.keepalive, "keepalive");
    }

    #[test]
    fn digest_keeps_short_job_lists_whole() {
        let digest = build_digest(listing(1, 2), Vec::new(), Vec::new());
        assert_eq!(digest.main.jobs.len(), 3);
    }

    #[test]
    fn sponsor_cache_keys_are_normalized() {
        assert_eq!(normalize_sponsor_key("Solana Foundation"), "solanafoundation");
        assert_eq!(normalize_sponsor_key("Acme"), "acme");
    }

    #[test]
    fn kv_items_aggregate_every_non_job_record_per_sponsor() {
        let mut bounty_a = store_record("recB1", None, None, Category::Bounties);
        bounty_a.sponsor.name = "Solana Foundation".to_string();
        let mut bounty_b = store_record("recB2", None, None, Category::Bounties);
        bounty_b.sponsor.name = "Solana Foundation".to_string();
        let job = store_record("recJ1", None, None, Category::Jobs);

        let items = kv_items(&[bounty_a, bounty_b, job], CACHE_TTL_SECS).expect("items");
        // Three per-record keys plus one sponsor aggregate.
        assert_eq!(items.len(), 4);
        let aggregate = items
            .iter()
            .find(|item| item.key == "solanafoundation")
            .expect("sponsor aggregate");
        let group: Vec<ListingRecord> = serde_json::from_str(&aggregate.value).unwrap();
        assert_eq!(group.len(), 2);
        assert!(items.iter().all(|item| item.expiration_ttl == CACHE_TTL_SECS));
    }

    #[test]
    fn dedup_listing_keeps_first_external_occurrence() {
        let snapshot = vec![
            store_record("rec1", Some("99"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec2", Some("99"), Some(EXTERNAL_SOURCE), Category::Jobs),
            store_record("rec3", None, None, Category::Bounties),
        ];
        let unique = dedup_listing(&snapshot);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].object_id, "rec1");
        assert_eq!(unique[1].object_id, "rec3");
    }

    #[test]
    fn company_filter_joins_lowercased_names() {
        let sponsors = vec![
            Sponsor {
                record_id: "rec1".to_string(),
                name: "Acme".to_string(),
                twitter: None,
                site: None,
                logo_url: None,
                industry: None,
                bio: None,
            },
            Sponsor {
                record_id: "rec2".to_string(),
                name: "Solana Foundation".to_string(),
                twitter: None,
                site: None,
                logo_url: None,
                industry: None,
                bio: None,
            },
        ];
        assert_eq!(company_filter(&sponsors), "acme|solana foundation");
    }
}
