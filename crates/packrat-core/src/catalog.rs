//! Remote catalog integration.
//!
//! The wire protocol lives behind [`CatalogClient`]; this module owns the
//! merge of remote knowledge into the local index. Remote packages match
//! local rows by foreign id first, then by normalized name. A name match
//! that already belongs to a different remote package is a conflict and is
//! skipped rather than silently rebound.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::store::{safe_name, Package, PackageOrigin, PackageState, Store};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

/// One owned package as the remote catalog reports it.
#[derive(Debug, Clone)]
pub struct CatalogPackage {
    pub foreign_id: i64,
    pub name: String,
    pub publisher: Option<String>,
    pub category: Option<String>,
    pub official_state: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
}

/// Extended details for one package.
#[derive(Debug, Clone, Default)]
pub struct CatalogDetails {
    pub display_name: Option<String>,
    pub publisher: Option<String>,
    pub category: Option<String>,
    pub official_state: Option<String>,
    pub version: Option<String>,
    /// Opaque validator echoed back on the next fetch.
    pub change_token: Option<String>,
}

/// Outcome of a conditional details fetch.
#[derive(Debug, Clone)]
pub enum DetailsResponse {
    /// The supplied change token still matches; nothing to update.
    NotModified,
    Details(CatalogDetails),
}

/// Transport-level access to the remote catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_owned(&self) -> Result<Vec<CatalogPackage>>;

    /// Fetch details, passing the previously stored change token so the
    /// remote side can answer `NotModified`.
    async fn fetch_details(
        &self,
        foreign_id: i64,
        change_token: Option<&str>,
    ) -> Result<DetailsResponse>;
}

/// Counters reported by a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl Store {
    fn find_package_by_name_ci(&self, safe: &str) -> Result<Option<Package>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT id FROM package WHERE LOWER(safe_name) = LOWER(?1) \
                 ORDER BY official_state DESC LIMIT 1",
                params![safe],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        drop(conn);
        match result {
            Some(id) => self.find_package(id),
            None => Ok(None),
        }
    }

    fn packages_with_foreign_id(&self) -> Result<Vec<Package>> {
        let ids: Vec<i64> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT id FROM package WHERE foreign_id > 0 AND exclude = 0 ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let mut packages = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(package) = self.find_package(id)? {
                packages.push(package);
            }
        }
        Ok(packages)
    }
}

pub struct CatalogSync<'a> {
    store: &'a Store,
    client: &'a dyn CatalogClient,
}

impl<'a> CatalogSync<'a> {
    pub fn new(store: &'a Store, client: &'a dyn CatalogClient) -> Self {
        Self { store, client }
    }

    /// Merge the remote ownership list into the local index.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncStats> {
        let owned = self.client.list_owned().await?;
        info!("Catalog reports {} owned packages", owned.len());

        let mut stats = SyncStats::default();
        for remote in owned {
            cancel.check()?;
            match self.merge_one(&remote)? {
                MergeOutcome::Imported => stats.imported += 1,
                MergeOutcome::Updated => stats.updated += 1,
                MergeOutcome::Skipped => stats.skipped += 1,
            }
        }
        Ok(stats)
    }

    fn merge_one(&self, remote: &CatalogPackage) -> Result<MergeOutcome> {
        let safe = safe_name(&remote.name);

        let (mut package, outcome) =
            match self.store.find_package_by_foreign_id(remote.foreign_id)? {
                Some(existing) => (existing, MergeOutcome::Updated),
                None => match self.store.find_package_by_name_ci(&safe)? {
                    Some(existing) if existing.foreign_id > 0 => {
                        // name already bound to a different remote package
                        warn!(
                            "Package name '{}' conflicts with remote id {}, skipping {}",
                            safe, existing.foreign_id, remote.foreign_id
                        );
                        return Ok(MergeOutcome::Skipped);
                    }
                    Some(existing) => (existing, MergeOutcome::Updated),
                    None => (
                        Package {
                            safe_name: safe.clone(),
                            origin: PackageOrigin::RemoteCatalogPackage,
                            state: PackageState::New,
                            ..Default::default()
                        },
                        MergeOutcome::Imported,
                    ),
                },
            };

        package.foreign_id = remote.foreign_id;
        package.display_name = Some(remote.name.clone());
        if remote.publisher.is_some() {
            package.display_publisher = remote.publisher.clone();
        }
        if remote.category.is_some() {
            package.display_category = remote.category.clone();
        }
        package.official_state = remote.official_state.clone();
        if remote.version.is_some() {
            package.version = remote.version.clone();
        }
        self.store.upsert_package(&mut package)?;

        for tag_name in &remote.tags {
            if let Some(tag) = self.store.add_tag(tag_name, true)? {
                self.store.assign_tag(tag.id, package.id)?;
            }
        }
        Ok(outcome)
    }

    /// Refresh extended details for every package the catalog knows,
    /// honoring stored change tokens.
    pub async fn refresh_details(&self, cancel: &CancellationToken) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        for mut package in self.store.packages_with_foreign_id()? {
            cancel.check()?;
            let response = self
                .client
                .fetch_details(package.foreign_id, package.change_token.as_deref())
                .await?;

            match response {
                DetailsResponse::NotModified => {
                    debug!("Details for {} unchanged", package.safe_name);
                    stats.skipped += 1;
                }
                DetailsResponse::Details(details) => {
                    if details.display_name.is_some() {
                        package.display_name = details.display_name;
                    }
                    if details.publisher.is_some() {
                        package.display_publisher = details.publisher;
                    }
                    if details.category.is_some() {
                        package.display_category = details.category;
                    }
                    if details.version.is_some() {
                        package.version = details.version;
                    }
                    package.official_state = details.official_state;
                    package.change_token = details.change_token;
                    self.store.upsert_package(&mut package)?;
                    stats.updated += 1;
                }
            }
        }
        Ok(stats)
    }
}

enum MergeOutcome {
    Imported,
    Updated,
    Skipped,
}
