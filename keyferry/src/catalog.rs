//! Snapshot of what the target account already owns.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::remote::{RemoteError, TargetPlatformClient};
use crate::session::Session;

/// Upper bound on catalog pages, in case the cursor never settles.
const MAX_PAGES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: u64,
    pub title: String,
    pub alternates: Vec<String>,
}

impl CatalogEntry {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        let title = title.into();
        let alternates = derive_alternates(&title);
        Self {
            id,
            title,
            alternates,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OwnedCatalog {
    /// Owned app ids. Only these are compared with a key's app id.
    pub owned_apps: HashSet<u64>,
    /// Owned package (sub) ids. They share a numeric range with app ids.
    pub owned_packages: HashSet<u64>,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub enum CatalogSnapshot {
    Available(OwnedCatalog),
    /// Ownership could not be determined. Not an error: every key is
    /// then treated as `Unknown`.
    Unavailable(String),
}

impl CatalogSnapshot {
    pub fn is_available(&self) -> bool {
        matches!(self, CatalogSnapshot::Available(_))
    }

    pub fn owned(&self) -> Option<&OwnedCatalog> {
        match self {
            CatalogSnapshot::Available(catalog) => Some(catalog),
            CatalogSnapshot::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("target platform session expired while reading owned games")]
    SessionExpired,
}

/// Shorter names a store title is commonly sold under.
pub fn derive_alternates(title: &str) -> Vec<String> {
    let title = title.trim();
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && candidate != title && !out.iter().any(|c| c == candidate) {
            out.push(candidate.to_string());
        }
    };

    if let Some((head, _)) = title.split_once(" - ") {
        push(head);
    }
    if let Some((head, _)) = title.split_once(": ") {
        push(head);
    }
    if let (Some(open), Some(close)) = (title.find('('), title.rfind(')')) {
        if open < close {
            let stripped = format!("{} {}", &title[..open], &title[close + 1..]);
            push(&stripped.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }
    out
}

pub struct CatalogFetcher {
    client: Arc<dyn TargetPlatformClient>,
}

impl CatalogFetcher {
    pub fn new(client: Arc<dyn TargetPlatformClient>) -> Self {
        Self { client }
    }

    /// Read owned ids, then resolve their titles from the store app list.
    ///
    /// Only an expired session is an error. Everything else degrades to
    /// [`CatalogSnapshot::Unavailable`].
    #[instrument(skip_all)]
    pub async fn fetch_owned_catalog(
        &self,
        session: &Session,
        api_key: Option<&str>,
    ) -> Result<CatalogSnapshot, CatalogError> {
        let Some(api_key) = api_key.map(str::trim).filter(|k| !k.is_empty()) else {
            info!("No web API key configured, ownership check disabled");
            return Ok(CatalogSnapshot::Unavailable(
                "no web API key configured".to_string(),
            ));
        };

        let owned = match self.client.owned_ids(session).await {
            Ok(owned) => owned,
            Err(RemoteError::Unauthorized) => {
                session.mark_expired();
                return Err(CatalogError::SessionExpired);
            }
            Err(e) => {
                warn!(error = %e, "Could not read owned games");
                return Ok(CatalogSnapshot::Unavailable(e.to_string()));
            }
        };
        session.mark_in_use();
        debug!(apps = owned.apps.len(), packages = owned.packages.len(), "Owned ids loaded");

        let mut entries = Vec::new();
        let mut after = None;
        for page_no in 0..MAX_PAGES {
            let page = match self.client.catalog_page(api_key, after).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(page = page_no, error = %e, "App list request failed");
                    return Ok(CatalogSnapshot::Unavailable(e.to_string()));
                }
            };

            entries.extend(
                page.apps
                    .into_iter()
                    .filter(|app| owned.owns_app(app.id))
                    .map(|app| CatalogEntry::new(app.id, app.title)),
            );

            match page.next {
                Some(next) if after != Some(next) => after = Some(next),
                Some(_) => {
                    warn!(cursor = ?after, "App list cursor did not advance, stopping");
                    break;
                }
                None => break,
            }
        }

        info!(
            apps = owned.apps.len(),
            packages = owned.packages.len(),
            named = entries.len(),
            "Owned catalog ready"
        );
        Ok(CatalogSnapshot::Available(OwnedCatalog {
            owned_apps: owned.apps,
            owned_packages: owned.packages,
            entries,
        }))
    }
}
