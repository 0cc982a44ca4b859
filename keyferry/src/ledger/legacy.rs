//! Import of the per-outcome CSV exports written by older versions.
//!
//! Each file holds `order_id,title,code` lines. Commas inside titles were
//! replaced with `.` on write, so a plain split is enough.

use std::path::Path;

use tracing::{debug, info};

use super::LedgerError;
use crate::redemption::RedemptionOutcome;

const EXPORTS: &[(&str, RedemptionOutcome)] = &[
    ("redeemed.csv", RedemptionOutcome::Redeemed),
    ("already_owned.csv", RedemptionOutcome::AlreadyOwnedElsewhere),
    ("errored.csv", RedemptionOutcome::InvalidOrRegionLocked),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEntry {
    pub order_id: String,
    pub title: String,
    pub outcome: RedemptionOutcome,
}

/// Title as it was written into the old exports.
pub fn fold_legacy_title(title: &str) -> String {
    title.trim().replace(',', ".")
}

pub fn parse_legacy_export(content: &str, outcome: RedemptionOutcome) -> Vec<LegacyEntry> {
    content
        .trim_start_matches('\u{feff}')
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ',');
            let order_id = fields.next()?.trim();
            let title = fields.next()?.trim();
            if order_id.is_empty() || title.is_empty() || order_id.eq_ignore_ascii_case("gamekey") {
                return None;
            }
            Some(LegacyEntry {
                order_id: order_id.to_string(),
                title: title.to_string(),
                outcome,
            })
        })
        .collect()
}

/// Read whichever legacy exports exist in `dir`.
pub async fn load_legacy_exports(dir: &Path) -> Result<Vec<LegacyEntry>, LedgerError> {
    let mut entries = Vec::new();
    for (name, outcome) in EXPORTS {
        let path = dir.join(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No legacy export");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_legacy_export(&content, *outcome);
        info!(file = name, entries = parsed.len(), "Imported legacy export");
        entries.extend(parsed);
    }
    Ok(entries)
}
