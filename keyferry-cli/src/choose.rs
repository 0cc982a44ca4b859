//! `keyferry choose`: claim Humble Choice games, then optionally redeem them.

use std::sync::Arc;

use async_trait::async_trait;
use keyferry::auth::OperatorError;
use keyferry::choice::{MonthOutcome, takes_all};
use keyferry::remote::ChoiceMonth;
use keyferry::{Redeemer, RunError, RunOptions, RunReport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ChooseArgs;
use crate::output;

/// Asks which games of a month to claim.
#[async_trait]
pub trait GamePicker: Send + Sync {
    /// Indexes into `month.options`; `None` skips the month.
    async fn pick(&self, month: &ChoiceMonth) -> Result<Option<Vec<usize>>, OperatorError>;
}

fn auto_picks(month: &ChoiceMonth, all: bool) -> Option<Vec<usize>> {
    (all && takes_all(month)).then(|| (0..month.options.len()).collect())
}

/// Walk every month with picks left. Returns the redemption report when
/// `--redeem` was given and something was claimed.
pub async fn choose_months(
    redeemer: &Redeemer,
    args: &ChooseArgs,
    picker: Option<Arc<dyn GamePicker>>,
    options: RunOptions,
    cancel: &CancellationToken,
) -> Result<Option<RunReport>, RunError> {
    let session = redeemer.sign_in_key_source(options.mode, cancel).await?;
    let months = redeemer.choice_months(&session).await?;
    if months.is_empty() {
        println!("No Humble Choice months need choosing.");
        return Ok(None);
    }

    let mut outcomes: Vec<MonthOutcome> = Vec::new();
    for month in &months {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        output::print_month(month);

        let picks = match auto_picks(month, args.all) {
            Some(picks) => picks,
            None => match &picker {
                Some(picker) => match picker.pick(month).await {
                    Ok(Some(picks)) => picks,
                    Ok(None) => continue,
                    Err(OperatorError::Aborted) => return Err(RunError::Cancelled),
                    Err(e) => {
                        warn!(month = %month.title, error = %e, "Could not read the selection");
                        continue;
                    }
                },
                None => {
                    info!(month = %month.title, "Skipping month; pass --all or run in a terminal to pick");
                    continue;
                }
            },
        };
        if picks.is_empty() {
            continue;
        }

        let outcome = redeemer.choose(&session, month, &picks, cancel).await?;
        output::print_month_outcome(&outcome);
        outcomes.push(outcome);
    }

    let orders: Vec<String> = outcomes
        .iter()
        .filter(|o| o.has_new_keys())
        .map(|o| o.order_id.clone())
        .collect();
    if orders.is_empty() || !args.redeem {
        if !orders.is_empty() {
            println!("Run `keyferry run` to redeem the new keys.");
        }
        return Ok(None);
    }

    let report = redeemer
        .run(
            RunOptions {
                orders: Some(orders),
                ..options
            },
            cancel,
        )
        .await?;
    Ok(Some(report))
}
