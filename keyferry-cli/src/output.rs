use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use keyferry::RunReport;
use keyferry::choice::MonthOutcome;
use keyferry::ownership::OwnershipVerdict;
use keyferry::redemption::{HaltReason, KeyDisposition, KeyReport, RedemptionEvent, RedemptionOutcome};
use keyferry::remote::{ChoiceMonth, ChoiceOption};
use tokio::sync::mpsc;

#[cfg(feature = "colored-output")]
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Error,
    Heading,
    Muted,
}

impl Tone {
    #[cfg(feature = "colored-output")]
    pub fn paint(self, text: &str) -> String {
        match self {
            Tone::Success => text.green().to_string(),
            Tone::Warning => text.yellow().to_string(),
            Tone::Error => text.red().to_string(),
            Tone::Heading => text.bold().to_string(),
            Tone::Muted => text.dimmed().to_string(),
        }
    }

    #[cfg(not(feature = "colored-output"))]
    pub fn paint(self, text: &str) -> String {
        text.to_string()
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// One line for a finished key, or `None` for keys not worth a line.
pub fn describe(report: &KeyReport) -> Option<String> {
    let detail = report
        .detail
        .as_deref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default();
    let line = match &report.disposition {
        KeyDisposition::Attempted(RedemptionOutcome::Redeemed) => {
            Tone::Success.paint(&format!("Redeemed {}", report.title))
        }
        KeyDisposition::Attempted(RedemptionOutcome::AlreadyOwnedElsewhere) => {
            Tone::Muted.paint(&format!("Already owned: {}{}", report.title, detail))
        }
        KeyDisposition::Attempted(RedemptionOutcome::RateLimited) => {
            Tone::Warning.paint(&format!("Rate limited at {}", report.title))
        }
        KeyDisposition::Attempted(RedemptionOutcome::InvalidOrRegionLocked) => {
            Tone::Error.paint(&format!("Not activatable: {}{}", report.title, detail))
        }
        KeyDisposition::Attempted(RedemptionOutcome::TransientError) => {
            Tone::Warning.paint(&format!("Will retry later: {}{}", report.title, detail))
        }
        KeyDisposition::SkippedOwned(OwnershipVerdict::OwnedFuzzy(score)) => Tone::Muted.paint(&format!(
            "Skipped {}, probably owned ({:.0}% match)",
            report.title,
            score * 100.0
        )),
        KeyDisposition::SkippedOwned(_) => Tone::Muted.paint(&format!("Skipped {}, owned", report.title)),
        KeyDisposition::SkippedDuplicate => {
            Tone::Muted.paint(&format!("Skipped {}, duplicate of a key already handled", report.title))
        }
        KeyDisposition::Settled(_) | KeyDisposition::SkippedPending | KeyDisposition::NotAttempted => {
            return None;
        }
    };
    Some(line)
}

/// Render redemption events until the sender is dropped.
pub async fn drive_progress(mut events: mpsc::UnboundedReceiver<RedemptionEvent>, quiet: bool) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            RedemptionEvent::Started { total } => {
                let pb = ProgressBar::new(total as u64);
                pb.set_style(bar_style());
                bar = Some(pb);
            }
            RedemptionEvent::Revealing { title, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("revealing {}", title));
                }
            }
            RedemptionEvent::Activating { title, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("activating {}", title));
                }
            }
            RedemptionEvent::KeyFinished(report) => {
                if let Some(pb) = &bar {
                    if let Some(line) = describe(&report) {
                        pb.println(line);
                    }
                    pb.inc(1);
                }
            }
            RedemptionEvent::CooldownStarted { until } => {
                let line = Tone::Warning.paint(&format!(
                    "Steam is rate limiting activations; waiting until {}",
                    local_time(until)
                ));
                match &bar {
                    Some(pb) => pb.println(line),
                    None => eprintln!("{}", line),
                }
            }
            RedemptionEvent::CooldownWaiting { remaining, .. } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("cooldown, {}m {:02}s left", remaining.as_secs() / 60, remaining.as_secs() % 60));
                }
            }
            RedemptionEvent::CooldownEnded => {
                if let Some(pb) = &bar {
                    pb.set_message("cooldown over, resuming");
                }
            }
            RedemptionEvent::Halted(reason) => {
                if let Some(pb) = &bar {
                    pb.println(Tone::Warning.paint(&format!("Stopped: {}", reason)));
                }
            }
        }
    }

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
}

pub fn print_report(report: &RunReport) {
    let summary = &report.summary;

    println!();
    println!("{}", Tone::Heading.paint("Summary"));
    println!(
        "  Keys found:     {} in {} orders{}",
        report.keys_found,
        report.orders_total,
        if report.orders_failed > 0 {
            format!(" ({} orders could not be read)", report.orders_failed)
        } else {
            String::new()
        }
    );
    println!(
        "  Ownership:      {} owned, {} probably owned, {} not owned, {} unknown",
        report.matches.confident, report.matches.fuzzy, report.matches.not_owned, report.matches.unknown
    );
    println!("  Redeemed:       {}", Tone::Success.paint(&summary.redeemed().to_string()));
    println!(
        "  Already owned:  {}",
        summary.count_outcome(RedemptionOutcome::AlreadyOwnedElsewhere)
    );
    println!(
        "  Invalid:        {}",
        summary.count_outcome(RedemptionOutcome::InvalidOrRegionLocked)
    );
    println!(
        "  Retry later:    {}",
        summary.count_outcome(RedemptionOutcome::TransientError) + summary.count_outcome(RedemptionOutcome::RateLimited)
    );
    println!("  Done earlier:   {}", summary.settled());

    if let Some(reason) = &report.catalog_unavailable {
        println!();
        println!(
            "{}",
            Tone::Warning.paint(&format!("Owned games could not be listed: {}", reason))
        );
    }

    let pending = summary.skipped_pending_titles();
    if !pending.is_empty() {
        println!();
        println!(
            "{}",
            Tone::Warning.paint(&format!(
                "{} unrevealed keys were left alone because ownership is unknown:",
                pending.len()
            ))
        );
        for title in pending {
            println!("  - {}", title);
        }
        println!(
            "{}",
            Tone::Muted.paint("Provide a Steam web API key, or pass --reveal-all to redeem them anyway.")
        );
    }

    match summary.halted {
        Some(HaltReason::RateLimited) => {
            println!();
            let until = summary
                .cooldown_until
                .map(|at| format!(" after {}", local_time(at)))
                .unwrap_or_default();
            println!(
                "{}",
                Tone::Warning.paint(&format!(
                    "Stopped by Steam's rate limit with {} keys left. Run again{}, or use --wait-cooldown.",
                    summary.not_attempted(),
                    until
                ))
            );
        }
        Some(HaltReason::SessionExpired(provider)) => {
            println!();
            println!(
                "{}",
                Tone::Error.paint(&format!("The {} session expired mid-run; sign in again.", provider))
            );
        }
        Some(HaltReason::Cancelled) => {
            println!();
            println!("{}", Tone::Warning.paint("Interrupted."));
        }
        None => {}
    }
}

/// One line per game on offer, numbered from 1.
pub fn choice_line(index: usize, option: &ChoiceOption) -> String {
    let mut line = format!("{:>3}. {}", index + 1, option.title);
    if let Some(rating) = &option.rating {
        line.push_str(&format!("  {}", Tone::Success.paint(rating)));
    }
    if option.website_only() {
        line.push_str(&format!("  {}", Tone::Warning.paint("(claim on the website)")));
    }
    line
}

pub fn print_month(month: &ChoiceMonth) {
    println!();
    println!(
        "{}",
        Tone::Heading.paint(&format!("{}: {} choices remaining", month.title, month.remaining))
    );
    for (index, option) in month.options.iter().enumerate() {
        println!("{}", choice_line(index, option));
    }
}

pub fn print_month_outcome(outcome: &MonthOutcome) {
    for title in &outcome.claimed {
        println!("{}", Tone::Success.paint(&format!("Claimed {}", title)));
    }
    for option in &outcome.on_website {
        println!(
            "{} {}",
            Tone::Warning.paint(&format!("Claim {} at", option.title)),
            option.page_url
        );
    }
    for (title, error) in &outcome.failed {
        println!("{}", Tone::Error.paint(&format!("Could not claim {}: {}", title, error)));
    }
    if outcome.skipped > 0 {
        println!("{}", Tone::Warning.paint(&format!("{} picks left unclaimed", outcome.skipped)));
    }
}

pub fn print_error(error: &dyn std::fmt::Display) {
    eprintln!("{} {}", Tone::Error.paint("error:"), error);
}
