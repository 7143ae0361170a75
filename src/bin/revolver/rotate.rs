use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use pad::PadStr;
use revolver::config::Config;
use revolver::pcsc::PcscReader;
use revolver::rotation::{Outcome, ReaderOutcome, Rotator};
use revolver::store::JsonStore;
use tracing::{debug, trace_span, warn};

pub fn rotate(config: &Config, mut readers: Vec<PcscReader>) -> Result<()> {
    let span = trace_span!("rotate");
    let _enter = span.enter();

    let store = JsonStore::load(&config.state_file).context("Couldn't load state")?;
    let mut rotator = Rotator::new(store, config);
    let outcomes = rotator.run_rotation_pass(&mut readers);

    let width = outcomes.iter().map(|o| o.reader.len()).max().unwrap_or(0);
    println!("┏╸{}", "Rotation".italic());
    for (i, outcome) in outcomes.iter().enumerate() {
        let branch = if i + 1 == outcomes.len() { "┗" } else { "┠" };
        println!("{}╴{} {}", branch, outcome.reader.pad_to_width(width), describe(outcome));
    }

    let failures = outcomes.iter().filter(|o| o.is_failure()).count();
    if failures > 0 {
        warn!(failures, "Not every reader was rotated");
    }

    let store = rotator.into_store();
    debug!(path = %store.path().display(), "Saving state");
    store.save().context("Couldn't save state")?;
    if let Some(next) = store.prefs.next_switch {
        println!("Next rotation due at {}", next.to_rfc3339());
    }
    Ok(())
}

fn describe(outcome: &ReaderOutcome) -> String {
    match &outcome.outcome {
        Outcome::Rotated { to, deleted } => format!(
            "{} {} ({} notification(s) cleared)",
            "→".green(),
            to.green(),
            deleted
        ),
        Outcome::Unchanged { .. } => format!("{} {}", "=".yellow(), outcome.status().yellow()),
        Outcome::Skipped => format!("{}", outcome.status().dimmed()),
        Outcome::Failed(err) => format!(
            "{} {} [{:?}: {}]",
            "✗".red(),
            outcome.status().red(),
            outcome.stage,
            err
        ),
    }
}
