use std::path::PathBuf;

use clap::Parser;

use crate::{error::SyncError, store::Relation};

/// Rebuilds stop, calendar, trip and route-stop tables from a GTFS feed.
///
/// Commands are read left to right and can be chained, for example
/// `clear TripSchedule set TripSchedule RouteDirectionStops`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://feed.db")]
    pub database_url: String,

    /// Directory holding the unpacked GTFS files.
    #[arg(long, env = "FEED_DIR", default_value = "./feed/")]
    pub feed_dir: PathBuf,

    /// Download and unpack the feed archive into `--feed-dir` before loading it.
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,

    /// Fail when the feed has rows that cannot be attributed to a route.
    #[arg(long)]
    pub strict: bool,

    #[arg(long, default_value = "info")]
    pub log_level: log::LevelFilter,

    /// `clear <table>...` and `set <table>...` groups.
    #[arg(required = true, num_args = 1.., value_name = "COMMAND")]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Clear,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub verb: Verb,
    pub relations: Vec<Relation>,
}

fn verb(token: &str) -> Option<Verb> {
    match token {
        "clear" => Some(Verb::Clear),
        "set" => Some(Verb::Set),
        _ => None,
    }
}

/// Splits the command tokens into steps. The whole chain is checked before anything runs.
pub fn parse_chain<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Step>, SyncError> {
    let mut steps: Vec<Step> = vec![];
    for token in tokens.iter().map(AsRef::as_ref) {
        if let Some(verb) = verb(token) {
            if let Some(previous) = steps.last() {
                check_not_empty(previous)?;
            }
            steps.push(Step {
                verb,
                relations: vec![],
            });
            continue;
        }
        let relation: Relation = token.parse().map_err(|token| {
            SyncError::Usage(format!("Unrecognized argument or invalid table -> {}", token))
        })?;
        let Some(step) = steps.last_mut() else {
            return Err(SyncError::Usage(format!(
                "Expected \"clear\" or \"set\" before {}",
                token
            )));
        };
        if !step.relations.contains(&relation) {
            step.relations.push(relation);
        }
    }
    match steps.last() {
        Some(step) => check_not_empty(step)?,
        None => return Err(SyncError::Usage("No commands were given".to_string())),
    }
    Ok(steps)
}

fn check_not_empty(step: &Step) -> Result<(), SyncError> {
    if step.relations.is_empty() {
        let verb = match step.verb {
            Verb::Clear => "clear",
            Verb::Set => "set",
        };
        return Err(SyncError::Usage(format!(
            "\"{}\" needs at least one table name",
            verb
        )));
    }
    Ok(())
}
