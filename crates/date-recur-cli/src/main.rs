//! `date-recur` CLI: expand, validate and query recurring dates from the command line.
//!
//! ## Usage
//!
//! ```sh
//! # Expand a rule (dates are UTC unless they carry an offset)
//! date-recur occurrences --start 2024-01-01T09:00:00 --end 2024-01-01T10:00:00 \
//!     --timezone Europe/Berlin --rrule "FREQ=WEEKLY;BYDAY=MO,WE,FR;COUNT=6"
//!
//! # Check a rule against the configured part grid
//! date-recur --config date-recur.toml validate --rrule "FREQ=MONTHLY;BYDAY=-1FR"
//!
//! # Resolve a partial date to its instant range
//! date-recur range --granularity month --input 2023-09 --timezone Europe/Berlin
//!
//! # Find entities with an occurrence in September 2023
//! date-recur query -i values.json --granularity month --input 2023-09 --timezone Europe/Berlin
//! ```

mod config;

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use date_recur::dst::parse_timezone;
use date_recur::value::parse_storage_datetime;
use date_recur::{
    DateRecurHelper, EntityId, FieldColumns, Granularity, MemoryStore, OccurrenceCache, Part,
    RecurringDateValue, Rule,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "date-recur",
    version,
    about = "Recurring date engine: RRULE expansion, validation and range queries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config file (TOML). Falls back to $DATE_RECUR_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the occurrences of a value as JSON
    Occurrences {
        /// Start of the first occurrence
        #[arg(long)]
        start: String,
        /// End of the first occurrence (defaults to the start)
        #[arg(long)]
        end: Option<String>,
        /// IANA timezone the rule is evaluated in
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// RRULE; omit for a single occurrence
        #[arg(long)]
        rrule: Option<String>,
        /// Skip occurrences that end before this instant
        #[arg(long)]
        from: Option<String>,
        /// Stop at occurrences starting after this instant
        #[arg(long)]
        until: Option<String>,
        /// Maximum number of occurrences
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Parse a rule and show what the part grid keeps of it
    Validate {
        #[arg(long)]
        rrule: String,
    },
    /// Print the smallest and largest instant a partial date stands for
    Range {
        /// year, month, day or second
        #[arg(long)]
        granularity: Granularity,
        /// The partial date, e.g. 2023-09 for month granularity
        #[arg(long)]
        input: String,
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
    /// Cache a set of values and print the entities overlapping a window
    Query {
        /// JSON array of {entity_id, delta, columns} records (reads from stdin if omitted)
        #[arg(short, long)]
        input_file: Option<String>,
        /// Window start
        #[arg(long, requires = "to", conflicts_with = "granularity")]
        from: Option<String>,
        /// Window end
        #[arg(long, requires = "from")]
        to: Option<String>,
        /// Query a partial date instead of an explicit window
        #[arg(long, requires = "input")]
        granularity: Option<Granularity>,
        /// The partial date for --granularity
        #[arg(long, requires = "granularity")]
        input: Option<String>,
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Reference time for the precreate horizon (defaults to the current time)
        #[arg(long)]
        now: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Occurrences {
            start,
            end,
            timezone,
            rrule,
            from,
            until,
            limit,
            output,
        } => {
            let grid = engine.part_grid()?;
            let rule = rrule
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .map(Rule::parse)
                .transpose()
                .context("Invalid --rrule")?
                .map(|rule| {
                    let kept = rule.filtered(&grid);
                    if kept != rule {
                        tracing::warn!(rule = %rule, kept = %kept, "part grid dropped rule parts");
                    }
                    kept
                });

            let value = RecurringDateValue::from_parts(
                parse_instant("--start", &start)?,
                end.as_deref().map(|e| parse_instant("--end", e)).transpose()?,
                parse_timezone(&timezone).context("Invalid --timezone")?,
                rule,
            )
            .context("Invalid value")?;

            let range_start = from.as_deref().map(|f| parse_instant("--from", f)).transpose()?;
            let range_end = until.as_deref().map(|u| parse_instant("--until", u)).transpose()?;
            let occurrences = value
                .helper()?
                .occurrences(range_start, range_end, limit)
                .context("Failed to generate occurrences")?;

            let json = serde_json::to_string_pretty(&occurrences)?;
            write_output(output.as_deref(), &json)?;
        }
        Commands::Validate { rrule } => {
            let rule = Rule::parse(&rrule).context("Invalid RRULE")?;
            let filtered = rule.filtered(&engine.part_grid()?);
            let dropped: Vec<Part> = rule
                .parts()
                .iter()
                .map(|(part, _)| *part)
                .filter(|part| !filtered.has(*part))
                .collect();

            let report = ValidateReport {
                rule: rule.to_string(),
                filtered: filtered.to_string(),
                frequency: rule.frequency().as_str(),
                infinite: filtered.is_infinite(),
                dropped: dropped.iter().map(|p| p.as_str()).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Range {
            granularity,
            input,
            timezone,
        } => {
            let (smallest, largest) = date_recur::granularity::range(granularity, &input, &timezone)
                .context("Failed to resolve range")?;
            let report = RangeReport {
                granularity,
                input,
                timezone,
                smallest,
                largest,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query {
            input_file,
            from,
            to,
            granularity,
            input,
            timezone,
            now,
        } => {
            let now = match now {
                Some(now) => parse_instant("--now", &now)?,
                None => Utc::now(),
            };
            let json = read_input(input_file.as_deref())?;
            let records: Vec<ValueRecord> =
                serde_json::from_str(&json).context("Failed to parse value records")?;

            let mut cache = OccurrenceCache::new(MemoryStore::new(), engine.cache_config()?);
            for (entity_id, values) in group_records(records)? {
                let report = cache.sync_entity_deltas(entity_id, &values, now)?;
                if !report.failed_deltas.is_empty() {
                    tracing::warn!(entity_id, deltas = ?report.failed_deltas, "values left uncached");
                }
            }

            let ids = match (from, to, granularity, input) {
                (Some(from), Some(to), _, _) => cache.find_entities_overlapping(
                    parse_instant("--from", &from)?,
                    parse_instant("--to", &to)?,
                )?,
                (_, _, Some(granularity), Some(input)) => cache
                    .find_entities_in(granularity, &input, &timezone)
                    .context("Failed to resolve range")?,
                _ => anyhow::bail!("Give either --from and --to, or --granularity and --input"),
            };
            println!("{}", serde_json::to_string(&ids)?);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ValidateReport {
    rule: String,
    filtered: String,
    frequency: &'static str,
    infinite: bool,
    dropped: Vec<&'static str>,
}

#[derive(Serialize)]
struct RangeReport {
    granularity: Granularity,
    input: String,
    timezone: String,
    smallest: DateTime<Utc>,
    largest: DateTime<Utc>,
}

/// One stored field item of an entity.
#[derive(Debug, Deserialize)]
struct ValueRecord {
    entity_id: EntityId,
    #[serde(default)]
    delta: u32,
    columns: FieldColumns,
}

/// Load records into `(delta, value)` pairs per entity, ordered by delta. Empty items
/// are skipped; a repeated delta keeps the last record.
fn group_records(
    records: Vec<ValueRecord>,
) -> Result<BTreeMap<EntityId, Vec<(u32, RecurringDateValue)>>> {
    let mut by_entity: BTreeMap<EntityId, BTreeMap<u32, RecurringDateValue>> = BTreeMap::new();
    for record in records {
        let value = RecurringDateValue::from_columns(&record.columns).with_context(|| {
            format!("Invalid value for entity {} delta {}", record.entity_id, record.delta)
        })?;
        if let Some(value) = value {
            by_entity
                .entry(record.entity_id)
                .or_default()
                .insert(record.delta, value);
        }
    }
    Ok(by_entity
        .into_iter()
        .map(|(id, values)| (id, values.into_iter().collect()))
        .collect())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_instant(flag: &str, s: &str) -> Result<DateTime<Utc>> {
    parse_storage_datetime(s).with_context(|| format!("Invalid {flag}"))
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&str>, content: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write file: {}", path))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
