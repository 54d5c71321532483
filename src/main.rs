use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod breakdown;
mod cache;
mod config;
mod export;
mod filter;
mod models;
mod normalize;
mod pipeline;
mod reconcile;
mod report;
mod select;
mod sources;
mod table;

use breakdown::{BreakdownRow, BreakdownSpec, ChartShape, CountMode};
use cache::SourceCache;
use config::DashboardConfig;
use filter::{DatePeriod, FilterSelection};
use models::{FinalizedData, CREATED_AT, LAST_UPDATED, SCHEDULED_AT};
use sources::LiveSources;
use table::Table;

#[derive(Parser)]
#[command(name = "learner-dashboard")]
#[command(about = "Learner analytics over Discovery, capture and registry data", long_about = None)]
struct Cli {
    /// Dashboard configuration file
    #[arg(long, global = true, default_value = "dashboard.toml")]
    config: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source and write the five finalized tables as CSV
    Finalize {
        #[arg(long, default_value = "output")]
        out_dir: PathBuf,
    },
    /// Grouped counts over one finalized table
    Breakdown {
        #[arg(long, value_enum, default_value_t = TableChoice::Reconciled)]
        table: TableChoice,
        /// Dimension columns, outermost first
        #[arg(long, required = true, num_args = 1..)]
        by: Vec<String>,
        /// Count distinct tuples of these columns instead of rows
        #[arg(long, num_args = 1..)]
        distinct: Vec<String>,
        #[arg(long, value_enum, default_value_t = ChartShape::Bar)]
        shape: ChartShape,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Learners per test among attempts holding one rank of a bundle
    TopTests {
        #[arg(long)]
        bundle: String,
        #[arg(long, default_value_t = 1)]
        rank: u32,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Final-result distribution of a bundle's best attempts
    FinalResults {
        #[arg(long)]
        bundle: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Distinct values of a column, as offered by the filter pickers
    Options {
        #[arg(long, value_enum, default_value_t = TableChoice::Reconciled)]
        table: TableChoice,
        #[arg(long)]
        column: String,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TableChoice {
    Reconciled,
    Activity,
    Discovery,
    Registry,
    Capture,
}

impl TableChoice {
    fn pick(self, data: &FinalizedData) -> &Table {
        match self {
            TableChoice::Reconciled => &data.reconciled,
            TableChoice::Activity => &data.activity_capture,
            TableChoice::Discovery => &data.discovery,
            TableChoice::Registry => &data.registry,
            TableChoice::Capture => &data.capture_schedule,
        }
    }

    fn date_column(self) -> Option<&'static str> {
        match self {
            TableChoice::Reconciled | TableChoice::Discovery => Some(LAST_UPDATED),
            TableChoice::Activity => Some(CREATED_AT),
            TableChoice::Capture => Some(SCHEDULED_AT),
            TableChoice::Registry => None,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Shortcut date range, clamped to the data
    #[arg(long, value_enum, conflicts_with_all = ["from", "to"])]
    period: Option<DatePeriod>,
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    platform: Option<String>,
    /// Internal or External
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    unit: Vec<String>,
    #[arg(long)]
    subunit: Vec<String>,
    #[arg(long)]
    layer: Vec<String>,
    #[arg(long)]
    layer_group: Vec<String>,
    #[arg(long)]
    title: Vec<String>,
    #[arg(long)]
    company: Vec<String>,
    #[arg(long)]
    institution: Vec<String>,
}

impl FilterArgs {
    fn selection(&self, table: &Table, date_column: Option<&str>, today: NaiveDate) -> FilterSelection {
        let mut selection = FilterSelection {
            platform: self.platform.clone(),
            status: self.status.clone(),
            units: self.unit.clone(),
            subunits: self.subunit.clone(),
            layers: self.layer.clone(),
            layer_groups: self.layer_group.clone(),
            titles: self.title.clone(),
            companies: self.company.clone(),
            institutions: self.institution.clone(),
            ..FilterSelection::default()
        };
        if let Some(column) = date_column {
            let (from, to) = match (self.period, table.date_bounds(column)) {
                (Some(period), Some((min, max))) => {
                    let (from, to) = period.resolve(today, min, max);
                    (Some(from), Some(to))
                }
                _ => (self.from, self.to),
            };
            selection.date_column = Some(column.to_string());
            selection.from = from;
            selection.to = to;
        }
        selection
    }

    fn apply(&self, table: &Table, date_column: Option<&str>, today: NaiveDate) -> (Table, FilterSelection) {
        let selection = self.selection(table, date_column, today);
        (selection.apply(table), selection)
    }

    /// Narrows registrations by date and platform only.
    fn apply_to_registrations(&self, registrations: &Table, today: NaiveDate) -> Table {
        self.selection(registrations, Some(CREATED_AT), today)
            .for_registrations()
            .apply(registrations)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_rows(rows: &[BreakdownRow], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No rows match these filters.");
        return Ok(());
    }
    for row in rows {
        println!(
            "- {}: {} ({:.2}%)",
            row.keys.join(" / "),
            row.count,
            row.percentage
        );
    }
    Ok(())
}

fn bundle_rule<'a>(config: &'a DashboardConfig, title: &str) -> anyhow::Result<&'a config::BundleRule> {
    config
        .bundle(title)
        .with_context(|| format!("bundle '{title}' is not configured"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = DashboardConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let sources = LiveSources::from_config(&config);
    let cache = SourceCache::new(config.cache_ttl());
    let data = pipeline::finalize(&sources, &cache, &config).await;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Finalize { out_dir } => {
            let written = export::write_finalized(&data, &out_dir)?;
            for (path, (name, table)) in written.iter().zip(data.tables()) {
                println!("{name}: {} rows -> {}", table.len(), path.display());
            }
        }
        Commands::Breakdown {
            table,
            by,
            distinct,
            shape,
            out,
            filters,
        } => {
            let source = table.pick(&data);
            let missing: Vec<&String> = by.iter().filter(|c| !source.has_column(c)).collect();
            if !source.is_empty() && !missing.is_empty() {
                bail!("unknown column(s) {missing:?} for {table:?}");
            }
            let (filtered, _) = filters.apply(source, table.date_column(), today);
            let count = if distinct.is_empty() {
                CountMode::Rows
            } else {
                CountMode::Distinct(distinct)
            };
            let spec = BreakdownSpec {
                dimensions: by,
                count,
                shape,
            };
            let rows = breakdown::breakdown(&filtered, &spec);
            print_rows(&rows, cli.json)?;
            if let Some(out) = out {
                export::write_csv(&breakdown::to_table(&rows, &spec.dimensions, "count"), &out)?;
                println!("Breakdown written to {}.", out.display());
            }
        }
        Commands::TopTests {
            bundle,
            rank,
            out,
            filters,
        } => {
            let rule = bundle_rule(&config, &bundle)?;
            if let Some(cap) = rule.rank_cap {
                if rank > cap {
                    bail!("bundle '{}' only counts ranks 1..={cap}", rule.title);
                }
            }
            let (filtered, _) = filters.apply(&data.reconciled, Some(LAST_UPDATED), today);
            let ranked = select::rank_within(
                &select::bundle_attempts(&filtered, rule),
                &select::RANK_GROUP_KEYS,
            );
            let rows = select::tests_at_rank(&ranked, rank);
            print_rows(&rows, cli.json)?;
            if let Some(out) = out {
                let dimensions = [models::TEST_NAME.to_string()];
                export::write_csv(&breakdown::to_table(&rows, &dimensions, "users"), &out)?;
                println!("Top tests written to {}.", out.display());
            }
        }
        Commands::FinalResults { bundle, filters } => {
            let rule = bundle_rule(&config, &bundle)?;
            let (filtered, _) = filters.apply(&data.reconciled, Some(LAST_UPDATED), today);
            let rows = breakdown::final_results(&select::bundle_attempts(&filtered, rule));
            print_rows(&rows, cli.json)?;
        }
        Commands::Options { table, column } => {
            let values = table.pick(&data).distinct(&column);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for value in values {
                    println!("{value}");
                }
            }
        }
        Commands::Report { out, filters } => {
            let (reconciled, selection) =
                filters.apply(&data.reconciled, Some(LAST_UPDATED), today);
            let activity_capture = filters.apply_to_registrations(&data.activity_capture, today);
            let narrowed = FinalizedData {
                reconciled,
                activity_capture,
                ..data
            };
            let report = report::build_report(&selection.describe(), &narrowed, &config.bundles);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn registrations() -> Table {
        let mut table = Table::new(&["email", "created_at", "platform", "learner_status"]);
        table.push(
            Record::new()
                .with("email", "a@x.com")
                .with("created_at", date(2024, 2, 1))
                .with("platform", "Discovery")
                .with("learner_status", "Active"),
        );
        table
    }

    #[test]
    fn learner_only_flags_leave_registrations_alone() {
        let today = date(2024, 8, 1);
        let by_unit = FilterArgs {
            unit: vec!["Media".into()],
            ..FilterArgs::default()
        };
        let by_status = FilterArgs {
            status: Some("Internal".into()),
            layer_group: vec!["Layer 2".into()],
            ..FilterArgs::default()
        };
        assert_eq!(by_unit.apply_to_registrations(&registrations(), today).len(), 1);
        assert_eq!(by_status.apply_to_registrations(&registrations(), today).len(), 1);
    }

    #[test]
    fn registrations_still_honour_date_and_platform() {
        let today = date(2024, 8, 1);
        let outside = FilterArgs {
            from: Some(date(2024, 3, 1)),
            ..FilterArgs::default()
        };
        let elsewhere = FilterArgs {
            platform: Some("Capture".into()),
            ..FilterArgs::default()
        };
        let this_year = FilterArgs {
            period: Some(DatePeriod::ThisYear),
            ..FilterArgs::default()
        };
        assert!(outside.apply_to_registrations(&registrations(), today).is_empty());
        assert!(elsewhere.apply_to_registrations(&registrations(), today).is_empty());
        assert_eq!(this_year.apply_to_registrations(&registrations(), today).len(), 1);
    }
}
