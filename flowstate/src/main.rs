//! flowstate - Flow chain activity dashboard CLI
//!
//! Computes dashboard tabs from `<dataset>.jsonl` row files and prints their
//! latest-vs-previous summaries or raw tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use flowstate_core::cache::location_key;
use flowstate_core::{
    CachedSource, Config, Dashboard, JsonlSource, PeriodKey, PeriodSpec, RowSource, Tab, TabOutput,
    Table,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(name = "flowstate")]
#[command(about = "State of Flow - period-aware chain activity metrics")]
#[command(version)]
struct Args {
    /// Directory holding transactions.jsonl, accounts.jsonl and staking.jsonl
    #[arg(long)]
    data: Option<PathBuf>,

    /// Period key (all_time, last_year, last_3_months, last_month, last_week, last_24h)
    #[arg(long)]
    period: Option<String>,

    /// Tab to compute
    #[arg(long, value_enum, default_value_t = TabArg::All)]
    tab: TabArg,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Resolve the period against this instant (RFC 3339) instead of now
    #[arg(long)]
    now: Option<String>,

    /// Discard cached query results, including those saved by earlier runs
    #[arg(long)]
    refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TabArg {
    Transactions,
    Distribution,
    Kpis,
    Accounts,
    Fees,
    Staking,
    Regions,
    All,
}

impl TabArg {
    fn tabs(self) -> Vec<Tab> {
        match self {
            TabArg::Transactions => vec![Tab::Transactions],
            TabArg::Distribution => vec![Tab::Distribution],
            TabArg::Kpis => vec![Tab::Kpis],
            TabArg::Accounts => vec![Tab::Accounts],
            TabArg::Fees => vec![Tab::Fees],
            TabArg::Staking => vec![Tab::Staking],
            TabArg::Regions => vec![Tab::Regions],
            TabArg::All => Tab::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Latest-vs-previous summary lines
    Text,
    /// Raw tables as JSON
    Json,
    /// Raw tables as markdown
    Md,
}

type SharedDashboard = Arc<Dashboard<Arc<dyn RowSource>>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = flowstate_core::logging::init(&config.logging).ok();

    let period_key = args
        .period
        .as_deref()
        .unwrap_or(&config.dashboard.default_period);
    let period: PeriodKey = period_key
        .parse()
        .with_context(|| format!("invalid --period '{}'", period_key))?;

    let now = match &args.now {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --now '{}', expected RFC 3339", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let data_dir = args.data.clone().unwrap_or_else(|| config.rows_dir());
    if !data_dir.is_dir() {
        anyhow::bail!("data directory {} does not exist", data_dir.display());
    }

    let rows = JsonlSource::new(&data_dir);
    let source: Arc<dyn RowSource> = match (config.cache.enabled, config.cache.persist) {
        (true, true) => {
            let cache_dir = Config::cache_dir().join(location_key(&data_dir));
            Arc::new(CachedSource::new(rows, config.cache.ttl()).persist_to(cache_dir))
        }
        (true, false) => Arc::new(CachedSource::new(rows, config.cache.ttl())),
        (false, _) => Arc::new(rows),
    };

    let dashboard: SharedDashboard = Arc::new(
        Dashboard::from_config(source, &config).context("invalid metrics configuration")?,
    );
    if args.refresh {
        dashboard.refresh();
    }

    let spec = dashboard
        .resolve(period, now)
        .context("failed to resolve period")?;

    tracing::info!(
        period = %spec.key,
        data_dir = %data_dir.display(),
        now = %now,
        "Computing dashboard"
    );

    let outputs = compute_tabs(&dashboard, &spec, &args.tab.tabs()).await?;

    match args.format {
        OutputFormat::Text => print_text(&spec, &outputs),
        OutputFormat::Json => print_json(&spec, &outputs)?,
        OutputFormat::Md => print_markdown(&spec, &outputs)?,
    }

    Ok(())
}

/// Compute every requested tab concurrently, returned in request order.
async fn compute_tabs(
    dashboard: &SharedDashboard,
    spec: &PeriodSpec,
    tabs: &[Tab],
) -> Result<Vec<TabOutput>> {
    let mut set = JoinSet::new();
    for (index, tab) in tabs.iter().copied().enumerate() {
        let dashboard = Arc::clone(dashboard);
        let spec = *spec;
        set.spawn_blocking(move || (index, dashboard.tab(tab, &spec)));
    }

    let mut results = Vec::with_capacity(tabs.len());
    while let Some(joined) = set.join_next().await {
        let (index, output) = joined.context("tab worker panicked")?;
        let output = output.with_context(|| format!("failed to compute tab '{}'", tabs[index]))?;
        results.push((index, output));
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, output)| output).collect())
}

fn heading(spec: &PeriodSpec, output: &TabOutput) -> String {
    format!("{} - {}", output.tab().title(), spec.key.label())
}

fn print_text(spec: &PeriodSpec, outputs: &[TabOutput]) {
    for (i, output) in outputs.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("== {} ==", heading(spec, output));
        for line in output.summary().lines() {
            println!("  {}", line);
        }
    }
}

fn export_tables(output: &TabOutput) -> Result<(Table, Option<Table>)> {
    let context = || format!("failed to export tab '{}'", output.tab());
    let table = output.table().with_context(context)?;
    let entities = output.entity_table().with_context(context)?;
    Ok((table, entities))
}

fn print_json(spec: &PeriodSpec, outputs: &[TabOutput]) -> Result<()> {
    let mut tabs = Vec::with_capacity(outputs.len());
    for output in outputs {
        let (table, entities) = export_tables(output)?;
        let mut tab = serde_json::json!({
            "tab": output.tab(),
            "title": output.tab().title(),
            "columns": table.columns,
            "rows": table.rows,
        });
        if let Some(entities) = entities {
            tab["entities"] = serde_json::json!({
                "columns": entities.columns,
                "rows": entities.rows,
            });
        }
        tabs.push(tab);
    }

    let document = serde_json::json!({
        "period": spec,
        "tabs": tabs,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn print_markdown(spec: &PeriodSpec, outputs: &[TabOutput]) -> Result<()> {
    println!("# State of Flow - {}", spec.key.label());
    for output in outputs {
        let (table, entities) = export_tables(output)?;
        println!();
        println!("## {}", output.tab().title());
        println!();
        if table.is_empty() {
            println!("_No data for the selected period._");
        } else {
            print!("{}", table.to_markdown());
        }
        if let Some(entities) = entities.filter(|t| !t.is_empty()) {
            println!();
            println!("### Assignments");
            println!();
            print!("{}", entities.to_markdown());
        }
    }
    Ok(())
}
