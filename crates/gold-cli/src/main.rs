//! Operational CLI for the indexing and search core: load a tile snapshot
//! from disk, run it through the indexer, and either print the resulting
//! summary or run a search query against it. Not an HTTP server — routing,
//! auth, and rate limiting live in whatever deployment wraps this crate.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gold_core::config::{IndexerConfig, SearchConfig};
use gold_core::expectations::MapExpectations;
use gold_core::ignore::{IgnoreEngine, IgnoreRule, TileTraceKeyTable};
use gold_core::indexer::Indexer;
use gold_core::paramset::ParamSet;
use gold_core::search::{SearchEngine, SearchQuery, TriageFilter};
use gold_core::tile::Tile;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "gold", about = "Indexing and search core for image-regression correctness tracking")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON-serialized Tile snapshot.
    #[arg(long, global = true)]
    tile: PathBuf,

    /// Path to a JSON-serialized MapExpectations snapshot. Omit for an
    /// empty (all-untriaged) expectations store.
    #[arg(long, global = true)]
    expectations: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index the tile and print per-grouping triage counts.
    Summarize,
    /// Run a search query against the indexed tile.
    Search {
        /// Query string in `key=value&key=value` form.
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value = "untriaged")]
        filter: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List, create, or delete ignore rules against the loaded tile, and
    /// print the SQL predicate the current rule set synthesizes.
    Ignore {
        /// Path to a JSON-serialized list of ignore rules. Created on first
        /// write if it doesn't exist yet.
        #[arg(long)]
        rules: PathBuf,
        #[command(subcommand)]
        action: IgnoreAction,
    },
}

#[derive(Subcommand, Debug)]
enum IgnoreAction {
    /// Print every rule, ordered by expiry.
    List,
    /// Add a rule and restamp every trace it matches.
    Create {
        /// Query string in `key=value&key=value` form.
        #[arg(long)]
        query: String,
        #[arg(long)]
        note: String,
        #[arg(long)]
        created_by: String,
        #[arg(long, default_value_t = 30)]
        expires_in_days: i64,
    },
    /// Remove a rule and restamp the traces it used to match.
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    /// Print the SQL predicate the current rule set would synthesize.
    Predicate,
}

fn load_rules(path: &PathBuf) -> Result<Vec<IgnoreRule>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading ignore rules at {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| "parsing ignore rules")
}

fn save_rules(path: &PathBuf, rules: &[IgnoreRule]) -> Result<()> {
    let data = serde_json::to_string_pretty(rules)?;
    std::fs::write(path, data).with_context(|| format!("writing ignore rules to {}", path.display()))
}

fn load_tile(path: &PathBuf) -> Result<Tile> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading tile snapshot at {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| "parsing tile snapshot")
}

fn load_expectations(path: &Option<PathBuf>) -> Result<MapExpectations> {
    match path {
        None => Ok(MapExpectations::new()),
        Some(p) => {
            let data = std::fs::read_to_string(p)
                .with_context(|| format!("reading expectations snapshot at {}", p.display()))?;
            // MapExpectations doesn't derive Deserialize directly (its map
            // key is a tuple), so the snapshot format is a flat list of
            // (corpus, name, digest, label) rows.
            let rows: Vec<(String, String, String, char)> =
                serde_json::from_str(&data).with_context(|| "parsing expectations snapshot")?;
            let mut store = MapExpectations::new();
            for (corpus, name, digest, label) in rows {
                let label = gold_core::expectations::Label::from_char(label)
                    .with_context(|| format!("invalid label char: {label}"))?;
                store.set(
                    gold_core::expectations::Grouping::new(corpus, name),
                    gold_core::digest::Digest::new_unchecked(digest),
                    label,
                );
            }
            Ok(store)
        }
    }
}

fn parse_triage_filter(s: &str) -> Result<TriageFilter> {
    match s {
        "untriaged" => Ok(TriageFilter::Untriaged),
        "positive" => Ok(TriageFilter::Positive),
        "negative" => Ok(TriageFilter::Negative),
        "all" => Ok(TriageFilter::All),
        other => anyhow::bail!("unknown triage filter: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Commands::Ignore { rules, action } = &args.command {
        let mut tile = load_tile(&args.tile)?;
        let existing = load_rules(rules)?;
        let mut engine = IgnoreEngine::load(TileTraceKeyTable(&mut tile), existing);

        match action {
            IgnoreAction::List => {
                for rule in engine.list() {
                    println!("{} expires={} note={:?}", rule.id, rule.expires, rule.note);
                }
            }
            IgnoreAction::Create { query, note, created_by, expires_in_days } => {
                let rule = IgnoreRule {
                    id: Uuid::new_v4(),
                    created_by: created_by.clone(),
                    updated_by: created_by.clone(),
                    expires: chrono::Utc::now() + chrono::Duration::days(*expires_in_days),
                    note: note.clone(),
                    query: ParamSet::from_query_string(query),
                };
                let report = engine.create(rule)?;
                println!("examined={} flagged={}", report.examined, report.flagged);
                save_rules(rules, &engine.list().into_iter().cloned().collect::<Vec<_>>())?;
            }
            IgnoreAction::Delete { id } => {
                let report = engine.delete(*id)?;
                println!("examined={} flagged={}", report.examined, report.flagged);
                save_rules(rules, &engine.list().into_iter().cloned().collect::<Vec<_>>())?;
            }
            IgnoreAction::Predicate => {
                let predicate = engine.current_predicate();
                println!("{}", predicate.sql);
                println!("args: {:?}", predicate.args);
            }
        }
        return Ok(());
    }

    let tile = load_tile(&args.tile)?;
    let expectations = load_expectations(&args.expectations)?;

    let indexer = Indexer::new(IndexerConfig::from_env());
    indexer.on_tile_arrival(tile, &expectations).await;
    let index = indexer.current().await;
    info!(traces = index.tile.traces.len(), commits = index.tile.len(), "indexed tile");

    match args.command {
        Commands::Summarize => {
            for (grouping, status) in index.summary.iter() {
                println!(
                    "{}/{}: {} positive, {} negative, {} untriaged",
                    grouping.corpus, grouping.name, status.pos, status.neg, status.untriaged
                );
            }
        }
        Commands::Search { query, filter, offset, limit } => {
            let query_set = ParamSet::from_query_string(&query);
            let search_query = SearchQuery::new()
                .with_query(query_set)
                .with_triage_filter(parse_triage_filter(&filter)?)
                .with_page(offset, limit);

            let cfg = SearchConfig::from_env();
            let engine = SearchEngine::new(&cfg);
            let metric = gold_core::collaborators::HammingDiffMetric;
            let page = engine
                .search(&index, &search_query, &expectations, &metric, None, None)
                .await?;

            println!("{} of {} results", page.results.len(), page.total);
            for result in &page.results {
                println!(
                    "{} {} trace_count={} label={:?}",
                    result.test, result.digest, result.trace_count, result.label
                );
            }
        }
        Commands::Ignore { .. } => unreachable!("handled above before the tile is indexed"),
    }

    Ok(())
}
