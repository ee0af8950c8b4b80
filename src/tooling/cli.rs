//! CLI Tooling
//!
//! Command-line interface over the cache: loads a snapshot of persistence
//! data, warms every cache from it, then answers queries, replays event logs
//! and checks the aggregate invariants.

use crate::cache::{ActivityRequest, FileStatsRequest};
use crate::config::{CanopyConfig, ConfigLoader};
use crate::events::CacheEvent;
use crate::logging::{init_logging, LoggingConfig};
use crate::service::{StatsService, WarmupReport};
use crate::source::MemorySource;
use crate::tooling::format::{
    format_activity_text, format_cache_stats_text, format_file_stats_text, format_tree_text,
    format_violations_text, TreeRow,
};
use crate::types::NodeId;
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Canopy CLI - hierarchical aggregation cache
#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Inspect and exercise the hierarchical aggregation cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Persistence snapshot to warm the caches from (JSON or TOML)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Layer the logging flags over the configured logging section
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut logging = base.clone();
        if self.verbose {
            logging.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
        logging
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show enablement, record counts and last update per cache
    Stats {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the category tree with its aggregates
    Tree {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the activity heatmap for a category or for all categories
    Activity {
        /// Category id; all categories when omitted
        #[arg(long)]
        category: Option<NodeId>,
        /// Include subcategories
        #[arg(long)]
        recursive: bool,
        /// Window index: 0 is the current window, 1 the one before, ...
        #[arg(long, default_value = "0")]
        period: u32,
        /// Window length in months (defaults to the configured length)
        #[arg(long)]
        months: Option<u32>,
        /// Explicit window start (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Explicit window end (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show attachment totals for a category
    Files {
        #[arg(long)]
        category: NodeId,
        /// Include subcategories
        #[arg(long)]
        recursive: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Apply a JSON array of cache events, then report stats and consistency
    Replay {
        /// Path to the event log
        #[arg(long)]
        events: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Check every recursive aggregate against its subtree
    Verify {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Event rejected during replay
#[derive(Debug, Clone, Serialize)]
pub struct RejectedEvent {
    pub index: usize,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: Vec<RejectedEvent>,
}

/// CLI context holding the warmed service
pub struct CliContext {
    service: StatsService,
    warmup: WarmupReport,
}

impl CliContext {
    /// Load config, start logging, and warm the caches from the snapshot
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => ConfigLoader::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ConfigLoader::load().context("Failed to load config")?,
        };
        config.validate()?;

        if let Err(e) = init_logging(Some(&cli.logging_config(&config.logging))) {
            eprintln!("Warning: logging disabled: {}", e);
        }

        Self::with_config(&config, cli.snapshot.as_deref())
    }

    /// Build a context without touching the global logger
    pub fn with_config(config: &CanopyConfig, snapshot: Option<&Path>) -> Result<Self> {
        let source = match snapshot {
            Some(path) => MemorySource::load_from_file(path)
                .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
            None => MemorySource::new(),
        }
        .with_max_depth(config.cache.max_depth);
        let service = StatsService::new(&config.cache, Arc::new(source));
        let warmup = service.warm_up();
        Ok(Self { service, warmup })
    }

    pub fn service(&self) -> &StatsService {
        &self.service
    }

    pub fn warmup(&self) -> &WarmupReport {
        &self.warmup
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String> {
        match command {
            Commands::Stats { format } => self.handle_stats(format),
            Commands::Tree { format } => self.handle_tree(format),
            Commands::Activity {
                category,
                recursive,
                period,
                months,
                start,
                end,
                format,
            } => {
                let mut request = match category {
                    Some(id) => ActivityRequest::category(*id),
                    None => ActivityRequest::all_categories(),
                }
                .recursive(*recursive)
                .period(*period);
                request.period_months = *months;
                request.start_date = *start;
                request.end_date = *end;
                self.handle_activity(&request, format)
            }
            Commands::Files {
                category,
                recursive,
                format,
            } => self.handle_files(&FileStatsRequest::new(*category, *recursive), format),
            Commands::Replay { events, format } => self.handle_replay(events, format),
            Commands::Verify { format } => self.handle_verify(format),
        }
    }

    fn handle_stats(&self, format: &str) -> Result<String> {
        let stats = self.service.cache_stats();
        match format {
            "json" => Ok(serde_json::to_string_pretty(&json!({
                "cache": stats,
                "warmup": self.warmup,
            }))?),
            "text" => Ok(format_cache_stats_text(&stats, Some(&self.warmup))),
            other => Err(invalid_format(other)),
        }
    }

    fn tree_rows(&self) -> Vec<TreeRow> {
        let coordinator = self.service.coordinator();
        let hierarchy = coordinator.hierarchy();
        let mut rows = Vec::with_capacity(hierarchy.len());
        let mut stack: Vec<NodeId> = hierarchy.roots().into_iter().rev().collect();
        while let Some(node_id) = stack.pop() {
            let Some(node) = hierarchy.get(node_id) else {
                continue;
            };
            let files = coordinator.file_stats().get_category_file_stats(node_id).ok();
            rows.push(TreeRow {
                depth: node.depth,
                id: node.id,
                name: node.name,
                direct_posts: node.direct_post_count,
                recursive_posts: node.recursive_post_count,
                recursive_files: files.as_ref().map(|f| f.recursive.file_count),
                recursive_bytes: files.as_ref().map(|f| f.recursive.total_size),
            });
            stack.extend(hierarchy.children(node_id).into_iter().rev());
        }
        rows
    }

    fn handle_tree(&self, format: &str) -> Result<String> {
        match format {
            "json" => {
                let nodes = self.service.coordinator().hierarchy().snapshot_all();
                Ok(serde_json::to_string_pretty(&nodes)?)
            }
            "text" => Ok(format_tree_text(&self.tree_rows())),
            other => Err(invalid_format(other)),
        }
    }

    fn handle_activity(&self, request: &ActivityRequest, format: &str) -> Result<String> {
        let period = self.service.activity_period(request)?;
        match format {
            "json" => Ok(serde_json::to_string_pretty(&period)?),
            "text" => Ok(format_activity_text(&period)),
            other => Err(invalid_format(other)),
        }
    }

    fn handle_files(&self, request: &FileStatsRequest, format: &str) -> Result<String> {
        let view = self.service.file_stats(request)?;
        match format {
            "json" => Ok(serde_json::to_string_pretty(&view)?),
            "text" => Ok(format_file_stats_text(&view)),
            other => Err(invalid_format(other)),
        }
    }

    /// Apply every event in order; rejected events are reported, not fatal
    pub fn replay(&self, events: &[CacheEvent]) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        for (index, event) in events.iter().enumerate() {
            match self.service.process_event(event) {
                Ok(()) => summary.applied += 1,
                Err(e) => summary.rejected.push(RejectedEvent {
                    index,
                    kind: event.kind().to_string(),
                    error: e.to_string(),
                }),
            }
        }
        info!(
            applied = summary.applied,
            rejected = summary.rejected.len(),
            "Event replay finished"
        );
        summary
    }

    fn handle_replay(&self, path: &Path, format: &str) -> Result<String> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event log {}", path.display()))?;
        let events: Vec<CacheEvent> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid event log {}", path.display()))?;

        let summary = self.replay(&events);
        let stats = self.service.cache_stats();
        let violations = self.service.coordinator().verify();
        match format {
            "json" => Ok(serde_json::to_string_pretty(&json!({
                "replay": summary,
                "cache": stats,
                "violations": violations,
            }))?),
            "text" => {
                let mut out = format!(
                    "Replayed {} events: {} applied, {} rejected\n",
                    events.len(),
                    summary.applied,
                    summary.rejected.len()
                );
                for rejected in &summary.rejected {
                    out.push_str(&format!(
                        "  #{} {}: {}\n",
                        rejected.index, rejected.kind, rejected.error
                    ));
                }
                out.push('\n');
                out.push_str(&format_cache_stats_text(&stats, None));
                out.push('\n');
                out.push_str(&format_violations_text(&violations));
                Ok(out)
            }
            other => Err(invalid_format(other)),
        }
    }

    fn handle_verify(&self, format: &str) -> Result<String> {
        let violations = self.service.coordinator().verify();
        let output = match format {
            "json" => serde_json::to_string_pretty(&violations)?,
            "text" => format_violations_text(&violations),
            other => return Err(invalid_format(other)),
        };
        if violations.is_empty() {
            Ok(output)
        } else {
            bail!("{}", output)
        }
    }
}

fn invalid_format(format: &str) -> anyhow::Error {
    anyhow!("Invalid format: {} (must be 'text' or 'json')", format)
}
