//! mlrelease - model release policy CLI
//!
//! Operator commands against a file-backed alias registry.
//!
//! ## Commands
//!
//! - `register`: Register a model version, optionally as the candidate
//! - `report`: Attach an evaluation report to a version
//! - `policy-check`: Evaluate the promotion policy without mutating anything
//! - `promote`: Evaluate the policy and move `prod` onto the version
//! - `rollback`: Restore `prod` to its previous version
//! - `status`: Show aliases and registered versions
//! - `route`: Show where a request would be routed

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use futures::FutureExt;
use mlrelease_core::settings::DEFAULT_MODEL_NAME;
use mlrelease_core::{
    AliasRegistry, BucketSeed, CanaryPct, EvaluationReport, FnBackend, GateEvaluator,
    InferenceError, InferenceRequest, MetricRule, MetricRuleSet, ModelVersion, Prediction,
    PromotionConfig, PromotionDecisionEngine, Registrar, RequestRouter, RollbackManager,
    ServingMode, ServingSettings, VersionId,
};
use mlrelease_state::{tags, FsAliasRegistry};
use serde_json::{json, Value};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mlrelease")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release policy and alias routing for ML models", long_about = None)]
struct Cli {
    /// Registry state file
    #[arg(
        long,
        global = true,
        env = "MLRELEASE_STATE",
        default_value = ".mlrelease/registry.json"
    )]
    state: PathBuf,

    /// Registered model name
    #[arg(long, global = true, env = "MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    model: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a model version
    Register {
        /// Version identifier
        version: String,

        /// Training run that produced the artifact
        #[arg(long)]
        run_id: Option<String>,

        /// Tag as key=value (repeatable)
        #[arg(long = "tag", value_parser = parse_key_val::<String>)]
        tags: Vec<(String, String)>,

        /// Point the candidate alias at this version
        #[arg(long)]
        candidate: bool,
    },

    /// Attach an evaluation report to a version
    Report {
        /// Version identifier
        version: String,

        /// Metric as name=value (repeatable)
        #[arg(long = "metric", value_parser = parse_key_val::<f64>)]
        metrics: Vec<(String, f64)>,

        /// The evaluator's own gate verdict
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        gate_passed: bool,
    },

    /// Evaluate the promotion policy (dry run); exits non-zero when not allowed
    PolicyCheck(PolicyArgs),

    /// Promote a version to prod; exits non-zero when not allowed
    Promote(PolicyArgs),

    /// Restore prod to its previous version
    Rollback,

    /// Show aliases and registered versions
    Status,

    /// Resolve where a request would be routed, without running inference
    Route {
        /// Serving mode: prod, candidate, canary or shadow
        #[arg(long, default_value = "prod")]
        mode: String,

        /// JSON request payload file
        #[arg(long)]
        payload: PathBuf,

        /// Client request id
        #[arg(long)]
        request_id: Option<String>,

        /// Canary percentage in [0, 100]
        #[arg(long, env = "CANARY_PCT")]
        canary_pct: Option<CanaryPct>,

        /// Canary bucket seed: payload or request_id
        #[arg(long, env = "CANARY_BUCKET_SEED")]
        bucket_seed: Option<BucketSeed>,
    },
}

#[derive(Args, Debug, Default)]
struct PolicyArgs {
    /// Version to evaluate (default: the current candidate)
    #[arg(long)]
    version: Option<String>,

    /// Require metric >= value, e.g. eval_roc_auc=0.95 (repeatable)
    #[arg(long = "min-metric", value_parser = parse_key_val::<f64>)]
    min_metric: Vec<(String, f64)>,

    /// Require metric <= value (repeatable)
    #[arg(long = "max-metric", value_parser = parse_key_val::<f64>)]
    max_metric: Vec<(String, f64)>,

    /// Compare-and-set attempts before reporting a conflict
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
}

impl PolicyArgs {
    /// Explicit thresholds, or the standard policy when none are given.
    fn rule_set(&self) -> MetricRuleSet {
        if self.min_metric.is_empty() && self.max_metric.is_empty() {
            return MetricRuleSet::standard();
        }
        let mut rules = MetricRuleSet::empty();
        for (name, min) in &self.min_metric {
            rules = rules.with_rule(MetricRule::at_least(name.as_str(), *min));
        }
        for (name, max) in &self.max_metric {
            rules = rules.with_rule(MetricRule::at_most(name.as_str(), *max));
        }
        rules
    }

    fn config(&self) -> PromotionConfig {
        PromotionConfig::default()
            .with_max_attempts(self.max_attempts)
            .with_gate(GateEvaluator::new(Arc::new(self.rule_set())))
    }
}

/// Parse a single `key=value` pair.
fn parse_key_val<T>(s: &str) -> std::result::Result<(String, T), String>
where
    T: FromStr,
    T::Err: Display,
{
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in `{s}`"));
    }
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for `{key}`: {e}"))?;
    Ok((key.to_string(), value))
}

struct Ctx {
    model: String,
    registry: Arc<FsAliasRegistry>,
}

impl Ctx {
    fn open(state: &Path, model: String) -> Result<Self> {
        let registry = FsAliasRegistry::open(state)
            .with_context(|| format!("failed to open registry state at {}", state.display()))?;
        Ok(Self {
            model,
            registry: Arc::new(registry),
        })
    }

    fn registrar(&self) -> Registrar {
        Registrar::new(&self.model, self.registry.clone(), self.registry.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mlrelease_core::telemetry::init_tracing(cli.json, level);

    let ctx = Ctx::open(&cli.state, cli.model)?;

    match cli.command {
        Commands::Register {
            version,
            run_id,
            tags,
            candidate,
        } => cmd_register(&ctx, &version, run_id, tags, candidate).await,
        Commands::Report {
            version,
            metrics,
            gate_passed,
        } => cmd_report(&ctx, &version, metrics, gate_passed).await,
        Commands::PolicyCheck(args) => cmd_decide(&ctx, &args, true).await,
        Commands::Promote(args) => cmd_decide(&ctx, &args, false).await,
        Commands::Rollback => cmd_rollback(&ctx).await,
        Commands::Status => cmd_status(&ctx).await,
        Commands::Route {
            mode,
            payload,
            request_id,
            canary_pct,
            bucket_seed,
        } => {
            cmd_route(
                &ctx,
                &mode,
                &payload,
                request_id,
                canary_pct,
                bucket_seed,
            )
            .await
        }
    }
}

async fn cmd_register(
    ctx: &Ctx,
    version: &str,
    run_id: Option<String>,
    tags: Vec<(String, String)>,
    candidate: bool,
) -> Result<()> {
    let mut mv = ModelVersion::new(&ctx.model, version);
    if let Some(run) = run_id {
        mv = mv.with_source_run(run);
    }
    for (key, value) in tags {
        mv = mv.with_tag(key, value);
    }

    ctx.registrar()
        .register(mv, candidate)
        .await
        .with_context(|| format!("failed to register {}@{}", ctx.model, version))?;

    if candidate {
        println!("Registered {}@{} (candidate)", ctx.model, version);
    } else {
        println!("Registered {}@{}", ctx.model, version);
    }
    Ok(())
}

async fn cmd_report(
    ctx: &Ctx,
    version: &str,
    metrics: Vec<(String, f64)>,
    gate_passed: bool,
) -> Result<()> {
    let mut report = EvaluationReport::new(gate_passed);
    for (name, value) in metrics {
        report = report.with_metric(name, value);
    }
    let count = report.metrics.len();

    ctx.registrar()
        .record_report(&VersionId::from(version), report)
        .await
        .with_context(|| format!("failed to record report for {}@{}", ctx.model, version))?;

    println!(
        "Recorded {} metric(s) for {}@{} (gate {})",
        count,
        ctx.model,
        version,
        if gate_passed { "passed" } else { "failed" }
    );
    Ok(())
}

async fn cmd_decide(ctx: &Ctx, args: &PolicyArgs, dry_run: bool) -> Result<()> {
    let engine =
        PromotionDecisionEngine::new(&ctx.model, ctx.registry.clone(), ctx.registry.clone())
            .with_config(args.config());

    let report = match &args.version {
        Some(v) => engine.decide(&VersionId::from(v.as_str()), dry_run).await,
        None => engine.decide_candidate(dry_run).await,
    };
    println!("{}", report.to_json_pretty()?);

    if !report.allowed {
        anyhow::bail!(
            "promotion not allowed: {}",
            report.errors.join("; ")
        );
    }
    if !dry_run {
        info!(model = %ctx.model, "promotion applied");
    }
    Ok(())
}

async fn cmd_rollback(ctx: &Ctx) -> Result<()> {
    let outcome = RollbackManager::new(&ctx.model, ctx.registry.clone())
        .rollback()
        .await
        .context("rollback failed")?;
    println!("Rolled back {}: {} -> {}", ctx.model, outcome.from, outcome.to);
    Ok(())
}

async fn cmd_status(ctx: &Ctx) -> Result<()> {
    let snapshot = ctx.registry.snapshot(&ctx.model).await?;
    let versions = ctx.registry.list_versions(&ctx.model).await?;

    let rows: Vec<Value> = versions
        .iter()
        .map(|v| {
            json!({
                "version": v.version,
                "release_status": v.tag(tags::RELEASE_STATUS),
                "gate": v.tag(tags::GATE),
                "previous_prod_version": v.tag(tags::PREVIOUS_PROD_VERSION),
                "source_run_id": v.source_run_id,
                "created_at": v.created_at,
            })
        })
        .collect();

    let status = json!({
        "model_name": ctx.model,
        "aliases": snapshot,
        "versions": rows,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_route(
    ctx: &Ctx,
    mode: &str,
    payload: &Path,
    request_id: Option<String>,
    canary_pct: Option<CanaryPct>,
    bucket_seed: Option<BucketSeed>,
) -> Result<()> {
    let mode = ServingMode::from_str(mode)?;

    let raw = std::fs::read_to_string(payload)
        .with_context(|| format!("failed to read payload {}", payload.display()))?;
    let body: Value = serde_json::from_str(&raw).context("payload is not valid JSON")?;

    let mut settings = ServingSettings::from_env()
        .context("invalid serving settings")?
        .with_model_name(ctx.model.as_str());
    if let Some(pct) = canary_pct {
        settings = settings.with_canary_pct(pct);
    }
    if let Some(seed) = bucket_seed {
        settings = settings.with_bucket_seed(seed);
    }

    let router = RequestRouter::new(settings, ctx.registry.clone(), Arc::new(resolve_only()));

    let mut request = InferenceRequest::new(body);
    if let Some(id) = request_id {
        request = request.with_request_id(id);
    }
    let decision = router
        .route(mode, &request)
        .await
        .map_err(|e| anyhow!("route failed (status {}): {}", e.status_code(), e))?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Backend for a router that only resolves routes. No model runtime is
/// attached to the operator CLI.
fn resolve_only() -> FnBackend {
    FnBackend::new(|version, _request| {
        async move {
            Err::<Prediction, _>(InferenceError::Load {
                version: version.to_string(),
                reason: "no model runtime attached to the operator CLI".to_string(),
            })
        }
        .boxed()
    })
}
