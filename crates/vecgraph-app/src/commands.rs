//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use vecgraph_api::{start_server, AppState};
use vecgraph_backends::{BackendAdapter, BackendRegistry};
use vecgraph_core::config::{ConfigError, VecgraphConfig};
use vecgraph_core::error::VecgraphError;
use vecgraph_eval::results::{load_result_files, save_report};
use vecgraph_eval::{
    Benchmark, BenchmarkInputs, BenchmarkRun, BenchmarkSettings, CancelToken, RetryPolicy,
    RunSettings,
};
use vecgraph_storage::{Database, ResultFilters, ResultRepository};
use vecgraph_store::{
    embed_queries, filter_judged, load_qrels, load_queries, DynEmbeddingService, EmbeddingSet,
    HashEmbedding,
};
use vecgraph_store::embedding::DEFAULT_DIMENSIONS;

use crate::cli::{expand_home, BenchArgs, ClearArgs, IndexArgs, QueryArgs, ResultsArgs, ServeArgs};
use crate::report;

type CmdResult = Result<(), VecgraphError>;

fn open_database(config: &VecgraphConfig) -> Result<Arc<Database>, VecgraphError> {
    let path = expand_home(&config.general.database_path);
    Ok(Arc::new(Database::new(&path)?))
}

/// Fail fast on unknown names and missing credentials.
fn validate_backends(config: &VecgraphConfig, names: &[String]) -> CmdResult {
    for name in names {
        config.validate_backend(name)?;
    }
    Ok(())
}

async fn load_set(path: &Path) -> Result<EmbeddingSet, VecgraphError> {
    let path = path.to_path_buf();
    let set = tokio::task::spawn_blocking(move || EmbeddingSet::load(&path))
        .await
        .map_err(|e| VecgraphError::Store(format!("Loader task failed: {}", e)))??;
    Ok(set)
}

// =============================================================================
// serve
// =============================================================================

pub async fn serve(mut config: VecgraphConfig, args: ServeArgs) -> CmdResult {
    config.general.port = args.resolve_port(config.general.port);
    let database = open_database(&config)?;
    let registry = BackendRegistry::from_config(&config);
    let embedder: Arc<dyn DynEmbeddingService> = Arc::new(HashEmbedding::default());

    info!(
        backends = ?registry.configured(),
        "Backends with complete configuration"
    );

    let state = AppState::new(config, registry, embedder, database);
    start_server(state).await
}

// =============================================================================
// index / query / clear
// =============================================================================

pub async fn index(config: VecgraphConfig, args: IndexArgs) -> CmdResult {
    validate_backends(&config, std::slice::from_ref(&args.backend))?;
    let set = load_set(&args.source).await?;
    let registry = BackendRegistry::from_config(&config);
    let adapter = registry.create(&args.backend)?;

    let settings = RunSettings {
        batch_size: args.batch_size.unwrap_or(config.benchmark.batch_size).max(1),
        retry: RetryPolicy::from(&config.benchmark),
    };
    let mut run = BenchmarkRun::new(adapter, settings, CancelToken::new());
    if args.fresh {
        run.clear().await?;
    }
    let outcome = run.index(&set).await;
    run.close().await;
    let summary = outcome?;

    println!(
        "{}: {} records (dim {}) in {:.2}s, inserted {}, updated {}, failed {}",
        run.backend(),
        summary.records,
        summary.dimension,
        summary.duration_secs,
        summary.upserts.inserted,
        summary.upserts.updated,
        summary.upserts.failed_count()
    );
    for failure in summary.upserts.failed.iter().take(10) {
        println!("  rejected {}: {}", failure.id, failure.reason);
    }
    Ok(())
}

pub async fn query(config: VecgraphConfig, args: QueryArgs) -> CmdResult {
    validate_backends(&config, std::slice::from_ref(&args.backend))?;
    let vector = match (args.vector, args.text) {
        (Some(vector), _) => vector,
        (None, Some(text)) => {
            let embedder = HashEmbedding::new(args.dim.unwrap_or(DEFAULT_DIMENSIONS));
            DynEmbeddingService::embed_boxed(&embedder, &text).await?
        }
        (None, None) => {
            return Err(VecgraphError::Config(ConfigError::Parse(
                "--text or --vector is required".to_string(),
            )))
        }
    };

    let registry = BackendRegistry::from_config(&config);
    let mut adapter = registry.create(&args.backend)?;
    let policy = RetryPolicy::from(&config.benchmark);

    policy.bounded(adapter.connect()).await?;
    let result = policy.bounded(adapter.query_top_k(&vector, args.k.max(1))).await;
    close(adapter.as_mut()).await;

    print!("{}", report::hits_table(&result?));
    Ok(())
}

pub async fn clear(config: VecgraphConfig, args: ClearArgs) -> CmdResult {
    validate_backends(&config, std::slice::from_ref(&args.backend))?;
    let registry = BackendRegistry::from_config(&config);
    let adapter = registry.create(&args.backend)?;

    let settings = RunSettings {
        batch_size: config.benchmark.batch_size.max(1),
        retry: RetryPolicy::from(&config.benchmark),
    };
    let mut run = BenchmarkRun::new(adapter, settings, CancelToken::new());
    let outcome = run.clear().await;
    run.close().await;
    outcome?;

    println!("{}: cleared", run.backend());
    Ok(())
}

async fn close(adapter: &mut dyn BackendAdapter) {
    if let Err(e) = adapter.close().await {
        warn!(backend = %adapter.name(), error = %e, "Failed to close backend");
    }
}

// =============================================================================
// bench
// =============================================================================

pub async fn bench(mut config: VecgraphConfig, args: BenchArgs) -> CmdResult {
    args.apply_to(&mut config);
    let names = args.resolve_backends(&config);
    if names.is_empty() {
        return Err(VecgraphError::Benchmark("no backends selected".to_string()));
    }
    validate_backends(&config, &names)?;

    let set = load_set(&args.corpus).await?;
    let judgments = load_qrels(&args.qrels)?;
    let specs = filter_judged(load_queries(&args.queries)?, &judgments);
    if specs.is_empty() {
        return Err(VecgraphError::Benchmark(
            "no query has relevance judgments".to_string(),
        ));
    }

    // Queries without their own vector are embedded at the corpus dimension.
    if specs.iter().any(|q| q.vector.is_none()) {
        warn!("Some queries have no vector; using the hashing embedder, retrieval scores will be meaningless");
    }
    let embedder = HashEmbedding::new(set.dimension());
    let queries = embed_queries(specs, &embedder, config.benchmark.top_k.max(1)).await?;

    let mut settings = BenchmarkSettings::from(&config.benchmark);
    settings.fresh = args.fresh;
    let benchmark = Benchmark::new(settings);

    let cancel = benchmark.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current call and reporting partial results");
            cancel.cancel();
        }
    });

    let inputs = BenchmarkInputs::new(set, queries, judgments);
    let registry = BackendRegistry::from_config(&config);
    info!(backends = ?names, "Starting benchmark");
    let report = benchmark.run_named(&registry, &names, &inputs).await;

    print!("{}", report::benchmark_table(&report));

    if !args.no_save {
        let dir = args.resolve_results_dir(&config);
        let paths = save_report(&report, &config.backends, &dir)?;
        for path in paths {
            println!("saved {}", path.display());
        }
    }

    if !args.no_history {
        let repo = ResultRepository::new(open_database(&config)?);
        let run_id = repo.save(&report)?;
        println!("stored run {}", run_id);
    }

    if report.failed_count() == report.outcomes.len() {
        return Err(VecgraphError::Benchmark("every backend failed".to_string()));
    }
    Ok(())
}

// =============================================================================
// results
// =============================================================================

pub fn results(config: VecgraphConfig, args: ResultsArgs) -> CmdResult {
    if args.files {
        let dir = expand_home(&config.general.results_dir);
        let mut files = load_result_files(&dir)?;
        files.retain(|(_, file)| {
            args.backend.as_deref().map_or(true, |b| file.db.name == b)
                && args.dataset.as_deref().map_or(true, |d| file.context.dataset == d)
        });
        // Newest first, like the database listing.
        files.reverse();
        files.truncate(args.limit as usize);

        if args.json {
            let values: Vec<_> = files.iter().map(|(_, file)| file).collect();
            println!("{}", serde_json::to_string_pretty(&values)?);
        } else {
            for (path, file) in &files {
                println!(
                    "{}  recall@{}={}  {}",
                    file.db.name,
                    file.workload.top_k,
                    file.retrieval("recall")
                        .map(|v| format!("{:.4}", v))
                        .unwrap_or_else(|| "-".to_string()),
                    path.display()
                );
            }
        }
        return Ok(());
    }

    let repo = ResultRepository::new(open_database(&config)?);
    let rows = repo.list(&ResultFilters {
        backend: args.backend.map(|b| b.to_ascii_lowercase()),
        dataset: args.dataset,
        limit: Some(args.limit),
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", report::results_table(&rows));
    }
    Ok(())
}
