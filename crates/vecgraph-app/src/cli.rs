//! CLI argument definitions for the vecgraph binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use vecgraph_core::config::VecgraphConfig;

/// vecgraph - benchmark vector and graph databases on retrieval quality and latency.
#[derive(Parser, Debug)]
#[command(name = "vecgraph", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API used by the UI.
    Serve(ServeArgs),
    /// Load an embedding file into one backend.
    Index(IndexArgs),
    /// Run a single nearest-neighbour query against one backend.
    Query(QueryArgs),
    /// Drop all records and the index of one backend.
    Clear(ClearArgs),
    /// Index, query and score a dataset on several backends.
    Bench(BenchArgs),
    /// List stored benchmark results.
    Results(ResultsArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Backend name (memory, qdrant, weaviate, redis, pgvector, neo4j).
    #[arg(short = 'b', long = "backend")]
    pub backend: String,

    /// Embedding file (.parquet or .jsonl).
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,

    /// Records per upsert call.
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,

    /// Clear the backend first.
    #[arg(long = "fresh")]
    pub fresh: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(short = 'b', long = "backend")]
    pub backend: String,

    /// Query text, embedded with the hashing embedder.
    #[arg(short = 't', long = "text", conflicts_with = "vector", required_unless_present = "vector")]
    pub text: Option<String>,

    /// Comma-separated query vector.
    #[arg(long = "vector", value_delimiter = ',', allow_negative_numbers = true)]
    pub vector: Option<Vec<f32>>,

    /// Neighbours to return.
    #[arg(short = 'k', long = "top-k", default_value_t = 5)]
    pub k: usize,

    /// Embedding dimension for --text; must match the indexed data.
    #[arg(long = "dim")]
    pub dim: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    #[arg(short = 'b', long = "backend")]
    pub backend: String,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Embedding file with the corpus (.parquet or .jsonl).
    #[arg(long = "corpus")]
    pub corpus: PathBuf,

    /// Queries as JSON Lines.
    #[arg(long = "queries")]
    pub queries: PathBuf,

    /// Relevance judgments (TSV qrels).
    #[arg(long = "qrels")]
    pub qrels: PathBuf,

    /// Backends to run, comma-separated. Defaults to `benchmark.backends`.
    #[arg(short = 'b', long = "backends", value_delimiter = ',')]
    pub backends: Vec<String>,

    /// Dataset label for reports.
    #[arg(long = "dataset")]
    pub dataset: Option<String>,

    /// Embedding model label for reports.
    #[arg(long = "model")]
    pub model: Option<String>,

    #[arg(short = 'k', long = "top-k")]
    pub top_k: Option<usize>,

    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,

    /// Run all backends at the same time.
    #[arg(long = "concurrent")]
    pub concurrent: bool,

    /// Clear each backend before indexing.
    #[arg(long = "fresh")]
    pub fresh: bool,

    /// Directory for JSON result files.
    #[arg(long = "results-dir")]
    pub results_dir: Option<PathBuf>,

    /// Do not write JSON result files.
    #[arg(long = "no-save")]
    pub no_save: bool,

    /// Do not record the run in the results database.
    #[arg(long = "no-history")]
    pub no_history: bool,
}

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Only this backend.
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Only this dataset.
    #[arg(long = "dataset")]
    pub dataset: Option<String>,

    #[arg(short = 'n', long = "limit", default_value_t = 20)]
    pub limit: u64,

    /// Read JSON result files from the results directory instead of the database.
    #[arg(long = "files")]
    pub files: bool,

    /// Print JSON instead of a table.
    #[arg(long = "json")]
    pub json: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VECGRAPH_CONFIG env var > ~/.vecgraph/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("VECGRAPH_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log filter.
    ///
    /// Priority: --log-level flag > config file value (which already carries
    /// VECGRAPH_LOG_LEVEL). RUST_LOG, when set, wins over both in `main`.
    pub fn resolve_log_level(&self, config: &VecgraphConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }
}

impl ServeArgs {
    /// Priority: --port flag > VECGRAPH_PORT (applied to config) > config file > 8000.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        8000
    }
}

impl BenchArgs {
    /// Backends from the flag, else from the config file.
    pub fn resolve_backends(&self, config: &VecgraphConfig) -> Vec<String> {
        let names = if self.backends.is_empty() {
            config.benchmark.backends.clone()
        } else {
            self.backends.clone()
        };
        let mut resolved: Vec<String> = Vec::new();
        for name in names {
            let name = name.trim().to_ascii_lowercase();
            if !name.is_empty() && !resolved.contains(&name) {
                resolved.push(name);
            }
        }
        resolved
    }

    /// Fold flag overrides into the benchmark section.
    pub fn apply_to(&self, config: &mut VecgraphConfig) {
        if let Some(ref dataset) = self.dataset {
            config.benchmark.dataset_name = dataset.clone();
        }
        if let Some(ref model) = self.model {
            config.benchmark.model_name = model.clone();
        }
        if let Some(k) = self.top_k {
            config.benchmark.top_k = k;
        }
        if let Some(batch_size) = self.batch_size {
            config.benchmark.batch_size = batch_size;
        }
        if self.concurrent {
            config.benchmark.concurrent = true;
        }
    }

    /// Priority: --results-dir flag > config file value.
    pub fn resolve_results_dir(&self, config: &VecgraphConfig) -> PathBuf {
        self.results_dir
            .clone()
            .unwrap_or_else(|| expand_home(&config.general.results_dir))
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".vecgraph").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["vecgraph", "serve", "--port", "9000", "-l", "debug"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Command::Serve(serve) => assert_eq!(serve.resolve_port(8000), 9000),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_port_falls_back_to_config_then_default() {
        let serve = ServeArgs { port: None };
        assert_eq!(serve.resolve_port(8123), 8123);
        assert_eq!(serve.resolve_port(0), 8000);
    }

    #[test]
    fn test_config_flag_wins() {
        let args = parse(&["vecgraph", "-c", "/tmp/x.toml", "clear", "-b", "memory"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn test_log_level_flag_over_config() {
        let mut config = VecgraphConfig::default();
        config.general.log_level = "warn".to_string();

        let args = parse(&["vecgraph", "clear", "-b", "memory"]);
        assert_eq!(args.resolve_log_level(&config), "warn");

        let args = parse(&["vecgraph", "--log-level", "trace", "clear", "-b", "memory"]);
        assert_eq!(args.resolve_log_level(&config), "trace");
    }

    #[test]
    fn test_query_vector_parsing() {
        let args = parse(&["vecgraph", "query", "-b", "memory", "--vector", "0.5,-1,2"]);
        match args.command {
            Command::Query(query) => {
                assert_eq!(query.vector, Some(vec![0.5, -1.0, 2.0]));
                assert_eq!(query.k, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_query_needs_text_or_vector() {
        assert!(CliArgs::try_parse_from(["vecgraph", "query", "-b", "memory"]).is_err());
        assert!(CliArgs::try_parse_from([
            "vecgraph", "query", "-b", "memory", "-t", "hi", "--vector", "1,2"
        ])
        .is_err());
    }

    #[test]
    fn test_bench_backends_flag_and_config() {
        let config = VecgraphConfig::default();

        let args = parse(&[
            "vecgraph", "bench", "--corpus", "c.parquet", "--queries", "q.jsonl", "--qrels",
            "t.tsv", "-b", "Memory, qdrant,memory",
        ]);
        let Command::Bench(bench) = args.command else {
            panic!("expected bench");
        };
        assert_eq!(bench.resolve_backends(&config), vec!["memory", "qdrant"]);

        let args = parse(&[
            "vecgraph", "bench", "--corpus", "c.parquet", "--queries", "q.jsonl", "--qrels", "t.tsv",
        ]);
        let Command::Bench(bench) = args.command else {
            panic!("expected bench");
        };
        assert_eq!(bench.resolve_backends(&config), config.benchmark.backends);
    }

    #[test]
    fn test_bench_overrides_apply_to_config() {
        let args = parse(&[
            "vecgraph", "bench", "--corpus", "c.parquet", "--queries", "q.jsonl", "--qrels",
            "t.tsv", "--dataset", "scifact", "-k", "20", "--batch-size", "64", "--concurrent",
        ]);
        let Command::Bench(bench) = args.command else {
            panic!("expected bench");
        };
        let mut config = VecgraphConfig::default();
        bench.apply_to(&mut config);
        assert_eq!(config.benchmark.dataset_name, "scifact");
        assert_eq!(config.benchmark.top_k, 20);
        assert_eq!(config.benchmark.batch_size, 64);
        assert!(config.benchmark.concurrent);
        assert_eq!(config.benchmark.model_name, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("results"), PathBuf::from("results"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/.vecgraph/results.db"), home.join(".vecgraph/results.db"));
        }
    }
}
