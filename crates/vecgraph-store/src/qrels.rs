use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;
use vecgraph_core::RelevanceJudgments;

use crate::error::{Result, StoreError};

/// Load relevance judgments from a BEIR-style TSV file.
///
/// Columns are `query-id`, `corpus-id`, `score`; an optional header row is
/// skipped. Rows with a score above zero mark the document relevant; rows
/// with score zero still mark the query as judged.
pub fn load_qrels(path: &Path) -> Result<RelevanceJudgments> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut judgments = RelevanceJudgments::new();
    let mut rows = 0usize;

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if n == 0 && line.starts_with("query-id") {
            continue;
        }

        let mut fields = line.split('\t');
        let (Some(query_id), Some(doc_id), Some(score)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(StoreError::Parse {
                line: n + 1,
                message: "expected three tab-separated columns".to_string(),
            });
        };
        let score: f64 = score.trim().parse().map_err(|_| StoreError::Parse {
            line: n + 1,
            message: format!("invalid score '{}'", score),
        })?;

        if score > 0.0 {
            judgments.insert(query_id.trim(), doc_id.trim());
        } else {
            judgments.mark_judged(query_id.trim());
        }
        rows += 1;
    }

    info!(
        path = %path.display(),
        rows,
        queries = judgments.len(),
        "Loaded relevance judgments"
    );
    Ok(judgments)
}
