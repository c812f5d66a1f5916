//! Builds the persisted vector index from a directory of `.md` / `.txt` files.
//!
//! Usage: `qianfan-chat-ingest <dir>`. Credentials come from `QIANFAN_AK` /
//! `QIANFAN_SK` or the secrets file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};

use qianfan_chat::core;
use qianfan_chat::core::config::{AppPaths, ConfigService};
use qianfan_chat::llm::{CredentialStore, LlmProvider, QianfanProvider};
use qianfan_chat::rag::{Ingestor, RagStore, SqliteRagStore, TextSplitter};

const EXTENSIONS: [&str; 2] = ["md", "txt"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(root) = env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: qianfan-chat-ingest <dir>");
    };
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let paths = Arc::new(AppPaths::new());
    core::logging::init_with_file(&paths, "ingest.log");
    let config = ConfigService::new(paths.clone());
    let settings = config.load_settings()?;

    let llm: Arc<dyn LlmProvider> =
        Arc::new(QianfanProvider::new(config.clone(), CredentialStore::new()));
    let index_dir = paths.resolve(&settings.retrieval.persist_directory);
    let store: Arc<dyn RagStore> = Arc::new(SqliteRagStore::open(&index_dir).await?);
    let ingestor = Ingestor::new(
        llm,
        store.clone(),
        TextSplitter::from_settings(&settings.retrieval),
        settings.qianfan.embedding_endpoint.clone(),
    );

    let mut files = Vec::new();
    collect_files(&root, &mut files)?;
    files.sort();
    tracing::info!("Found {} documents under {}", files.len(), root.display());

    let mut failed = 0;
    for file in &files {
        let source = file
            .strip_prefix(&root)
            .unwrap_or(file.as_path())
            .to_string_lossy()
            .replace('\\', "/");
        let text = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;

        match ingestor.ingest_text(&source, &text).await {
            Ok(report) => tracing::info!("{}: {} chunks", report.source, report.chunks),
            Err(err) => {
                failed += 1;
                tracing::error!("{}: {}", source, err);
            }
        }
    }

    let total = store.count(None).await?;
    tracing::info!(
        "Index at {} now holds {} chunks ({} documents failed)",
        index_dir.display(),
        total,
        failed
    );
    if failed > 0 {
        bail!("{} of {} documents failed to ingest", failed, files.len());
    }
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        {
            out.push(path);
        }
    }
    Ok(())
}
