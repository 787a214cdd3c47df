//! `evidex chunk` and `evidex build`.
//!
//! `chunk` is a dry run over a single file: load, chunk, print. `build`
//! expands its path arguments with the configured globs, then either reuses
//! the cached index (same corpus, same model) or rebuilds and saves it to
//! `index.cache_dir`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::builder::{BuildOutcome, IndexBuilder};
use crate::config::Config;
use crate::loader::{collect_paths, load};
use crate::persist::save_index;

pub fn run_chunk_preview(config: &Config, path: &Path) -> Result<()> {
    let document = load(path)?;
    let params = config.chunking.params().clamped();
    let chunks = evidex_core::chunk::chunk_document(&document, &params);

    println!("chunk {} (dry-run)", path.display());
    println!("  sections: {}", document.non_empty_sections().count());
    println!("  chunks:   {}", chunks.len());
    println!(
        "  chunk_size: {}, sentence_overlap: {}",
        params.chunk_size, params.sentence_overlap
    );
    println!();
    for chunk in &chunks {
        let mut location = chunk
            .section_title
            .clone()
            .unwrap_or_else(|| "(untitled)".to_string());
        if let Some(page) = chunk.page_number {
            location = format!("{} (p.{})", location, page);
        }
        println!(
            "{}  [{}..{}]  {} chars  {}",
            chunk.chunk_id,
            chunk.start_char,
            chunk.end_char,
            chunk.len(),
            location
        );
    }
    Ok(())
}

pub async fn run_build(config: &Config, roots: &[PathBuf], force: bool) -> Result<()> {
    let files = collect_paths(
        roots,
        &config.index.include_globs,
        &config.index.exclude_globs,
    )?;
    if files.is_empty() {
        bail!("No supported files found under the given paths");
    }

    let builder = IndexBuilder::from_config(config)?;
    let cache_dir = &config.index.cache_dir;

    let (index, outcome) = if force {
        let index = builder.build_from_files(&files).await?;
        save_index(&index, cache_dir)?;
        (index, BuildOutcome::Built)
    } else {
        builder.build_or_load(&files, cache_dir).await?
    };

    println!("build {}", cache_dir.display());
    println!("  files:  {}", files.len());
    println!("  chunks: {}", index.len());
    println!("  dim:    {}", index.dim());
    println!("  model:  {}", index.embedding_model_name());
    match outcome {
        BuildOutcome::Built => println!("  index written"),
        BuildOutcome::Reused => println!("  corpus unchanged, reused cached index"),
    }
    println!("ok");
    Ok(())
}
