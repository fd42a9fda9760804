//! `palate convert` — normalize downloaded images to JPEG.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::convert;

pub async fn run(dir: PathBuf, backup: bool) -> Result<()> {
    println!("Normalizing images in {}", dir.display());
    if backup {
        println!("Originals backed up to {}", convert::backup_dir_for(&dir).display());
    }

    // Decode/encode is CPU-bound; keep it off the async runtime.
    let report = tokio::task::spawn_blocking(move || convert::normalize_images(&dir, backup))
        .await
        .context("conversion task panicked")??;

    println!();
    println!("Converted: {}", report.converted);
    println!("Skipped:   {}", report.skipped);
    println!("Failed:    {}", report.failed);
    println!("Total:     {}", report.total());

    Ok(())
}
