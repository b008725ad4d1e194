use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const COUNCIL_ENTRY: &str = "council.json";
const SCORES_ENTRY: &str = "scores.csv";
pub const ARCHIVE_FORMAT_V1: &str = "defense-council-archive-v1";

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub archive_format: String,
    pub entry_count: usize,
    pub scores_sha256: String,
}

/// Writes a published-or-in-progress council snapshot as a zip bundle:
/// a manifest with a digest of the score sheet, the full council view as
/// JSON, and the scores in the CSV exchange shape.
pub fn export_council_archive(
    out_path: &Path,
    council_json: &serde_json::Value,
    scores_csv: &str,
) -> anyhow::Result<ArchiveSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut hasher = Sha256::new();
    hasher.update(scores_csv.as_bytes());
    let scores_sha256 = format!("{:x}", hasher.finalize());

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": ARCHIVE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "scoresSha256": scores_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(COUNCIL_ENTRY, opts)
        .context("failed to start council entry")?;
    zip.write_all(
        serde_json::to_string_pretty(council_json)
            .context("failed to serialize council snapshot")?
            .as_bytes(),
    )
    .context("failed to write council entry")?;

    zip.start_file(SCORES_ENTRY, opts)
        .context("failed to start scores entry")?;
    zip.write_all(scores_csv.as_bytes())
        .context("failed to write scores entry")?;

    zip.finish().context("failed to finalize zip archive")?;

    Ok(ArchiveSummary {
        archive_format: ARCHIVE_FORMAT_V1.to_string(),
        entry_count: 3,
        scores_sha256,
    })
}
