use std::path::{Path, PathBuf};

use visage_core::errors::GenerateError;
use visage_core::ids::TaskId;

/// Extension the worker is expected to produce.
pub const ARTIFACT_EXT: &str = "mp4";

/// A validated artifact copied into the public output area.
#[derive(Clone, Debug)]
pub struct PublishedArtifact {
    /// File name within the flat public area.
    pub file_name: String,
    /// Absolute path of the published copy.
    pub path: PathBuf,
    pub len: u64,
}

/// Recursively find all files with `ext` under `dir`.
///
/// Enumerates exhaustively and sorts, so selection by "first" is a total
/// order independent of filesystem walk order.
pub fn find_artifacts(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, GenerateError> {
    let pattern = format!("{}/**/*.{ext}", dir.display());
    let mut found: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| GenerateError::Io(e.to_string()))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    Ok(found)
}

/// Pick the result artifact for a task, or explain why there is none.
pub fn locate_artifact(result_dir: &Path, ext: &str) -> Result<PathBuf, GenerateError> {
    let found = find_artifacts(result_dir, ext)?;
    tracing::debug!(dir = %result_dir.display(), count = found.len(), "artifact search");
    match found.into_iter().next() {
        Some(path) => Ok(path),
        None => Err(GenerateError::NoArtifactProduced {
            dir: result_dir.to_path_buf(),
            listing: render_dir_listing(result_dir),
        }),
    }
}

/// Render the directory tree for the no-artifact diagnostic.
pub fn render_dir_listing(dir: &Path) -> String {
    let mut lines = Vec::new();
    walk_listing(dir, &mut lines);
    if lines.is_empty() {
        format!("  {}: (unreadable or missing)", dir.display())
    } else {
        lines.join("\n")
    }
}

fn walk_listing(dir: &Path, lines: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();
    lines.push(format!("  {}: {:?} {:?}", dir.display(), dirs, files));
    for sub in dirs {
        walk_listing(&dir.join(sub), lines);
    }
}

/// Copy a located artifact into the flat public area and verify the copy.
///
/// The published name is prefixed with the task id: result directories are
/// task-scoped, but the public area is shared, so the basename alone does
/// not guarantee uniqueness.
pub async fn publish_artifact(
    source: &Path,
    public_dir: &Path,
    task_id: &TaskId,
) -> Result<PublishedArtifact, GenerateError> {
    let source_len = tokio::fs::metadata(source).await?.len();
    if source_len == 0 {
        return Err(GenerateError::EmptyArtifact(source.to_path_buf()));
    }

    let basename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("result.{ARTIFACT_EXT}"));
    let file_name = format!("{task_id}_{basename}");
    let dest = public_dir.join(&file_name);

    tokio::fs::create_dir_all(public_dir).await?;
    tokio::fs::copy(source, &dest).await?;

    let copied_len = tokio::fs::metadata(&dest).await?.len();
    if copied_len != source_len {
        return Err(GenerateError::CopyIntegrityMismatch {
            source_len,
            copied_len,
        });
    }

    Ok(PublishedArtifact {
        file_name,
        path: dest,
        len: copied_len,
    })
}

/// Derive the public URL for a published file name.
pub fn public_url(base: &str, file_name: &str) -> String {
    format!("{}/output/{file_name}", base.trim_end_matches('/'))
}
