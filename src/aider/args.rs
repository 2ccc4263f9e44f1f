//! Argument vector construction for the aider executable.
//!
//! Layout is fixed so output is reproducible:
//!
//! ```text
//! --model M --editor-model E [flags...] [extra...] [files...] --message TEXT
//! ```

use std::path::{Component, Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::error::{BridgeError, BridgeResult};

use super::TaskType;

/// Resolve `files` to absolute, lexically normalized paths under `workspace`.
///
/// A relative `workspace` is taken from the current directory. Relative paths
/// are joined onto it. Paths containing NUL bytes, or normalizing to somewhere
/// outside `workspace`, are rejected.
pub fn resolve_file_paths(workspace: &Path, files: &[String]) -> BridgeResult<Vec<PathBuf>> {
    let root = std::path::absolute(workspace)
        .ok()
        .and_then(|abs| normalize(&abs))
        .ok_or_else(|| {
            BridgeError::Configuration(format!(
                "workspace cannot be made absolute: {}",
                workspace.display()
            ))
        })?;
    files
        .iter()
        .map(|file| {
            if file.contains('\0') {
                return Err(BridgeError::Validation(format!(
                    "file path contains null byte: {file:?}"
                )));
            }
            if file.trim().is_empty() {
                return Err(BridgeError::Validation("file path is empty".to_owned()));
            }
            let escapes = || BridgeError::Validation(format!("path escapes workspace boundary: {file}"));
            let joined = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                root.join(file)
            };
            let resolved = normalize(&joined).ok_or_else(escapes)?;
            if !resolved.starts_with(&root) {
                return Err(escapes());
            }
            Ok(resolved)
        })
        .collect()
}

/// Lexical normalization: drops `.` and folds `..` without touching the
/// filesystem, so nonexistent targets still resolve. `None` when a `..` has
/// nothing left to pop.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Build the ordered aider argument vector.
///
/// `files` should already be resolved with [`resolve_file_paths`].
pub fn build_arguments(
    resolved: &ResolvedConfig,
    task_type: TaskType,
    message: &str,
    files: &[PathBuf],
) -> Vec<String> {
    let mut args = Vec::with_capacity(6 + resolved.extra_args.len() + files.len());
    args.push("--model".to_owned());
    args.push(resolved.architect_model.clone());
    args.push("--editor-model".to_owned());
    args.push(resolved.editor_model.clone());

    args.extend(resolved.flags.iter().map(|f| f.as_arg().to_owned()));
    args.extend(resolved.extra_args.iter().cloned());
    args.extend(files.iter().map(|p| p.to_string_lossy().into_owned()));

    args.push("--message".to_owned());
    args.push(task_type.render_prompt(message));
    args
}
