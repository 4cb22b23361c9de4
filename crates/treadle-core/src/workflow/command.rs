//! Argument construction for resource actions.
//!
//! `build_arguments` turns an action verb, a manifest file and free-form flags
//! into the argument list handed to the resource client (for the kubectl
//! adapter, everything after the binary name).

use treadle_types::resource::{MergeStrategy, ResourceVerb};

/// Failure to assemble an action invocation.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The manifest file could not be read. The message keeps the underlying
    /// I/O text since callers match on it.
    #[error("open {path}: {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Must provide at least one of flags or manifest.")]
    NothingToSubmit,
}

/// Build the argument list for one resource action.
///
/// - A non-empty `manifest_path` must be readable.
/// - An empty manifest with no flags is rejected.
/// - Flags, when present, follow the verb verbatim and the manifest is not
///   re-injected.
/// - `patch` without flags sends the manifest content inline using
///   `merge_strategy`.
/// - `delete` references the file, tolerates an already-absent object and
///   asks for names only, since a delete response carries no object body.
/// - Any other verb references the manifest file with `-f` and asks for the
///   resulting object as JSON.
pub async fn build_arguments(
    verb: ResourceVerb,
    manifest_path: &str,
    flags: &[String],
    merge_strategy: MergeStrategy,
) -> Result<Vec<String>, CommandError> {
    let manifest = if manifest_path.is_empty() {
        String::new()
    } else {
        tokio::fs::read_to_string(manifest_path)
            .await
            .map_err(|source| CommandError::ManifestRead {
                path: manifest_path.to_string(),
                source,
            })?
    };

    if manifest.trim().is_empty() && flags.is_empty() {
        return Err(CommandError::NothingToSubmit);
    }

    let mut args = vec![verb.as_str().to_string()];

    if !flags.is_empty() {
        args.extend(flags.iter().cloned());
        return Ok(args);
    }

    let tail: &[&str] = match verb {
        ResourceVerb::Patch => {
            args.extend([
                "--type".to_string(),
                merge_strategy.as_str().to_string(),
                "-p".to_string(),
                manifest,
            ]);
            &["-o", "json"]
        }
        ResourceVerb::Delete => {
            args.extend(["-f".to_string(), manifest_path.to_string()]);
            &["--ignore-not-found", "-o", "name"]
        }
        _ => {
            args.extend(["-f".to_string(), manifest_path.to_string()]);
            &["-o", "json"]
        }
    };
    args.extend(tail.iter().map(|a| a.to_string()));

    Ok(args)
}
