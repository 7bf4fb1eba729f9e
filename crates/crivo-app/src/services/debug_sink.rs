//! Optional best-effort debug artefacts: parse dumps and generator output,
//! keyed `{userId}/{documentId}-{suffix}.json` under a local directory.

use std::path::PathBuf;

use serde_json::Value as JsonValue;

/// Writes never fail the job; problems are logged and swallowed.
#[derive(Debug, Clone, Default)]
pub enum DebugSink {
    #[default]
    Disabled,
    Fs {
        root: PathBuf,
    },
}

impl DebugSink {
    pub fn from_dir(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(root) => DebugSink::Fs { root },
            None => DebugSink::Disabled,
        }
    }

    pub fn write_json(&self, user_id: &str, document_id: &str, suffix: &str, value: &JsonValue) {
        let DebugSink::Fs { root } = self else {
            return;
        };
        let dir = root.join(user_id);
        let path = dir.join(format!("{document_id}-{suffix}.json"));
        let result = std::fs::create_dir_all(&dir)
            .and_then(|()| {
                let body = serde_json::to_string_pretty(value)?;
                std::fs::write(&path, body)
            });
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "debug artefact written"),
            Err(err) => tracing::warn!(error = %err, path = %path.display(), "failed to write debug artefact"),
        }
    }
}
