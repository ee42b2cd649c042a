use av_types::{AvResult, TrialRecord};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::session::SessionIdProvider;

const MAX_SUFFIX_ATTEMPTS: usize = 1000;

/// Writes per-trial artifacts under one session directory.
///
/// Layout:
///
/// ```text
/// <base>/runs/<session-id>/
///     session.json
///     trials/trial_001/{stdout.txt, stderr.txt, result.json}
///     trials/trial_002/...
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactRecorder {
    session_dir: PathBuf,
}

impl ArtifactRecorder {
    /// Create a fresh session directory under `<base>/runs`. An existing
    /// directory is never reused: on collision a `-N` suffix is appended.
    pub fn create_session<P: AsRef<Path>>(
        base: P,
        ids: &dyn SessionIdProvider,
    ) -> AvResult<Self> {
        let runs = base.as_ref().join("runs");
        std::fs::create_dir_all(&runs)?;

        let id = ids.next_id();
        for attempt in 0..MAX_SUFFIX_ATTEMPTS {
            let name = if attempt == 0 {
                id.clone()
            } else {
                format!("{id}-{attempt}")
            };
            let candidate = runs.join(&name);
            match std::fs::create_dir(&candidate) {
                Ok(()) => {
                    info!("Created session directory {}", candidate.display());
                    return Ok(Self {
                        session_dir: candidate,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Session directory {} exists, trying next suffix", name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(av_types::internal_error!(
            "could not find a free session directory for id '{id}' under {}",
            runs.display()
        ))
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn trial_dir(&self, index: usize) -> PathBuf {
        self.session_dir
            .join("trials")
            .join(format!("trial_{index:03}"))
    }

    /// Persist a trial's raw streams and structured result. Sets
    /// `artifacts_dir` on the record before writing it.
    pub fn record(&self, record: &mut TrialRecord) -> AvResult<PathBuf> {
        let dir = self.trial_dir(record.index);
        std::fs::create_dir_all(&dir)?;
        record.artifacts_dir = Some(dir.clone());

        std::fs::write(dir.join("stdout.txt"), &record.outcome.stdout)?;
        std::fs::write(dir.join("stderr.txt"), &record.outcome.stderr)?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(dir.join("result.json"), json)?;

        debug!("Recorded trial {} to {}", record.index, dir.display());
        Ok(dir)
    }

    /// Write any serializable summary next to the trials.
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> AvResult<PathBuf> {
        let path = self.session_dir.join(file_name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }
}
