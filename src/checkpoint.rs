//! Durable snapshot/restore of workflow run state, keyed by run id.
//!
//! A checkpoint is written at every suspension point and read back on
//! resume, so a run survives arbitrary gaps, including process restarts.
//! No compaction or garbage collection; retention is a deployment concern.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::engine::WorkflowRun;
use crate::error::PipelineError;

pub trait CheckpointStore {
    /// Persist the full run state. Atomic from a reader's perspective: a
    /// concurrent `load` never observes a partially written snapshot.
    fn save(&self, run: &WorkflowRun) -> Result<(), PipelineError>;

    /// Load a previously saved run, failing with
    /// [`PipelineError::CheckpointNotFound`] when no checkpoint exists.
    fn load(&self, run_id: &str) -> Result<WorkflowRun, PipelineError>;
}

/// File-backed store writing one JSON snapshot per run id.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, which is atomic on POSIX filesystems. Distinct run ids map to
/// distinct files, so concurrent runs never interfere.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "cannot create checkpoint directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, run: &WorkflowRun) -> Result<(), PipelineError> {
        let path = self.path_for(&run.run_id);
        let tmp = self.dir.join(format!("{}.json.tmp", run.run_id));
        let body = serde_json::to_vec_pretty(run)?;
        fs::write(&tmp, body).map_err(|e| {
            PipelineError::Persistence(format!("checkpoint write failed for {}: {e}", run.run_id))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            PipelineError::Persistence(format!("checkpoint rename failed for {}: {e}", run.run_id))
        })?;
        debug!(run_id = %run.run_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<WorkflowRun, PipelineError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(PipelineError::CheckpointNotFound(run_id.to_string()));
        }
        let body = fs::read_to_string(&path).map_err(|e| {
            PipelineError::Persistence(format!("checkpoint read failed for {run_id}: {e}"))
        })?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::StageName;
    use tempfile::TempDir;

    fn sample_run(topic: &str) -> WorkflowRun {
        let mut run = WorkflowRun::new(topic, 2, vec!["2.a: evidence".into()]);
        run.push_transcript(StageName::Coordinator, "Dispatching batch".into());
        run.units.push(crate::item::sample_item(&run.batch_id));
        run.suspended = true;
        run
    }

    #[test]
    fn save_then_load_roundtrips_full_state() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let run = sample_run("TP.2");

        store.save(&run).unwrap();
        let loaded = store.load(&run.run_id).unwrap();

        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.batch_id, run.batch_id);
        assert_eq!(loaded.current_stage, run.current_stage);
        assert_eq!(loaded.transcript.len(), 1);
        assert_eq!(loaded.units.len(), 1);
        assert!(loaded.suspended);
    }

    #[test]
    fn load_missing_run_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let err = store.load("no-such-run").unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointNotFound(_)));
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let mut run = sample_run("TP.2");

        store.save(&run).unwrap();
        run.push_transcript(StageName::Generator, "Generated 1 item".into());
        store.save(&run).unwrap();

        let loaded = store.load(&run.run_id).unwrap();
        assert_eq!(loaded.transcript.len(), 2);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn distinct_run_ids_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let run_a = sample_run("TP.2");
        let run_b = sample_run("TP.9");

        store.save(&run_a).unwrap();
        store.save(&run_b).unwrap();

        assert_eq!(store.load(&run_a.run_id).unwrap().topic, "TP.2");
        assert_eq!(store.load(&run_b.run_id).unwrap().topic, "TP.9");
    }
}
