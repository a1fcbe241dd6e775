//! File-based checkpointer
//!
//! One JSON file per checkpoint, optionally zstd-compressed:
//!
//! ```text
//! checkpoints/
//! └── {run_id}/
//!     ├── checkpoint_00010.json[.zst]
//!     └── checkpoint_00020.json[.zst]
//! ```

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::message::VertexMessage;
use crate::pregel::state::MasterState;

const PREFIX: &str = "checkpoint_";

/// Stores each checkpoint in its own file, named by superstep.
///
/// Writes go to a temporary file that is renamed into place.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    run_path: PathBuf,
    compression: bool,
}

fn io_error(context: &'static str) -> impl FnOnce(std::io::Error) -> PregelError {
    move |e| PregelError::checkpoint_error(format!("{}: {}", context, e))
}

impl FileCheckpointer {
    /// Checkpoints go to `base_path/<run_id>/`
    pub fn new(base_path: impl Into<PathBuf>, run_id: impl AsRef<str>, compression: bool) -> Self {
        Self {
            run_path: base_path.into().join(run_id.as_ref()),
            compression,
        }
    }

    pub fn path(&self) -> &Path {
        &self.run_path
    }

    fn checkpoint_path(&self, superstep: usize) -> PathBuf {
        let extension = if self.compression { "json.zst" } else { "json" };
        self.run_path
            .join(format!("{}{:05}.{}", PREFIX, superstep, extension))
    }

    fn temp_path(&self, superstep: usize) -> PathBuf {
        self.run_path.join(format!("{}{:05}.tmp", PREFIX, superstep))
    }

    fn encode(&self, json: Vec<u8>) -> Result<Vec<u8>, PregelError> {
        if !self.compression {
            return Ok(json);
        }
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3).map_err(io_error("Compression init failed"))?;
        encoder.write_all(&json).map_err(io_error("Compression failed"))?;
        encoder.finish().map_err(io_error("Compression finish failed"))
    }

    fn decode(&self, data: Vec<u8>) -> Result<Vec<u8>, PregelError> {
        if !self.compression {
            return Ok(data);
        }
        zstd::stream::decode_all(data.as_slice()).map_err(io_error("Decompression failed"))
    }

    /// `checkpoint_00012.json.zst` -> 12; temporary files are skipped
    fn parse_superstep(path: &Path) -> Option<usize> {
        let filename = path.file_name()?.to_str()?;
        let (number, extension) = filename.strip_prefix(PREFIX)?.split_once('.')?;
        if !extension.starts_with("json") {
            return None;
        }
        number.parse().ok()
    }

    async fn list_supersteps(&self) -> Result<Vec<usize>, PregelError> {
        if !self.run_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.run_path)
            .await
            .map_err(io_error("Failed to read directory"))?;

        let mut supersteps = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error("Failed to read entry"))?
        {
            if let Some(superstep) = Self::parse_superstep(&entry.path()) {
                supersteps.push(superstep);
            }
        }

        supersteps.sort_unstable();
        Ok(supersteps)
    }
}

#[async_trait]
impl<S, M> Checkpointer<S, M> for FileCheckpointer
where
    S: MasterState,
    M: VertexMessage,
{
    async fn save(&self, checkpoint: &Checkpoint<S, M>) -> Result<(), PregelError> {
        fs::create_dir_all(&self.run_path)
            .await
            .map_err(io_error("Failed to create directory"))?;

        let json = serde_json::to_vec(checkpoint)
            .map_err(|e| PregelError::checkpoint_error(format!("Serialization failed: {}", e)))?;
        let data = self.encode(json)?;

        let temp_path = self.temp_path(checkpoint.superstep);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(io_error("Failed to create temp file"))?;
        file.write_all(&data).await.map_err(io_error("Failed to write data"))?;
        file.sync_all().await.map_err(io_error("Failed to sync file"))?;

        fs::rename(&temp_path, self.checkpoint_path(checkpoint.superstep))
            .await
            .map_err(io_error("Failed to rename file"))?;

        tracing::debug!(
            path = %self.run_path.display(),
            superstep = checkpoint.superstep,
            bytes = data.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, superstep: usize) -> Result<Option<Checkpoint<S, M>>, PregelError> {
        let path = self.checkpoint_path(superstep);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path).await.map_err(io_error("Failed to read file"))?;
        let json = self.decode(data)?;
        let checkpoint = serde_json::from_slice(&json)
            .map_err(|e| PregelError::checkpoint_error(format!("Deserialization failed: {}", e)))?;
        Ok(Some(checkpoint))
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S, M>>, PregelError> {
        match self.list_supersteps().await?.last() {
            Some(&superstep) => self.load(superstep).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<usize>, PregelError> {
        self.list_supersteps().await
    }

    async fn delete(&self, superstep: usize) -> Result<(), PregelError> {
        let path = self.checkpoint_path(superstep);
        if path.exists() {
            fs::remove_file(&path).await.map_err(io_error("Failed to delete file"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::message::FlowMessage;
    use crate::push_relabel::FlowState;
    use crate::pregel::vertex::{VertexId, VertexState};
    use std::collections::HashMap;
    use tempfile::tempdir;

    type TestCheckpoint = Checkpoint<FlowState, FlowMessage>;

    fn checkpoint(superstep: usize) -> TestCheckpoint {
        Checkpoint::new("run-1", superstep, FlowState::new(), HashMap::new(), HashMap::new())
    }

    fn rich_checkpoint(superstep: usize) -> TestCheckpoint {
        let mut states = HashMap::new();
        states.insert(VertexId::new("nodes/a"), VertexState::Active);
        states.insert(VertexId::new("nodes/b"), VertexState::Halted);

        let mut pending = HashMap::new();
        pending.insert(
            VertexId::new("nodes/b"),
            vec![FlowMessage::push(&VertexId::new("nodes/a"), 2.5)],
        );

        let mut values = HashMap::new();
        values.insert(VertexId::new("nodes/a"), serde_json::json!({"label": 4}));

        Checkpoint::new("run-1", superstep, FlowState::new(), states, pending).with_vertex_values(values)
    }

    #[tokio::test]
    async fn test_file_checkpointer_roundtrip_keeps_messages_and_values() {
        let temp_dir = tempdir().unwrap();
        for compression in [false, true] {
            let checkpointer = FileCheckpointer::new(temp_dir.path(), format!("run-{}", compression), compression);
            checkpointer.save(&rich_checkpoint(10)).await.unwrap();

            let loaded: TestCheckpoint = checkpointer.load(10).await.unwrap().unwrap();
            assert_eq!(loaded.superstep, 10);
            assert_eq!(loaded.vertex_states.len(), 2);
            assert_eq!(loaded.pending_message_count(), 1);
            assert_eq!(
                loaded.pending_messages[&VertexId::new("nodes/b")][0],
                FlowMessage::push(&VertexId::new("nodes/a"), 2.5)
            );
            assert_eq!(loaded.vertex_values[&VertexId::new("nodes/a")]["label"], 4);
        }
        assert!(temp_dir.path().join("run-true/checkpoint_00010.json.zst").exists());
        assert!(temp_dir.path().join("run-false/checkpoint_00010.json").exists());
    }

    #[tokio::test]
    async fn test_file_checkpointer_load_nonexistent() {
        let temp_dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path(), "run-1", false);
        let result: Option<TestCheckpoint> = checkpointer.load(999).await.unwrap();
        assert!(result.is_none());
        let latest: Option<TestCheckpoint> = checkpointer.latest().await.unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_file_checkpointer_list_latest_prune() {
        let temp_dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path(), "run-1", false);
        for superstep in [5, 1, 10, 3] {
            checkpointer.save(&checkpoint(superstep)).await.unwrap();
        }

        let list = <FileCheckpointer as Checkpointer<FlowState, FlowMessage>>::list(&checkpointer)
            .await
            .unwrap();
        assert_eq!(list, vec![1, 3, 5, 10]);

        let latest: TestCheckpoint = checkpointer.latest().await.unwrap().unwrap();
        assert_eq!(latest.superstep, 10);

        let deleted = <FileCheckpointer as Checkpointer<FlowState, FlowMessage>>::prune(&checkpointer, 2)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let remaining = <FileCheckpointer as Checkpointer<FlowState, FlowMessage>>::list(&checkpointer)
            .await
            .unwrap();
        assert_eq!(remaining, vec![5, 10]);
    }

    #[tokio::test]
    async fn test_file_checkpointer_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path(), "run-1", false);
        checkpointer.save(&checkpoint(7)).await.unwrap();

        assert!(!temp_dir.path().join("run-1/checkpoint_00007.tmp").exists());
        assert!(temp_dir.path().join("run-1/checkpoint_00007.json").exists());

        <FileCheckpointer as Checkpointer<FlowState, FlowMessage>>::delete(&checkpointer, 7)
            .await
            .unwrap();
        assert!(!temp_dir.path().join("run-1/checkpoint_00007.json").exists());
    }

    #[test]
    fn test_parse_superstep() {
        assert_eq!(FileCheckpointer::parse_superstep(Path::new("checkpoint_00005.json")), Some(5));
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("checkpoint_00123.json.zst")),
            Some(123)
        );
        assert_eq!(FileCheckpointer::parse_superstep(Path::new("other_file.json")), None);
        assert_eq!(FileCheckpointer::parse_superstep(Path::new("checkpoint_00007.tmp")), None);
    }
}
