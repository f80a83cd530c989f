use crate::error::{EngineError, Result};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

const FILE_NEIGHBORS: &str = "neighbors.bin";
const FILE_REPORT: &str = "report.json";

/// The matrices a model directory can hold, one file each. Presence of a
/// file suppresses the corresponding recomputation on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    U1,
    U2,
    L1,
    Fg,
    Ul,
    Ufg,
    Distances,
    Weights,
    Uif,
}

impl Artifact {
    fn file_name(self) -> &'static str {
        match self {
            Artifact::U1 => "u1.bin",
            Artifact::U2 => "u2.bin",
            Artifact::L1 => "l1.bin",
            Artifact::Fg => "fg.bin",
            Artifact::Ul => "ul.bin",
            Artifact::Ufg => "ufg.bin",
            Artifact::Distances => "distances.bin",
            Artifact::Weights => "weights.bin",
            Artifact::Uif => "uif.bin",
        }
    }
}

/// Directory-backed persistence for the engine's numeric matrices. Each
/// artifact round-trips through a dense row-major binary encoding; load
/// after save yields bit-identical values.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A nested store, e.g. for the best-validation checkpoint.
    pub fn subdir(&self, name: &str) -> Result<Self> {
        Self::new(self.dir.join(name))
    }

    pub fn contains(&self, artifact: Artifact) -> bool {
        self.dir.join(artifact.file_name()).exists()
    }

    pub fn save(&self, artifact: Artifact, matrix: &Array2<f64>) -> Result<()> {
        self.write(artifact.file_name(), matrix)
    }

    pub fn load(&self, artifact: Artifact) -> Result<Array2<f64>> {
        self.read(artifact.file_name())
    }

    pub fn has_neighbor_index(&self) -> bool {
        self.dir.join(FILE_NEIGHBORS).exists()
    }

    pub fn save_neighbor_index(&self, neighbors: &Array2<usize>) -> Result<()> {
        self.write(FILE_NEIGHBORS, neighbors)
    }

    pub fn load_neighbor_index(&self) -> Result<Array2<usize>> {
        self.read(FILE_NEIGHBORS)
    }

    pub fn save_report<T: Serialize>(&self, report: &T) -> Result<()> {
        let path = self.dir.join(FILE_REPORT);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, report)?;
        info!(path = %path.display(), "training report written");
        Ok(())
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let writer = BufWriter::new(File::create(&path)?);
        bincode::serialize_into(writer, value)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(EngineError::ModelFileNotFound(path));
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
