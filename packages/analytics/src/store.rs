//! Persistence for the trained anomaly model.
//!
//! [`FileModelStore`] writes two MessagePack artifacts, one for the scaler
//! and one for the forest. A model is only considered present when both
//! exist. Both files are staged as temporary siblings before either is
//! renamed into place, and each carries the generation of the save that
//! wrote it; `load` refuses a pair whose generations differ.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::model::ModelState;
use crate::scaler::StandardScaler;
use crate::forest::IsolationForest;
use crate::BoxError;

/// File name of the persisted scaler.
pub const SCALER_FILE: &str = "scaler.msgpack";
/// File name of the persisted isolation forest.
pub const DETECTOR_FILE: &str = "anomaly_detector.msgpack";

/// Saves and restores the trained anomaly model.
pub trait ModelStore: Send + Sync {
    /// Persists a trained model, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be encoded or written.
    fn save(&self, state: &ModelState) -> Result<(), BoxError>;

    /// Restores the last persisted model, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted model exists but cannot be read or
    /// decoded.
    fn load(&self) -> Result<Option<ModelState>, BoxError>;
}

/// One persisted artifact tagged with the save that produced it.
#[derive(Serialize, Deserialize)]
struct Artifact<T> {
    generation: u64,
    payload: T,
}

/// A [`ModelStore`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stage(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, bytes)?;
        Ok(tmp)
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, state: &ModelState) -> Result<(), BoxError> {
        fs::create_dir_all(&self.dir)?;

        let generation = rand::random::<u64>();
        let scaler = rmp_serde::to_vec_named(&Artifact {
            generation,
            payload: &state.scaler,
        })?;
        let detector = rmp_serde::to_vec_named(&Artifact {
            generation,
            payload: &state.detector,
        })?;

        let scaler_tmp = self.stage(SCALER_FILE, &scaler)?;
        let detector_tmp = match self.stage(DETECTOR_FILE, &detector) {
            Ok(tmp) => tmp,
            Err(e) => {
                // Nothing has been renamed yet; the previous pair stays intact.
                let _ = fs::remove_file(&scaler_tmp);
                return Err(e.into());
            }
        };

        fs::rename(&scaler_tmp, self.dir.join(SCALER_FILE))?;
        fs::rename(&detector_tmp, self.dir.join(DETECTOR_FILE))?;

        log::debug!(
            "Saved model artifacts (generation {generation:016x}) to {}",
            self.dir.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<ModelState>, BoxError> {
        let scaler_path = self.dir.join(SCALER_FILE);
        let detector_path = self.dir.join(DETECTOR_FILE);

        if !scaler_path.exists() || !detector_path.exists() {
            return Ok(None);
        }

        let scaler: Artifact<StandardScaler> = rmp_serde::from_slice(&fs::read(&scaler_path)?)?;
        let detector: Artifact<IsolationForest> =
            rmp_serde::from_slice(&fs::read(&detector_path)?)?;

        if scaler.generation != detector.generation {
            return Err(format!(
                "model artifacts in {} come from different saves \
                 (scaler {:016x}, detector {:016x})",
                self.dir.display(),
                scaler.generation,
                detector.generation
            )
            .into());
        }

        Ok(Some(ModelState {
            scaler: scaler.payload,
            detector: detector.payload,
        }))
    }
}

/// A [`ModelStore`] that keeps the last saved model in memory.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    state: Mutex<Option<ModelState>>,
    saves: Mutex<usize>,
}

impl InMemoryModelStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, state: &ModelState) -> Result<(), BoxError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<ModelState>, BoxError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
