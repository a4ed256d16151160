//! Model State snapshots.
//!
//! A snapshot is the full [`ModelState`] as pretty-printed JSON, wrapped with
//! the time it was written. The fit loop writes intermediate snapshots next to
//! the final destination (`<stem>_tmp.json`) so an interrupted run can be
//! inspected or resumed.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ModelState;
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    saved_at: DateTime<Utc>,
    state: &'a ModelState,
}

/// A snapshot read back from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub state: ModelState,
}

/// Write `state` to `path`.
pub fn save_state(path: &Path, state: &ModelState) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create snapshot '{}': {e}", path.display())))?;
    let snapshot = SnapshotRef {
        saved_at: Utc::now(),
        state,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)
        .map_err(|e| AppError::new(2, format!("Failed to write snapshot '{}': {e}", path.display())))?;
    Ok(())
}

/// Read a snapshot written by [`save_state`].
pub fn load_snapshot(path: &Path) -> Result<Snapshot, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open snapshot '{}': {e}", path.display())))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid snapshot '{}': {e}", path.display())))
}

/// Read only the model state of a snapshot.
pub fn load_state(path: &Path) -> Result<ModelState, AppError> {
    Ok(load_snapshot(path)?.state)
}

/// Location of the intermediate snapshots for a final destination `path`.
pub fn tmp_snapshot_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!("{stem}_tmp.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtmosphereSpec, Line, LineList, VradFlag};
    use tempfile::TempDir;

    #[test]
    fn state_survives_a_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("star.json");

        let line = Line {
            species: "Fe 1".to_string(),
            wlcent: 5001.0,
            excit: 2.5,
            gflog: -1.0,
            gamrad: 0.0,
            gamqst: 0.0,
            gamvw: 0.0,
            depth: 0.5,
            error: 0.1,
        };
        let mut state = ModelState::new(
            vec![[5000.0, 5004.0]],
            LineList::new(vec![line]),
            AtmosphereSpec::grid("marcs.sav"),
        );
        state.teff = 5432.1;
        state.vrad_flag = VradFlag::Whole;
        state.wave = vec![vec![5000.0, 5002.0, 5004.0]];
        state.spec = vec![vec![1.0, 0.7, 1.0]];

        save_state(&path, &state).unwrap();
        let snap = load_snapshot(&path).unwrap();
        assert_eq!(snap.state, state);
        assert!(snap.saved_at <= Utc::now());
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let dir = TempDir::new().unwrap();
        let err = load_state(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn intermediate_snapshots_sit_next_to_the_target() {
        assert_eq!(
            tmp_snapshot_path(Path::new("out/star.json")),
            PathBuf::from("out/star_tmp.json")
        );
        assert_eq!(tmp_snapshot_path(Path::new("fit")), PathBuf::from("fit_tmp.json"));
    }
}
