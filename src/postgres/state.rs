use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use super::PostgresError;

/// File name of the persisted state record inside the base directory.
pub const STATE_FILE_NAME: &str = "cluster-state.toml";

/// Lifecycle of the single cluster behind a data directory.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// No usable data directory.
    Absent,
    /// `initialize` started but has not finished.
    Initializing,
    /// Freshly initialized, never started.
    Initialized,
    /// Server accepting connections.
    Running,
    /// Server was started before and is now down.
    Stopped,
}

impl ClusterState {
    /// Whether the data directory holds a complete cluster.
    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            ClusterState::Initialized | ClusterState::Running | ClusterState::Stopped
        )
    }

    /// Whether moving to `next` is a defined transition.
    ///
    /// `initialize` is destructive, so `Initializing` is reachable from
    /// anywhere.
    pub fn allows(self, next: ClusterState) -> bool {
        use ClusterState::*;
        match (self, next) {
            (_, Initializing) => true,
            (Initializing, Initialized) => true,
            (Initializing, Absent) => true,
            (Initialized | Stopped, Running) => true,
            (Running, Stopped) => true,
            (Initialized | Stopped, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClusterState::Absent => "absent",
            ClusterState::Initializing => "initializing",
            ClusterState::Initialized => "initialized",
            ClusterState::Running => "running",
            ClusterState::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

/// What is persisted between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Last recorded state.
    pub state: ClusterState,
    /// Data directory the state refers to.
    pub data_dir: PathBuf,
    /// RFC 3339 timestamp of the transition.
    pub updated_at: String,
}

impl StateRecord {
    /// Reads the record, `None` if it was never written.
    pub fn load(path: &Path) -> Result<Option<Self>, PostgresError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path).map_err(|err| state_err(path, err))?;
        toml::from_str(&contents)
            .map(Some)
            .map_err(|err| state_err(path, err))
    }

    /// Writes `state` for `data_dir`, warning on undefined transitions.
    pub fn store(path: &Path, data_dir: &Path, state: ClusterState) -> Result<(), PostgresError> {
        let previous = Self::load(path).ok().flatten().map(|r| r.state);
        if let Some(previous) = previous {
            if !previous.allows(state) {
                warn!(%previous, next = %state, "unexpected cluster state transition");
            }
        }
        let updated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| state_err(path, err))?;
        let record = StateRecord {
            state,
            data_dir: data_dir.to_path_buf(),
            updated_at,
        };
        let serialized = toml::to_string_pretty(&record).map_err(|err| state_err(path, err))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| state_err(path, err))?;
        }
        fs::write(path, serialized).map_err(|err| state_err(path, err))
    }
}

fn state_err(path: &Path, err: impl fmt::Display) -> PostgresError {
    PostgresError::StateFile {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transitions_follow_lifecycle() {
        use ClusterState::*;
        assert!(Absent.allows(Initializing));
        assert!(Initializing.allows(Initialized));
        assert!(Initialized.allows(Running));
        assert!(Running.allows(Stopped));
        assert!(Stopped.allows(Running));
        assert!(Running.allows(Initializing));
        assert!(!Absent.allows(Running));
        assert!(!Initializing.allows(Running));
        assert!(!Absent.is_initialized());
        assert!(Stopped.is_initialized());
    }

    #[test]
    fn record_round_trips_through_toml() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(STATE_FILE_NAME);
        assert_eq!(StateRecord::load(&path).unwrap(), None);
        StateRecord::store(&path, Path::new("/data"), ClusterState::Initializing).unwrap();
        let record = StateRecord::load(&path).unwrap().unwrap();
        assert_eq!(record.state, ClusterState::Initializing);
        assert_eq!(record.data_dir, PathBuf::from("/data"));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("state = \"initializing\""));
    }

    #[test]
    fn garbage_record_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(STATE_FILE_NAME);
        fs::write(&path, "state = 7").unwrap();
        assert!(matches!(
            StateRecord::load(&path),
            Err(PostgresError::StateFile { .. })
        ));
    }
}
