//! Statistics collected during a backup run

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stats shared between the phases of a run and their worker threads
pub type SharedStats = Arc<Mutex<Stats>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainersStats {
    pub all: usize,
    pub to_stop: usize,
    pub stopped: usize,
    pub stop_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServicesStats {
    pub all: usize,
    pub to_scale_down: usize,
    pub scaled_down: usize,
    pub scale_down_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupFileStats {
    pub name: String,
    pub full_path: PathBuf,
    pub size: u64,
}

/// Outcome of pruning one storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    /// Objects matching the pruning prefix
    pub total: usize,
    pub pruned: usize,
    pub prune_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "duration_secs")]
    pub took: Duration,
    #[serde(with = "duration_secs")]
    pub locked_time: Duration,
    pub containers: ContainersStats,
    pub services: ServicesStats,
    pub backup_file: BackupFileStats,
    /// Prune results keyed by backend name
    pub storages: BTreeMap<String, PruneStats>,
    /// Log lines captured while the run was active
    pub log_output: String,
}

impl Stats {
    pub fn shared() -> SharedStats {
        Arc::new(Mutex::new(Stats::default()))
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.start_time = Some(now);
    }

    /// Record end time and total duration
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now);
        if let Some(start) = self.start_time {
            self.took = (now - start).to_std().unwrap_or_default();
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
