//! In-memory run registry.
//!
//! Maps workflow ids to their records for the lifetime of the process. The
//! outer map lock is only held for lookups and inserts; every record sits
//! behind its own mutex so unrelated runs never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{NaiveDate, Utc};

use crate::error::RegistryError;

use super::detector::WorkflowType;
use super::record::{WorkflowRun, WorkflowStatus};

/// Shared cell holding one run record.
pub(crate) type RunHandle = Arc<Mutex<WorkflowRun>>;

/// Prefix of every workflow id.
const ID_PREFIX: &str = "wf_";

/// Locks a record, recovering the data if a previous holder panicked.
///
/// Record mutations are single assignments, so a poisoned record is still consistent.
pub(crate) fn lock_run(handle: &RunHandle) -> MutexGuard<'_, WorkflowRun> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of workflow runs keyed by id.
pub struct RunRegistry {
    stages: Vec<String>,
    runs: RwLock<HashMap<String, RunHandle>>,
}

impl RunRegistry {
    /// Creates an empty registry whose runs follow `stages`.
    pub fn new(stages: Vec<String>) -> Self {
        Self {
            stages,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Canonical stage sequence of new runs.
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Inserts a new pending run under `id`.
    ///
    /// Fails with `DuplicateId` rather than overwriting an existing record.
    pub fn create(
        &self,
        id: &str,
        project_name: Option<String>,
        request: &str,
    ) -> Result<WorkflowRun, RegistryError> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        let run = WorkflowRun::new(id, project_name, request, &self.stages);
        runs.insert(id.to_string(), Arc::new(Mutex::new(run.clone())));
        Ok(run)
    }

    /// Generates a fresh id for today and inserts a pending run under it.
    ///
    /// Id generation and insertion happen under one write lock, so
    /// concurrent callers always receive distinct ids.
    pub fn allocate(
        &self,
        project_name: Option<String>,
        request: &str,
        workflow_type: WorkflowType,
    ) -> WorkflowRun {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let id = next_workflow_id(runs.keys().map(String::as_str), Utc::now().date_naive());

        let run = WorkflowRun::new(&id, project_name, request, &self.stages)
            .with_workflow_type(workflow_type);
        runs.insert(id, Arc::new(Mutex::new(run.clone())));
        run
    }

    /// Returns a consistent copy of a run.
    pub fn get(&self, id: &str) -> Result<WorkflowRun, RegistryError> {
        let handle = self.handle(id)?;
        let run = lock_run(&handle).clone();
        Ok(run)
    }

    /// Returns true if a run with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of runs registered.
    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no run has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All run ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Current status of every run.
    pub fn statuses(&self) -> Vec<WorkflowStatus> {
        let handles: Vec<RunHandle> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.iter().map(|h| lock_run(h).status).collect()
    }

    /// Shared cell of a run, for the orchestrator's mutation path.
    pub(crate) fn handle(&self, id: &str) -> Result<RunHandle, RegistryError> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

/// Computes `wf_<YYYYMMDD>_<NNN>` with NNN one past the highest sequence
/// already used on `date`.
fn next_workflow_id<'a>(existing: impl Iterator<Item = &'a str>, date: NaiveDate) -> String {
    let day_prefix = format!("{}{}_", ID_PREFIX, date.format("%Y%m%d"));
    let highest = existing
        .filter_map(|id| id.strip_prefix(&day_prefix))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:03}", day_prefix, highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::default_stages;
    use std::collections::HashSet;
    use std::thread;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_next_id_starts_at_one() {
        let id = next_workflow_id(std::iter::empty(), date(2026, 3, 9));
        assert_eq!(id, "wf_20260309_001");
    }

    #[test]
    fn test_next_id_uses_highest_same_day_sequence() {
        let existing = ["wf_20260309_001", "wf_20260309_007", "wf_20260308_042"];
        let id = next_workflow_id(existing.iter().copied(), date(2026, 3, 9));
        assert_eq!(id, "wf_20260309_008");
    }

    #[test]
    fn test_next_id_ignores_other_days_and_garbage() {
        let existing = ["wf_20260308_015", "custom-id", "wf_20260309_abc"];
        let id = next_workflow_id(existing.iter().copied(), date(2026, 3, 9));
        assert_eq!(id, "wf_20260309_001");
    }

    #[test]
    fn test_next_id_widens_past_999() {
        let existing = ["wf_20260309_999"];
        let id = next_workflow_id(existing.iter().copied(), date(2026, 3, 9));
        assert_eq!(id, "wf_20260309_1000");
    }

    #[test]
    fn test_create_and_get() {
        let registry = RunRegistry::new(default_stages());
        let run = registry
            .create("wf_custom", Some("shop".to_string()), "build a cart")
            .unwrap();
        assert_eq!(run.status, WorkflowStatus::Pending);

        let fetched = registry.get("wf_custom").unwrap();
        assert_eq!(fetched, run);
        assert!(registry.contains("wf_custom"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let registry = RunRegistry::new(default_stages());
        registry.create("dup", None, "first").unwrap();

        let err = registry.create("dup", None, "second").unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("dup".to_string()));
        assert_eq!(registry.get("dup").unwrap().request, "first");
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = RunRegistry::new(default_stages());
        assert_eq!(
            registry.get("wf_missing").unwrap_err(),
            RegistryError::NotFound("wf_missing".to_string())
        );
        assert!(registry.handle("wf_missing").is_err());
    }

    #[test]
    fn test_allocate_increments_sequence() {
        let registry = RunRegistry::new(default_stages());
        let a = registry.allocate(None, "one", WorkflowType::Unknown);
        let b = registry.allocate(None, "two", WorkflowType::Complex);

        assert!(a.workflow_id.ends_with("_001"));
        assert!(b.workflow_id.ends_with("_002"));
        assert_eq!(b.workflow_type, WorkflowType::Complex);
        assert_eq!(registry.ids(), vec![a.workflow_id, b.workflow_id]);
        assert_eq!(registry.statuses(), vec![WorkflowStatus::Pending; 2]);
    }

    #[test]
    fn test_concurrent_allocate_yields_distinct_ids() {
        let registry = Arc::new(RunRegistry::new(default_stages()));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..25)
                        .map(|j| {
                            registry
                                .allocate(None, &format!("req {}-{}", i, j), WorkflowType::Unknown)
                                .workflow_id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<String> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn test_get_returns_snapshot_copy() {
        let registry = RunRegistry::new(default_stages());
        let run = registry.allocate(None, "req", WorkflowType::Unknown);

        let mut copy = registry.get(&run.workflow_id).unwrap();
        copy.status = WorkflowStatus::Failed;

        assert_eq!(
            registry.get(&run.workflow_id).unwrap().status,
            WorkflowStatus::Pending
        );
    }
}
