use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;

/// Lifecycle state of one visualization task. `Ready` and `Failed` are
/// terminal until a fresh request overwrites the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Generating,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationTask {
    pub message_id: String,
    pub phase: TaskPhase,
    /// Absent exactly while generating. For failed tasks this holds an
    /// error-styled fragment, so document rendering never needs a null
    /// check.
    pub artifact: Option<String>,
    pub visible: bool,
    /// Bumped by every new request for this id; outcomes carrying an
    /// older value are stale and must be discarded.
    pub request_seq: u64,
    pub updated_at: String,
}

/// Partial update merged into a task by [`VizStore::upsert`]. Fields left
/// as `None` keep the stored value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub phase: Option<TaskPhase>,
    pub artifact: Option<Option<String>>,
    pub visible: Option<bool>,
    pub request_seq: Option<u64>,
}

impl TaskPatch {
    pub fn generating() -> Self {
        Self {
            phase: Some(TaskPhase::Generating),
            artifact: Some(None),
            visible: Some(true),
            request_seq: None,
        }
    }

    pub fn ready(artifact: impl Into<String>) -> Self {
        Self {
            phase: Some(TaskPhase::Ready),
            artifact: Some(Some(artifact.into())),
            visible: None,
            request_seq: None,
        }
    }

    pub fn failed(fragment: impl Into<String>) -> Self {
        Self {
            phase: Some(TaskPhase::Failed),
            artifact: Some(Some(fragment.into())),
            visible: None,
            request_seq: None,
        }
    }
}

/// Keyed task table plus the single selection pointer. Mutated only from
/// the owner thread; workers report back through channels and never touch
/// the store directly.
#[derive(Debug, Clone, Default)]
pub struct VizStore {
    tasks: IndexMap<String, VisualizationTask>,
    selected: Option<String>,
}

impl VizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only mutation primitive: merge `patch` into the entry for
    /// `message_id`, creating it with generating defaults if absent.
    pub fn upsert(&mut self, message_id: &str, patch: TaskPatch) {
        let entry = self
            .tasks
            .entry(message_id.to_string())
            .or_insert_with(|| VisualizationTask {
                message_id: message_id.to_string(),
                phase: TaskPhase::Generating,
                artifact: None,
                visible: true,
                request_seq: 0,
                updated_at: now_utc_iso(),
            });
        if let Some(phase) = patch.phase {
            entry.phase = phase;
        }
        if let Some(artifact) = patch.artifact {
            entry.artifact = artifact;
        }
        if let Some(visible) = patch.visible {
            entry.visible = visible;
        }
        if let Some(request_seq) = patch.request_seq {
            entry.request_seq = request_seq;
        }
        entry.updated_at = now_utc_iso();
    }

    pub fn get(&self, message_id: &str) -> Option<&VisualizationTask> {
        self.tasks.get(message_id)
    }

    pub fn select(&mut self, message_id: Option<&str>) {
        self.selected = message_id.map(str::to_string);
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Start a new request for `message_id`: select it, reset the entry
    /// to a visible generating state, and hand back the bumped sequence
    /// number the eventual outcome must present.
    pub fn begin_request(&mut self, message_id: &str) -> u64 {
        let seq = self.request_seq(message_id).unwrap_or(0) + 1;
        let mut patch = TaskPatch::generating();
        patch.request_seq = Some(seq);
        self.upsert(message_id, patch);
        self.select(Some(message_id));
        seq
    }

    pub fn request_seq(&self, message_id: &str) -> Option<u64> {
        self.tasks.get(message_id).map(|task| task.request_seq)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &VisualizationTask> {
        self.tasks.values()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::{TaskPatch, TaskPhase, VizStore};

    #[test]
    fn upsert_creates_with_generating_defaults() {
        let mut store = VizStore::new();
        store.upsert("m1", TaskPatch::default());

        let task = store.get("m1").expect("task created");
        assert_eq!(task.phase, TaskPhase::Generating);
        assert_eq!(task.artifact, None);
        assert!(task.visible);
        assert_eq!(task.request_seq, 0);
    }

    #[test]
    fn upsert_merges_only_patched_fields() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.upsert("m1", TaskPatch::ready("<html></html>"));

        let task = store.get("m1").expect("task present");
        assert_eq!(task.phase, TaskPhase::Ready);
        assert_eq!(task.artifact.as_deref(), Some("<html></html>"));
        assert!(task.visible, "visibility untouched by the ready patch");
        assert_eq!(task.request_seq, 1, "sequence untouched by the ready patch");
    }

    #[test]
    fn begin_request_selects_and_resets_entry() {
        let mut store = VizStore::new();
        store.upsert("m1", TaskPatch::failed("<div>boom</div>"));

        let seq = store.begin_request("m1");
        assert_eq!(seq, 1);
        assert_eq!(store.selected(), Some("m1"));

        let task = store.get("m1").expect("task present");
        assert_eq!(task.phase, TaskPhase::Generating);
        assert_eq!(task.artifact, None, "artifact cleared while generating");
        assert!(task.visible);
    }

    #[test]
    fn begin_request_bumps_sequence_per_call() {
        let mut store = VizStore::new();
        assert_eq!(store.begin_request("m1"), 1);
        assert_eq!(store.begin_request("m1"), 2);
        assert_eq!(store.begin_request("m2"), 1, "sequences are per key");
        assert_eq!(store.request_seq("m1"), Some(2));
    }

    #[test]
    fn select_none_is_idempotent() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.select(None);
        let before = store.get("m1").cloned();

        store.select(None);
        assert_eq!(store.selected(), None);
        assert_eq!(store.get("m1").cloned(), before);
    }

    #[test]
    fn selection_does_not_touch_other_tasks() {
        let mut store = VizStore::new();
        store.begin_request("m1");
        store.begin_request("m2");
        assert_eq!(store.selected(), Some("m2"));

        let m1 = store.get("m1").expect("m1 present");
        assert_eq!(m1.phase, TaskPhase::Generating);
        assert_eq!(m1.request_seq, 1);
    }
}
