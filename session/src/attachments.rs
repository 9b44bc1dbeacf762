//! Post-compaction attachment snapshot (spec.md §4.4 "Post-compaction
//! attachments (optional mode)"). Edits observed via `file_edit_*` tool
//! ends since the last compaction are tracked; the next send after a
//! compaction offers a plan-file reference plus one entry per edited file,
//! honoring a caller-provided exclusion set.

use std::collections::HashSet;

use async_trait::async_trait;

/// Reads the well-known per-workspace plan file. A real implementation
/// reads from wherever the runtime keeps it; tests supply a fake.
#[async_trait]
pub trait PlanFileReader: Send + Sync {
    async fn read_plan(&self) -> Option<String>;
}

/// A single edit observed since the last compaction, as reported by a
/// `file_edit_*` tool's end event.
#[derive(Debug, Clone, PartialEq)]
pub struct EditedFileRef {
    pub path: String,
    pub diff: String,
    pub truncated: bool,
}

/// The attachment set offered on the next send after edits accumulated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostCompactionAttachments {
    pub plan: Option<String>,
    pub edited_files: Vec<EditedFileRef>,
}

impl PostCompactionAttachments {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none() && self.edited_files.is_empty()
    }
}

/// Accumulates edits since the last compaction and produces the snapshot a
/// session offers on its next send.
#[derive(Debug, Default)]
pub struct EditTracker {
    edits: Vec<EditedFileRef>,
}

impl EditTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edit observed on a `file_edit_*` tool's end, extracting
    /// `path`/`diff`/`truncated` from its output if present.
    pub fn record(&mut self, tool_name: &str, output: &serde_json::Value) {
        if !tool_name.starts_with("file_edit") {
            return;
        }
        self.edits.push(EditedFileRef {
            path: output.get("path").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
            diff: output.get("diff").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            truncated: output.get("truncated").and_then(|v| v.as_bool()).unwrap_or(false),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    /// Builds the snapshot for the given `plan`, dropping any edited file
    /// whose path is in `excluded`.
    pub fn snapshot(&self, plan: Option<String>, excluded: &HashSet<String>) -> PostCompactionAttachments {
        PostCompactionAttachments {
            plan,
            edited_files: self.edits.iter().filter(|e| !excluded.contains(&e.path)).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn non_file_edit_tools_are_ignored() {
        let mut tracker = EditTracker::new();
        tracker.record("grep", &serde_json::json!({"path": "/a"}));
        assert!(tracker.is_empty());
    }

    #[test]
    fn records_file_edit_tool_ends() {
        let mut tracker = EditTracker::new();
        tracker.record(
            "file_edit_replace",
            &serde_json::json!({"path": "/a.rs", "diff": "+line", "truncated": false}),
        );
        let snap = tracker.snapshot(Some("plan text".to_string()), &HashSet::new());
        assert_eq!(snap.edited_files.len(), 1);
        assert_eq!(snap.edited_files[0].path, "/a.rs");
        assert_eq!(snap.plan.as_deref(), Some("plan text"));
    }

    #[test]
    fn exclusions_drop_matching_paths() {
        let mut tracker = EditTracker::new();
        tracker.record("file_edit_replace", &serde_json::json!({"path": "/a.rs"}));
        tracker.record("file_edit_replace", &serde_json::json!({"path": "/b.rs"}));
        let mut excluded = HashSet::new();
        excluded.insert("/a.rs".to_string());
        let snap = tracker.snapshot(None, &excluded);
        assert_eq!(snap.edited_files.len(), 1);
        assert_eq!(snap.edited_files[0].path, "/b.rs");
    }

    #[test]
    fn clear_resets_tracked_edits() {
        let mut tracker = EditTracker::new();
        tracker.record("file_edit_replace", &serde_json::json!({"path": "/a.rs"}));
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
