//! Per-vertex build outcomes and the run report.
//!
//! The driver never raises out of the traversal; every build, tag and
//! push attempt is recorded here as an [`ActionRecord`] inside a
//! [`VertexReport`], and the run's failures only surface as a single
//! [`Error::BuildFailed`] produced by [`BuildReport::aggregate_error`]
//! after traversal has finished.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, VertexFailure};
use crate::graph::Vertex;

/// Kind of an image engine action attempted for a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Build,
    Tag,
    Push,
}

/// One attempted engine operation.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    /// Image name the action applied to.
    pub image: String,
    /// Tag the action produced or pushed.
    pub tag: String,
    pub action: ActionKind,
    /// Wall-clock duration of the attempt (including retries for pushes).
    pub seconds: f64,
    pub succeeded: bool,
    /// Captured error text for a failed attempt.
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn success(image: &str, tag: &str, action: ActionKind, seconds: f64) -> Self {
        Self {
            image: image.to_string(),
            tag: tag.to_string(),
            action,
            seconds,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(image: &str, tag: &str, action: ActionKind, seconds: f64, error: String) -> Self {
        Self {
            image: image.to_string(),
            tag: tag.to_string(),
            action,
            seconds,
            succeeded: false,
            error: Some(error),
        }
    }
}

/// Terminal state of one vertex after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VertexStatus {
    /// Build and every follow-up action succeeded.
    Built,
    /// The build or a follow-up tag/push failed.
    Failed,
    /// An ancestor failed, so this vertex was never attempted.
    SubtreeSkipped,
    /// The run was cancelled before this vertex was attempted.
    Cancelled,
}

/// Everything recorded for one vertex during a run.
#[derive(Debug, Clone, Serialize)]
pub struct VertexReport {
    /// Short display name, e.g. `owner/repo<dev>`.
    pub node: String,
    pub branch: String,
    pub equivalent_branches: Vec<String>,
    pub status: VertexStatus,
    /// Image name from the recipe; `None` when the recipe was never read.
    pub image_name: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl VertexReport {
    /// Report for a vertex that was never attempted.
    pub fn unattempted(vertex: &Vertex, status: VertexStatus) -> Self {
        Self {
            node: vertex.source.to_string(),
            branch: vertex.source.branch.clone(),
            equivalent_branches: vertex.equivalent_branches.iter().cloned().collect(),
            status,
            image_name: None,
            actions: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Concatenated error text of this vertex's failed actions.
    pub fn error_text(&self) -> String {
        self.actions
            .iter()
            .filter_map(|a| a.error.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Accumulated results of one build run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub vertices: Vec<VertexReport>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.status != VertexStatus::Failed)
    }

    /// The aggregate error for this run, if any vertex failed.
    pub fn aggregate_error(&self) -> Option<Error> {
        let failures: Vec<VertexFailure> = self
            .vertices
            .iter()
            .filter(|v| v.status == VertexStatus::Failed)
            .map(|v| VertexFailure {
                node: v.node.clone(),
                equivalent_branches: v.equivalent_branches.clone(),
                message: v.error_text(),
            })
            .collect();
        if failures.is_empty() {
            None
        } else {
            Some(Error::BuildFailed { failures })
        }
    }

    /// Render a human-readable run summary.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for vertex in &self.vertices {
            let status = match vertex.status {
                VertexStatus::Built => "built",
                VertexStatus::Failed => "FAILED",
                VertexStatus::SubtreeSkipped => "skipped (ancestor failed)",
                VertexStatus::Cancelled => "cancelled",
            };
            lines.push(format!("{}: {}", vertex.node, status));
            for action in &vertex.actions {
                let kind = match action.action {
                    ActionKind::Build => "build",
                    ActionKind::Tag => "tag",
                    ActionKind::Push => "push",
                };
                let outcome = if action.succeeded { "ok" } else { "failed" };
                lines.push(format!(
                    "  {} {}:{} - {} ({:.1}s)",
                    kind, action.image, action.tag, outcome, action.seconds
                ));
            }
        }
        let failed = self
            .vertices
            .iter()
            .filter(|v| v.status == VertexStatus::Failed)
            .count();
        lines.push(format!(
            "{} node(s) processed, {} failed",
            self.vertices.len(),
            failed
        ));
        lines.join("\n")
    }

    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageSource;

    fn vertex(url: &str, branch: &str) -> Vertex {
        Vertex {
            source: ImageSource::new(url, branch),
            parent: None,
            children: Vec::new(),
            equivalent_branches: Default::default(),
        }
    }

    fn built_report(node: &str) -> VertexReport {
        VertexReport {
            node: node.to_string(),
            branch: "dev".to_string(),
            equivalent_branches: vec![],
            status: VertexStatus::Built,
            image_name: Some("owner/image".to_string()),
            actions: vec![ActionRecord::success(
                "owner/image",
                "next",
                ActionKind::Build,
                1.5,
            )],
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_unattempted_report() {
        let v = vertex("https://github.com/owner/repo", "dev");
        let report = VertexReport::unattempted(&v, VertexStatus::SubtreeSkipped);
        assert_eq!(report.node, "owner/repo<dev>");
        assert_eq!(report.status, VertexStatus::SubtreeSkipped);
        assert!(report.actions.is_empty());
        assert!(report.started_at.is_none());
    }

    #[test]
    fn test_aggregate_error_none_when_all_built() {
        let report = BuildReport {
            vertices: vec![built_report("a<dev>"), built_report("b<dev>")],
        };
        assert!(report.is_success());
        assert!(report.aggregate_error().is_none());
    }

    #[test]
    fn test_aggregate_error_lists_failures_only() {
        let mut failed = built_report("b<dev>");
        failed.status = VertexStatus::Failed;
        failed.actions = vec![ActionRecord::failure(
            "owner/b",
            "next",
            ActionKind::Build,
            0.2,
            "layer 3 exploded".to_string(),
        )];
        let report = BuildReport {
            vertices: vec![built_report("a<dev>"), failed],
        };

        assert!(!report.is_success());
        let error = report.aggregate_error().unwrap();
        let display = error.to_string();
        assert!(display.contains("1 node(s)"));
        assert!(display.contains("b<dev>"));
        assert!(display.contains("layer 3 exploded"));
        assert!(!display.contains("a<dev> "));
    }

    #[test]
    fn test_summary_mentions_every_vertex() {
        let mut skipped = built_report("c<dev>");
        skipped.status = VertexStatus::SubtreeSkipped;
        skipped.actions.clear();
        let report = BuildReport {
            vertices: vec![built_report("a<dev>"), skipped],
        };
        let summary = report.summary();
        assert!(summary.contains("a<dev>: built"));
        assert!(summary.contains("c<dev>: skipped"));
        assert!(summary.contains("2 node(s) processed, 0 failed"));
    }

    #[test]
    fn test_json_round_trip_shape() {
        let report = BuildReport {
            vertices: vec![built_report("a<dev>")],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"node\": \"a<dev>\""));
        assert!(json.contains("\"action\": \"build\""));
    }
}
