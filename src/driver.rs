//! # Build Driver
//!
//! Drives the container engine over a finished [`BuildGraph`] in
//! dependency order: each root subtree is processed on its own rayon
//! worker, and within a subtree a vertex is built strictly before its
//! children.
//!
//! ## Failure handling
//!
//! A vertex failure never aborts the run. The failed vertex is recorded,
//! its whole subtree is marked skipped, and every other root subtree
//! proceeds untouched. The caller turns the accumulated
//! [`BuildReport`] into a single aggregate error at the end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use rayon::prelude::*;

use crate::config::BuildOptions;
use crate::engine::ImageEngine;
use crate::error::Result;
use crate::graph::{BuildGraph, Vertex, VertexId};
use crate::image::{branch_to_tag, date_tag, resolve_build_tag};
use crate::recipe::{self, Recipe};
use crate::report::{ActionKind, ActionRecord, BuildReport, VertexReport, VertexStatus};
use crate::retry::{retry, RetryPolicy};
use crate::source::SourceManager;

/// Cooperative cancellation flag shared between the driver and its
/// caller. Cancelling stops new vertices from starting; the vertex
/// currently building runs to completion.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes the builds of a dependency graph against an injected
/// [`ImageEngine`].
pub struct BuildDriver<'a> {
    graph: &'a BuildGraph,
    sources: &'a SourceManager,
    engine: &'a dyn ImageEngine,
    options: &'a BuildOptions,
    cancel: CancelToken,
}

impl<'a> BuildDriver<'a> {
    pub fn new(
        graph: &'a BuildGraph,
        sources: &'a SourceManager,
        engine: &'a dyn ImageEngine,
        options: &'a BuildOptions,
    ) -> Self {
        Self {
            graph,
            sources,
            engine,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// A handle for cancelling this driver's run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build every vertex of the graph in dependency order.
    ///
    /// Registry logins happen up front and abort the run when they fail;
    /// everything after that is recorded per vertex and returned as a
    /// [`BuildReport`] even when vertices fail.
    pub fn run(&self) -> Result<BuildReport> {
        for host in self.graph.registry_hosts() {
            self.engine.login(host)?;
        }

        let subtrees: Vec<Vec<VertexReport>> = self
            .graph
            .roots()
            .par_iter()
            .map(|&root| {
                let mut reports = Vec::new();
                self.build_subtree(root, &mut reports);
                reports
            })
            .collect();

        Ok(BuildReport {
            vertices: subtrees.into_iter().flatten().collect(),
        })
    }

    fn build_subtree(&self, id: VertexId, reports: &mut Vec<VertexReport>) {
        if self.cancel.is_cancelled() {
            self.mark_subtree(id, VertexStatus::Cancelled, reports);
            return;
        }

        let index = reports.len();
        let report = self.build_vertex(id);
        let built = report.status == VertexStatus::Built;
        reports.push(report);

        let vertex = self.graph.vertex(id);
        if built {
            for &child in &vertex.children {
                self.build_subtree(child, reports);
            }
            if self.options.remove {
                self.remove_images(&reports[index]);
            }
        } else {
            for &child in &vertex.children {
                self.mark_subtree(child, VertexStatus::SubtreeSkipped, reports);
            }
        }
    }

    fn mark_subtree(&self, id: VertexId, status: VertexStatus, reports: &mut Vec<VertexReport>) {
        let vertex = self.graph.vertex(id);
        reports.push(VertexReport::unattempted(vertex, status));
        for &child in &vertex.children {
            self.mark_subtree(child, status, reports);
        }
    }

    fn build_vertex(&self, id: VertexId) -> VertexReport {
        let vertex = self.graph.vertex(id);
        info!("Processing {} ...", vertex.source);
        let mut report = VertexReport::unattempted(vertex, VertexStatus::Built);
        report.started_at = Some(Utc::now());

        let tag = resolve_build_tag(self.options.tag_build.as_deref(), &vertex.source.branch);
        let started = Instant::now();
        match self.build_image(vertex, &tag) {
            Ok(image) => {
                report.image_name = Some(image.clone());
                report.actions.push(ActionRecord::success(
                    &image,
                    &tag,
                    ActionKind::Build,
                    started.elapsed().as_secs_f64(),
                ));
                self.follow_up(&image, &tag, vertex, &mut report);
            }
            Err(message) => {
                report.actions.push(ActionRecord::failure(
                    &vertex.source.to_string(),
                    &tag,
                    ActionKind::Build,
                    started.elapsed().as_secs_f64(),
                    message,
                ));
            }
        }

        if report.actions.iter().any(|a| !a.succeeded) {
            report.status = VertexStatus::Failed;
        }
        report.finished_at = Some(Utc::now());
        report
    }

    /// Check out, prepare and build one vertex's image, returning its
    /// name. The whole sequence holds the repository lock: checking out a
    /// branch and rewriting the base tag mutate the working tree shared
    /// with sibling subtrees.
    fn build_image(&self, vertex: &Vertex, tag: &str) -> std::result::Result<String, String> {
        let url = &vertex.source.url;
        let lock = self.sources.repo_lock(url).map_err(|e| e.to_string())?;
        let _guard = lock
            .lock()
            .map_err(|_| "source repository lock poisoned".to_string())?;

        let workdir = self
            .sources
            .checkout_source(url, &vertex.source.branch, &self.options.branch_fallback)
            .map_err(|e| e.to_string())?;
        let recipe =
            Recipe::load(&workdir, &vertex.source.to_string()).map_err(|e| e.to_string())?;

        if let Some(parent) = vertex.parent {
            // point the base reference at the tag the parent was just
            // built with
            let parent_branch = &self.graph.vertex(parent).source.branch;
            let parent_tag = resolve_build_tag(self.options.tag_build.as_deref(), parent_branch);
            recipe::rewrite_base_tag(&workdir, &parent_tag).map_err(|e| e.to_string())?;
        }

        self.engine
            .build(&workdir, &recipe.name, tag, vertex.parent.is_none())
            .map_err(|e| e.to_string())?;
        Ok(recipe.name)
    }

    /// Apply the extra tags of a freshly built image and push everything.
    /// Stops at the first failed action.
    fn follow_up(&self, image: &str, tag: &str, vertex: &Vertex, report: &mut VertexReport) {
        let extra_tags = extra_tags(tag, vertex);

        for new_tag in &extra_tags {
            let started = Instant::now();
            match self.engine.tag(image, tag, new_tag) {
                Ok(()) => report.actions.push(ActionRecord::success(
                    image,
                    new_tag,
                    ActionKind::Tag,
                    started.elapsed().as_secs_f64(),
                )),
                Err(error) => {
                    report.actions.push(ActionRecord::failure(
                        image,
                        new_tag,
                        ActionKind::Tag,
                        started.elapsed().as_secs_f64(),
                        error.to_string(),
                    ));
                    return;
                }
            }
        }

        if !self.options.push {
            return;
        }
        let policy = RetryPolicy {
            attempts: self.options.push_attempts,
            backoff: Duration::from_secs(self.options.push_backoff_secs),
        };
        for push_tag in std::iter::once(tag).chain(extra_tags.iter().map(String::as_str)) {
            let started = Instant::now();
            match retry(policy, "push", || self.engine.push(image, push_tag)) {
                Ok(()) => report.actions.push(ActionRecord::success(
                    image,
                    push_tag,
                    ActionKind::Push,
                    started.elapsed().as_secs_f64(),
                )),
                Err(error) => {
                    report.actions.push(ActionRecord::failure(
                        image,
                        push_tag,
                        ActionKind::Push,
                        started.elapsed().as_secs_f64(),
                        error.to_string(),
                    ));
                    return;
                }
            }
        }
    }

    /// Remove a built vertex's local tags. Removal is cleanup, so a
    /// failure is logged but never fails the vertex.
    fn remove_images(&self, report: &VertexReport) {
        let Some(image) = report.image_name.as_deref() else {
            return;
        };
        for action in &report.actions {
            if !action.succeeded {
                continue;
            }
            if !matches!(action.action, ActionKind::Build | ActionKind::Tag) {
                continue;
            }
            if let Err(error) = self.engine.remove(image, &action.tag) {
                warn!("Failed to remove {}:{}: {}", image, action.tag, error);
            }
        }
    }
}

/// Tags applied on top of the build tag: the date-stamped build tag,
/// plus the derived and date-stamped tags of every equivalent branch.
/// Deduplicated, never repeating the build tag itself.
fn extra_tags(tag: &str, vertex: &Vertex) -> Vec<String> {
    let mut tags = vec![date_tag(tag)];
    for branch in &vertex.equivalent_branches {
        let derived = branch_to_tag(branch);
        tags.push(date_tag(&derived));
        tags.push(derived);
    }
    let mut seen = std::collections::BTreeSet::from([tag.to_string()]);
    tags.retain(|t| seen.insert(t.clone()));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildOptions;
    use crate::engine::{EngineError, EngineResult};
    use crate::graph::GraphBuilder;
    use crate::source::VcsOperations;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    struct ScriptedVcs {
        recipes: HashMap<(String, String), String>,
    }

    impl ScriptedVcs {
        fn new() -> Self {
            Self {
                recipes: HashMap::new(),
            }
        }

        fn recipe(mut self, url: &str, branch: &str, content: &str) -> Self {
            self.recipes
                .insert((url.to_string(), branch.to_string()), content.to_string());
            self
        }
    }

    impl VcsOperations for ScriptedVcs {
        fn clone_repo(&self, url: &str, dest: &Path) -> crate::error::Result<()> {
            fs::create_dir_all(dest)?;
            fs::write(dest.join(".origin"), url)?;
            Ok(())
        }

        fn checkout(
            &self,
            workdir: &Path,
            branch: &str,
            _fallback: &str,
        ) -> crate::error::Result<()> {
            let url = fs::read_to_string(workdir.join(".origin"))?;
            if let Some(content) = self.recipes.get(&(url, branch.to_string())) {
                fs::write(workdir.join(crate::recipe::RECIPE_FILE), content)?;
            }
            Ok(())
        }

        fn branches_differ(
            &self,
            workdir: &Path,
            a: &str,
            b: &str,
            _exclude: &[String],
        ) -> crate::error::Result<bool> {
            let url = fs::read_to_string(workdir.join(".origin"))?;
            let left = self.recipes.get(&(url.clone(), a.to_string()));
            let right = self.recipes.get(&(url, b.to_string()));
            Ok(left != right)
        }
    }

    /// Engine recording every call; failures are scripted per image name
    /// (builds) or per reference with a countdown (pushes).
    #[derive(Default)]
    struct MockEngine {
        calls: Mutex<Vec<String>>,
        fail_builds: Vec<String>,
        transient_push_failures: Mutex<HashMap<String, u32>>,
    }

    impl MockEngine {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn with_failing_build(image: &str) -> Self {
            Self {
                fail_builds: vec![image.to_string()],
                ..Self::default()
            }
        }

        fn with_transient_push_failures(reference: &str, count: u32) -> Self {
            let engine = Self::default();
            engine
                .transient_push_failures
                .lock()
                .unwrap()
                .insert(reference.to_string(), count);
            engine
        }
    }

    impl ImageEngine for MockEngine {
        fn build(
            &self,
            _context: &Path,
            image: &str,
            tag: &str,
            _pull_base: bool,
        ) -> EngineResult<()> {
            self.record(format!("build {}:{}", image, tag));
            if self.fail_builds.iter().any(|i| i == image) {
                return Err(EngineError {
                    operation: "build".to_string(),
                    image: format!("{}:{}", image, tag),
                    message: "scripted build failure".to_string(),
                    transient: false,
                });
            }
            Ok(())
        }

        fn tag(&self, image: &str, tag: &str, new_tag: &str) -> EngineResult<()> {
            self.record(format!("tag {}:{}->{}", image, tag, new_tag));
            Ok(())
        }

        fn push(&self, image: &str, tag: &str) -> EngineResult<()> {
            let reference = format!("{}:{}", image, tag);
            self.record(format!("push {}", reference));
            let mut failures = self.transient_push_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&reference) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError {
                        operation: "push".to_string(),
                        image: reference,
                        message: "scripted timeout".to_string(),
                        transient: true,
                    });
                }
            }
            Ok(())
        }

        fn pull(&self, image: &str, tag: &str) -> EngineResult<()> {
            self.record(format!("pull {}:{}", image, tag));
            Ok(())
        }

        fn remove(&self, image: &str, tag: &str) -> EngineResult<()> {
            self.record(format!("rmi {}:{}", image, tag));
            Ok(())
        }

        fn login(&self, host: &str) -> EngineResult<()> {
            self.record(format!("login {}", host));
            Ok(())
        }
    }

    const BASE_URL: &str = "https://github.com/owner/base";
    const CHILD_URL: &str = "https://github.com/owner/child";
    const LONER_URL: &str = "https://github.com/owner/loner";

    fn base_recipe() -> String {
        "# NAME: img/base\nFROM debian:12\n".to_string()
    }

    fn child_recipe() -> String {
        format!("# NAME: img/child\nFROM img/base:next\n# GIT: {}\n", BASE_URL)
    }

    fn loner_recipe() -> String {
        "# NAME: img/loner\nFROM alpine:3\n".to_string()
    }

    fn quiet_options() -> BuildOptions {
        BuildOptions {
            push: false,
            push_backoff_secs: 0,
            ..BuildOptions::default()
        }
    }

    fn fixture(
        vcs: ScriptedVcs,
        lineages: &[(&str, &str)],
        options: &BuildOptions,
    ) -> (SourceManager, crate::graph::BuildGraph) {
        let sources = SourceManager::with_operations(Box::new(vcs)).unwrap();
        let mut builder = GraphBuilder::new(&sources, options);
        for (url, branch) in lineages {
            builder.add_lineage(url, branch).unwrap();
        }
        let graph = builder.finish();
        (sources, graph)
    }

    #[test]
    fn test_parent_builds_before_child() {
        let options = quiet_options();
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(CHILD_URL, "dev", &child_recipe());
        let (sources, graph) = fixture(vcs, &[(CHILD_URL, "dev")], &options);
        let engine = MockEngine::default();

        let report = BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        assert!(report.is_success());
        let calls = engine.calls();
        let base = calls.iter().position(|c| c == "build img/base:next").unwrap();
        let child = calls.iter().position(|c| c == "build img/child:next").unwrap();
        assert!(base < child);
    }

    #[test]
    fn test_failed_parent_skips_subtree_but_not_siblings() {
        let options = quiet_options();
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(CHILD_URL, "dev", &child_recipe())
            .recipe(LONER_URL, "dev", &loner_recipe());
        let (sources, graph) = fixture(vcs, &[(CHILD_URL, "dev"), (LONER_URL, "dev")], &options);
        let engine = MockEngine::with_failing_build("img/base");

        let report = BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        assert!(!report.is_success());
        let status = |node: &str| {
            report
                .vertices
                .iter()
                .find(|v| v.node == node)
                .unwrap()
                .status
        };
        assert_eq!(status("owner/base<dev>"), VertexStatus::Failed);
        assert_eq!(status("owner/child<dev>"), VertexStatus::SubtreeSkipped);
        assert_eq!(status("owner/loner<dev>"), VertexStatus::Built);

        let calls = engine.calls();
        assert!(!calls.iter().any(|c| c.starts_with("build img/child")));
        assert!(calls.iter().any(|c| c == "build img/loner:next"));

        let error = report.aggregate_error().unwrap().to_string();
        assert!(error.contains("1 node(s)"));
        assert!(error.contains("scripted build failure"));
    }

    #[test]
    fn test_equivalent_branches_get_their_tags() {
        let options = quiet_options();
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(BASE_URL, "main", &base_recipe());
        let (sources, graph) = fixture(vcs, &[(BASE_URL, "dev"), (BASE_URL, "main")], &options);
        assert_eq!(graph.len(), 1);
        let engine = MockEngine::default();

        let report = BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        assert!(report.is_success());
        let calls = engine.calls();
        // the merged branch's derived tag plus date stamps for both;
        // the latest stamp is the bare date
        assert!(calls.iter().any(|c| c == "tag img/base:next->latest"));
        assert!(calls.iter().any(|c| c.starts_with("tag img/base:next->next_")));
        assert!(calls.iter().any(|c| {
            c.strip_prefix("tag img/base:next->")
                .is_some_and(|t| t.len() == 6 && t.chars().all(|ch| ch.is_ascii_digit()))
        }));
    }

    #[test]
    fn test_push_retries_transient_failures() {
        let options = BuildOptions {
            push_backoff_secs: 0,
            ..BuildOptions::default()
        };
        let vcs = ScriptedVcs::new().recipe(BASE_URL, "dev", &base_recipe());
        let (sources, graph) = fixture(vcs, &[(BASE_URL, "dev")], &options);
        let engine = MockEngine::with_transient_push_failures("img/base:next", 1);

        let report = BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        assert!(report.is_success());
        let pushes = engine
            .calls()
            .iter()
            .filter(|c| *c == "push img/base:next")
            .count();
        assert_eq!(pushes, 2);
    }

    #[test]
    fn test_no_push_when_disabled() {
        let options = quiet_options();
        let vcs = ScriptedVcs::new().recipe(BASE_URL, "dev", &base_recipe());
        let (sources, graph) = fixture(vcs, &[(BASE_URL, "dev")], &options);
        let engine = MockEngine::default();

        BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        assert!(!engine.calls().iter().any(|c| c.starts_with("push ")));
    }

    #[test]
    fn test_remove_cleans_up_after_subtree() {
        let options = BuildOptions {
            remove: true,
            ..quiet_options()
        };
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(CHILD_URL, "dev", &child_recipe());
        let (sources, graph) = fixture(vcs, &[(CHILD_URL, "dev")], &options);
        let engine = MockEngine::default();

        BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        let calls = engine.calls();
        assert!(calls.iter().any(|c| c == "rmi img/base:next"));
        assert!(calls.iter().any(|c| c == "rmi img/child:next"));
        // the base image must outlive its child's build
        let child_build = calls.iter().position(|c| c == "build img/child:next").unwrap();
        let base_rmi = calls.iter().position(|c| c == "rmi img/base:next").unwrap();
        assert!(child_build < base_rmi);
    }

    #[test]
    fn test_cancelled_run_attempts_nothing() {
        let options = quiet_options();
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(CHILD_URL, "dev", &child_recipe());
        let (sources, graph) = fixture(vcs, &[(CHILD_URL, "dev")], &options);
        let engine = MockEngine::default();

        let driver = BuildDriver::new(&graph, &sources, &engine, &options);
        driver.cancel_token().cancel();
        let report = driver.run().unwrap();

        assert!(engine.calls().is_empty());
        assert_eq!(report.vertices.len(), 2);
        assert!(report
            .vertices
            .iter()
            .all(|v| v.status == VertexStatus::Cancelled));
        // cancellation is not a failure
        assert!(report.aggregate_error().is_none());
    }

    #[test]
    fn test_custom_build_tag_overrides_branch() {
        let options = BuildOptions {
            tag_build: Some("nightly".to_string()),
            ..quiet_options()
        };
        let vcs = ScriptedVcs::new()
            .recipe(BASE_URL, "dev", &base_recipe())
            .recipe(CHILD_URL, "dev", &child_recipe());
        let (sources, graph) = fixture(vcs, &[(CHILD_URL, "dev")], &options);
        let engine = MockEngine::default();

        BuildDriver::new(&graph, &sources, &engine, &options)
            .run()
            .unwrap();

        let calls = engine.calls();
        assert!(calls.iter().any(|c| c == "build img/base:nightly"));
        assert!(calls.iter().any(|c| c == "build img/child:nightly"));
    }
}
