//! # Dependency Graph Construction
//!
//! Builds the directed acyclic graph of image build dependencies from
//! requested (repository, branch) pairs.
//!
//! ## Process
//!
//! 1.  **Lineage walking**: starting from a requested leaf, the builder
//!     clones the repository, parses its recipe and follows the
//!     `# GIT:` chain upward until it reaches a root image or a vertex
//!     already present in the graph. The walk always moves strictly
//!     toward roots, so the graph can never acquire a cycle.
//!
//! 2.  **Identity resolution**: before a candidate node becomes a new
//!     vertex, every existing vertex of the same repository is checked
//!     for content equivalence — a diff of the two branches with a
//!     configurable exclude set. Branches with no content difference
//!     share a vertex regardless of name; the first equal match in
//!     insertion order wins. Equivalence is never inferred across
//!     different repositories.
//!
//! 3.  **Folding**: the ordered chain attaches to the graph root-first.
//!     An equivalent vertex is only reused when its parent matches the
//!     chain's parent; the same content reached through a different
//!     base is a different build context and gets its own vertex.
//!
//! Graph construction is single-threaded and completes before the
//! (parallel) build phase starts, so the build phase can read the graph
//! without locks.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::{debug, info};
use serde::Serialize;

use crate::config::BuildOptions;
use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::recipe::Recipe;
use crate::source::SourceManager;

/// Index of a vertex inside a [`BuildGraph`].
pub type VertexId = usize;

/// One build unit in the dependency graph.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub source: ImageSource,
    /// The base image's vertex; `None` for roots.
    pub parent: Option<VertexId>,
    /// Vertices whose base image this vertex builds.
    pub children: Vec<VertexId>,
    /// Branch names judged content-equivalent to `source.branch`.
    /// Never contains `source.branch` itself.
    pub equivalent_branches: BTreeSet<String>,
}

/// Directed acyclic graph of build dependencies.
#[derive(Debug, Default)]
pub struct BuildGraph {
    vertices: Vec<Vertex>,
    /// Vertices per repository URL, in insertion order.
    by_url: HashMap<String, Vec<VertexId>>,
    roots: Vec<VertexId>,
    registry_hosts: BTreeSet<String>,
}

impl BuildGraph {
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id]
    }

    pub fn roots(&self) -> &[VertexId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Third-party registry hosts referenced by any recipe in the graph.
    pub fn registry_hosts(&self) -> &BTreeSet<String> {
        &self.registry_hosts
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices.iter().enumerate()
    }

    /// Vertices in dependency order: depth-first from each root, parents
    /// before children.
    pub fn build_order(&self) -> Vec<VertexId> {
        let mut order = Vec::with_capacity(self.vertices.len());
        let mut stack: Vec<VertexId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.vertices[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Whether a vertex for exactly this (repository, branch) pair exists.
    ///
    /// This is a name check, not a content check; the lineage walker uses
    /// it to stop at an ancestor that is already part of the graph.
    fn has_vertex_for(&self, url: &str, branch: &str) -> bool {
        self.by_url
            .get(url)
            .is_some_and(|ids| ids.iter().any(|&id| self.vertices[id].source.branch == branch))
    }

    /// Serialize the graph structure as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct NodeDump {
            node: String,
            repo: String,
            branch: String,
            equivalent_branches: Vec<String>,
        }
        #[derive(Serialize)]
        struct EdgeDump {
            from: String,
            to: String,
        }
        #[derive(Serialize)]
        struct GraphDump {
            nodes: Vec<NodeDump>,
            edges: Vec<EdgeDump>,
            roots: Vec<String>,
        }

        let dump = GraphDump {
            nodes: self
                .vertices
                .iter()
                .map(|v| NodeDump {
                    node: v.source.to_string(),
                    repo: v.source.url.clone(),
                    branch: v.source.branch.clone(),
                    equivalent_branches: v.equivalent_branches.iter().cloned().collect(),
                })
                .collect(),
            edges: self
                .vertices
                .iter()
                .filter_map(|v| {
                    v.parent.map(|p| EdgeDump {
                        from: self.vertices[p].source.to_string(),
                        to: v.source.to_string(),
                    })
                })
                .collect(),
            roots: self
                .roots
                .iter()
                .map(|&id| self.vertices[id].source.to_string())
                .collect(),
        };
        Ok(serde_yaml::to_string(&dump)?)
    }
}

/// One step of a walked lineage, root-first.
struct LineageEntry {
    source: ImageSource,
    /// Normalized upstream repository URL; `None` for roots.
    base_url: Option<String>,
}

/// Incremental builder folding requested lineages into a [`BuildGraph`].
pub struct GraphBuilder<'a> {
    sources: &'a SourceManager,
    branch_fallback: String,
    diff_excludes: Vec<String>,
    graph: BuildGraph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(sources: &'a SourceManager, options: &BuildOptions) -> Self {
        Self {
            sources,
            branch_fallback: options.branch_fallback.clone(),
            diff_excludes: options.diff_excludes.clone(),
            graph: BuildGraph::default(),
        }
    }

    /// Incorporate every (branch, url) pair of a branch map.
    pub fn add_all(&mut self, branches: &crate::config::BranchUrls) -> Result<()> {
        for (branch, urls) in branches {
            for url in urls {
                self.add_lineage(url, branch)?;
            }
        }
        Ok(())
    }

    /// Incorporate one requested lineage into the graph.
    ///
    /// Idempotent: adding the same (or an equivalent) lineage twice does
    /// not create duplicate vertices or edges.
    pub fn add_lineage(&mut self, url: &str, branch: &str) -> Result<()> {
        info!("Resolving lineage of {} at branch {}", url, branch);
        let mut chain = self.walk(url, branch)?;

        let Some(first) = chain.pop_front() else {
            return Ok(());
        };
        let mut prev = match &first.base_url {
            None => self.add_root(first.source)?,
            Some(base_url) => {
                // the walker stopped because this ancestor is already in
                // the graph; its vertex must be resolvable now
                let base = ImageSource::new(base_url, branch);
                let parent =
                    self.resolve_equivalent(&base)?
                        .ok_or_else(|| Error::Consistency {
                            message: format!(
                                "expected base vertex {} to be present in the graph",
                                base
                            ),
                        })?;
                self.attach(parent, first.source)?
            }
        };
        for entry in chain {
            prev = self.attach(prev, entry.source)?;
        }
        Ok(())
    }

    /// Finish construction and return the graph.
    pub fn finish(self) -> BuildGraph {
        self.graph
    }

    /// Walk the `base-image → source-repository` chain upward from the
    /// requested leaf until a root or an already-present vertex, and
    /// return the chain root-first.
    ///
    /// A missing or malformed recipe anywhere in the chain aborts the
    /// whole lineage: a broken ancestor makes every descendant
    /// unbuildable.
    fn walk(&mut self, url: &str, branch: &str) -> Result<VecDeque<LineageEntry>> {
        let mut chain = VecDeque::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut source = ImageSource::new(url, branch);
        loop {
            if !seen.insert(source.url.clone()) {
                return Err(Error::Consistency {
                    message: format!(
                        "cyclic base image declarations involving {}",
                        source.url
                    ),
                });
            }
            let workdir =
                self.sources
                    .checkout_source(&source.url, &source.branch, &self.branch_fallback)?;
            let recipe = Recipe::load(&workdir, &source.to_string())?;
            self.graph.registry_hosts.extend(recipe.registry_hosts());

            let base_url = if recipe.is_root() {
                None
            } else {
                Some(ImageSource::new(&recipe.base_source_url, branch).url)
            };
            let stop_at_known = base_url
                .as_deref()
                .is_some_and(|base| self.graph.has_vertex_for(base, branch));
            let next = base_url.clone();
            chain.push_front(LineageEntry { source, base_url });

            match next {
                None => break,
                Some(_) if stop_at_known => break,
                Some(base) => source = ImageSource::new(&base, branch),
            }
        }
        Ok(chain)
    }

    /// Find an existing vertex of the same repository whose branch has
    /// identical content. Insertion order decides ties.
    fn resolve_equivalent(&self, source: &ImageSource) -> Result<Option<VertexId>> {
        debug!("Looking for a vertex equivalent to {}", source);
        let Some(ids) = self.graph.by_url.get(&source.url) else {
            return Ok(None);
        };
        for &id in ids {
            let existing = &self.graph.vertices[id].source;
            if self.sources.branches_identical(
                &source.url,
                &existing.branch,
                &source.branch,
                &self.diff_excludes,
            )? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn add_root(&mut self, source: ImageSource) -> Result<VertexId> {
        debug!("Adding root vertex {}", source);
        match self.resolve_equivalent(&source)? {
            Some(id) if self.graph.vertices[id].parent.is_none() => {
                self.record_equivalent_branch(id, &source.branch);
                Ok(id)
            }
            // an equivalent vertex with a parent is a different build
            // context; this request wants a true root
            _ => Ok(self.insert(source, None)),
        }
    }

    /// Attach `source` below `parent`, reusing an equivalent vertex only
    /// when its recorded parent is the same.
    fn attach(&mut self, parent: VertexId, source: ImageSource) -> Result<VertexId> {
        debug!(
            "Adding edge {} -> {}",
            self.graph.vertices[parent].source, source
        );
        match self.resolve_equivalent(&source)? {
            None => Ok(self.insert(source, Some(parent))),
            Some(id) if self.graph.vertices[id].parent != Some(parent) => {
                // same content reached through a different base must not
                // be merged
                Ok(self.insert(source, Some(parent)))
            }
            Some(id) => {
                self.record_equivalent_branch(id, &source.branch);
                Ok(id)
            }
        }
    }

    fn record_equivalent_branch(&mut self, id: VertexId, branch: &str) {
        let vertex = &mut self.graph.vertices[id];
        if vertex.source.branch != branch {
            vertex.equivalent_branches.insert(branch.to_string());
        }
    }

    fn insert(&mut self, source: ImageSource, parent: Option<VertexId>) -> VertexId {
        let id = self.graph.vertices.len();
        self.graph
            .by_url
            .entry(source.url.clone())
            .or_default()
            .push(id);
        self.graph.vertices.push(Vertex {
            source,
            parent,
            children: Vec::new(),
            equivalent_branches: BTreeSet::new(),
        });
        match parent {
            Some(parent) => self.graph.vertices[parent].children.push(id),
            None => self.graph.roots.push(id),
        }
        id
    }
}
