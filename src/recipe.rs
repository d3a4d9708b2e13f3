//! Build recipe parsing.
//!
//! A build recipe is a `Dockerfile` carrying up to three recognized
//! directive lines, order-independent, each occurring at most once:
//!
//! - `# NAME: <image-name>` — the name of the image this recipe builds
//!   (required).
//! - `FROM <base-image>` — the base image reference (required). A
//!   reference without a tag is completed with `:latest`.
//! - `# GIT: <url>` — the source repository that produces the base image
//!   (optional). Absent means the image is a *root*: there is no further
//!   upstream dependency to resolve.
//!
//! A missing or duplicated required directive is a fatal
//! [`Error::Descriptor`]: the whole lineage that contains this recipe is
//! unbuildable.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// File name of the build recipe inside a repository working tree.
pub const RECIPE_FILE: &str = "Dockerfile";

/// Parsed build recipe of one repository branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// Declared image name (`# NAME:` directive).
    pub name: String,
    /// Base image reference (`FROM` line), always carrying a tag.
    pub base_image: String,
    /// Source repository of the base image (`# GIT:` directive).
    /// Empty for root images.
    pub base_source_url: String,
}

impl Recipe {
    /// Parse recipe content. `origin` names the (repository, branch)
    /// the content came from and is only used in error messages.
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let mut name: Option<String> = None;
        let mut base_image: Option<String> = None;
        let mut base_source_url: Option<String> = None;

        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("# NAME:") {
                set_once(&mut name, rest.trim(), "# NAME:", origin)?;
            } else if let Some(rest) = line.strip_prefix("FROM ") {
                let mut reference = rest.trim().to_string();
                if !reference.contains(':') {
                    reference.push_str(":latest");
                }
                set_once(&mut base_image, &reference, "FROM", origin)?;
            } else if let Some(rest) = line.strip_prefix("# GIT:") {
                set_once(&mut base_source_url, rest.trim(), "# GIT:", origin)?;
            }
        }

        let name = name.ok_or_else(|| Error::Descriptor {
            origin: origin.to_string(),
            message: "the '# NAME:' directive is missing".to_string(),
        })?;
        let base_image = base_image.ok_or_else(|| Error::Descriptor {
            origin: origin.to_string(),
            message: "the 'FROM' line is missing".to_string(),
        })?;

        Ok(Self {
            name,
            base_image,
            base_source_url: base_source_url.unwrap_or_default(),
        })
    }

    /// Load and parse the recipe from a repository working tree.
    pub fn load(workdir: &Path, origin: &str) -> Result<Self> {
        let path = workdir.join(RECIPE_FILE);
        let content = fs::read_to_string(&path).map_err(|e| Error::Descriptor {
            origin: origin.to_string(),
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::parse(&content, origin)
    }

    /// Whether this recipe declares a root image (no upstream source
    /// repository).
    pub fn is_root(&self) -> bool {
        self.base_source_url.is_empty()
    }

    /// Third-party registry hosts referenced by this recipe.
    ///
    /// An image reference with more than one `/` carries a registry host
    /// as its first component (e.g. `ghcr.io/owner/image`); plain Docker
    /// Hub references (`owner/image`) do not.
    pub fn registry_hosts(&self) -> BTreeSet<String> {
        let mut hosts = BTreeSet::new();
        for reference in [&self.name, &self.base_image] {
            if reference.matches('/').count() > 1 {
                if let Some((host, _)) = reference.split_once('/') {
                    hosts.insert(host.to_string());
                }
            }
        }
        hosts
    }
}

fn set_once(slot: &mut Option<String>, value: &str, directive: &str, origin: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::Descriptor {
            origin: origin.to_string(),
            message: format!("the '{}' directive occurs more than once", directive),
        });
    }
    *slot = Some(value.to_string());
    Ok(())
}

/// Rewrite the tag of the `FROM` line in a working tree's recipe.
///
/// Called before building a dependent image so that its base reference
/// points at the tag its parent was just built with. Only the part after
/// the last `:` is replaced; a tagless reference gets the tag appended.
pub fn rewrite_base_tag(workdir: &Path, new_tag: &str) -> Result<()> {
    let path = workdir.join(RECIPE_FILE);
    let content = fs::read_to_string(&path)?;
    let mut rewritten = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            if !rewritten && line.starts_with("FROM ") {
                rewritten = true;
                match line.rfind(':') {
                    Some(index) => format!("{}:{}", &line[..index], new_tag),
                    None => format!("{}:{}", line, new_tag),
                }
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(&path, lines.join("\n") + "\n")?;
    Ok(())
}
