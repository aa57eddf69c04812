//! Build-graph assembly from a [`PackageManifest`].
//!
//! Declarations are processed in order: a dependency must be declared
//! before a target references it, and a target may only link targets
//! declared above it.

use cconartist_schema::manifest::{ArtifactKind, ArtifactRef, DependencyDecl, TargetDecl};
use cconartist_schema::PackageManifest;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors assembling or querying a [`BuildGraph`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// A dependency package is declared twice, or shares the package's name.
    #[error("duplicate package '{0}'")]
    DuplicatePackage(String),

    /// Two targets share a name.
    #[error("duplicate target '{0}'")]
    DuplicateTarget(String),

    /// A target references a package that was never declared.
    #[error("target '{target}' references undeclared package '{package}'")]
    UnknownPackage {
        /// Referencing target
        target: String,
        /// Missing package
        package: String,
    },

    /// A dependency does not expose the referenced library.
    #[error("package '{package}' does not expose a {kind}")]
    MissingArtifact {
        /// Dependency package
        package: String,
        /// Requested library
        kind: ArtifactKind,
    },

    /// A local reference names no target declared before it.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// A local reference points at an executable.
    #[error("target '{target}' cannot link executable '{linked}'")]
    NotALibrary {
        /// Referencing target
        target: String,
        /// Executable target
        linked: String,
    },

    /// A main library or desktop app links test-only code.
    #[error("{kind} '{target}' links test-only artifact '{linked}'")]
    TestOnlyInProduction {
        /// Production target
        target: String,
        /// Its kind
        kind: ArtifactKind,
        /// Offending reference
        linked: String,
    },

    /// Targets depend on each other.
    #[error("circular dependency involving target '{0}'")]
    Cycle(String),

    /// A copy rule carries an invalid glob.
    #[error("invalid copy pattern '{pattern}': {message}")]
    Pattern {
        /// The glob
        pattern: String,
        /// Parser message
        message: String,
    },

    /// Reading a copy source failed.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Directory being listed
        path: PathBuf,
        /// OS message
        message: String,
    },
}

/// A validated set of targets and their links.
#[derive(Debug, Clone)]
pub struct BuildGraph {
    package: String,
    dependencies: Vec<DependencyDecl>,
    targets: Vec<TargetDecl>,
    index: HashMap<String, usize>,
}

impl BuildGraph {
    /// Validate `manifest` and build the graph.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] found while walking the declarations
    /// in order.
    pub fn assemble(manifest: &PackageManifest) -> Result<Self, GraphError> {
        let package = manifest.package.name.clone();

        let mut deps: HashMap<&str, &DependencyDecl> = HashMap::new();
        for dep in &manifest.dependency {
            if dep.name == package || deps.insert(dep.name.as_str(), dep).is_some() {
                return Err(GraphError::DuplicatePackage(dep.name.clone()));
            }
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, target) in manifest.target.iter().enumerate() {
            if index.contains_key(&target.name) {
                return Err(GraphError::DuplicateTarget(target.name.clone()));
            }

            for link in &target.depends {
                match link {
                    ArtifactRef::External { package: name, kind } => {
                        let dep = deps.get(name.as_str()).ok_or_else(|| GraphError::UnknownPackage {
                            target: target.name.clone(),
                            package: name.clone(),
                        })?;
                        if !dep.exposes(*kind) {
                            return Err(GraphError::MissingArtifact {
                                package: name.clone(),
                                kind: *kind,
                            });
                        }
                        if *kind == ArtifactKind::TestLib {
                            check_production(target, link)?;
                        }
                    }
                    ArtifactRef::Local(name) => {
                        if *name == target.name {
                            return Err(GraphError::Cycle(name.clone()));
                        }
                        let linked = index
                            .get(name)
                            .map(|&j| &manifest.target[j])
                            .ok_or_else(|| GraphError::UnknownTarget(name.clone()))?;
                        match linked.kind {
                            ArtifactKind::MainLib => {}
                            ArtifactKind::TestLib => check_production(target, link)?,
                            ArtifactKind::DesktopApp | ArtifactKind::Unittest => {
                                return Err(GraphError::NotALibrary {
                                    target: target.name.clone(),
                                    linked: name.clone(),
                                });
                            }
                        }
                    }
                }
            }
            index.insert(target.name.clone(), i);
        }

        let graph = Self {
            package,
            dependencies: manifest.dependency.clone(),
            targets: manifest.target.clone(),
            index,
        };
        // Ordering rules already exclude cycles; layering double-checks.
        graph.build_layers()?;
        debug!(
            package = %graph.package,
            targets = graph.targets.len(),
            "assembled build graph"
        );
        Ok(graph)
    }

    /// Package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Declared dependency packages.
    pub fn dependencies(&self) -> &[DependencyDecl] {
        &self.dependencies
    }

    /// All targets in declaration order.
    pub fn targets(&self) -> &[TargetDecl] {
        &self.targets
    }

    /// Look up a target by name.
    pub fn target(&self, name: &str) -> Option<&TargetDecl> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    fn local_links<'a>(&'a self, target: &'a TargetDecl) -> impl Iterator<Item = &'a str> + 'a {
        target.depends.iter().filter_map(|r| match r {
            ArtifactRef::Local(name) => Some(name.as_str()),
            ArtifactRef::External { .. } => None,
        })
    }

    /// Group targets into layers that can be built in parallel.
    ///
    /// Each layer only depends on earlier layers; names within a layer are
    /// sorted.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] if some targets can never be scheduled.
    pub fn build_layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();

        for target in &self.targets {
            in_degree.entry(target.name.as_str()).or_default();
            for dep in self.local_links(target) {
                adjacency.entry(dep).or_default().push(target.name.as_str());
                *in_degree.entry(target.name.as_str()).or_default() += 1;
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        ready.sort_unstable();
        let mut queue = VecDeque::from(ready);

        let mut layers = Vec::new();
        while !queue.is_empty() {
            let mut layer = Vec::new();
            let mut next = Vec::new();

            while let Some(u) = queue.pop_front() {
                layer.push(u.to_string());
                for v in adjacency.get(u).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(v) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*v);
                        }
                    }
                }
            }

            layer.sort();
            layers.push(layer);
            next.sort_unstable();
            queue = VecDeque::from(next);
        }

        let scheduled: usize = layers.iter().map(Vec::len).sum();
        if scheduled < in_degree.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| *n)
                .collect();
            stuck.sort_unstable();
            return Err(GraphError::Cycle(stuck.first().copied().unwrap_or_default().to_string()));
        }
        Ok(layers)
    }

    /// External libraries linked by `target`, directly or through the
    /// targets it links. Dependencies come first; no duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTarget`] if `target` does not exist.
    pub fn link_closure(&self, target: &str) -> Result<Vec<ArtifactRef>, GraphError> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        self.collect_links(target, &mut order, &mut seen, &mut visited, &mut visiting)?;
        Ok(order)
    }

    fn collect_links(
        &self,
        name: &str,
        order: &mut Vec<ArtifactRef>,
        seen: &mut HashSet<ArtifactRef>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(GraphError::Cycle(name.to_string()));
        }
        visiting.insert(name.to_string());

        let target = self
            .target(name)
            .ok_or_else(|| GraphError::UnknownTarget(name.to_string()))?;

        for link in &target.depends {
            match link {
                ArtifactRef::Local(dep) => {
                    self.collect_links(dep, order, seen, visited, visiting)?;
                }
                ArtifactRef::External { .. } => {
                    if seen.insert(link.clone()) {
                        order.push(link.clone());
                    }
                }
            }
        }

        visiting.remove(name);
        visited.insert(name.to_string());
        Ok(())
    }

    /// Expand the copy rules of `target` into `(source, destination)` pairs.
    ///
    /// Sources are resolved against `source_root`, destinations against
    /// `output_root`. Missing source directories contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownTarget`], [`GraphError::Pattern`] for a
    /// bad glob or [`GraphError::Io`] if a source directory is unreadable.
    pub fn copy_plan(
        &self,
        target: &str,
        source_root: &Path,
        output_root: &Path,
    ) -> Result<Vec<(PathBuf, PathBuf)>, GraphError> {
        let target = self
            .target(target)
            .ok_or_else(|| GraphError::UnknownTarget(target.to_string()))?;

        let mut plan = Vec::new();
        for rule in &target.copy {
            let pattern = glob::Pattern::new(&rule.pattern).map_err(|e| GraphError::Pattern {
                pattern: rule.pattern.clone(),
                message: e.msg.to_string(),
            })?;

            let from = source_root.join(&rule.from);
            if !from.is_dir() {
                warn!(dir = %from.display(), "copy source missing, skipping");
                continue;
            }

            let io_err = |e: std::io::Error| GraphError::Io {
                path: from.clone(),
                message: e.to_string(),
            };
            let mut matched = Vec::new();
            for entry in std::fs::read_dir(&from).map_err(io_err)? {
                let entry = entry.map_err(io_err)?;
                if !entry.file_type().map_err(io_err)?.is_file() {
                    continue;
                }
                let file_name = entry.file_name();
                if pattern.matches(&file_name.to_string_lossy()) {
                    matched.push((entry.path(), output_root.join(&rule.to).join(&file_name)));
                }
            }
            matched.sort();
            plan.extend(matched);
        }
        Ok(plan)
    }
}

fn check_production(target: &TargetDecl, link: &ArtifactRef) -> Result<(), GraphError> {
    if target.kind.is_production() {
        return Err(GraphError::TestOnlyInProduction {
            target: target.name.clone(),
            kind: target.kind,
            linked: link.to_string(),
        });
    }
    Ok(())
}
