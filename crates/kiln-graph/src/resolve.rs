//! Import resolution and dependency closures
//!
//! Maps every exported module name to the file that provides it, then
//! expands each file's imports transitively. Expansion is a memoized
//! depth-first walk over the [`SourceSet`] arena: every file is expanded at
//! most once, and an explicit set of files currently being expanded turns a
//! revisit on the same path into a [`ResolveError::Cycle`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use camino::Utf8PathBuf;
use kiln_scan::{FileId, ModuleName, SourceSet};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::ResolveError;

/// An import that no file in the tree exports.
///
/// Treated as an opaque external dependency (e.g. a precompiled standard
/// library module): it counts toward the closure but is not expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImport {
    pub file: FileId,
    pub path: Utf8PathBuf,
    pub module: ModuleName,
}

/// Resolved dependency information for one build invocation
#[derive(Debug)]
pub struct Resolution {
    /// Module name → exporting file
    exporters: HashMap<ModuleName, FileId>,
    /// Transitive closure of module names, indexed by file
    closures: Vec<BTreeSet<ModuleName>>,
    /// Directed graph: edges point from dependent → dependency
    /// (i.e., if A imports a module exported by B, there's an edge A → B).
    /// Node `i` holds `FileId` `i`.
    graph: DiGraph<FileId, ()>,
    /// Files ordered dependencies-first
    topo_order: Vec<FileId>,
    unresolved: Vec<UnresolvedImport>,
}

impl Resolution {
    /// The recursively expanded set of module names `file` needs
    pub fn closure(&self, file: FileId) -> &BTreeSet<ModuleName> {
        &self.closures[file.index()]
    }

    /// The file exporting `module`, if it is part of the tree
    pub fn exporter(&self, module: &str) -> Option<FileId> {
        self.exporters.get(module).copied()
    }

    /// Files exporting the modules `file` imports directly
    pub fn dependencies(&self, file: FileId) -> impl Iterator<Item = FileId> + '_ {
        self.graph
            .neighbors(NodeIndex::new(file.index()))
            .map(|node| self.graph[node])
    }

    /// Files whose closure includes a module exported by `file` directly
    pub fn dependents(&self, file: FileId) -> impl Iterator<Item = FileId> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(file.index()), petgraph::Direction::Incoming)
            .map(|node| self.graph[node])
    }

    /// All files, every file after each of its dependencies
    pub fn topological_order(&self) -> &[FileId] {
        &self.topo_order
    }

    /// Imports that matched no exporting file
    pub fn unresolved(&self) -> &[UnresolvedImport] {
        &self.unresolved
    }

    pub fn file_count(&self) -> usize {
        self.closures.len()
    }
}

/// Resolve imports and compute the dependency closure of every file.
pub fn resolve(sources: &SourceSet) -> Result<Resolution, ResolveError> {
    // 1. Module name → exporting file
    let mut exporters: HashMap<ModuleName, FileId> = HashMap::new();
    for (id, file) in sources.iter() {
        let Some(module) = &file.exported_module else {
            continue;
        };
        if let Some(&first) = exporters.get(module) {
            return Err(ResolveError::DuplicateExport {
                module: module.clone(),
                first: sources.get(first).path.clone(),
                second: file.path.clone(),
            });
        }
        exporters.insert(module.clone(), id);
    }

    // 2. Direct edges and unresolved imports
    let mut graph: DiGraph<FileId, ()> = DiGraph::with_capacity(sources.len(), 0);
    for id in sources.ids() {
        graph.add_node(id);
    }

    let mut unresolved = Vec::new();
    for (id, file) in sources.iter() {
        for module in &file.imported_modules {
            match exporters.get(module) {
                Some(&dep) => {
                    graph.add_edge(NodeIndex::new(id.index()), NodeIndex::new(dep.index()), ());
                }
                None => unresolved.push(UnresolvedImport {
                    file: id,
                    path: file.path.clone(),
                    module: module.clone(),
                }),
            }
        }
    }
    report_unresolved(&unresolved);

    // 3. Transitive closures
    let mut expander = Expander {
        sources,
        exporters: &exporters,
        closures: vec![None; sources.len()],
        expanding: HashSet::new(),
        stack: Vec::new(),
    };
    for id in sources.ids() {
        expander.expand(id)?;
    }
    let closures: Vec<BTreeSet<ModuleName>> = expander
        .closures
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();

    // Cycles were rejected above, so this only fails if the graph and the
    // closures disagree.
    let mut topo_order: Vec<FileId> = petgraph::algo::toposort(&graph, None)
        .map_err(|cycle| {
            let file = graph[cycle.node_id()];
            ResolveError::Cycle {
                modules: sources.get(file).exported_module.iter().cloned().collect(),
                files: vec![sources.get(file).path.clone()],
            }
        })?
        .into_iter()
        .map(|node| graph[node])
        .collect();
    topo_order.reverse();

    debug!(
        files = sources.len(),
        modules = exporters.len(),
        edges = graph.edge_count(),
        unresolved = unresolved.len(),
        "resolved module dependencies"
    );

    Ok(Resolution {
        exporters,
        closures,
        graph,
        topo_order,
        unresolved,
    })
}

/// Warn once per unresolved module name
fn report_unresolved(unresolved: &[UnresolvedImport]) {
    let mut by_module: BTreeMap<&ModuleName, Vec<&Utf8PathBuf>> = BTreeMap::new();
    for import in unresolved {
        by_module.entry(&import.module).or_default().push(&import.path);
    }
    for (module, importers) in by_module {
        warn!(
            %module,
            importers = importers.len(),
            first = %importers[0],
            "import not exported by any source file; treating it as external"
        );
    }
}

/// Memoized depth-first closure expansion
struct Expander<'a> {
    sources: &'a SourceSet,
    exporters: &'a HashMap<ModuleName, FileId>,
    /// `Some` once a file's closure is complete
    closures: Vec<Option<BTreeSet<ModuleName>>>,
    /// Files on the current expansion path
    expanding: HashSet<FileId>,
    /// Same files, in path order (for cycle reporting)
    stack: Vec<FileId>,
}

impl Expander<'_> {
    fn expand(&mut self, id: FileId) -> Result<(), ResolveError> {
        if self.closures[id.index()].is_some() {
            return Ok(());
        }
        if self.expanding.contains(&id) {
            return Err(self.cycle_error(id));
        }

        self.expanding.insert(id);
        self.stack.push(id);

        let mut closure = BTreeSet::new();
        for module in &self.sources.get(id).imported_modules {
            closure.insert(module.clone());
            if let Some(&dep) = self.exporters.get(module) {
                self.expand(dep)?;
                if let Some(dep_closure) = &self.closures[dep.index()] {
                    closure.extend(dep_closure.iter().cloned());
                }
            }
        }

        self.stack.pop();
        self.expanding.remove(&id);
        self.closures[id.index()] = Some(closure);
        Ok(())
    }

    /// Describe the cycle closed by revisiting `id`
    fn cycle_error(&self, id: FileId) -> ResolveError {
        let start = self.stack.iter().position(|&f| f == id).unwrap_or(0);
        let path: Vec<FileId> = self.stack[start..]
            .iter()
            .copied()
            .chain(std::iter::once(id))
            .collect();

        ResolveError::Cycle {
            modules: path
                .iter()
                .filter_map(|&f| self.sources.get(f).exported_module.clone())
                .collect(),
            files: path
                .iter()
                .map(|&f| self.sources.get(f).path.clone())
                .collect(),
        }
    }
}
