//! Build level scheduling
//!
//! A level is a group of files whose exporting dependencies all live in
//! earlier levels, so the files of one level can compile concurrently once
//! every previous level has finished.

use std::collections::BTreeMap;

use kiln_scan::{FileId, SourceSet};
use tracing::{debug, info};

use crate::Resolution;

/// How files are assigned to levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LevelPolicy {
    /// Level number = size of the file's dependency closure.
    ///
    /// Closure size strictly grows along every dependency edge, so this is
    /// always sound, though it may produce more levels than necessary.
    #[default]
    ClosureSize,

    /// Level number = length of the longest chain of in-tree dependencies
    /// below the file. Never produces more levels than `ClosureSize`.
    LongestPath,
}

/// Files that may be compiled concurrently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLevel {
    /// Rank under the policy that produced this level (not necessarily dense)
    pub index: usize,
    /// Files in this level, ordered by path
    pub files: Vec<FileId>,
}

/// A dependency edge that does not point into an earlier level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelViolation {
    pub file: FileId,
    pub dependency: FileId,
}

/// Partition every file of `sources` into ordered build levels.
pub fn schedule(sources: &SourceSet, resolution: &Resolution, policy: LevelPolicy) -> Vec<BuildLevel> {
    let ranks = match policy {
        LevelPolicy::ClosureSize => sources
            .ids()
            .map(|id| resolution.closure(id).len())
            .collect::<Vec<_>>(),
        LevelPolicy::LongestPath => longest_path_ranks(resolution),
    };

    let mut by_rank: BTreeMap<usize, Vec<FileId>> = BTreeMap::new();
    for id in sources.ids() {
        by_rank.entry(ranks[id.index()]).or_default().push(id);
    }

    let levels: Vec<BuildLevel> = by_rank
        .into_iter()
        .map(|(index, mut files)| {
            files.sort_by(|a, b| sources.get(*a).path.cmp(&sources.get(*b).path));
            BuildLevel { index, files }
        })
        .collect();

    for level in &levels {
        debug!(
            level = level.index,
            files = level.files.len(),
            "scheduled level"
        );
    }
    info!(?policy, levels = levels.len(), files = sources.len(), "computed build schedule");

    debug_assert!(
        verify_levels(resolution, &levels).is_empty(),
        "schedule placed a file at or before one of its dependencies"
    );

    levels
}

/// Longest-chain rank of every file, walking dependencies first
fn longest_path_ranks(resolution: &Resolution) -> Vec<usize> {
    let mut ranks = vec![0usize; resolution.file_count()];
    for &file in resolution.topological_order() {
        ranks[file.index()] = resolution
            .dependencies(file)
            .map(|dep| ranks[dep.index()] + 1)
            .max()
            .unwrap_or(0);
    }
    ranks
}

/// Check that every resolved dependency of every scheduled file sits in a
/// strictly earlier level. Returns the offending edges.
pub fn verify_levels(resolution: &Resolution, levels: &[BuildLevel]) -> Vec<LevelViolation> {
    let mut position = vec![usize::MAX; resolution.file_count()];
    for (pos, level) in levels.iter().enumerate() {
        for &file in &level.files {
            position[file.index()] = pos;
        }
    }

    let mut violations = Vec::new();
    for (pos, level) in levels.iter().enumerate() {
        for &file in &level.files {
            for dependency in resolution.dependencies(file) {
                if position[dependency.index()] >= pos {
                    violations.push(LevelViolation { file, dependency });
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve;
    use crate::tests::source_set;
    use camino::Utf8Path;

    fn paths(set: &SourceSet, levels: &[BuildLevel]) -> Vec<Vec<String>> {
        levels
            .iter()
            .map(|level| {
                level
                    .files
                    .iter()
                    .map(|&id| set.get(id).path.to_string())
                    .collect()
            })
            .collect()
    }

    fn chain_set() -> SourceSet {
        source_set(&[
            ("main.cpp", "import util;\nint main() {}"),
            ("util.ixx", "export module util;\nimport core;"),
            ("core.ixx", "export module core;"),
        ])
    }

    #[test_log::test]
    fn three_file_chain_has_three_levels() {
        let set = chain_set();
        let res = resolve(&set).unwrap();
        let levels = schedule(&set, &res, LevelPolicy::ClosureSize);

        assert_eq!(
            paths(&set, &levels),
            vec![vec!["core.ixx"], vec!["util.ixx"], vec!["main.cpp"]]
        );
        assert_eq!(
            levels.iter().map(|l| l.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(verify_levels(&res, &levels).is_empty());
    }

    #[test]
    fn unresolved_imports_raise_closure_rank() {
        let set = source_set(&[
            ("a.cpp", "import std;"),
            ("b.cpp", "int main() {}"),
        ]);
        let res = resolve(&set).unwrap();
        let levels = schedule(&set, &res, LevelPolicy::ClosureSize);

        assert_eq!(paths(&set, &levels), vec![vec!["b.cpp"], vec!["a.cpp"]]);

        let levels = schedule(&set, &res, LevelPolicy::LongestPath);
        assert_eq!(paths(&set, &levels), vec![vec!["a.cpp", "b.cpp"]]);
    }

    #[test]
    fn files_within_a_level_are_sorted_by_path() {
        let set = source_set(&[
            ("z.cpp", "import base;"),
            ("m.cpp", "import base;"),
            ("base.ixx", "export module base;"),
            ("a.cpp", "import base;"),
        ]);
        let res = resolve(&set).unwrap();
        let levels = schedule(&set, &res, LevelPolicy::ClosureSize);

        assert_eq!(
            paths(&set, &levels),
            vec![vec!["base.ixx"], vec!["a.cpp", "m.cpp", "z.cpp"]]
        );
    }

    #[test]
    fn longest_path_never_uses_more_levels() {
        // `wide` imports three independent leaves, so its closure is large
        // but its chain is short.
        let set = source_set(&[
            ("l1.ixx", "export module l1;"),
            ("l2.ixx", "export module l2;"),
            ("l3.ixx", "export module l3;"),
            ("wide.ixx", "export module wide; import l1; import l2; import l3;"),
            ("mid.ixx", "export module mid; import l1;"),
            ("top.cpp", "import mid; import wide;"),
        ]);
        let res = resolve(&set).unwrap();

        let by_closure = schedule(&set, &res, LevelPolicy::ClosureSize);
        let by_path = schedule(&set, &res, LevelPolicy::LongestPath);

        assert!(verify_levels(&res, &by_closure).is_empty());
        assert!(verify_levels(&res, &by_path).is_empty());
        assert!(by_path.len() <= by_closure.len());
        assert_eq!(
            paths(&set, &by_path),
            vec![
                vec!["l1.ixx", "l2.ixx", "l3.ixx"],
                vec!["mid.ixx", "wide.ixx"],
                vec!["top.cpp"],
            ]
        );
    }

    #[test]
    fn closure_grows_along_every_edge() {
        let set = source_set(&[
            ("base.ixx", "export module base;"),
            ("left.ixx", "export module left; import base;"),
            ("right.ixx", "export module right; import base; import std;"),
            ("top.cpp", "import left; import right;"),
            ("impl.cpp", "module left; import right;"),
        ]);
        let res = resolve(&set).unwrap();

        for (id, _) in set.iter() {
            for dep in res.dependencies(id) {
                assert!(res.closure(dep).is_subset(res.closure(id)));
                assert!(res.closure(dep).len() < res.closure(id).len());
            }
        }
    }

    #[test]
    fn verify_levels_reports_misordered_edges() {
        let set = chain_set();
        let res = resolve(&set).unwrap();
        let core = set.find(Utf8Path::new("core.ixx")).unwrap();
        let util = set.find(Utf8Path::new("util.ixx")).unwrap();
        let main = set.find(Utf8Path::new("main.cpp")).unwrap();

        let levels = vec![
            BuildLevel { index: 0, files: vec![core, util] },
            BuildLevel { index: 1, files: vec![main] },
        ];
        assert_eq!(
            verify_levels(&res, &levels),
            vec![LevelViolation { file: util, dependency: core }]
        );
    }

    #[test]
    fn empty_set_has_no_levels() {
        let set = source_set(&[]);
        let res = resolve(&set).unwrap();
        assert!(schedule(&set, &res, LevelPolicy::default()).is_empty());
    }
}
