//! The three-colored dependency graph.
//!
//! Projects are related through their classpaths: an entry pointing at
//! another project's output directory is a dependency edge, and the list the
//! entry came from decides how much of the upstream the downstream has to
//! wait for. Outline edges are satisfied by symbol summaries; macro and
//! plugin edges execute upstream bytecode during downstream compilation and
//! need the real classfiles.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::error::GraphError;
use crate::project::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepClass {
    /// Summaries suffice; waits for the upstream's outline.
    Outline,
    /// Upstream code runs during downstream compilation; waits for full
    /// materialization.
    Macro,
    /// Like macro: the upstream's bytecode must be loadable.
    Plugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Index of the upstream project.
    pub target: usize,
    pub class: DepClass,
}

pub struct DepGraph {
    /// Edges per project, ordered classpath ++ macro ++ plugin.
    pub deps: Vec<Vec<Dependency>>,
    /// Whether anything depends on the project at this index.
    pub depended_on: Vec<bool>,
    /// Classpath entries produced by no project and present on disk,
    /// sorted and deduplicated.
    pub external_classpath: Vec<Utf8PathBuf>,
}

impl DepGraph {
    pub fn dependencies(&self, project: usize) -> &[Dependency] {
        &self.deps[project]
    }
}

/// Builds the dependency graph over `projects` and rejects cycles.
pub fn build(projects: &[Project]) -> Result<DepGraph, GraphError> {
    // Producers keyed by output directory; two projects may not share one.
    let mut produces: HashMap<&Utf8Path, usize> = HashMap::new();
    for (index, project) in projects.iter().enumerate() {
        if let Some(&earlier) = produces.get(project.output_dir.as_path()) {
            return Err(GraphError::SharedOutputDir {
                dir: project.output_dir.clone(),
                first: projects[earlier].label.clone(),
                second: project.label.clone(),
            });
        }
        produces.insert(project.output_dir.as_path(), index);
    }

    let mut deps: Vec<Vec<Dependency>> = Vec::with_capacity(projects.len());
    let mut depended_on = vec![false; projects.len()];
    let mut external: Vec<Utf8PathBuf> = Vec::new();

    for (index, project) in projects.iter().enumerate() {
        let produced_by = |entry: &Utf8PathBuf| -> Option<usize> {
            produces
                .get(entry.as_path())
                .copied()
                .filter(|&target| target != index)
        };

        let mut macro_deps = Vec::new();
        for entry in &project.macro_classpath {
            if let Some(target) = produced_by(entry)
                && !macro_deps.iter().any(|d: &Dependency| d.target == target)
            {
                macro_deps.push(Dependency {
                    target,
                    class: DepClass::Macro,
                });
            }
        }

        let mut plugin_deps = Vec::new();
        for entry in &project.plugin_classpath {
            if let Some(target) = produced_by(entry)
                && !plugin_deps.iter().any(|d: &Dependency| d.target == target)
            {
                plugin_deps.push(Dependency {
                    target,
                    class: DepClass::Plugin,
                });
            }
        }

        // Outline candidates are filtered against macro dependencies only: a
        // target already required as a macro stays macro. A target on both
        // the plugin path and the classpath keeps both edges.
        let mut classpath_deps = Vec::new();
        for entry in &project.classpath {
            match produced_by(entry) {
                Some(target)
                    if !macro_deps.iter().any(|d| d.target == target)
                        && !classpath_deps.iter().any(|d: &Dependency| d.target == target) =>
                {
                    classpath_deps.push(Dependency {
                        target,
                        class: DepClass::Outline,
                    });
                }
                Some(_) => {}
                None if entry.exists() && !external.contains(entry) => {
                    external.push(entry.clone());
                }
                None => {}
            }
        }

        let mut edges = classpath_deps;
        edges.append(&mut macro_deps);
        edges.append(&mut plugin_deps);
        for edge in &edges {
            depended_on[edge.target] = true;
        }
        deps.push(edges);
    }

    external.sort();
    external.dedup();

    check_acyclic(projects, &deps)?;

    Ok(DepGraph {
        deps,
        depended_on,
        external_classpath: external,
    })
}

/// A toposort over the edge set; the driver refuses to schedule a cyclic
/// graph rather than deadlock on it.
fn check_acyclic(projects: &[Project], deps: &[Vec<Dependency>]) -> Result<(), GraphError> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..projects.len()).map(|i| graph.add_node(i)).collect();
    for (index, edges) in deps.iter().enumerate() {
        for edge in edges {
            graph.add_edge(nodes[index], nodes[edge.target], ());
        }
    }
    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| GraphError::Cycle(projects[graph[cycle.node_id()]].label.clone()))
}

/// Renders the graph as Graphviz. Macro edges are labeled `M`, plugin edges
/// `P`, outline edges carry no label.
pub fn to_dot(projects: &[Project], graph: &DepGraph) -> String {
    let mut dot = String::from("digraph projects {\n");
    for project in projects {
        let _ = writeln!(dot, "  \"{}\";", project.label);
    }
    for (index, edges) in graph.deps.iter().enumerate() {
        for edge in edges {
            let from = &projects[index].label;
            let to = &projects[edge.target].label;
            match edge.class {
                DepClass::Outline => {
                    let _ = writeln!(dot, "  \"{from}\" -> \"{to}\";");
                }
                DepClass::Macro => {
                    let _ = writeln!(dot, "  \"{from}\" -> \"{to}\" [label=M];");
                }
                DepClass::Plugin => {
                    let _ = writeln!(dot, "  \"{from}\" -> \"{to}\" [label=P];");
                }
            }
        }
    }
    dot.push_str("}\n");
    dot
}

pub fn write_dot(
    projects: &[Project],
    graph: &DepGraph,
    path: &Utf8Path,
) -> std::io::Result<()> {
    fs::write(path, to_dot(projects, graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Settings;

    fn project(label: &str, out: &str, cp: &[&str], mcp: &[&str], pcp: &[&str]) -> Project {
        Project::new(
            Settings {
                label: label.to_string(),
                args_file: format!("/args/{label}.args").into(),
                output_dir: out.into(),
                classpath: cp.iter().map(Utf8PathBuf::from).collect(),
                macro_classpath: mcp.iter().map(Utf8PathBuf::from).collect(),
                plugin_classpath: pcp.iter().map(Utf8PathBuf::from).collect(),
                ..Settings::default()
            },
            true,
        )
    }

    #[test]
    fn test_no_edges() {
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &[], &[], &[]),
        ];
        let graph = build(&projects).unwrap();
        assert!(graph.deps.iter().all(Vec::is_empty));
        assert_eq!(graph.depended_on, vec![false, false]);
    }

    #[test]
    fn test_outline_chain() {
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &["/out/a"], &[], &[]),
            project("c", "/out/c", &["/out/b"], &[], &[]),
        ];
        let graph = build(&projects).unwrap();
        assert_eq!(
            graph.deps[1],
            vec![Dependency {
                target: 0,
                class: DepClass::Outline
            }]
        );
        assert_eq!(
            graph.deps[2],
            vec![Dependency {
                target: 1,
                class: DepClass::Outline
            }]
        );
        assert_eq!(graph.depended_on, vec![true, true, false]);
    }

    #[test]
    fn test_macro_wins_over_outline() {
        // The same upstream on both the classpath and the macro classpath
        // yields a single Macro edge.
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &["/out/a"], &["/out/a"], &[]),
        ];
        let graph = build(&projects).unwrap();
        assert_eq!(
            graph.deps[1],
            vec![Dependency {
                target: 0,
                class: DepClass::Macro
            }]
        );
    }

    #[test]
    fn test_plugin_does_not_suppress_outline() {
        // Plugin duplication is retained: classpath + plugin path to the
        // same upstream yields both edges.
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &["/out/a"], &[], &["/out/a"]),
        ];
        let graph = build(&projects).unwrap();
        assert_eq!(
            graph.deps[1],
            vec![
                Dependency {
                    target: 0,
                    class: DepClass::Outline
                },
                Dependency {
                    target: 0,
                    class: DepClass::Plugin
                },
            ]
        );
    }

    #[test]
    fn test_edge_order_is_classpath_macro_plugin() {
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &[], &[], &[]),
            project("c", "/out/c", &[], &[], &[]),
            project("d", "/out/d", &["/out/a"], &["/out/b"], &["/out/c"]),
        ];
        let graph = build(&projects).unwrap();
        let classes: Vec<_> = graph.deps[3].iter().map(|d| d.class).collect();
        assert_eq!(
            classes,
            vec![DepClass::Outline, DepClass::Macro, DepClass::Plugin]
        );
    }

    #[test]
    fn test_shared_output_dir_rejected() {
        let projects = vec![
            project("a", "/out/shared", &[], &[], &[]),
            project("b", "/out/shared", &[], &[], &[]),
        ];
        assert!(matches!(
            build(&projects),
            Err(GraphError::SharedOutputDir { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let projects = vec![
            project("a", "/out/a", &["/out/b"], &[], &[]),
            project("b", "/out/b", &["/out/a"], &[], &[]),
        ];
        assert!(matches!(build(&projects), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_external_classpath_requires_existence() {
        let dir = tempfile::TempDir::new().unwrap();
        let real = Utf8PathBuf::from_path_buf(dir.path().join("ext.jar")).unwrap();
        std::fs::write(&real, b"").unwrap();

        let projects = vec![project(
            "a",
            "/out/a",
            &[real.as_str(), "/nowhere/ghost.jar"],
            &[],
            &[],
        )];
        let graph = build(&projects).unwrap();
        assert_eq!(graph.external_classpath, vec![real]);
    }

    #[test]
    fn test_dot_rendering() {
        let projects = vec![
            project("a", "/out/a", &[], &[], &[]),
            project("b", "/out/b", &[], &["/out/a"], &[]),
        ];
        let graph = build(&projects).unwrap();
        let dot = to_dot(&projects, &graph);
        assert!(dot.starts_with("digraph projects {"));
        assert!(dot.contains("\"a\";"));
        assert!(dot.contains("\"b\" -> \"a\" [label=M];"));
    }
}
