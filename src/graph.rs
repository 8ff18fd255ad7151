use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{Edge, Node, Student, FRIEND_RELATIONSHIP};
use crate::parser::Selection;

/// Repeated choices of the same classmate add weight up to this ceiling.
pub const MAX_EDGE_WEIGHT: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildDiagnostics {
    pub duplicate_students: usize,
    pub merged_selections: usize,
    pub discarded_edges: usize,
}

/// Roster-ordered nodes plus at most one edge per ordered student pair.
#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    index: HashMap<String, usize>,
}

impl NetworkGraph {
    #[cfg(test)]
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id.clone(), position))
            .collect();
        Self {
            nodes,
            edges,
            index,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Edges as `(source, target, weight)` node positions. Edges whose
    /// endpoints are not nodes are skipped.
    pub fn arcs(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.edges.iter().filter_map(|edge| {
            Some((
                self.position(&edge.source)?,
                self.position(&edge.target)?,
                edge.weight,
            ))
        })
    }

    pub fn out_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.nodes.len()];
        for (source, _, _) in self.arcs() {
            degrees[source] += 1;
        }
        degrees
    }

    /// Neighbour sets of the undirected projection: a mutual pair counts once.
    pub fn undirected_neighbors(&self) -> Vec<BTreeSet<usize>> {
        let mut neighbors = vec![BTreeSet::new(); self.nodes.len()];
        for (source, target, _) in self.arcs() {
            if source != target {
                neighbors[source].insert(target);
                neighbors[target].insert(source);
            }
        }
        neighbors
    }
}

pub fn build_graph(roster: &[Student], selections: &[Selection]) -> (NetworkGraph, BuildDiagnostics) {
    let mut diagnostics = BuildDiagnostics::default();
    let mut nodes = Vec::with_capacity(roster.len());
    let mut index = HashMap::with_capacity(roster.len());

    for student in roster {
        if index.contains_key(&student.id) {
            diagnostics.duplicate_students += 1;
            continue;
        }
        index.insert(student.id.clone(), nodes.len());
        nodes.push(Node {
            id: student.id.clone(),
            name: student.name.clone(),
            grade: student.grade.clone(),
            class: student.class.clone(),
            centrality: 0.0,
            community: 0,
        });
    }

    let mut edges: Vec<Edge> = Vec::new();
    let mut edge_slots: HashMap<(usize, usize), usize> = HashMap::new();

    for selection in selections {
        let (Some(&source), Some(&target)) =
            (index.get(&selection.source), index.get(&selection.target))
        else {
            diagnostics.discarded_edges += 1;
            continue;
        };
        if source == target {
            diagnostics.discarded_edges += 1;
            continue;
        }

        match edge_slots.get(&(source, target)) {
            Some(&slot) => {
                let edge = &mut edges[slot];
                edge.weight = (edge.weight + 1).min(MAX_EDGE_WEIGHT);
                diagnostics.merged_selections += 1;
            }
            None => {
                edge_slots.insert((source, target), edges.len());
                edges.push(Edge {
                    source: selection.source.clone(),
                    target: selection.target.clone(),
                    weight: 1,
                    relationship_type: FRIEND_RELATIONSHIP.to_string(),
                });
            }
        }
    }

    if diagnostics.discarded_edges > 0 {
        warn!(
            discarded = diagnostics.discarded_edges,
            "discarded selections that do not connect two roster students"
        );
    }
    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        merged = diagnostics.merged_selections,
        "built friendship graph"
    );

    let graph = NetworkGraph {
        nodes,
        edges,
        index,
    };
    (graph, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::roster;
    use std::collections::HashSet;

    fn selection(source: &str, target: &str, question_key: &str) -> Selection {
        Selection {
            source: source.to_string(),
            target: target.to_string(),
            question_key: question_key.to_string(),
        }
    }

    #[test]
    fn every_roster_student_becomes_one_node() {
        let mut students = roster(&["a", "b", "c"]);
        students.push(students[0].clone());

        let (graph, diagnostics) = build_graph(&students, &[]);

        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(diagnostics.duplicate_students, 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn merges_repeated_choices_into_one_weighted_edge() {
        let students = roster(&["a", "b"]);
        let selections = vec![selection("a", "b", "q1"), selection("a", "b", "q2")];

        let (graph, diagnostics) = build_graph(&students, &selections);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].weight, 2);
        assert_eq!(diagnostics.merged_selections, 1);
    }

    #[test]
    fn caps_merged_weight() {
        let students = roster(&["a", "b"]);
        let selections: Vec<Selection> = (1..=5)
            .map(|n| selection("a", "b", &format!("q{n}")))
            .collect();

        let (graph, _) = build_graph(&students, &selections);

        assert_eq!(graph.edges[0].weight, MAX_EDGE_WEIGHT);
    }

    #[test]
    fn mutual_choices_stay_two_directed_edges() {
        let students = roster(&["a", "b"]);
        let selections = vec![selection("a", "b", "q1"), selection("b", "a", "q1")];

        let (graph, _) = build_graph(&students, &selections);

        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.undirected_neighbors()[0].len(), 1);
    }

    #[test]
    fn discards_edges_leaving_the_roster() {
        let students = roster(&["a", "b"]);
        let selections = vec![
            selection("a", "ghost", "q1"),
            selection("ghost", "a", "q1"),
            selection("a", "a", "q1"),
            selection("a", "b", "q1"),
        ];

        let (graph, diagnostics) = build_graph(&students, &selections);

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(diagnostics.discarded_edges, 3);
        let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &graph.edges {
            assert!(ids.contains(edge.source.as_str()));
            assert!(ids.contains(edge.target.as_str()));
        }
    }

    #[test]
    fn degrees_count_distinct_targets() {
        let students = roster(&["a", "b", "c"]);
        let selections = vec![
            selection("a", "b", "q1"),
            selection("a", "c", "q1"),
            selection("a", "b", "q2"),
            selection("c", "b", "q1"),
        ];

        let (graph, _) = build_graph(&students, &selections);

        assert_eq!(graph.out_degrees(), vec![2, 0, 1]);
    }
}
