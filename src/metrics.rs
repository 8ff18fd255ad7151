use std::collections::{BTreeMap, VecDeque};

use clap::ValueEnum;
use tracing::debug;

use crate::graph::NetworkGraph;
use crate::models::{Community, Edge, NetworkMetrics, Node};

/// Per-node connectedness score.
///
/// Implementations return one score per node in graph order. Every score must
/// lie in `[0, 1]`, and a node with a higher out-degree must never score lower
/// than a node with a smaller one.
pub trait CentralityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, graph: &NetworkGraph) -> Vec<f64>;
}

/// Assigns every node exactly one community label, in graph order.
pub trait CommunityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn assign(&self, graph: &NetworkGraph) -> Vec<usize>;
}

/// Graph-level structure measures that go beyond counting.
pub trait GraphMetrics: Send + Sync {
    fn clustering_coefficient(&self, graph: &NetworkGraph) -> f64;
    fn average_path_length(&self, graph: &NetworkGraph) -> f64;
    fn modularity(&self, graph: &NetworkGraph, communities: &[usize]) -> f64;
}

/// `0.1` per classmate chosen on top of a `0.1` floor, capped at `1.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionCountCentrality;

impl CentralityStrategy for SelectionCountCentrality {
    fn name(&self) -> &'static str {
        "selection-count"
    }

    fn score(&self, graph: &NetworkGraph) -> Vec<f64> {
        graph
            .out_degrees()
            .into_iter()
            .map(|degree| {
                if degree == 0 {
                    0.1
                } else {
                    (0.1 + degree as f64 * 0.1).min(1.0)
                }
            })
            .collect()
    }
}

/// Out-degree divided by the number of other students.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedDegreeCentrality;

impl CentralityStrategy for NormalizedDegreeCentrality {
    fn name(&self) -> &'static str {
        "normalized-degree"
    }

    fn score(&self, graph: &NetworkGraph) -> Vec<f64> {
        let others = graph.node_count().saturating_sub(1);
        graph
            .out_degrees()
            .into_iter()
            .map(|degree| {
                if others == 0 {
                    0.0
                } else {
                    (degree as f64 / others as f64).min(1.0)
                }
            })
            .collect()
    }
}

/// Groups students by `outDegree % 3`; students who chose nobody share group 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegreeBuckets;

impl CommunityStrategy for DegreeBuckets {
    fn name(&self) -> &'static str {
        "degree-buckets"
    }

    fn assign(&self, graph: &NetworkGraph) -> Vec<usize> {
        graph
            .out_degrees()
            .into_iter()
            .map(|degree| if degree == 0 { 0 } else { degree % 3 })
            .collect()
    }
}

/// Deterministic label propagation over the undirected, weighted projection.
///
/// Nodes are visited in graph order and adopt the label carrying the most
/// neighbour weight, ties going to the smaller label. Labels are renumbered
/// from zero in order of first appearance.
#[derive(Debug, Clone, Copy)]
pub struct LabelPropagation {
    pub max_rounds: usize,
}

impl Default for LabelPropagation {
    fn default() -> Self {
        Self { max_rounds: 20 }
    }
}

impl CommunityStrategy for LabelPropagation {
    fn name(&self) -> &'static str {
        "label-propagation"
    }

    fn assign(&self, graph: &NetworkGraph) -> Vec<usize> {
        let adjacency = weighted_adjacency(graph);
        let mut labels: Vec<usize> = (0..graph.node_count()).collect();

        for round in 0..self.max_rounds {
            let mut changed = false;
            for node in 0..labels.len() {
                let mut tally: BTreeMap<usize, f64> = BTreeMap::new();
                for (&neighbor, &weight) in &adjacency[node] {
                    *tally.entry(labels[neighbor]).or_insert(0.0) += weight;
                }

                let mut best: Option<(usize, f64)> = None;
                for (label, weight) in tally {
                    if best.map_or(true, |(_, top)| weight > top) {
                        best = Some((label, weight));
                    }
                }

                if let Some((label, _)) = best {
                    if label != labels[node] {
                        labels[node] = label;
                        changed = true;
                    }
                }
            }
            if !changed {
                debug!(rounds = round + 1, "label propagation converged");
                break;
            }
        }

        let mut renumbered: BTreeMap<usize, usize> = BTreeMap::new();
        labels
            .into_iter()
            .map(|label| {
                let next = renumbered.len();
                *renumbered.entry(label).or_insert(next)
            })
            .collect()
    }
}

/// Triangle-based clustering, BFS path lengths and Newman modularity.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralMetrics;

impl GraphMetrics for StructuralMetrics {
    /// Mean local clustering over all nodes of the undirected projection;
    /// nodes with fewer than two neighbours contribute zero.
    fn clustering_coefficient(&self, graph: &NetworkGraph) -> f64 {
        let neighbors = graph.undirected_neighbors();
        if neighbors.is_empty() {
            return 0.0;
        }

        let total: f64 = neighbors
            .iter()
            .map(|around| {
                let k = around.len();
                if k < 2 {
                    return 0.0;
                }
                let members: Vec<usize> = around.iter().copied().collect();
                let mut links = 0usize;
                for (i, &left) in members.iter().enumerate() {
                    for &right in &members[i + 1..] {
                        if neighbors[left].contains(&right) {
                            links += 1;
                        }
                    }
                }
                (2 * links) as f64 / (k * (k - 1)) as f64
            })
            .sum();

        total / neighbors.len() as f64
    }

    /// Mean hop count over every ordered pair that can reach each other in
    /// the undirected projection. Zero when no pair is connected.
    fn average_path_length(&self, graph: &NetworkGraph) -> f64 {
        let neighbors = graph.undirected_neighbors();
        let mut total = 0usize;
        let mut pairs = 0usize;

        for start in 0..neighbors.len() {
            let mut distance: Vec<Option<usize>> = vec![None; neighbors.len()];
            distance[start] = Some(0);
            let mut queue = VecDeque::from([start]);

            while let Some(current) = queue.pop_front() {
                let Some(hops) = distance[current] else {
                    continue;
                };
                for &next in &neighbors[current] {
                    if distance[next].is_none() {
                        distance[next] = Some(hops + 1);
                        total += hops + 1;
                        pairs += 1;
                        queue.push_back(next);
                    }
                }
            }
        }

        if pairs == 0 {
            0.0
        } else {
            total as f64 / pairs as f64
        }
    }

    /// Newman modularity of `communities` over the undirected projection,
    /// where each directed edge adds its weight to the pair.
    fn modularity(&self, graph: &NetworkGraph, communities: &[usize]) -> f64 {
        let mut total_weight = 0.0;
        let mut internal_weight = 0.0;
        let mut strength = vec![0.0; graph.node_count()];

        for (source, target, weight) in graph.arcs() {
            let weight = f64::from(weight);
            total_weight += weight;
            strength[source] += weight;
            strength[target] += weight;
            if communities.get(source) == communities.get(target) {
                internal_weight += weight;
            }
        }

        if total_weight == 0.0 {
            return 0.0;
        }

        let mut community_strength: BTreeMap<usize, f64> = BTreeMap::new();
        for (node, &label) in communities.iter().enumerate() {
            *community_strength.entry(label).or_insert(0.0) += strength.get(node).copied().unwrap_or(0.0);
        }

        let expected: f64 = community_strength
            .values()
            .map(|k| (k / (2.0 * total_weight)).powi(2))
            .sum();

        internal_weight / total_weight - expected
    }
}

fn weighted_adjacency(graph: &NetworkGraph) -> Vec<BTreeMap<usize, f64>> {
    let mut adjacency = vec![BTreeMap::new(); graph.node_count()];
    for (source, target, weight) in graph.arcs() {
        if source == target {
            continue;
        }
        let weight = f64::from(weight);
        *adjacency[source].entry(target).or_insert(0.0) += weight;
        *adjacency[target].entry(source).or_insert(0.0) += weight;
    }
    adjacency
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CentralityChoice {
    #[default]
    SelectionCount,
    NormalizedDegree,
}

impl CentralityChoice {
    pub fn strategy(self) -> Box<dyn CentralityStrategy> {
        match self {
            CentralityChoice::SelectionCount => Box::new(SelectionCountCentrality),
            CentralityChoice::NormalizedDegree => Box::new(NormalizedDegreeCentrality),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CommunityChoice {
    #[default]
    DegreeBuckets,
    LabelPropagation,
}

impl CommunityChoice {
    pub fn strategy(self) -> Box<dyn CommunityStrategy> {
        match self {
            CommunityChoice::DegreeBuckets => Box::new(DegreeBuckets),
            CommunityChoice::LabelPropagation => Box::new(LabelPropagation::default()),
        }
    }
}

/// Everything the scorer derives from a built graph.
#[derive(Debug, Clone, Default)]
pub struct ScoredNetwork {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metrics: NetworkMetrics,
    pub communities: Vec<Community>,
}

pub struct MetricScorer {
    centrality: Box<dyn CentralityStrategy>,
    community: Box<dyn CommunityStrategy>,
    graph_metrics: Box<dyn GraphMetrics>,
}

impl Default for MetricScorer {
    fn default() -> Self {
        Self::new(
            Box::new(SelectionCountCentrality),
            Box::new(DegreeBuckets),
            Box::new(StructuralMetrics),
        )
    }
}

impl MetricScorer {
    pub fn new(
        centrality: Box<dyn CentralityStrategy>,
        community: Box<dyn CommunityStrategy>,
        graph_metrics: Box<dyn GraphMetrics>,
    ) -> Self {
        Self {
            centrality,
            community,
            graph_metrics,
        }
    }

    pub fn from_choices(centrality: CentralityChoice, community: CommunityChoice) -> Self {
        Self::new(
            centrality.strategy(),
            community.strategy(),
            Box::new(StructuralMetrics),
        )
    }

    pub fn score(&self, graph: NetworkGraph) -> ScoredNetwork {
        if graph.node_count() == 0 {
            return ScoredNetwork::default();
        }

        let centrality = self.centrality.score(&graph);
        let labels = self.community.assign(&graph);
        debug!(
            centrality = self.centrality.name(),
            community = self.community.name(),
            "scoring friendship graph"
        );

        let node_count = graph.node_count();
        let edge_count = graph.edge_count();
        let metrics = NetworkMetrics {
            total_students: node_count,
            total_relationships: edge_count,
            density: if node_count > 1 {
                edge_count as f64 / (node_count * (node_count - 1)) as f64
            } else {
                0.0
            },
            average_degree: 2.0 * edge_count as f64 / node_count as f64,
            clustering_coefficient: self.graph_metrics.clustering_coefficient(&graph),
            average_path_length: self.graph_metrics.average_path_length(&graph),
            modularity: self.graph_metrics.modularity(&graph, &labels),
        };
        let communities = summarize_communities(&graph, &labels);

        let NetworkGraph { mut nodes, edges, .. } = graph;
        for (position, node) in nodes.iter_mut().enumerate() {
            let score = centrality.get(position).copied().unwrap_or(0.0);
            node.centrality = if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            node.community = labels.get(position).copied().unwrap_or(0);
        }

        ScoredNetwork {
            nodes,
            edges,
            metrics,
            communities,
        }
    }
}

fn summarize_communities(graph: &NetworkGraph, labels: &[usize]) -> Vec<Community> {
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for position in 0..graph.node_count() {
        let label = labels.get(position).copied().unwrap_or(0);
        members.entry(label).or_default().push(position);
    }

    let mut internal: BTreeMap<usize, usize> = BTreeMap::new();
    for (source, target, _) in graph.arcs() {
        let label = labels.get(source).copied().unwrap_or(0);
        if labels.get(target).copied().unwrap_or(0) == label {
            *internal.entry(label).or_insert(0) += 1;
        }
    }

    members
        .into_iter()
        .map(|(id, positions)| {
            let size = positions.len();
            let possible = size * size.saturating_sub(1);
            let internal_edges = internal.get(&id).copied().unwrap_or(0);
            Community {
                id,
                members: positions
                    .into_iter()
                    .map(|position| graph.nodes[position].id.clone())
                    .collect(),
                size,
                internal_density: if possible == 0 {
                    0.0
                } else {
                    internal_edges as f64 / possible as f64
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{edge, roster};
    use crate::graph::build_graph;
    use rstest::rstest;

    fn graph_of(ids: &[&str], pairs: &[(&str, &str)]) -> NetworkGraph {
        let (base, _) = build_graph(&roster(ids), &[]);
        let edges = pairs.iter().map(|(s, t)| edge(s, t)).collect();
        NetworkGraph::from_parts(base.nodes, edges)
    }

    fn close(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn single_choice_scenario_matches_expected_scores() {
        let graph = graph_of(&["a", "b", "c"], &[("a", "b")]);

        let scored = MetricScorer::default().score(graph);

        let centrality: Vec<f64> = scored.nodes.iter().map(|n| n.centrality).collect();
        assert!(close(centrality[0], 0.2));
        assert!(close(centrality[1], 0.1));
        assert!(close(centrality[2], 0.1));
        assert_eq!(scored.metrics.total_relationships, 1);
        assert!(close(scored.metrics.density, 1.0 / 6.0));
        assert!(close(scored.metrics.average_degree, 2.0 / 3.0));
    }

    #[test]
    fn isolated_students_land_in_group_zero() {
        let graph = graph_of(&["a", "b", "x"], &[("a", "b")]);

        let scored = MetricScorer::default().score(graph);

        let isolated = &scored.nodes[2];
        assert!(close(isolated.centrality, 0.1));
        assert_eq!(isolated.community, 0);
    }

    #[rstest]
    #[case(CentralityChoice::SelectionCount)]
    #[case(CentralityChoice::NormalizedDegree)]
    fn centrality_is_bounded_and_monotone(#[case] choice: CentralityChoice) {
        let ids = ["a", "b", "c", "d", "e"];
        let mut pairs = Vec::new();
        for (i, source) in ids.iter().enumerate() {
            for target in ids.iter().skip(i + 1) {
                pairs.push((*source, *target));
            }
        }
        let graph = graph_of(&ids, &pairs);
        let degrees = graph.out_degrees();

        let scores = choice.strategy().score(&graph);

        for (i, score) in scores.iter().enumerate() {
            assert!((0.0..=1.0).contains(score));
            for (j, other) in scores.iter().enumerate() {
                if degrees[i] > degrees[j] {
                    assert!(score >= other);
                }
            }
        }
    }

    #[test]
    fn selection_count_saturates_at_one() {
        let ids: Vec<String> = (0..12).map(|n| format!("s{n}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let pairs: Vec<(&str, &str)> = refs[1..].iter().map(|t| (refs[0], *t)).collect();
        let graph = graph_of(&refs, &pairs);

        let scores = SelectionCountCentrality.score(&graph);

        assert!(close(scores[0], 1.0));
    }

    #[test]
    fn degree_buckets_use_out_degree_modulo_three() {
        let graph = graph_of(
            &["a", "b", "c", "d", "e"],
            &[
                ("a", "b"),
                ("b", "a"),
                ("b", "c"),
                ("c", "a"),
                ("c", "b"),
                ("c", "d"),
            ],
        );

        assert_eq!(DegreeBuckets.assign(&graph), vec![1, 2, 0, 0, 0]);
    }

    #[test]
    fn label_propagation_separates_disconnected_triangles() {
        let graph = graph_of(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("d", "e"),
                ("e", "f"),
                ("f", "d"),
            ],
        );

        let labels = LabelPropagation::default().assign(&graph);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[0], 0);
    }

    #[test]
    fn clustering_is_one_for_a_triangle_and_zero_for_a_star() {
        let triangle = graph_of(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        let star = graph_of(&["hub", "x", "y", "z"], &[("hub", "x"), ("hub", "y"), ("z", "hub")]);

        assert!(close(StructuralMetrics.clustering_coefficient(&triangle), 1.0));
        assert!(close(StructuralMetrics.clustering_coefficient(&star), 0.0));
    }

    #[test]
    fn path_length_averages_reachable_pairs() {
        let path = graph_of(&["a", "b", "c", "lonely"], &[("a", "b"), ("c", "b")]);

        assert!(close(StructuralMetrics.average_path_length(&path), 8.0 / 6.0));
    }

    #[test]
    fn modularity_rewards_partitions_matching_components() {
        let graph = graph_of(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("d", "e"),
                ("e", "f"),
                ("f", "d"),
            ],
        );

        let split = StructuralMetrics.modularity(&graph, &[0, 0, 0, 1, 1, 1]);
        let lumped = StructuralMetrics.modularity(&graph, &[0, 0, 0, 0, 0, 0]);

        assert!(close(split, 0.5));
        assert!(close(lumped, 0.0));
    }

    #[test]
    fn communities_report_internal_density() {
        let graph = graph_of(&["a", "b", "c"], &[("a", "b"), ("b", "a")]);

        let scored = MetricScorer::from_choices(
            CentralityChoice::SelectionCount,
            CommunityChoice::LabelPropagation,
        )
        .score(graph);

        assert_eq!(scored.communities.len(), 2);
        let pair = &scored.communities[0];
        assert_eq!(pair.members, vec!["a".to_string(), "b".to_string()]);
        assert!(close(pair.internal_density, 1.0));
        assert_eq!(scored.communities[1].size, 1);
        assert!(close(scored.communities[1].internal_density, 0.0));
    }

    #[test]
    fn empty_graph_scores_to_zero() {
        let scored = MetricScorer::default().score(NetworkGraph::default());

        assert_eq!(scored.metrics, NetworkMetrics::default());
        assert!(scored.communities.is_empty());
        assert!(scored.nodes.is_empty());
    }

    #[test]
    fn every_node_belongs_to_exactly_one_community() {
        let graph = graph_of(&["a", "b", "c", "d"], &[("a", "b"), ("c", "d"), ("d", "a")]);

        let scored = MetricScorer::default().score(graph);

        for node in &scored.nodes {
            let owners = scored
                .communities
                .iter()
                .filter(|c| c.members.contains(&node.id))
                .count();
            assert_eq!(owners, 1);
        }
    }
}
