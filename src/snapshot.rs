use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::metrics::ScoredNetwork;
use crate::models::{Community, Edge, FriendshipType, NetworkMetrics, Node};

pub const ANALYSIS_TYPE: &str = "complete_network_analysis";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to encode or decode snapshot: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unexpected analysis type `{0}`, expected `{ANALYSIS_TYPE}`")]
    AnalysisType(String),
    #[error("record for survey `{record}` holds a snapshot of survey `{snapshot}`")]
    SurveyMismatch { record: String, snapshot: String },
    #[error("snapshot for survey `{survey_id}` is inconsistent: {detail}")]
    Invariant { survey_id: String, detail: String },
}

/// One complete analysis result for a survey at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub survey_id: String,
    pub calculated_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metrics: NetworkMetrics,
    pub communities: Vec<Community>,
}

/// A single student's slice of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentDetail {
    pub node: Node,
    pub friendship_type: FriendshipType,
    pub chose: Vec<String>,
    pub chosen_by: Vec<String>,
    pub mutual: Vec<String>,
}

impl AnalysisSnapshot {
    /// `calculated_at` is cut to whole microseconds so it survives a
    /// round-trip through a Postgres `timestamptz` column unchanged.
    pub fn new(
        survey_id: impl Into<String>,
        calculated_at: DateTime<Utc>,
        scored: ScoredNetwork,
    ) -> Self {
        let calculated_at = calculated_at
            .duration_trunc(TimeDelta::microseconds(1))
            .unwrap_or(calculated_at);
        Self {
            survey_id: survey_id.into(),
            calculated_at,
            nodes: scored.nodes,
            edges: scored.edges,
            metrics: scored.metrics,
            communities: scored.communities,
        }
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        let invalid = |detail: String| SnapshotError::Invariant {
            survey_id: self.survey_id.clone(),
            detail,
        };

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(invalid(format!("node `{}` appears twice", node.id)));
            }
            if !(0.0..=1.0).contains(&node.centrality) {
                return Err(invalid(format!(
                    "node `{}` has centrality {} outside [0, 1]",
                    node.id, node.centrality
                )));
            }
        }

        let mut pairs = HashSet::new();
        for edge in &self.edges {
            if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str()) {
                return Err(invalid(format!(
                    "edge {} -> {} references a missing node",
                    edge.source, edge.target
                )));
            }
            if edge.source == edge.target {
                return Err(invalid(format!("self-edge on `{}`", edge.source)));
            }
            if !pairs.insert((edge.source.as_str(), edge.target.as_str())) {
                return Err(invalid(format!(
                    "duplicate edge {} -> {}",
                    edge.source, edge.target
                )));
            }
        }

        let mut owner: HashMap<&str, usize> = HashMap::new();
        for community in &self.communities {
            if community.size != community.members.len() {
                return Err(invalid(format!(
                    "community {} reports size {} for {} members",
                    community.id,
                    community.size,
                    community.members.len()
                )));
            }
            for member in &community.members {
                if owner.insert(member.as_str(), community.id).is_some() {
                    return Err(invalid(format!("`{member}` belongs to two communities")));
                }
            }
        }
        for node in &self.nodes {
            match owner.get(node.id.as_str()) {
                Some(&id) if id == node.community => {}
                Some(&id) => {
                    return Err(invalid(format!(
                        "node `{}` is labelled {} but listed in community {}",
                        node.id, node.community, id
                    )))
                }
                None => return Err(invalid(format!("node `{}` has no community", node.id))),
            }
        }
        if owner.len() != self.nodes.len() {
            return Err(invalid("a community lists an unknown member".to_string()));
        }

        Ok(())
    }

    /// Count of students per band; every band is present, possibly with zero.
    pub fn type_distribution(&self) -> BTreeMap<FriendshipType, usize> {
        let mut distribution: BTreeMap<FriendshipType, usize> =
            FriendshipType::ALL.iter().map(|band| (*band, 0)).collect();
        for node in &self.nodes {
            *distribution.entry(node.friendship_type()).or_insert(0) += 1;
        }
        distribution
    }

    pub fn average_centrality(&self) -> f64 {
        if self.nodes.is_empty() {
            0.0
        } else {
            self.nodes.iter().map(|n| n.centrality).sum::<f64>() / self.nodes.len() as f64
        }
    }

    pub fn out_degree(&self, student_id: &str) -> usize {
        self.edges.iter().filter(|e| e.source == student_id).count()
    }

    pub fn in_degree(&self, student_id: &str) -> usize {
        self.edges.iter().filter(|e| e.target == student_id).count()
    }

    pub fn student_detail(&self, student_id: &str) -> Option<StudentDetail> {
        let node = self.nodes.iter().find(|n| n.id == student_id)?;

        let chose: Vec<String> = self
            .edges
            .iter()
            .filter(|e| e.source == student_id)
            .map(|e| e.target.clone())
            .collect();
        let chosen_by: Vec<String> = self
            .edges
            .iter()
            .filter(|e| e.target == student_id)
            .map(|e| e.source.clone())
            .collect();
        let mutual = chose
            .iter()
            .filter(|id| chosen_by.contains(id))
            .cloned()
            .collect();

        Some(StudentDetail {
            node: node.clone(),
            friendship_type: node.friendship_type(),
            chose,
            chosen_by,
            mutual,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub complete_analysis_data: AnalysisSnapshot,
}

/// The persisted shape consumed by the dashboard and report export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub survey_id: String,
    pub analysis_type: String,
    pub calculated_at: DateTime<Utc>,
    pub recommendations: Recommendations,
}

impl SnapshotRecord {
    pub fn from_snapshot(snapshot: AnalysisSnapshot) -> Self {
        Self {
            survey_id: snapshot.survey_id.clone(),
            analysis_type: ANALYSIS_TYPE.to_string(),
            calculated_at: snapshot.calculated_at,
            recommendations: Recommendations {
                complete_analysis_data: snapshot,
            },
        }
    }

    pub fn snapshot(&self) -> &AnalysisSnapshot {
        &self.recommendations.complete_analysis_data
    }

    pub fn into_snapshot(self) -> Result<AnalysisSnapshot, SnapshotError> {
        if self.analysis_type != ANALYSIS_TYPE {
            return Err(SnapshotError::AnalysisType(self.analysis_type));
        }
        let snapshot = self.recommendations.complete_analysis_data;
        if snapshot.survey_id != self.survey_id {
            return Err(SnapshotError::SurveyMismatch {
                record: self.survey_id,
                snapshot: snapshot.survey_id,
            });
        }
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<Value, SnapshotError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn risk_indicators(&self) -> RiskIndicators {
        let snapshot = self.snapshot();
        RiskIndicators {
            total_students: snapshot.nodes.len(),
            total_relationships: snapshot.edges.len(),
            average_centrality: snapshot.average_centrality(),
        }
    }
}

/// Headline numbers stored beside the record for list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIndicators {
    pub total_students: usize,
    pub total_relationships: usize,
    pub average_centrality: f64,
}
