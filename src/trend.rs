use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::FriendshipType;
use crate::snapshot::AnalysisSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub survey_id: String,
    pub calculated_at: DateTime<Utc>,
    pub total_students: usize,
    pub density: f64,
    pub distribution: BTreeMap<FriendshipType, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentPoint {
    pub survey_id: String,
    pub friendship_type: FriendshipType,
    pub out_degree: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendComparison {
    pub rows: Vec<TrendRow>,
    /// Students seen in at least two snapshots, keyed by student id.
    pub changes: BTreeMap<String, Vec<StudentPoint>>,
}

impl TrendComparison {
    /// Students whose latest band sits below their earliest one.
    pub fn declining(&self) -> Vec<(&str, FriendshipType, FriendshipType)> {
        self.changes
            .iter()
            .filter_map(|(student_id, points)| {
                let first = points.first()?.friendship_type;
                let last = points.last()?.friendship_type;
                (last < first).then_some((student_id.as_str(), first, last))
            })
            .collect()
    }
}

/// Compares snapshots in the order given, usually oldest first.
pub fn compare(snapshots: &[AnalysisSnapshot]) -> TrendComparison {
    let rows = snapshots
        .iter()
        .map(|snapshot| TrendRow {
            survey_id: snapshot.survey_id.clone(),
            calculated_at: snapshot.calculated_at,
            total_students: snapshot.metrics.total_students,
            density: snapshot.metrics.density,
            distribution: snapshot.type_distribution(),
        })
        .collect();

    let mut history: BTreeMap<String, Vec<StudentPoint>> = BTreeMap::new();
    for snapshot in snapshots {
        for node in &snapshot.nodes {
            history.entry(node.id.clone()).or_default().push(StudentPoint {
                survey_id: snapshot.survey_id.clone(),
                friendship_type: node.friendship_type(),
                out_degree: snapshot.out_degree(&node.id),
            });
        }
    }
    history.retain(|_, points| points.len() > 1);

    TrendComparison {
        rows,
        changes: history,
    }
}
