use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MULTI_CAP: usize = 10;
pub const DEFAULT_SINGLE_CAP: usize = 1;
pub const FRIEND_RELATIONSHIP: &str = "friend";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub class: String,
    pub is_active: bool,
}

/// One submitted survey form. `answers` is kept as the raw JSON the form
/// produced and is only resolved into [`Answer`]s by the parser.
#[derive(Debug, Clone)]
pub struct SurveyResponse {
    pub survey_id: String,
    pub student_id: Option<String>,
    pub answers: Value,
}

/// A resolved answer to a single friend-selection question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multi(Vec<String>),
}

impl Answer {
    pub fn default_cap(&self) -> usize {
        match self {
            Answer::Single(_) => DEFAULT_SINGLE_CAP,
            Answer::Multi(_) => DEFAULT_MULTI_CAP,
        }
    }

    pub fn selections(&self) -> &[String] {
        match self {
            Answer::Single(id) => std::slice::from_ref(id),
            Answer::Multi(ids) => ids,
        }
    }
}

/// Per-question `maxSelections` taken from the survey template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionLimits {
    caps: BTreeMap<String, usize>,
}

impl QuestionLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, question_key: impl Into<String>, cap: usize) -> Self {
        self.insert(question_key, cap);
        self
    }

    pub fn insert(&mut self, question_key: impl Into<String>, cap: usize) {
        self.caps.insert(question_key.into(), cap);
    }

    /// Reads `max_selections` (or `maxSelections`) from template metadata.
    ///
    /// Templates store either an array indexed by question number, where
    /// index 0 belongs to `q1`, or an object keyed by question key. Entries
    /// that are not non-negative integers are ignored and fall back to the
    /// defaults at lookup time.
    pub fn from_template_metadata(metadata: &Value) -> Self {
        let mut limits = Self::new();
        let raw = metadata
            .get("max_selections")
            .or_else(|| metadata.get("maxSelections"));

        match raw {
            Some(Value::Array(values)) => {
                for (index, value) in values.iter().enumerate() {
                    if let Some(cap) = value.as_u64() {
                        limits.insert(format!("q{}", index + 1), cap as usize);
                    }
                }
            }
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if let Some(cap) = value.as_u64() {
                        limits.insert(key.clone(), cap as usize);
                    }
                }
            }
            _ => {}
        }

        limits
    }

    pub fn cap_for(&self, question_key: &str, answer: &Answer) -> usize {
        self.caps
            .get(question_key)
            .copied()
            .unwrap_or_else(|| answer.default_cap())
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

/// Directed selection: `source` chose `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: u32,
    pub relationship_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub class: String,
    pub centrality: f64,
    pub community: usize,
}

impl Node {
    pub fn friendship_type(&self) -> FriendshipType {
        FriendshipType::from_centrality(self.centrality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    pub members: Vec<String>,
    pub size: usize,
    pub internal_density: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub total_students: usize,
    pub total_relationships: usize,
    pub density: f64,
    pub average_degree: f64,
    pub clustering_coefficient: f64,
    pub average_path_length: f64,
    pub modularity: f64,
}

/// Ordered bands shown in class reports, derived from centrality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FriendshipType {
    Isolated,
    FewFriends,
    Average,
    ManyFriends,
    SocialStar,
}

impl FriendshipType {
    pub const ALL: [FriendshipType; 5] = [
        FriendshipType::Isolated,
        FriendshipType::FewFriends,
        FriendshipType::Average,
        FriendshipType::ManyFriends,
        FriendshipType::SocialStar,
    ];

    pub fn from_centrality(centrality: f64) -> Self {
        if centrality < 0.2 {
            FriendshipType::Isolated
        } else if centrality < 0.4 {
            FriendshipType::FewFriends
        } else if centrality < 0.6 {
            FriendshipType::Average
        } else if centrality < 0.8 {
            FriendshipType::ManyFriends
        } else {
            FriendshipType::SocialStar
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FriendshipType::Isolated => "isolated",
            FriendshipType::FewFriends => "few-friends",
            FriendshipType::Average => "average",
            FriendshipType::ManyFriends => "many-friends",
            FriendshipType::SocialStar => "social-star",
        }
    }
}

impl std::fmt::Display for FriendshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which students a survey targets. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterScope {
    pub grades: Vec<String>,
    pub classes: Vec<String>,
}

impl RosterScope {
    pub fn admits(&self, student: &Student) -> bool {
        student.is_active
            && (self.grades.is_empty() || self.grades.contains(&student.grade))
            && (self.classes.is_empty() || self.classes.contains(&student.class))
    }
}

/// Everything the engine needs to know about the caller's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisContext {
    pub survey_id: String,
    pub scope: RosterScope,
}

impl AnalysisContext {
    pub fn new(survey_id: impl Into<String>) -> Self {
        Self {
            survey_id: survey_id.into(),
            scope: RosterScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: RosterScope) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(0.0, FriendshipType::Isolated)]
    #[case(0.1, FriendshipType::Isolated)]
    #[case(0.2, FriendshipType::FewFriends)]
    #[case(0.39, FriendshipType::FewFriends)]
    #[case(0.4, FriendshipType::Average)]
    #[case(0.6, FriendshipType::ManyFriends)]
    #[case(0.79, FriendshipType::ManyFriends)]
    #[case(0.8, FriendshipType::SocialStar)]
    #[case(1.0, FriendshipType::SocialStar)]
    fn bands_follow_centrality(#[case] centrality: f64, #[case] expected: FriendshipType) {
        assert_eq!(FriendshipType::from_centrality(centrality), expected);
    }

    #[test]
    fn bands_are_ordered() {
        let mut sorted = FriendshipType::ALL;
        sorted.sort();
        assert_eq!(sorted, FriendshipType::ALL);
    }

    #[test]
    fn answers_resolve_from_json() {
        let single: Answer = serde_json::from_value(json!("s1")).unwrap();
        assert_eq!(single, Answer::Single("s1".to_string()));

        let multi: Answer = serde_json::from_value(json!(["s1", "s2"])).unwrap();
        assert_eq!(multi.selections(), ["s1".to_string(), "s2".to_string()]);

        assert!(serde_json::from_value::<Answer>(json!(42)).is_err());
        assert!(serde_json::from_value::<Answer>(json!({"a": 1})).is_err());
    }

    #[test]
    fn limits_read_array_metadata_by_question_number() {
        let limits = QuestionLimits::from_template_metadata(&json!({
            "max_selections": [3, 5, 1, 1]
        }));
        let multi = Answer::Multi(Vec::new());
        assert_eq!(limits.cap_for("q1", &multi), 3);
        assert_eq!(limits.cap_for("q2", &multi), 5);
        assert_eq!(limits.cap_for("q4", &multi), 1);
        assert_eq!(limits.cap_for("q5", &multi), DEFAULT_MULTI_CAP);
    }

    #[test]
    fn limits_read_object_metadata_and_camel_case_key() {
        let limits = QuestionLimits::from_template_metadata(&json!({
            "maxSelections": {"best_friend": 1, "study_partner": 4, "bogus": "x"}
        }));
        assert_eq!(limits.len(), 2);
        let multi = Answer::Multi(Vec::new());
        assert_eq!(limits.cap_for("study_partner", &multi), 4);
        assert_eq!(limits.cap_for("bogus", &multi), DEFAULT_MULTI_CAP);
    }

    #[test]
    fn unspecified_single_answers_default_to_one() {
        let limits = QuestionLimits::new();
        let single = Answer::Single("s1".to_string());
        assert_eq!(limits.cap_for("q9", &single), DEFAULT_SINGLE_CAP);
    }

    #[test]
    fn scope_filters_inactive_and_out_of_class_students() {
        let scope = RosterScope {
            grades: vec!["3".to_string()],
            classes: vec!["2".to_string()],
        };
        let mut student = Student {
            id: "s1".to_string(),
            name: "Avery Lee".to_string(),
            grade: "3".to_string(),
            class: "2".to_string(),
            is_active: true,
        };
        assert!(scope.admits(&student));

        student.class = "1".to_string();
        assert!(!scope.admits(&student));

        student.class = "2".to_string();
        student.is_active = false;
        assert!(!scope.admits(&student));
    }
}
