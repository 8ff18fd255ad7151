use serde_json::Value;

use crate::models::{Edge, Student, SurveyResponse, FRIEND_RELATIONSHIP};

pub const SURVEY_ID: &str = "survey-spring";

pub fn student(id: &str) -> Student {
    Student {
        id: id.to_string(),
        name: format!("Student {}", id.to_uppercase()),
        grade: "3".to_string(),
        class: "2".to_string(),
        is_active: true,
    }
}

pub fn roster(ids: &[&str]) -> Vec<Student> {
    ids.iter().map(|id| student(id)).collect()
}

pub fn response(student_id: &str, answers: Value) -> SurveyResponse {
    SurveyResponse {
        survey_id: SURVEY_ID.to_string(),
        student_id: Some(student_id.to_string()),
        answers,
    }
}

pub fn edge(source: &str, target: &str) -> Edge {
    Edge {
        source: source.to_string(),
        target: target.to_string(),
        weight: 1,
        relationship_type: FRIEND_RELATIONSHIP.to_string(),
    }
}
