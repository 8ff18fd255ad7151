use std::collections::BTreeMap;

use anyhow::{bail, Context};
use serde_json::{json, Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{AnalysisContext, QuestionLimits, RosterScope, Student, SurveyResponse};
use crate::snapshot::{Recommendations, SnapshotRecord, ANALYSIS_TYPE};
use crate::store::{SnapshotStore, SurveySource};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed roster, response and snapshot access.
#[derive(Clone)]
pub struct PgSurveyStore {
    pool: PgPool,
}

impl PgSurveyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds the analysis context from the survey's own target scope.
    pub async fn load_context(&self, survey_id: &str) -> anyhow::Result<AnalysisContext> {
        let row = sqlx::query(
            "SELECT target_grades, target_classes FROM friendship_network.surveys WHERE id = $1",
        )
        .bind(survey_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            bail!("survey {survey_id} not found");
        };

        Ok(AnalysisContext::new(survey_id).with_scope(RosterScope {
            grades: row.get("target_grades"),
            classes: row.get("target_classes"),
        }))
    }

    pub async fn survey_title(&self, survey_id: &str) -> anyhow::Result<Option<String>> {
        let title = sqlx::query("SELECT title FROM friendship_network.surveys WHERE id = $1")
            .bind(survey_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("title"));
        Ok(title)
    }
}

impl SurveySource for PgSurveyStore {
    async fn eligible_students(&self, context: &AnalysisContext) -> anyhow::Result<Vec<Student>> {
        let rows = sqlx::query(
            r#"
            SELECT st.id::text AS id, st.name, st.grade, st.class, st.is_active
            FROM friendship_network.students st
            JOIN friendship_network.surveys sv ON sv.school_id = st.school_id
            WHERE sv.id = $1
              AND st.is_active
              AND (cardinality($2::text[]) = 0 OR st.grade = ANY($2))
              AND (cardinality($3::text[]) = 0 OR st.class = ANY($3))
            ORDER BY st.grade, st.class, st.name, st.id
            "#,
        )
        .bind(&context.survey_id)
        .bind(&context.scope.grades)
        .bind(&context.scope.classes)
        .fetch_all(&self.pool)
        .await?;

        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            students.push(Student {
                id: row.get("id"),
                name: row.get("name"),
                grade: row.get("grade"),
                class: row.get("class"),
                is_active: row.get("is_active"),
            });
        }

        Ok(students)
    }

    async fn responses(&self, survey_id: &str) -> anyhow::Result<Vec<SurveyResponse>> {
        let rows = sqlx::query(
            r#"
            SELECT survey_id, student_id::text AS student_id, answers
            FROM friendship_network.survey_responses
            WHERE survey_id = $1
            ORDER BY submitted_at, id
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        let mut responses = Vec::with_capacity(rows.len());
        for row in rows {
            responses.push(SurveyResponse {
                survey_id: row.get("survey_id"),
                student_id: row.get("student_id"),
                answers: row.get("answers"),
            });
        }

        Ok(responses)
    }

    async fn max_selections(&self, survey_id: &str) -> anyhow::Result<QuestionLimits> {
        let row = sqlx::query(
            r#"
            SELECT t.metadata
            FROM friendship_network.surveys s
            LEFT JOIN friendship_network.survey_templates t ON t.id = s.template_id
            WHERE s.id = $1
            "#,
        )
        .bind(survey_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            bail!("survey {survey_id} not found");
        };
        let metadata: Option<Value> = row.get("metadata");

        Ok(metadata
            .map(|metadata| QuestionLimits::from_template_metadata(&metadata))
            .unwrap_or_default())
    }
}

impl SnapshotStore for PgSurveyStore {
    async fn replace(&self, record: &SnapshotRecord) -> anyhow::Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to start transaction")?;

        // Serializes concurrent re-analysis of one survey across processes.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&record.survey_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM friendship_network.network_analysis_results
            WHERE survey_id = $1 AND analysis_type = $2
            "#,
        )
        .bind(&record.survey_id)
        .bind(&record.analysis_type)
        .execute(&mut *tx)
        .await
        .context("failed to remove previous snapshot")?;

        sqlx::query(
            r#"
            INSERT INTO friendship_network.network_analysis_results
            (id, survey_id, analysis_type, calculated_at, risk_indicators, recommendations)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.survey_id)
        .bind(&record.analysis_type)
        .bind(record.calculated_at)
        .bind(Json(record.risk_indicators()))
        .bind(Json(&record.recommendations))
        .execute(&mut *tx)
        .await
        .context("failed to insert snapshot")?;

        tx.commit().await.context("failed to commit snapshot")?;
        Ok(())
    }

    async fn load(&self, survey_id: &str) -> anyhow::Result<Option<SnapshotRecord>> {
        let row = sqlx::query(
            r#"
            SELECT survey_id, analysis_type, calculated_at, recommendations
            FROM friendship_network.network_analysis_results
            WHERE survey_id = $1 AND analysis_type = $2
            "#,
        )
        .bind(survey_id)
        .bind(ANALYSIS_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(recommendations): Json<Recommendations> = row
            .try_get("recommendations")
            .with_context(|| format!("stored snapshot for survey {survey_id} is unreadable"))?;

        Ok(Some(SnapshotRecord {
            survey_id: row.get("survey_id"),
            analysis_type: row.get("analysis_type"),
            calculated_at: row.get("calculated_at"),
            recommendations,
        }))
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let school_id = "gs-demo";
    let students = vec![
        ("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2", "30201", "Avery Lee"),
        ("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc", "30202", "Jules Moreno"),
        ("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2", "30203", "Kiara Patel"),
        ("7b1e3c54-8d0a-4f63-9a2e-5c4f1d2b6e90", "30204", "Noah Kim"),
        ("a9c2e7f1-3b5d-4e8a-b6c1-2d9f0e4a7b35", "30205", "Mina Park"),
        ("5e8d1a3c-7f2b-4c96-8e0d-b1a4f6c3d927", "30206", "Theo Grant"),
    ];

    let mut ids = Vec::new();
    for (id, number, name) in students {
        let id = Uuid::parse_str(id)?;
        sqlx::query(
            r#"
            INSERT INTO friendship_network.students
            (id, school_id, student_number, name, grade, class)
            VALUES ($1, $2, $3, $4, '3', '2')
            ON CONFLICT (student_number) DO UPDATE
            SET name = EXCLUDED.name, is_active = TRUE
            "#,
        )
        .bind(id)
        .bind(school_id)
        .bind(number)
        .bind(name)
        .execute(pool)
        .await?;
        ids.push(id.to_string());
    }

    let template_id = Uuid::parse_str("c4f0b2d8-1e6a-4a7b-9c3d-8f5e2a1b0c94")?;
    sqlx::query(
        r#"
        INSERT INTO friendship_network.survey_templates (id, name, metadata)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET metadata = EXCLUDED.metadata
        "#,
    )
    .bind(template_id)
    .bind("Friendship survey")
    .bind(json!({"max_selections": [3, 2, 1]}))
    .execute(pool)
    .await?;

    let survey_id = "friendship-2026-spring";
    sqlx::query(
        r#"
        INSERT INTO friendship_network.surveys
        (id, title, school_id, template_id, target_grades, target_classes)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(survey_id)
    .bind("Spring friendship survey, grade 3 class 2")
    .bind(school_id)
    .bind(template_id)
    .bind(vec!["3".to_string()])
    .bind(vec!["2".to_string()])
    .execute(pool)
    .await?;

    let answers = vec![
        (0, json!({"q1": [&ids[1], &ids[2]], "q2": [&ids[1]], "q3": &ids[3]})),
        (1, json!({"q1": [&ids[0], &ids[2], &ids[4]], "q3": &ids[0]})),
        (2, json!({"q1": [&ids[0], &ids[1]], "q2": [&ids[4], &ids[3]]})),
        (3, json!({"q1": [&ids[2]]})),
        (4, json!({"q1": [&ids[2], &ids[1], &ids[0], &ids[3]]})),
    ];

    for (respondent, answers) in answers {
        sqlx::query(
            r#"
            INSERT INTO friendship_network.survey_responses (id, survey_id, student_id, answers)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (survey_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(survey_id)
        .bind(Uuid::parse_str(&ids[respondent])?)
        .bind(answers)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub struct StudentCsvRow {
    pub student_number: String,
    pub name: String,
    pub grade: String,
    pub class: String,
    pub school_id: String,
    pub is_active: Option<bool>,
}

pub async fn import_students(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut upserted = 0usize;

    for result in reader.deserialize::<StudentCsvRow>() {
        let row = result?;
        let outcome = sqlx::query(
            r#"
            INSERT INTO friendship_network.students
            (id, school_id, student_number, name, grade, class, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_number) DO UPDATE
            SET name = EXCLUDED.name, grade = EXCLUDED.grade, class = EXCLUDED.class,
                school_id = EXCLUDED.school_id, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.school_id)
        .bind(&row.student_number)
        .bind(&row.name)
        .bind(&row.grade)
        .bind(&row.class)
        .bind(row.is_active.unwrap_or(true))
        .execute(pool)
        .await?;

        upserted += outcome.rows_affected() as usize;
    }

    Ok(upserted)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ResponseCsvRow {
    pub survey_id: String,
    pub student_id: String,
    pub question_key: String,
    pub selections: String,
}

/// Folds one-row-per-question CSV data into one answers object per
/// respondent. `selections` holds `;`-separated student ids.
pub fn group_response_rows(rows: Vec<ResponseCsvRow>) -> Vec<(String, String, Value)> {
    let mut grouped: BTreeMap<(String, String), Map<String, Value>> = BTreeMap::new();

    for row in rows {
        let picks: Vec<Value> = row
            .selections
            .split(';')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Value::String(id.to_string()))
            .collect();
        grouped
            .entry((row.survey_id, row.student_id))
            .or_default()
            .insert(row.question_key, Value::Array(picks));
    }

    grouped
        .into_iter()
        .map(|((survey_id, student_id), answers)| (survey_id, student_id, Value::Object(answers)))
        .collect()
}

pub async fn import_responses(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<ResponseCsvRow>() {
        rows.push(result?);
    }

    let mut stored = 0usize;
    for (survey_id, student_id, answers) in group_response_rows(rows) {
        let student_uuid = Uuid::parse_str(&student_id)
            .with_context(|| format!("student id `{student_id}` is not a UUID"))?;

        let result = sqlx::query(
            r#"
            INSERT INTO friendship_network.survey_responses (id, survey_id, student_id, answers)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (survey_id, student_id) DO UPDATE
            SET answers = EXCLUDED.answers, submitted_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&survey_id)
        .bind(student_uuid)
        .bind(&answers)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            stored += 1;
        }
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(survey_id: &str, student_id: &str, question_key: &str, selections: &str) -> ResponseCsvRow {
        ResponseCsvRow {
            survey_id: survey_id.to_string(),
            student_id: student_id.to_string(),
            question_key: question_key.to_string(),
            selections: selections.to_string(),
        }
    }

    #[test]
    fn groups_rows_into_one_answers_object_per_respondent() {
        let grouped = group_response_rows(vec![
            row("spring", "a", "q1", "b; c"),
            row("spring", "a", "q2", "d"),
            row("spring", "b", "q1", ""),
            row("fall", "a", "q1", "c"),
        ]);

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0], ("fall".to_string(), "a".to_string(), json!({"q1": ["c"]})));
        assert_eq!(
            grouped[1],
            (
                "spring".to_string(),
                "a".to_string(),
                json!({"q1": ["b", "c"], "q2": ["d"]})
            )
        );
        assert_eq!(grouped[2].2, json!({"q1": []}));
    }

    #[test]
    fn later_rows_for_the_same_question_win() {
        let grouped = group_response_rows(vec![
            row("spring", "a", "q1", "b"),
            row("spring", "a", "q1", "c;d"),
        ]);

        assert_eq!(grouped[0].2, json!({"q1": ["c", "d"]}));
    }
}
