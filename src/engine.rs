use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::graph::{build_graph, BuildDiagnostics};
use crate::metrics::MetricScorer;
use crate::models::{AnalysisContext, QuestionLimits, Student, SurveyResponse};
use crate::parser::{parse_responses, ParseDiagnostics};
use crate::snapshot::{AnalysisSnapshot, SnapshotRecord};
use crate::store::{SnapshotStore, SurveySource};

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub snapshot: AnalysisSnapshot,
    pub parse: ParseDiagnostics,
    pub build: BuildDiagnostics,
}

/// Runs the whole pipeline over inputs that are already in memory.
pub fn analyze(
    context: &AnalysisContext,
    roster: &[Student],
    responses: &[SurveyResponse],
    limits: &QuestionLimits,
    scorer: &MetricScorer,
    calculated_at: DateTime<Utc>,
) -> AnalysisOutcome {
    let eligible: Vec<Student> = roster
        .iter()
        .filter(|student| context.scope.admits(student))
        .cloned()
        .collect();
    if eligible.len() < roster.len() {
        warn!(
            excluded = roster.len() - eligible.len(),
            "roster contained students outside the survey scope"
        );
    }

    let parsed = parse_responses(responses, &eligible, limits);
    let (graph, build) = build_graph(&eligible, &parsed.selections);
    let scored = scorer.score(graph);
    let snapshot = AnalysisSnapshot::new(context.survey_id.clone(), calculated_at, scored);

    AnalysisOutcome {
        snapshot,
        parse: parsed.diagnostics,
        build,
    }
}

/// Loads inputs, analyzes and replaces the stored snapshot for one survey.
pub struct Analyzer {
    scorer: MetricScorer,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Analyzer {
    pub fn new(scorer: MetricScorer) -> Self {
        Self {
            scorer,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip_all, fields(survey_id = %context.survey_id))]
    pub async fn run<S, T>(
        &self,
        source: &S,
        store: &T,
        context: &AnalysisContext,
    ) -> anyhow::Result<AnalysisOutcome>
    where
        S: SurveySource,
        T: SnapshotStore,
    {
        let survey_lock = self.survey_lock(&context.survey_id).await;
        let _guard = survey_lock.lock().await;

        let roster = source
            .eligible_students(context)
            .await
            .context("failed to load eligible students")?;
        let responses = source
            .responses(&context.survey_id)
            .await
            .context("failed to load survey responses")?;
        let limits = source
            .max_selections(&context.survey_id)
            .await
            .context("failed to load question limits")?;

        debug!(
            students = roster.len(),
            responses = responses.len(),
            questions = limits.len(),
            "loaded survey inputs"
        );

        let outcome = analyze(
            context,
            &roster,
            &responses,
            &limits,
            &self.scorer,
            Utc::now(),
        );
        outcome
            .snapshot
            .validate()
            .context("analysis produced an inconsistent snapshot")?;

        let record = SnapshotRecord::from_snapshot(outcome.snapshot.clone());
        store
            .replace(&record)
            .await
            .with_context(|| format!("failed to store snapshot for survey {}", context.survey_id))?;

        info!(
            students = outcome.snapshot.nodes.len(),
            relationships = outcome.snapshot.edges.len(),
            communities = outcome.snapshot.communities.len(),
            responses = outcome.parse.responses_parsed,
            discarded_edges = outcome.build.discarded_edges,
            "stored friendship network analysis"
        );

        Ok(outcome)
    }

    async fn survey_lock(&self, survey_id: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight
            .entry(survey_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
