use crate::models::{AnalysisContext, QuestionLimits, Student, SurveyResponse};
use crate::snapshot::SnapshotRecord;

/// Read side of the surrounding survey system.
pub trait SurveySource {
    /// Active students inside the context's roster scope.
    async fn eligible_students(&self, context: &AnalysisContext) -> anyhow::Result<Vec<Student>>;
    async fn responses(&self, survey_id: &str) -> anyhow::Result<Vec<SurveyResponse>>;
    async fn max_selections(&self, survey_id: &str) -> anyhow::Result<QuestionLimits>;
}

/// Holds at most one analysis record per survey.
pub trait SnapshotStore {
    /// Stores `record` in place of any previous record for the same survey.
    /// On failure the previous record, if any, must still be readable.
    async fn replace(&self, record: &SnapshotRecord) -> anyhow::Result<()>;
    async fn load(&self, survey_id: &str) -> anyhow::Result<Option<SnapshotRecord>>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use anyhow::bail;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        records: Mutex<HashMap<String, SnapshotRecord>>,
        fail_writes: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl MemoryStore {
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub async fn len(&self) -> usize {
            self.records.lock().await.len()
        }
    }

    impl SnapshotStore for MemoryStore {
        async fn replace(&self, record: &SnapshotRecord) -> anyhow::Result<()> {
            let mut records = self.records.lock().await;
            if self.fail_writes.load(Ordering::SeqCst) {
                bail!("snapshot store unavailable");
            }
            records.insert(record.survey_id.clone(), record.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load(&self, survey_id: &str) -> anyhow::Result<Option<SnapshotRecord>> {
            Ok(self.records.lock().await.get(survey_id).cloned())
        }
    }

    #[derive(Default)]
    pub struct MemorySource {
        pub students: Vec<Student>,
        pub responses: Vec<SurveyResponse>,
        pub limits: HashMap<String, QuestionLimits>,
    }

    impl SurveySource for MemorySource {
        async fn eligible_students(
            &self,
            context: &AnalysisContext,
        ) -> anyhow::Result<Vec<Student>> {
            Ok(self
                .students
                .iter()
                .filter(|student| context.scope.admits(student))
                .cloned()
                .collect())
        }

        async fn responses(&self, survey_id: &str) -> anyhow::Result<Vec<SurveyResponse>> {
            Ok(self
                .responses
                .iter()
                .filter(|response| response.survey_id == survey_id)
                .cloned()
                .collect())
        }

        async fn max_selections(&self, survey_id: &str) -> anyhow::Result<QuestionLimits> {
            Ok(self.limits.get(survey_id).cloned().unwrap_or_default())
        }
    }
}
