use std::fmt::Display;

use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{
    answer::Response,
    question::QuestionId,
    store::{Document, DocumentStore, StoreError},
};

#[derive(Debug)]
pub enum HistoryError {
    NeverAttempted(QuestionId),
    Store(StoreError),
    BadRecord(String, serde_json::Error),
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeverAttempted(id) => f.write_fmt(format_args!(
                "NeverAttempted: question {id} has no history record"
            )),
            Self::Store(err) => f.write_fmt(format_args!("Store: {err}")),
            Self::BadRecord(id, err) => {
                f.write_fmt(format_args!("BadRecord: history for {id}: {err}"))
            }
        }
    }
}

impl From<StoreError> for HistoryError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

///Per-question answer history for one user. Counters only ever grow; the
///last answer and timestamp are overwritten on every attempt, so only the
///single most recent prior attempt is visible mid-session.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub is_correct: bool,
    #[serde(default)]
    pub is_unsure: bool,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub wrong_count: u32,
    pub last_answer: Response,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    ///`wrong_count / attempt_count`, or 0 when never attempted.
    pub fn error_rate(&self) -> f64 {
        if self.attempt_count == 0 {
            0.0
        } else {
            f64::from(self.wrong_count) / f64::from(self.attempt_count)
        }
    }

    ///A record routes its question into the review queue when the last
    ///attempt was wrong or the user flagged it unsure. The unsure flag is
    ///not an error signal but counts the same for review inclusion.
    pub fn needs_review(&self) -> bool {
        !self.is_correct || self.is_unsure
    }
}

#[derive(Default)]
pub struct HistoryTracker {
    records: HashMap<QuestionId, HistoryRecord>,
    ///Records whose latest state failed to reach the store. The attempt
    ///itself is never dropped; these are retried on the next save.
    unsynced: HashSet<QuestionId>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_documents(documents: Vec<Document>) -> Result<Self, HistoryError> {
        let mut records = HashMap::with_capacity(documents.len());
        for doc in documents {
            let record: HistoryRecord = serde_json::from_value(doc.data)
                .map_err(|err| HistoryError::BadRecord(doc.id.clone(), err))?;
            records.insert(QuestionId(doc.id), record);
        }
        Ok(Self {
            records,
            unsynced: HashSet::new(),
        })
    }

    pub fn load(store: &impl DocumentStore, collection: &str) -> Result<Self, HistoryError> {
        Self::load_from_documents(store.list_all(collection)?)
    }

    pub fn get(&self, id: &QuestionId) -> Option<&HistoryRecord> {
        self.records.get(id)
    }

    pub fn attempted(&self, id: &QuestionId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    ///Questions currently in the review queue.
    pub fn review_count(&self) -> usize {
        self.records.values().filter(|r| r.needs_review()).count()
    }

    ///Applies one attempt. Increments the attempt counter, increments the
    ///wrong counter on an incorrect answer, clears the unsure flag (it only
    ///reapplies through an explicit toggle afterwards) and overwrites the
    ///last answer and timestamp.
    pub fn record_attempt(
        &mut self,
        id: &QuestionId,
        response: Response,
        was_correct: bool,
    ) -> &HistoryRecord {
        let record = self
            .records
            .entry(id.clone())
            .and_modify(|record| {
                record.attempt_count += 1;
                if !was_correct {
                    record.wrong_count += 1;
                }
                record.is_correct = was_correct;
                record.is_unsure = false;
                record.timestamp = Utc::now();
            })
            .or_insert_with(|| HistoryRecord {
                is_correct: was_correct,
                is_unsure: false,
                attempt_count: 1,
                wrong_count: u32::from(!was_correct),
                last_answer: Response::Text(String::new()),
                timestamp: Utc::now(),
            });
        record.last_answer = response;
        record
    }

    ///Toggles the unsure flag on an existing record. The flag is only
    ///offerable after at least one attempt, so a missing record is an error.
    pub fn set_unsure(&mut self, id: &QuestionId, flag: bool) -> Result<&HistoryRecord, HistoryError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| HistoryError::NeverAttempted(id.clone()))?;
        record.is_unsure = flag;
        Ok(record)
    }

    pub fn mark_unsynced(&mut self, id: &QuestionId) {
        self.unsynced.insert(id.clone());
    }

    pub fn mark_synced(&mut self, id: &QuestionId) {
        self.unsynced.remove(id);
    }

    pub fn unsynced_ids(&self) -> impl Iterator<Item = &QuestionId> {
        self.unsynced.iter()
    }

    ///Retries the write-through for every record that previously failed to
    ///persist. Returns how many were flushed.
    pub fn flush_unsynced(
        &mut self,
        store: &mut impl DocumentStore,
        collection: &str,
    ) -> Result<usize, HistoryError> {
        let ids: Vec<QuestionId> = self.unsynced.iter().cloned().collect();
        let mut flushed = 0;
        for id in ids {
            if let Some(record) = self.records.get(&id) {
                let data = serde_json::to_value(record)
                    .map_err(|err| HistoryError::BadRecord(id.to_string(), err))?;
                store.set_document(collection, &id, data)?;
            }
            self.unsynced.remove(&id);
            flushed += 1;
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        answer::Response,
        question::QuestionId,
        store::{DocumentStore, MemoryStore},
    };

    use super::{HistoryError, HistoryRecord, HistoryTracker};

    fn text(s: &str) -> Response {
        Response::Text(s.to_owned())
    }

    #[test]
    fn record_attempt_counts() {
        let mut tracker = HistoryTracker::new();
        let id = QuestionId::from("q1");

        let record = tracker.record_attempt(&id, text("a"), true);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.wrong_count, 0);
        assert!(record.is_correct);

        let record = tracker.record_attempt(&id, text("b"), false);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.wrong_count, 1);
        assert!(!record.is_correct);
        assert_eq!(record.last_answer, text("b"));
    }

    #[test]
    fn wrong_count_never_exceeds_attempts() {
        let mut tracker = HistoryTracker::new();
        let id = QuestionId::from("q1");
        let outcomes = [false, false, true, false, true, true, false];

        for (n, &correct) in outcomes.iter().enumerate() {
            let record = tracker.record_attempt(&id, text("x"), correct);
            assert_eq!(record.attempt_count as usize, n + 1);
            assert!(record.wrong_count <= record.attempt_count);
        }
    }

    #[test]
    fn new_attempt_clears_unsure() {
        let mut tracker = HistoryTracker::new();
        let id = QuestionId::from("q1");

        tracker.record_attempt(&id, text("a"), true);
        tracker.set_unsure(&id, true).expect("Unable to set unsure");
        assert!(tracker.get(&id).expect("record exists").is_unsure);

        tracker.record_attempt(&id, text("a"), true);
        assert!(!tracker.get(&id).expect("record exists").is_unsure);
    }

    #[test]
    fn set_unsure_requires_record() {
        let mut tracker = HistoryTracker::new();
        assert!(tracker
            .set_unsure(&QuestionId::from("never"), true)
            .is_err_and(|err| matches!(err, HistoryError::NeverAttempted(_))));
    }

    #[test]
    fn unsure_routes_into_review() {
        let mut tracker = HistoryTracker::new();
        let id = QuestionId::from("q1");
        tracker.record_attempt(&id, text("a"), true);
        assert_eq!(tracker.review_count(), 0);
        tracker.set_unsure(&id, true).expect("Unable to set unsure");
        assert_eq!(tracker.review_count(), 1);
    }

    #[test]
    fn error_rate_of_unattempted_is_zero() {
        let record = HistoryRecord {
            is_correct: false,
            is_unsure: false,
            attempt_count: 0,
            wrong_count: 0,
            last_answer: text(""),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(record.error_rate(), 0.0);
    }

    #[test]
    fn load_from_store_documents() {
        let mut store = MemoryStore::new();
        store
            .set_document(
                "h",
                "q1",
                json!({
                    "isCorrect": false,
                    "isUnsure": false,
                    "attemptCount": 3,
                    "wrongCount": 2,
                    "lastAnswer": ["a", "b"],
                    "timestamp": "2026-08-30T12:00:00Z"
                }),
            )
            .expect("Unable to seed store");

        let tracker = HistoryTracker::load(&store, "h").expect("Unable to load history");
        let record = tracker.get(&QuestionId::from("q1")).expect("record exists");
        assert_eq!(record.attempt_count, 3);
        assert!((record.error_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            record.last_answer,
            Response::Selections(vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    fn flush_retries_unsynced_records() {
        let mut tracker = HistoryTracker::new();
        let id = QuestionId::from("q1");
        tracker.record_attempt(&id, text("a"), false);
        tracker.mark_unsynced(&id);

        let mut store = MemoryStore::new();
        let flushed = tracker
            .flush_unsynced(&mut store, "h")
            .expect("Unable to flush");
        assert_eq!(flushed, 1);
        assert_eq!(store.document_count("h"), 1);
        assert_eq!(tracker.unsynced_ids().count(), 0);
    }
}
