use std::fmt::Display;

use log::warn;

use crate::{
    answer::{self, Response},
    history::{HistoryError, HistoryTracker},
    question::{Question, QuestionType},
    session::Session,
    store::DocumentStore,
};

#[derive(Debug)]
pub enum RunnerError {
    EmptyResponse,
    NotAnswering,
    NotRevealed,
    Finished,
    History(HistoryError),
}

impl Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyResponse => f.write_str("EmptyResponse: answer something first"),
            Self::NotAnswering => f.write_str("NotAnswering: the answer was already revealed"),
            Self::NotRevealed => f.write_str("NotRevealed: submit an answer first"),
            Self::Finished => f.write_str("Finished: the session is over"),
            Self::History(err) => f.write_fmt(format_args!("History: {err}")),
        }
    }
}

impl From<HistoryError> for RunnerError {
    fn from(err: HistoryError) -> Self {
        Self::History(err)
    }
}

///Where the runner stands for the question under the cursor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Answering,
    Revealed { correct: bool },
    Terminal,
}

///Transient response state for the current question, distinct from the
///persisted history record. Merged into history only at submit.
#[derive(Default)]
struct ResponseBuffer {
    selections: Vec<String>,
    text: String,
}

impl ResponseBuffer {
    fn clear(&mut self) {
        self.selections.clear();
        self.text.clear();
    }

    fn response_for(&self, question: &Question) -> Response {
        if question.kind == QuestionType::Input || question.options.is_empty() {
            Response::Text(self.text.clone())
        } else {
            Response::Selections(self.selections.clone())
        }
    }
}

///Drives a single study session over one question at a time:
///Answering → Revealed → (Answering\[next\] | Terminal). No backward
///navigation.
pub struct QuizRunner<'a> {
    session: Session<'a>,
    phase: Phase,
    buffer: ResponseBuffer,
    ///History collection path for this scope and user.
    history_path: String,
}

impl<'a> QuizRunner<'a> {
    pub fn new(session: Session<'a>, history_path: String) -> Self {
        let phase = if session.current().is_some() {
            Phase::Answering
        } else {
            Phase::Terminal
        };
        Self {
            session,
            phase,
            buffer: ResponseBuffer::default(),
            history_path,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&'a Question> {
        self.session.current()
    }

    pub fn position(&self) -> usize {
        self.session.position()
    }

    pub fn question_count(&self) -> usize {
        self.session.question_count()
    }

    pub fn summary(&self) -> (usize, usize) {
        self.session.summary()
    }

    pub fn selections(&self) -> &[String] {
        &self.buffer.selections
    }

    ///Edits the selection set while answering: single-select replaces, the
    ///multi-valued types toggle membership.
    pub fn toggle_option(&mut self, option: &str) -> Result<(), RunnerError> {
        if self.phase != Phase::Answering {
            return Err(RunnerError::NotAnswering);
        }
        let question = self.session.current().ok_or(RunnerError::Finished)?;
        if question.kind == QuestionType::Single {
            self.buffer.selections.clear();
            self.buffer.selections.push(option.to_owned());
        } else if let Some(at) = self.buffer.selections.iter().position(|s| s == option) {
            self.buffer.selections.remove(at);
        } else {
            self.buffer.selections.push(option.to_owned());
        }
        Ok(())
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), RunnerError> {
        if self.phase != Phase::Answering {
            return Err(RunnerError::NotAnswering);
        }
        self.buffer.text = text.into();
        Ok(())
    }

    ///Scores the captured response, folds it into history and writes the
    ///record through to the store. The write is fire-and-continue: a
    ///persistence fault is logged and the record flagged unsynced, but the
    ///in-memory update and the phase transition stand regardless.
    pub fn submit(
        &mut self,
        history: &mut HistoryTracker,
        store: &mut impl DocumentStore,
    ) -> Result<bool, RunnerError> {
        if self.phase != Phase::Answering {
            return Err(RunnerError::NotAnswering);
        }
        let question = self.session.current().ok_or(RunnerError::Finished)?;
        let response = self.buffer.response_for(question);
        if response.is_empty() {
            return Err(RunnerError::EmptyResponse);
        }

        let correct = answer::evaluate(question, &response);
        let record = history.record_attempt(&question.id, response, correct);
        self.session.record_result(correct);

        match serde_json::to_value(record) {
            Ok(data) => {
                if let Err(err) = store.set_document(&self.history_path, &question.id, data) {
                    warn!("history write-through failed for {}: {err}", question.id);
                    history.mark_unsynced(&question.id);
                } else {
                    history.mark_synced(&question.id);
                }
            }
            Err(err) => {
                warn!("unable to serialize history for {}: {err}", question.id);
                history.mark_unsynced(&question.id);
            }
        }

        self.phase = Phase::Revealed { correct };
        Ok(correct)
    }

    ///Flags the revealed question as unsure (or clears the flag). Offered
    ///only after the answer is revealed; routes the question into the review
    ///queue regardless of correctness.
    pub fn mark_unsure(
        &mut self,
        flag: bool,
        history: &mut HistoryTracker,
        store: &mut impl DocumentStore,
    ) -> Result<(), RunnerError> {
        if !matches!(self.phase, Phase::Revealed { .. }) {
            return Err(RunnerError::NotRevealed);
        }
        let question = self.session.current().ok_or(RunnerError::Finished)?;
        history.set_unsure(&question.id, flag)?;

        let partial = serde_json::json!({ "isUnsure": flag });
        if let Err(err) = store.update_fields(&self.history_path, &question.id, partial) {
            warn!("unsure flag write-through failed for {}: {err}", question.id);
            history.mark_unsynced(&question.id);
        }
        Ok(())
    }

    ///The single action Revealed accepts. Clears the response buffer and
    ///moves on; past the last question the session becomes Terminal.
    pub fn advance(&mut self) -> Result<Phase, RunnerError> {
        match self.phase {
            Phase::Revealed { .. } => {
                self.buffer.clear();
                self.phase = if self.session.advance() {
                    Phase::Answering
                } else {
                    Phase::Terminal
                };
                Ok(self.phase)
            }
            Phase::Answering => Err(RunnerError::NotRevealed),
            Phase::Terminal => Err(RunnerError::Finished),
        }
    }

    ///Ends the session early, keeping the summary gathered so far.
    pub fn quit(&mut self) {
        self.phase = Phase::Terminal;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        history::HistoryTracker,
        question::{CorrectAnswer, Question, QuestionId, QuestionType},
        session::{self, SessionMode},
        store::MemoryStore,
    };

    use super::{Phase, QuizRunner, RunnerError};

    fn questions() -> Vec<Question> {
        vec![
            Question {
                id: QuestionId::from("q1"),
                display_id: "1_1".to_owned(),
                custom_id: None,
                kind: QuestionType::Single,
                category: "循環器".to_owned(),
                question_text: "MRの聴診所見は？".to_owned(),
                explanation: "全収縮期雑音が聴取される。".to_owned(),
                image_url: None,
                case_text: None,
                case_image_url: None,
                options: vec!["拡張期ランブル".to_owned(), "全収縮期雑音".to_owned()],
                correct_answer: CorrectAnswer::One("全収縮期雑音".to_owned()),
                created_at: None,
            },
            Question {
                id: QuestionId::from("q2"),
                display_id: "1_2".to_owned(),
                custom_id: None,
                kind: QuestionType::Input,
                category: "内分泌".to_owned(),
                question_text: "バセドウ病の自己抗体は？".to_owned(),
                explanation: String::new(),
                image_url: None,
                case_text: None,
                case_image_url: None,
                options: vec![],
                correct_answer: CorrectAnswer::One("TRAb".to_owned()),
                created_at: None,
            },
        ]
    }

    fn runner<'a>(questions: &'a [Question], history: &HistoryTracker) -> QuizRunner<'a> {
        let rng = &mut rand::thread_rng();
        let mode = SessionMode::Lookup {
            display_id: "1_1".to_owned(),
        };
        let session = session::build(questions, history, &mode, rng)
            .expect("Unable to build session");
        QuizRunner::new(session, "h".to_owned())
    }

    #[test]
    fn correct_answer_end_to_end() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();
        let mut runner = runner(&questions, &history);

        runner
            .toggle_option("全収縮期雑音")
            .expect("Unable to select option");
        let correct = runner
            .submit(&mut history, &mut store)
            .expect("Unable to submit");
        assert!(correct);
        assert_eq!(runner.phase(), Phase::Revealed { correct: true });

        let record = history.get(&QuestionId::from("q1")).expect("record exists");
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.wrong_count, 0);
        //Write-through landed.
        assert_eq!(store.document_count("h"), 1);

        assert_eq!(runner.advance().expect("Unable to advance"), Phase::Terminal);
        assert_eq!(runner.summary(), (1, 1));
    }

    #[test]
    fn second_wrong_attempt_increments_wrong_count() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();

        {
            let mut runner = runner(&questions, &history);
            runner.toggle_option("全収縮期雑音").expect("select");
            runner.submit(&mut history, &mut store).expect("submit");
        }
        {
            let mut runner = runner(&questions, &history);
            runner.toggle_option("拡張期ランブル").expect("select");
            let correct = runner.submit(&mut history, &mut store).expect("submit");
            assert!(!correct);
        }

        let record = history.get(&QuestionId::from("q1")).expect("record exists");
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.wrong_count, 1);
    }

    #[test]
    fn empty_response_is_rejected() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();
        let mut runner = runner(&questions, &history);

        assert!(runner
            .submit(&mut history, &mut store)
            .is_err_and(|err| matches!(err, RunnerError::EmptyResponse)));
        assert_eq!(runner.phase(), Phase::Answering);
        assert!(history.is_empty());
    }

    #[test]
    fn single_select_replaces_previous_choice() {
        let questions = questions();
        let history = HistoryTracker::new();
        let mut runner = runner(&questions, &history);

        runner.toggle_option("拡張期ランブル").expect("select");
        runner.toggle_option("全収縮期雑音").expect("select");
        assert_eq!(runner.selections(), ["全収縮期雑音"]);
    }

    #[test]
    fn revealed_accepts_only_advance() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();
        let mut runner = runner(&questions, &history);

        runner.toggle_option("全収縮期雑音").expect("select");
        runner.submit(&mut history, &mut store).expect("submit");

        assert!(runner
            .toggle_option("拡張期ランブル")
            .is_err_and(|err| matches!(err, RunnerError::NotAnswering)));
        assert!(runner
            .submit(&mut history, &mut store)
            .is_err_and(|err| matches!(err, RunnerError::NotAnswering)));
    }

    #[test]
    fn failed_write_through_keeps_memory_state() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();
        store.fail_writes = true;
        let mut runner = runner(&questions, &history);

        runner.toggle_option("全収縮期雑音").expect("select");
        let correct = runner
            .submit(&mut history, &mut store)
            .expect("submit must survive a store fault");
        assert!(correct);

        //Optimistic in-memory state intact, record flagged for retry.
        let id = QuestionId::from("q1");
        assert_eq!(history.get(&id).expect("record exists").attempt_count, 1);
        assert_eq!(history.unsynced_ids().count(), 1);

        store.fail_writes = false;
        let flushed = history
            .flush_unsynced(&mut store, "h")
            .expect("Unable to flush");
        assert_eq!(flushed, 1);
        assert_eq!(store.document_count("h"), 1);
    }

    #[test]
    fn unsure_only_after_reveal() {
        let questions = questions();
        let mut history = HistoryTracker::new();
        let mut store = MemoryStore::new();
        let mut runner = runner(&questions, &history);

        assert!(runner
            .mark_unsure(true, &mut history, &mut store)
            .is_err_and(|err| matches!(err, RunnerError::NotRevealed)));

        runner.toggle_option("全収縮期雑音").expect("select");
        runner.submit(&mut history, &mut store).expect("submit");
        runner
            .mark_unsure(true, &mut history, &mut store)
            .expect("Unable to mark unsure");

        let record = history.get(&QuestionId::from("q1")).expect("record exists");
        assert!(record.is_unsure);
        assert!(record.needs_review());
    }
}
