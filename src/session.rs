use std::{cmp::Ordering, fmt::Display};

use rand::rngs::ThreadRng;

use crate::{
    history::HistoryTracker,
    question::Question,
    series::{self, PresentationUnit},
};

///How a study session selects and orders its questions.
#[derive(Clone, Debug)]
pub enum SessionMode {
    ///Everything, never-attempted material shuffled in front of the rest.
    All,
    ///Wrong-or-unsure questions, ranked by error rate.
    Review,
    ///Batch and/or category filter, then ranked or shuffled.
    Custom {
        batch: Option<String>,
        category: Option<String>,
        ranked: bool,
    },
    ///Exactly one question, addressed by display id.
    Lookup { display_id: String },
}

///Why a session could not be built. Empty outcomes ("nothing matched",
///"nothing to review") are expected results the caller reports to the user;
///only [`SessionError::MissingCriteria`] is a caller mistake.
#[derive(Debug)]
pub enum SessionError {
    NoQuestions,
    NothingToReview,
    NoMatches,
    NotFound(String),
    MissingCriteria,
}

impl SessionError {
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::MissingCriteria)
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoQuestions => f.write_str("NoQuestions: the question set is empty"),
            Self::NothingToReview => f.write_str("NothingToReview: no wrong or unsure questions"),
            Self::NoMatches => f.write_str("NoMatches: no questions match the given filters"),
            Self::NotFound(id) => {
                f.write_fmt(format_args!("NotFound: no question with display id {id}"))
            }
            Self::MissingCriteria => {
                f.write_str("MissingCriteria: custom mode needs a batch or a category filter")
            }
        }
    }
}

///An ordered run of presentation units plus the cursor and counters the quiz
///runner mutates. Discarded at session end; only history persists.
#[derive(Debug)]
pub struct Session<'a> {
    units: Vec<PresentationUnit<'a>>,
    unit_index: usize,
    item_index: usize,
    correct: usize,
    total: usize,
}

impl<'a> Session<'a> {
    fn new(units: Vec<PresentationUnit<'a>>) -> Self {
        Self {
            units,
            unit_index: 0,
            item_index: 0,
            correct: 0,
            total: 0,
        }
    }

    pub fn units(&self) -> &[PresentationUnit<'a>] {
        &self.units
    }

    pub fn question_count(&self) -> usize {
        self.units.iter().map(PresentationUnit::len).sum()
    }

    ///The question under the cursor, or None once the session is exhausted.
    pub fn current(&self) -> Option<&'a Question> {
        self.units
            .get(self.unit_index)?
            .questions()
            .get(self.item_index)
            .copied()
    }

    ///1-based position of the cursor across all questions, for progress
    ///display.
    pub fn position(&self) -> usize {
        self.units[..self.unit_index]
            .iter()
            .map(PresentationUnit::len)
            .sum::<usize>()
            + self.item_index
            + 1
    }

    pub fn record_result(&mut self, was_correct: bool) {
        self.total += 1;
        if was_correct {
            self.correct += 1;
        }
    }

    ///Moves the cursor forward, crossing into the next unit when the current
    ///one is exhausted. Returns false once there is nothing left.
    pub fn advance(&mut self) -> bool {
        let Some(unit) = self.units.get(self.unit_index) else {
            return false;
        };
        if self.item_index + 1 < unit.len() {
            self.item_index += 1;
            return true;
        }
        self.unit_index += 1;
        self.item_index = 0;
        self.unit_index < self.units.len()
    }

    pub fn summary(&self) -> (usize, usize) {
        (self.correct, self.total)
    }
}

///Builds the ordered unit list for a study session.
pub fn build<'a>(
    questions: &'a [Question],
    history: &HistoryTracker,
    mode: &SessionMode,
    rng: &mut ThreadRng,
) -> Result<Session<'a>, SessionError> {
    let units = match mode {
        SessionMode::All => {
            if questions.is_empty() {
                return Err(SessionError::NoQuestions);
            }
            let (never, attempted): (Vec<&Question>, Vec<&Question>) = questions
                .iter()
                .partition(|question| !history.attempted(&question.id));

            //New material leads, but both partitions are shuffled at the
            //unit level so series stay intact.
            let mut units = series::group(&never);
            series::shuffle(&mut units, rng);
            let mut seen = series::group(&attempted);
            series::shuffle(&mut seen, rng);
            units.extend(seen);
            units
        }
        SessionMode::Review => {
            let units = ranked_review(questions.iter().collect(), history);
            if units.is_empty() {
                return Err(SessionError::NothingToReview);
            }
            units
        }
        SessionMode::Custom {
            batch,
            category,
            ranked,
        } => {
            if batch.is_none() && category.is_none() {
                return Err(SessionError::MissingCriteria);
            }
            let filtered: Vec<&Question> = questions
                .iter()
                .filter(|question| {
                    batch
                        .as_deref()
                        .is_none_or(|batch| question.batch_prefix() == Some(batch))
                        && category
                            .as_deref()
                            .is_none_or(|category| question.category == category)
                })
                .collect();
            if filtered.is_empty() {
                return Err(SessionError::NoMatches);
            }
            if *ranked {
                let units = ranked_review(filtered, history);
                if units.is_empty() {
                    return Err(SessionError::NothingToReview);
                }
                units
            } else {
                let mut units = series::group(&filtered);
                series::shuffle(&mut units, rng);
                units
            }
        }
        SessionMode::Lookup { display_id } => {
            let question = questions
                .iter()
                .find(|question| question.display_id == *display_id)
                .ok_or_else(|| SessionError::NotFound(display_id.clone()))?;
            vec![PresentationUnit::singleton(question)]
        }
    };

    Ok(Session::new(units))
}

///Review ordering: wrong-or-unsure questions only, ranked descending by
///error rate with raw wrong count as the tie-break. A fixed ranked order,
///deliberately not shuffled.
fn ranked_review<'a>(
    questions: Vec<&'a Question>,
    history: &HistoryTracker,
) -> Vec<PresentationUnit<'a>> {
    let mut entries: Vec<(&Question, f64, u32)> = questions
        .into_iter()
        .filter_map(|question| {
            let record = history.get(&question.id)?;
            record
                .needs_review()
                .then(|| (question, record.error_rate(), record.wrong_count))
        })
        .collect();

    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(b.2.cmp(&a.2))
    });

    entries
        .into_iter()
        .map(|(question, _, _)| PresentationUnit::singleton(question))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::{
        answer::Response,
        history::HistoryTracker,
        question::{CorrectAnswer, Question, QuestionId, QuestionType},
    };

    use super::{build, SessionError, SessionMode};

    fn question(id: &str, display_id: &str, category: &str) -> Question {
        Question {
            id: QuestionId::from(id),
            display_id: display_id.to_owned(),
            custom_id: None,
            kind: QuestionType::Single,
            category: category.to_owned(),
            question_text: id.to_owned(),
            explanation: String::new(),
            image_url: None,
            case_text: None,
            case_image_url: None,
            options: vec!["a".to_owned(), "b".to_owned()],
            correct_answer: CorrectAnswer::One("a".to_owned()),
            created_at: None,
        }
    }

    ///Records `total` attempts, the last `wrong` of them incorrect.
    fn attempts(history: &mut HistoryTracker, id: &str, wrong: u32, total: u32) {
        let id = QuestionId::from(id);
        for n in 0..total {
            history.record_attempt(&id, Response::Text("x".to_owned()), n < total - wrong);
        }
    }

    fn first_ids(session: &super::Session) -> Vec<String> {
        session
            .units()
            .iter()
            .flat_map(|unit| unit.questions().iter().map(|q| q.id.to_string()))
            .collect()
    }

    #[test]
    fn all_mode_puts_new_material_first() {
        let questions: Vec<Question> = (0..6)
            .map(|n| question(&format!("q{n}"), &format!("1_{n}"), "c"))
            .collect();
        let mut history = HistoryTracker::new();
        attempts(&mut history, "q0", 0, 1);
        attempts(&mut history, "q1", 1, 2);

        let rng = &mut rand::thread_rng();
        let session =
            build(&questions, &history, &SessionMode::All, rng).expect("Unable to build session");
        let ids = first_ids(&session);

        assert_eq!(ids.len(), 6);
        //First four are the never-attempted ones, in some shuffled order.
        assert!(ids[..4].iter().all(|id| !history.attempted(&QuestionId::from(id.as_str()))));
        assert!(ids[4..].iter().all(|id| history.attempted(&QuestionId::from(id.as_str()))));
    }

    #[test]
    fn all_mode_empty_set_is_no_questions() {
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();
        assert!(build(&[], &history, &SessionMode::All, rng)
            .is_err_and(|err| matches!(err, SessionError::NoQuestions)));
    }

    #[test]
    fn review_mode_ranks_by_error_rate_then_wrong_count() {
        let questions = vec![
            question("low", "1_1", "c"),
            question("high_few", "1_2", "c"),
            question("high_many", "1_3", "c"),
        ];
        let mut history = HistoryTracker::new();
        //Error rates 0.5, 0.8, 0.8 with wrong counts 10, 4, 8. Equal rates
        //tie-break on the raw wrong count.
        attempts(&mut history, "low", 10, 20);
        attempts(&mut history, "high_few", 4, 5);
        attempts(&mut history, "high_many", 8, 10);

        let rng = &mut rand::thread_rng();
        let session = build(&questions, &history, &SessionMode::Review, rng)
            .expect("Unable to build review session");
        assert_eq!(first_ids(&session), vec!["high_many", "high_few", "low"]);
    }

    #[test]
    fn review_mode_includes_unsure_correct_answers() {
        let questions = vec![question("q0", "1_1", "c")];
        let mut history = HistoryTracker::new();
        attempts(&mut history, "q0", 0, 1);
        history
            .set_unsure(&QuestionId::from("q0"), true)
            .expect("Unable to set unsure");

        let rng = &mut rand::thread_rng();
        let session = build(&questions, &history, &SessionMode::Review, rng)
            .expect("Unable to build review session");
        assert_eq!(session.question_count(), 1);
    }

    #[test]
    fn review_mode_empty_is_reportable() {
        let questions = vec![question("q0", "1_1", "c")];
        let mut history = HistoryTracker::new();
        attempts(&mut history, "q0", 0, 1);

        let rng = &mut rand::thread_rng();
        let err = build(&questions, &history, &SessionMode::Review, rng)
            .expect_err("review of all-correct history must be empty");
        assert!(matches!(err, SessionError::NothingToReview));
        assert!(!err.is_input_error());
    }

    #[test]
    fn custom_mode_filters_by_batch_and_category() {
        let questions = vec![
            question("a", "2_1", "循環器"),
            question("b", "2_2", "呼吸器"),
            question("c", "3_1", "循環器"),
        ];
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();

        let mode = SessionMode::Custom {
            batch: Some("2".to_owned()),
            category: Some("循環器".to_owned()),
            ranked: false,
        };
        let session =
            build(&questions, &history, &mode, rng).expect("Unable to build custom session");
        assert_eq!(first_ids(&session), vec!["a"]);
    }

    #[test]
    fn custom_mode_requires_criteria() {
        let questions = vec![question("a", "2_1", "c")];
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();
        let mode = SessionMode::Custom {
            batch: None,
            category: None,
            ranked: false,
        };
        let err = build(&questions, &history, &mode, rng).expect_err("criteria are required");
        assert!(matches!(err, SessionError::MissingCriteria));
        assert!(err.is_input_error());
    }

    #[test]
    fn custom_mode_no_matches() {
        let questions = vec![question("a", "2_1", "c")];
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();
        let mode = SessionMode::Custom {
            batch: Some("9".to_owned()),
            category: None,
            ranked: false,
        };
        assert!(build(&questions, &history, &mode, rng)
            .is_err_and(|err| matches!(err, SessionError::NoMatches)));
    }

    #[test]
    fn lookup_mode_finds_exactly_one() {
        let questions = vec![question("a", "2_1", "c"), question("b", "2_2", "c")];
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();

        let mode = SessionMode::Lookup {
            display_id: "2_2".to_owned(),
        };
        let session =
            build(&questions, &history, &mode, rng).expect("Unable to build lookup session");
        assert_eq!(first_ids(&session), vec!["b"]);

        let missing = SessionMode::Lookup {
            display_id: "9_9".to_owned(),
        };
        assert!(build(&questions, &history, &missing, rng)
            .is_err_and(|err| matches!(err, SessionError::NotFound(_))));
    }

    #[test]
    fn cursor_walks_every_question() {
        let questions = vec![question("a", "2_1", "c"), question("b", "2_2", "c")];
        let history = HistoryTracker::new();
        let rng = &mut rand::thread_rng();
        let mut session = build(&questions, &history, &SessionMode::All, rng)
            .expect("Unable to build session");

        assert_eq!(session.position(), 1);
        assert!(session.current().is_some());
        assert!(session.advance());
        assert_eq!(session.position(), 2);
        assert!(!session.advance());
        assert!(session.current().is_none());
    }
}
