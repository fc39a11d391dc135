use std::fmt::Display;

use chrono::Utc;
use log::info;

use crate::{
    question::{CorrectAnswer, Question, QuestionDraft, QuestionError, QuestionId, QuestionType},
    store::{AbortFlag, BatchOp, DocumentStore, Scope, StoreError, MAX_BATCH_OPS},
};

#[derive(Debug)]
pub enum BankError {
    Question(QuestionError),
    Store(StoreError),
    BadDocument(String, serde_json::Error),
    ///A chunked bulk operation failed midway. Earlier chunks stay committed;
    ///`committed` says how many documents made it.
    Partial {
        committed: usize,
        source: StoreError,
    },
}

impl Display for BankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Question(err) => f.write_fmt(format_args!("Question: {err}")),
            Self::Store(err) => f.write_fmt(format_args!("Store: {err}")),
            Self::BadDocument(id, err) => {
                f.write_fmt(format_args!("BadDocument: question {id}: {err}"))
            }
            Self::Partial { committed, source } => f.write_fmt(format_args!(
                "Partial: {committed} documents committed before failure: {source}"
            )),
        }
    }
}

impl From<QuestionError> for BankError {
    fn from(err: QuestionError) -> Self {
        Self::Question(err)
    }
}

impl From<StoreError> for BankError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

///The loaded question collection for one scope.
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    ///Loads every question in the scope. An empty collection is seeded with
    ///the bundled sample question so a fresh install has something to show.
    pub fn load(store: &mut impl DocumentStore, scope: &Scope) -> Result<Self, BankError> {
        let collection = scope.questions();
        let documents = store.list_all(&collection)?;

        if documents.is_empty() {
            let seed = sample_question();
            let data = serde_json::to_value(&seed)
                .map_err(|err| BankError::BadDocument(seed.id.to_string(), err))?;
            store.set_document(&collection, &seed.id, data)?;
            info!("seeded empty question collection in scope {scope}");
            return Ok(Self {
                questions: vec![seed],
            });
        }

        let mut questions = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut question: Question = serde_json::from_value(doc.data)
                .map_err(|err| BankError::BadDocument(doc.id.clone(), err))?;
            //The store's document id is authoritative.
            question.id = QuestionId(doc.id);
            questions.push(question);
        }
        Ok(Self { questions })
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    ///True when any loaded question already carries this batch prefix.
    pub fn batch_exists(&self, batch: &str) -> bool {
        self.questions
            .iter()
            .any(|question| question.batch_prefix() == Some(batch))
    }

    ///Validates and persists a manually created question.
    pub fn create(
        &mut self,
        store: &mut impl DocumentStore,
        scope: &Scope,
        draft: QuestionDraft,
    ) -> Result<&Question, BankError> {
        let mut question = draft.build()?;
        question.id = QuestionId(generate_doc_id());
        question.created_at = Some(Utc::now().to_rfc3339());

        let data = serde_json::to_value(&question)
            .map_err(|err| BankError::BadDocument(question.id.to_string(), err))?;
        store.set_document(&scope.questions(), &question.id, data)?;

        self.questions.push(question);
        Ok(self.questions.last().expect("question was just pushed"))
    }

    pub fn delete(
        &mut self,
        store: &mut impl DocumentStore,
        scope: &Scope,
        id: &QuestionId,
    ) -> Result<(), BankError> {
        store.delete_document(&scope.questions(), id)?;
        self.questions.retain(|question| question.id != *id);
        Ok(())
    }

    ///Deletes every question of an imported batch, issuing deletes in
    ///store-sized chunks. Aborting stops further chunks; committed deletes
    ///stay deleted. Returns how many questions were removed.
    pub fn delete_batch(
        &mut self,
        store: &mut impl DocumentStore,
        scope: &Scope,
        batch: &str,
        abort: &AbortFlag,
    ) -> Result<usize, BankError> {
        let collection = scope.questions();
        let ids: Vec<QuestionId> = self
            .questions
            .iter()
            .filter(|question| question.batch_prefix() == Some(batch))
            .map(|question| question.id.clone())
            .collect();

        let mut committed = 0;
        for chunk in ids.chunks(MAX_BATCH_OPS) {
            if abort.is_aborted() {
                break;
            }
            let ops = chunk
                .iter()
                .map(|id| BatchOp::Delete {
                    collection: collection.clone(),
                    id: id.to_string(),
                })
                .collect();
            store
                .batch_commit(ops)
                .map_err(|source| BankError::Partial { committed, source })?;
            committed += chunk.len();
            info!("deleted {committed}/{} questions of batch {batch}", ids.len());
        }

        let deleted: Vec<QuestionId> = ids.into_iter().take(committed).collect();
        self.questions
            .retain(|question| !deleted.contains(&question.id));
        Ok(committed)
    }

    pub(crate) fn extend_imported(&mut self, questions: Vec<Question>) {
        self.questions.extend(questions);
    }
}

fn generate_doc_id() -> String {
    format!(
        "{}-{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

///The question a fresh, empty scope is seeded with.
fn sample_question() -> Question {
    Question {
        id: QuestionId::from("q1"),
        display_id: "sample_1".to_owned(),
        custom_id: None,
        kind: QuestionType::Single,
        category: "循環器".to_owned(),
        question_text: "僧帽弁閉鎖不全症(MR)の聴診所見として最も適切なものはどれか。".to_owned(),
        explanation: "僧帽弁閉鎖不全症(MR)では、左室から左房への逆流が生じるため、全収縮期雑音が心尖部で聴取される。"
            .to_owned(),
        image_url: None,
        case_text: None,
        case_image_url: None,
        options: vec![
            "拡張期ランブル".to_owned(),
            "収縮期駆出性雑音".to_owned(),
            "全収縮期雑音".to_owned(),
            "連続性雑音".to_owned(),
            "拡張早期灌水様雑音".to_owned(),
        ],
        correct_answer: CorrectAnswer::One("全収縮期雑音".to_owned()),
        created_at: None,
    }
}
