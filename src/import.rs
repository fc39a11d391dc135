use std::{fmt::Display, path::PathBuf};

use chrono::Utc;
use log::info;

use crate::{
    bank::QuestionBank,
    question::{CorrectAnswer, Question, QuestionId, QuestionType},
    store::{AbortFlag, BatchOp, DocumentStore, Scope, StoreError, MAX_BATCH_OPS},
};

#[derive(Debug)]
pub enum ImportError {
    ///The batch number did not parse as a number.
    BadBatch(String),
    ///A batch with this prefix is already present; nothing was written.
    BatchExists(String),
    NoRows,
    IoError(PathBuf, std::io::Error),
    SerdeError(String, serde_json::Error),
    Store(StoreError),
    ///A chunk failed after earlier chunks committed. Not a silent success:
    ///`committed` rows are in the store, the rest are not.
    Partial { committed: usize, source: StoreError },
}

impl Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadBatch(batch) => {
                f.write_fmt(format_args!("BadBatch: \"{batch}\" is not a batch number"))
            }
            Self::BatchExists(batch) => f.write_fmt(format_args!(
                "BatchExists: batch {batch} was already imported"
            )),
            Self::NoRows => f.write_str("NoRows: no usable rows found in the CSV"),
            Self::IoError(path, err) => f.write_fmt(format_args!(
                "IoError: {err}, path: {}",
                path.to_str().unwrap_or("unknown")
            )),
            Self::SerdeError(id, err) => {
                f.write_fmt(format_args!("SerdeError: question {id}: {err}"))
            }
            Self::Store(err) => f.write_fmt(format_args!("Store: {err}")),
            Self::Partial { committed, source } => f.write_fmt(format_args!(
                "Partial: {committed} rows committed before failure: {source}"
            )),
        }
    }
}

impl From<StoreError> for ImportError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[derive(Debug)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
    pub aborted: bool,
}

///Splits one CSV line, honoring double-quoted fields and `""` escapes.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quote && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quote = !in_quote;
                }
            }
            ',' if !in_quote => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

///Name-indexed header columns. `option1..N` are collected in order for as
///long as the header keeps naming them.
struct HeaderMap {
    columns: Vec<String>,
    option_count: usize,
}

impl HeaderMap {
    fn detect(cells: &[String]) -> Option<Self> {
        if !cells.iter().any(|c| c.trim() == "questionText") {
            return None;
        }
        let columns: Vec<String> = cells.iter().map(|c| c.trim().to_owned()).collect();
        let option_count = (1..)
            .take_while(|n| columns.iter().any(|c| c == &format!("option{n}")))
            .count();
        Some(Self {
            columns,
            option_count,
        })
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|c| c == name)?;
        row.get(index).map(String::as_str)
    }

    fn options(&self, row: &[String]) -> Vec<String> {
        (1..=self.option_count)
            .filter_map(|n| self.get(row, &format!("option{n}")))
            .map(str::trim)
            .filter(|opt| !opt.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn parse_header_row(header: &HeaderMap, cols: &[String]) -> Option<Question> {
    let kind: QuestionType = header.get(cols, "type")?.parse().ok()?;
    let question_text = non_empty(header.get(cols, "questionText"))?;
    let correct_raw = non_empty(header.get(cols, "correctAnswer"))?;

    Some(Question {
        id: QuestionId::default(),
        display_id: String::new(),
        custom_id: non_empty(header.get(cols, "id")),
        kind,
        category: non_empty(header.get(cols, "category")).unwrap_or_default(),
        question_text,
        explanation: non_empty(header.get(cols, "explanation")).unwrap_or_default(),
        image_url: non_empty(header.get(cols, "imageUrl")),
        case_text: non_empty(header.get(cols, "caseText")),
        case_image_url: non_empty(header.get(cols, "caseImageUrl")),
        options: if kind == QuestionType::Input {
            vec![]
        } else {
            header.options(cols)
        },
        correct_answer: correct_answer_for(kind, &correct_raw),
        created_at: None,
    })
}

///Legacy layout used by headerless files:
///`type,category,questionText,correctAnswer,imageUrl,option1..5,explanation`.
fn parse_positional_row(cols: &[String]) -> Option<Question> {
    const MIN_COLUMNS: usize = 4;
    if cols.len() < MIN_COLUMNS {
        return None;
    }
    let kind: QuestionType = cols[0].parse().ok()?;
    let question_text = non_empty(cols.get(2).map(String::as_str))?;
    let correct_raw = non_empty(cols.get(3).map(String::as_str))?;

    let options = if kind == QuestionType::Input {
        vec![]
    } else {
        cols.iter()
            .skip(5)
            .take(5)
            .map(|opt| opt.trim())
            .filter(|opt| !opt.is_empty())
            .map(str::to_owned)
            .collect()
    };

    Some(Question {
        id: QuestionId::default(),
        display_id: String::new(),
        custom_id: None,
        kind,
        category: non_empty(cols.get(1).map(String::as_str)).unwrap_or_default(),
        question_text,
        explanation: non_empty(cols.get(10).map(String::as_str)).unwrap_or_default(),
        image_url: non_empty(cols.get(4).map(String::as_str)),
        case_text: None,
        case_image_url: None,
        options,
        correct_answer: correct_answer_for(kind, &correct_raw),
        created_at: None,
    })
}

fn correct_answer_for(kind: QuestionType, raw: &str) -> CorrectAnswer {
    match kind {
        QuestionType::Multi | QuestionType::Hyper => {
            CorrectAnswer::Many(raw.split('|').map(|s| s.trim().to_owned()).collect())
        }
        _ => CorrectAnswer::One(raw.to_owned()),
    }
}

///Parses CSV text into questions. Malformed rows are skipped individually,
///never fatal to the import; the skipped count is reported back.
fn parse_rows(text: &str, batch: &str) -> (Vec<Question>, usize) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let mut questions = Vec::new();
    let mut skipped = 0;

    let Some(first) = lines.next() else {
        return (questions, skipped);
    };
    let first_cells = parse_csv_line(first);
    let header = HeaderMap::detect(&first_cells);
    let created_at = Utc::now().to_rfc3339();

    let mut handle = |cols: Vec<String>| {
        let parsed = match &header {
            Some(header) => parse_header_row(header, &cols),
            None => parse_positional_row(&cols),
        };
        match parsed {
            Some(mut question) => {
                let sequence = questions.len() + 1;
                question.display_id = format!("{batch}_{sequence}");
                question.id = QuestionId(question.display_id.clone());
                question.created_at = Some(created_at.clone());
                questions.push(question);
            }
            None => skipped += 1,
        }
    };

    if header.is_none() {
        handle(first_cells);
    }
    for line in lines {
        handle(parse_csv_line(line));
    }

    (questions, skipped)
}

///Imports a CSV batch. The batch number is validated and checked for
///collision against the loaded bank before anything is written; writes go
///out in store-sized chunks with no cross-chunk atomicity.
pub fn import_csv(
    store: &mut impl DocumentStore,
    scope: &Scope,
    bank: &mut QuestionBank,
    text: &str,
    batch: &str,
    abort: &AbortFlag,
) -> Result<ImportReport, ImportError> {
    if batch.trim().is_empty() || batch.parse::<u64>().is_err() {
        return Err(ImportError::BadBatch(batch.to_owned()));
    }
    if bank.batch_exists(batch) {
        return Err(ImportError::BatchExists(batch.to_owned()));
    }

    let (questions, skipped) = parse_rows(text, batch);
    if questions.is_empty() {
        return Err(ImportError::NoRows);
    }

    let collection = scope.questions();
    let mut ops = Vec::with_capacity(questions.len());
    for question in &questions {
        let data = serde_json::to_value(question)
            .map_err(|err| ImportError::SerdeError(question.id.to_string(), err))?;
        ops.push(BatchOp::Set {
            collection: collection.clone(),
            id: question.id.to_string(),
            data,
        });
    }

    let mut committed = 0;
    let mut aborted = false;
    for chunk in ops.chunks(MAX_BATCH_OPS) {
        if abort.is_aborted() {
            aborted = true;
            break;
        }
        store
            .batch_commit(chunk.to_vec())
            .map_err(|source| ImportError::Partial { committed, source })?;
        committed += chunk.len();
        info!("imported {committed}/{} questions into batch {batch}", questions.len());
    }

    let mut questions = questions;
    questions.truncate(committed);
    bank.extend_imported(questions);

    Ok(ImportReport {
        added: committed,
        skipped,
        aborted,
    })
}

///The CSV template handed to question authors: the header-driven column set
///plus one example row, BOM-prefixed for spreadsheet tools.
pub fn template() -> String {
    let header = "id,type,category,questionText,correctAnswer,imageUrl,caseText,caseImageUrl,explanation,option1,option2,option3,option4,option5";
    let example = "single,循環器,\"MRの聴診所見は？\",全収縮期雑音,,,,\"解説文です\",拡張期ランブル,収縮期駆出性雑音,全収縮期雑音,連続性雑音,拡張早期灌水様雑音";
    format!("\u{feff}{header}\n,{example}\n")
}

pub fn write_template(path: impl Into<PathBuf>) -> Result<(), ImportError> {
    let path: PathBuf = path.into();
    std::fs::write(&path, template()).map_err(|err| ImportError::IoError(path, err))
}
