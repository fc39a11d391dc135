use std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
};

use serde::{de::Visitor, ser::SerializeSeq, Deserialize, Serialize};

///Batch prefix assigned to manually created questions. Display ids are only
///guaranteed unique within an imported batch; manual entries all share this
///sentinel.
pub const MANUAL_BATCH: &str = "manual";

///Display id given to manually created questions.
pub const MANUAL_DISPLAY_ID: &str = "manual_0";

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multi,
    Input,
    Series,
    Hyper,
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            "input" => Ok(Self::Input),
            "series" => Ok(Self::Series),
            "hyper" => Ok(Self::Hyper),
            other => Err(format!("Question type not recognized: {other}")),
        }
    }
}

impl Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Input => "input",
            Self::Series => "series",
            Self::Hyper => "hyper",
        })
    }
}

///Opaque stable identifier assigned by the persistence layer.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct QuestionId(pub String);

impl Deref for QuestionId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for QuestionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

///A single question as stored in the question collection.
///
///`correct_answer` is deliberately loose on the wire: authors may declare the
///answer as literal option text, as a `|`-delimited list of alternatives, or
///as 1-based option indices. Resolution into a canonical accepted set happens
///at evaluation time (see [`crate::answer::resolve_correct_answers`]) and is
///never persisted back onto the question.
///
///Example:
///```
///# use medqb::question::{Question, QuestionType};
///let json = r#"{
///  "type": "single",
///  "category": "循環器",
///  "questionText": "僧帽弁閉鎖不全症(MR)の聴診所見として最も適切なものはどれか。",
///  "options": ["拡張期ランブル", "全収縮期雑音"],
///  "correctAnswer": "全収縮期雑音",
///  "explanation": "MRでは全収縮期雑音が心尖部で聴取される。"
///}"#;
///assert!(serde_json::from_str::<Question>(json)
///  .is_ok_and(|q| q.kind == QuestionType::Single && q.options.len() == 2));
///```
#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: QuestionId,
    #[serde(default)]
    pub display_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub category: String,
    pub question_text: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_image_url: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: CorrectAnswer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Default for QuestionId {
    fn default() -> Self {
        Self(String::new())
    }
}

impl Question {
    ///The `_`-delimited first segment of the display id, identifying the
    ///import batch this question came from.
    pub fn batch_prefix(&self) -> Option<&str> {
        self.display_id.split('_').next().filter(|s| !s.is_empty())
    }
}

impl Debug for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Question")
            .field("id", &self.id)
            .field("display_id", &self.display_id)
            .field("kind", &self.kind)
            .field("category", &self.category)
            .finish()
    }
}

///Declared correct answer(s): either one string (which may itself carry
///`|`-delimited alternatives) or an explicit set of strings.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum CorrectAnswer {
    One(String),
    Many(Vec<String>),
}

impl CorrectAnswer {
    ///Raw alternatives before index resolution. A `Many` answer is used
    ///as-is; a `One` answer is split on `|`.
    pub fn alternatives(&self) -> Vec<&str> {
        match self {
            Self::One(text) => text.split('|').collect(),
            Self::Many(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn join(&self, sep: &str) -> String {
        match self {
            Self::One(text) => text.clone(),
            Self::Many(items) => items.join(sep),
        }
    }
}

impl From<&str> for CorrectAnswer {
    fn from(text: &str) -> Self {
        Self::One(text.to_owned())
    }
}

impl Serialize for CorrectAnswer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::One(text) => serializer.serialize_str(text),
            Self::Many(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct CorrectAnswerVisitor;

impl<'de> Visitor<'de> for CorrectAnswerVisitor {
    type Value = CorrectAnswer;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a string or a sequence of strings")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut items = match seq.size_hint() {
            Some(size) => Vec::with_capacity(size),
            None => vec![],
        };

        while let Some(next) = seq.next_element()? {
            items.push(next);
        }

        Ok(CorrectAnswer::Many(items))
    }

    fn visit_str<E>(self, text: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(CorrectAnswer::One(text.to_owned()))
    }
}

impl<'de> Deserialize<'de> for CorrectAnswer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(CorrectAnswerVisitor)
    }
}

///Unvalidated input for manual question creation.
#[derive(Debug, Clone)]
pub struct QuestionDraft {
    pub kind: QuestionType,
    pub category: String,
    pub question_text: String,
    pub options: Vec<String>,
    ///Indices into `options` (after empty options are dropped) marking the
    ///correct choice(s). Ignored for `input` questions.
    pub correct_indices: Vec<usize>,
    ///Free-text correct answer. Used only for `input` questions.
    pub correct_text: String,
    pub explanation: String,
}

impl QuestionDraft {
    ///Validates the draft and produces a question carrying the manual
    ///display-id sentinel. All validation happens before any write is
    ///attempted.
    pub fn build(self) -> Result<Question, QuestionError> {
        if self.question_text.trim().is_empty() {
            return Err(QuestionError::MissingField("questionText"));
        }
        if self.category.trim().is_empty() {
            return Err(QuestionError::MissingField("category"));
        }
        if self.explanation.trim().is_empty() {
            return Err(QuestionError::MissingField("explanation"));
        }

        let options: Vec<String> = self
            .options
            .into_iter()
            .filter(|opt| !opt.trim().is_empty())
            .collect();

        let correct_answer = if self.kind == QuestionType::Input {
            if self.correct_text.trim().is_empty() {
                return Err(QuestionError::MissingField("correctAnswer"));
            }
            CorrectAnswer::One(self.correct_text)
        } else {
            if self.correct_indices.is_empty() {
                return Err(QuestionError::NoCorrectOption);
            }
            if let Some(&index) = self
                .correct_indices
                .iter()
                .find(|&&index| index >= options.len())
            {
                return Err(QuestionError::OptionIndexOutOfRange(index, options.len()));
            }
            if self.kind == QuestionType::Single {
                CorrectAnswer::One(options[self.correct_indices[0]].clone())
            } else {
                CorrectAnswer::Many(
                    self.correct_indices
                        .iter()
                        .map(|&index| options[index].clone())
                        .collect(),
                )
            }
        };

        Ok(Question {
            id: QuestionId::default(),
            display_id: MANUAL_DISPLAY_ID.to_owned(),
            custom_id: None,
            kind: self.kind,
            category: self.category,
            question_text: self.question_text,
            explanation: self.explanation,
            image_url: None,
            case_text: None,
            case_image_url: None,
            options: if self.kind == QuestionType::Input {
                vec![]
            } else {
                options
            },
            correct_answer,
            created_at: None,
        })
    }
}

#[derive(Debug)]
pub enum QuestionError {
    MissingField(&'static str),
    NoCorrectOption,
    OptionIndexOutOfRange(usize, usize),
}

impl Display for QuestionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => {
                f.write_fmt(format_args!("MissingField: \"{field}\" is required"))
            }
            Self::NoCorrectOption => f.write_str("NoCorrectOption: no correct option selected"),
            Self::OptionIndexOutOfRange(index, len) => f.write_fmt(format_args!(
                "OptionIndexOutOfRange: index {index} out of range for {len} options"
            )),
        }
    }
}
