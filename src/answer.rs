use serde::{de::Visitor, ser::SerializeSeq, Deserialize, Serialize};

use crate::question::{Question, QuestionType};

///Characters that may separate an embedded option label from the option's
///body text, e.g. the "." in "A. 全収縮期雑音".
const LABEL_SEPARATORS: &[char] = &['.', ')', ' ', '、'];

///Canonicalizes a free-text answer for comparison: full-width Latin letters
///and digits are folded to half-width, all whitespace is stripped (including
///the ideographic space), and the result is lowercased.
///
///Idempotent: `normalize(normalize(s)) == normalize(s)` for any `s`.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(fold_width)
        .flat_map(char::to_lowercase)
        .collect()
}

///Folds a full-width ASCII-range character (U+FF01..=U+FF5E) to its
///half-width equivalent. Other characters pass through unchanged.
fn fold_width(c: char) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => {
            char::from_u32(c as u32 - 0xFEE0).expect("full-width fold stays in ASCII range")
        }
        _ => c,
    }
}

///True if the string consists solely of (possibly full-width) decimal digits.
fn is_numeric(text: &str) -> bool {
    !text.is_empty() && text.chars().map(fold_width).all(|c| c.is_ascii_digit())
}

///Resolves a question's declared correct answer into the ordered set of
///acceptable values.
///
///A `Many` answer contributes its members directly; a `One` answer is split
///on `|` into alternatives. For option-bearing questions, an alternative that
///is purely numeric (after trimming and width folding) is read as a 1-based
///index into `options` and replaced by the option text at that index, so
///authors may declare the correct choice either by position or by literal
///text. Out-of-range indices fall back to the raw alternative.
///
///Note the authoring footgun this inherits: a literal option whose entire
///text is a number (e.g. the option "5") cannot be declared by text on an
///option-bearing question, because the numeric reading always wins.
pub fn resolve_correct_answers(question: &Question) -> Vec<String> {
    question
        .correct_answer
        .alternatives()
        .into_iter()
        .map(|alt| {
            if question.options.is_empty() {
                return alt.to_owned();
            }
            let trimmed: String = alt.trim().chars().map(fold_width).collect();
            if is_numeric(&trimmed) {
                if let Some(index) = trimmed
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                {
                    if let Some(option) = question.options.get(index) {
                        return option.clone();
                    }
                }
            }
            alt.to_owned()
        })
        .collect()
}

///Compares a selected option against an accepted value, tolerating an
///embedded label prefix on either side of the comparison.
///
///Options are often authored as "A. text" while the accepted answer names
///only the label ("A") or only the body ("text"). A match requires either
///exact equality or that the extra text be delimited by one of
///[`LABEL_SEPARATORS`]; "textA" does not match "text".
pub fn is_option_match(selected: &str, accepted: &str) -> bool {
    if selected == accepted {
        return true;
    }
    if let Some(rest) = selected.strip_prefix(accepted) {
        if rest.starts_with(LABEL_SEPARATORS) {
            return true;
        }
    }
    if let Some(head) = selected.strip_suffix(accepted) {
        if head.ends_with(LABEL_SEPARATORS) {
            return true;
        }
    }
    false
}

///A candidate response captured from the user: free text for `input`
///questions, a selection set for everything option-bearing.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Response {
    Text(String),
    Selections(Vec<String>),
}

impl Response {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Selections(items) => items.is_empty(),
        }
    }

    pub fn join(&self, sep: &str) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Selections(items) => items.join(sep),
        }
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Selections(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct ResponseVisitor;

impl<'de> Visitor<'de> for ResponseVisitor {
    type Value = Response;

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

        Ok(Response::Selections(items))
    }

    fn visit_str<E>(self, text: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Response::Text(text.to_owned()))
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(ResponseVisitor)
    }
}

///Scores a response against a question. Pure: no state, no side effects.
///
///An empty response is never correct; callers are expected to gate on
///[`Response::is_empty`] before invoking this.
pub fn evaluate(question: &Question, response: &Response) -> bool {
    if response.is_empty() {
        return false;
    }
    match question.kind {
        QuestionType::Input => evaluate_input(question, response),
        QuestionType::Single => evaluate_single(question, response),
        QuestionType::Multi | QuestionType::Hyper => evaluate_multi(question, response),
        //A series constituent declares no inner type of its own; its shape
        //decides the rule. No options means free text, several accepted
        //values mean multi-select, otherwise single-select.
        QuestionType::Series => {
            if question.options.is_empty() {
                evaluate_input(question, response)
            } else if resolve_correct_answers(question).len() > 1 {
                evaluate_multi(question, response)
            } else {
                evaluate_single(question, response)
            }
        }
    }
}

fn evaluate_input(question: &Question, response: &Response) -> bool {
    let text = match response {
        Response::Text(text) => text,
        Response::Selections(_) => return false,
    };
    let given = normalize(text);
    question
        .correct_answer
        .alternatives()
        .iter()
        .any(|alt| normalize(alt) == given)
}

fn evaluate_single(question: &Question, response: &Response) -> bool {
    let selected = match response {
        Response::Selections(items) => match items.as_slice() {
            [lone] => lone,
            _ => return false,
        },
        Response::Text(_) => return false,
    };
    let accepted = resolve_correct_answers(question);
    accepted
        .first()
        .is_some_and(|accepted| is_option_match(selected, accepted))
}

fn evaluate_multi(question: &Question, response: &Response) -> bool {
    let selected = match response {
        Response::Selections(items) => items,
        Response::Text(_) => return false,
    };
    let accepted = resolve_correct_answers(question);
    //Cardinality mismatch is disqualifying on its own; a superset of the
    //accepted answers is still wrong.
    selected.len() == accepted.len()
        && selected
            .iter()
            .all(|sel| accepted.iter().any(|acc| is_option_match(sel, acc)))
}

///The canonical accepted answers as shown to the user after revealing.
pub fn intended_answers(question: &Question) -> Vec<String> {
    if question.options.is_empty() {
        question
            .correct_answer
            .alternatives()
            .into_iter()
            .map(str::to_owned)
            .collect()
    } else {
        resolve_correct_answers(question)
    }
}
