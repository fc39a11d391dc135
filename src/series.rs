use rand::{rngs::ThreadRng, seq::SliceRandom};

use crate::question::{Question, QuestionType};

///The atomic block of questions shown consecutively: either a lone question
///or a linked case series. Shuffling permutes units, never their contents.
#[derive(Debug)]
pub struct PresentationUnit<'a> {
    questions: Vec<&'a Question>,
}

impl<'a> PresentationUnit<'a> {
    pub fn singleton(question: &'a Question) -> Self {
        Self {
            questions: vec![question],
        }
    }

    pub fn questions(&self) -> &[&'a Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

///Parses a series link id of the form `<10 digits>_<order>`. Anything else,
///including a bare group id or a non-numeric order suffix, does not link.
fn series_link(custom_id: &str) -> Option<(&str, u64)> {
    let (group, order) = custom_id.split_once('_')?;
    if group.len() != 10 || !group.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let order = order.parse().ok()?;
    Some((group, order))
}

///Partitions questions into presentation units. A question joins a series
///group only when it is `series`-typed AND carries a well-formed link id;
///everything else becomes a singleton. Units keep the position of their first
///member; group members are ordered ascending by the link's order suffix.
pub fn group<'a>(questions: &[&'a Question]) -> Vec<PresentationUnit<'a>> {
    let mut units: Vec<PresentationUnit> = Vec::with_capacity(questions.len());
    //Group key and unit index, in first-seen order. Linear scan is fine at
    //question-bank sizes.
    let mut groups: Vec<(String, usize)> = Vec::new();

    for &question in questions {
        let link = (question.kind == QuestionType::Series)
            .then(|| question.custom_id.as_deref().and_then(series_link))
            .flatten();

        match link {
            None => units.push(PresentationUnit::singleton(question)),
            Some((group_id, order)) => {
                let unit = match groups.iter().find(|(key, _)| key == group_id) {
                    Some(&(_, index)) => &mut units[index],
                    None => {
                        groups.push((group_id.to_owned(), units.len()));
                        units.push(PresentationUnit { questions: vec![] });
                        units.last_mut().expect("unit was just pushed")
                    }
                };
                let at = unit
                    .questions
                    .iter()
                    .position(|other| {
                        other
                            .custom_id
                            .as_deref()
                            .and_then(series_link)
                            .is_some_and(|(_, existing)| existing > order)
                    })
                    .unwrap_or(unit.questions.len());
                unit.questions.insert(at, question);
            }
        }
    }

    units
}

///Uniform random permutation of the unit sequence. Internal series order is
///untouched.
pub fn shuffle(units: &mut [PresentationUnit], rng: &mut ThreadRng) {
    units.shuffle(rng);
}

#[cfg(test)]
mod tests {
    use crate::question::{CorrectAnswer, Question, QuestionId, QuestionType};

    use super::{group, series_link, shuffle};

    fn question(id: &str, kind: QuestionType, custom_id: Option<&str>) -> Question {
        Question {
            id: QuestionId::from(id),
            display_id: format!("1_{id}"),
            custom_id: custom_id.map(str::to_owned),
            kind,
            category: "test".to_owned(),
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

    #[test]
    fn series_link_pattern() {
        assert_eq!(series_link("1234567890_2"), Some(("1234567890", 2)));
        assert_eq!(series_link("123456789_2"), None);
        assert_eq!(series_link("1234567890"), None);
        assert_eq!(series_link("1234567890_x"), None);
        assert_eq!(series_link("12345678ab_1"), None);
    }

    #[test]
    fn groups_series_and_orders_by_suffix() {
        let questions = vec![
            question("s2", QuestionType::Series, Some("1234567890_2")),
            question("lone", QuestionType::Single, None),
            question("s1", QuestionType::Series, Some("1234567890_1")),
            question("s3", QuestionType::Series, Some("1234567890_3")),
        ];
        let refs: Vec<&Question> = questions.iter().collect();
        let units = group(&refs);

        assert_eq!(units.len(), 2);
        let series: Vec<&str> = units[0]
            .questions()
            .iter()
            .map(|q| q.id.as_str())
            .collect();
        assert_eq!(series, vec!["s1", "s2", "s3"]);
        assert_eq!(units[1].questions()[0].id.as_str(), "lone");
    }

    #[test]
    fn series_type_without_link_is_singleton() {
        let questions = vec![
            question("a", QuestionType::Series, None),
            question("b", QuestionType::Series, Some("bad_id")),
            //A well-formed link on a non-series question does not group.
            question("c", QuestionType::Single, Some("1234567890_1")),
        ];
        let refs: Vec<&Question> = questions.iter().collect();
        let units = group(&refs);
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|unit| unit.len() == 1));
    }

    #[test]
    fn shuffle_preserves_internal_order() {
        let questions = vec![
            question("s1", QuestionType::Series, Some("1234567890_1")),
            question("s2", QuestionType::Series, Some("1234567890_2")),
            question("s3", QuestionType::Series, Some("1234567890_3")),
            question("a", QuestionType::Single, None),
            question("b", QuestionType::Single, None),
            question("c", QuestionType::Single, None),
        ];
        let refs: Vec<&Question> = questions.iter().collect();
        let rng = &mut rand::thread_rng();

        for _ in 0..50 {
            let mut units = group(&refs);
            shuffle(&mut units, rng);
            let series = units
                .iter()
                .find(|unit| unit.len() == 3)
                .expect("series unit survives shuffling");
            let order: Vec<&str> = series.questions().iter().map(|q| q.id.as_str()).collect();
            assert_eq!(order, vec!["s1", "s2", "s3"]);
        }
    }
}
