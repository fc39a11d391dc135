use std::io::{BufRead, Write};

use crate::{
    answer,
    history::HistoryTracker,
    question::{Question, QuestionType},
    runner::{Phase, QuizRunner, RunnerError},
    store::DocumentStore,
    UiError,
};

///Drives a quiz session over stdin/stdout. All presentation here is
///deliberately plain; the engine underneath does not know it exists.
pub fn run_session(
    mut runner: QuizRunner,
    history: &mut HistoryTracker,
    store: &mut impl DocumentStore,
) -> Result<(usize, usize), UiError> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    while runner.phase() != Phase::Terminal {
        let Some(question) = runner.current() else {
            break;
        };
        show_question(&mut output, question, runner.position(), runner.question_count(), history)?;

        //Answering: collect a response until submit succeeds or the user
        //quits.
        loop {
            write!(output, "> ")?;
            output.flush()?;
            let Some(line) = read_line(&mut input)? else {
                runner.quit();
                break;
            };
            let line = line.trim();
            if line == "q" {
                runner.quit();
                break;
            }

            if let Err(err) = capture(&mut runner, question, line) {
                writeln!(output, "{err}")?;
                continue;
            }
            match runner.submit(history, store) {
                Ok(correct) => {
                    show_result(&mut output, question, correct, history)?;
                    break;
                }
                Err(RunnerError::EmptyResponse) => {
                    writeln!(output, "Answer something first (or q to quit).")?;
                }
                Err(err) => {
                    writeln!(output, "{err}")?;
                }
            }
        }

        if runner.phase() == Phase::Terminal {
            break;
        }

        //Revealed: advance is the only move; "u" first toggles unsure.
        loop {
            write!(output, "[Enter] next, u = unsure, q = quit > ")?;
            output.flush()?;
            let Some(line) = read_line(&mut input)? else {
                runner.quit();
                break;
            };
            match line.trim() {
                "q" => {
                    runner.quit();
                    break;
                }
                "u" => {
                    if let Err(err) = runner.mark_unsure(true, history, store) {
                        writeln!(output, "{err}")?;
                    } else {
                        writeln!(output, "Marked unsure; it will come up in review.")?;
                    }
                }
                _ => {
                    if runner.advance().is_ok() {
                        break;
                    }
                }
            }
        }
    }

    Ok(runner.summary())
}

fn read_line(input: &mut impl BufRead) -> Result<Option<String>, UiError> {
    let mut line = String::new();
    let read = input.read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

///Turns one input line into the runner's response buffer: free text for
///`input` questions, 1-based option numbers (or literal option text) for the
///rest.
fn capture(runner: &mut QuizRunner, question: &Question, line: &str) -> Result<(), RunnerError> {
    if question.kind == QuestionType::Input || question.options.is_empty() {
        return runner.set_text(line);
    }

    for token in line.split([' ', ',']).filter(|t| !t.is_empty()) {
        let option = token
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| question.options.get(index))
            .cloned()
            .unwrap_or_else(|| token.to_owned());
        runner.toggle_option(&option)?;
    }
    Ok(())
}

fn show_question(
    output: &mut impl Write,
    question: &Question,
    position: usize,
    total: usize,
    history: &HistoryTracker,
) -> Result<(), UiError> {
    writeln!(output)?;
    writeln!(output, "Q{position}/{total} [{}] {}", question.category, question.kind)?;
    if let Some(case_text) = &question.case_text {
        writeln!(output, "--- {case_text}")?;
    }
    writeln!(output, "{}", question.question_text)?;
    for (index, option) in question.options.iter().enumerate() {
        writeln!(output, "  {}. {option}", index + 1)?;
    }
    if let Some(prev) = history.get(&question.id) {
        writeln!(
            output,
            "(previous attempt: {}, answered \"{}\")",
            if prev.is_correct { "correct" } else { "wrong" },
            prev.last_answer.join(", ")
        )?;
    }
    Ok(())
}

fn show_result(
    output: &mut impl Write,
    question: &Question,
    correct: bool,
    history: &HistoryTracker,
) -> Result<(), UiError> {
    writeln!(output, "{}", if correct { "Correct!" } else { "Incorrect." })?;
    writeln!(
        output,
        "Answer: {}",
        answer::intended_answers(question).join(", ")
    )?;
    if !question.explanation.is_empty() {
        writeln!(output, "{}", question.explanation)?;
    }
    if let Some(record) = history.get(&question.id) {
        writeln!(
            output,
            "(attempts: {}, wrong: {})",
            record.attempt_count, record.wrong_count
        )?;
    }
    Ok(())
}
