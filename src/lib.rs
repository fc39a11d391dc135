use clap::Parser;
use log::warn;

use std::{fmt::Display, str::FromStr};

use bank::{BankError, QuestionBank};
use history::{HistoryError, HistoryTracker};
use import::ImportError;
use question::QuestionError;
use runner::{QuizRunner, RunnerError};
use session::{SessionError, SessionMode};
use store::{AbortFlag, JsonFileStore, Scope, ScopePreference, StoreError};

pub mod answer;
pub mod bank;
mod cli;
pub mod console;
pub mod history;
pub mod import;
pub mod question;
pub mod runner;
pub mod series;
pub mod session;
pub mod store;

///Session outcome: correct count and total answered, or None when the run
///performed a management action (import, template, delete) instead of a
///quiz.
pub type CorrectTotal = Option<(usize, usize)>;

pub fn run() -> Result<CorrectTotal, MedqbError> {
    let _ = env_logger::try_init();
    let cli = cli::MedqbCli::parse();

    if let Some(path) = cli.template {
        import::write_template(&path)?;
        println!("Wrote import template to {}", path.display());
        return Ok(None);
    }

    let scope = resolve_scope(cli.scope);
    let mut store = match cli.data_dir {
        Some(dir) => JsonFileStore::new(dir),
        None => JsonFileStore::in_user_home()?,
    };

    let mut bank = QuestionBank::load(&mut store, &scope)?;
    let mut history = HistoryTracker::load(&store, &scope.history(&cli.user))?;

    if let Some(path) = cli.import {
        let batch = cli.import_batch.ok_or(ArgError::MissingImportBatch)?;
        let text = std::fs::read_to_string(&path)
            .map_err(|err| ImportError::IoError(path.clone(), err))?;
        let report = import::import_csv(&mut store, &scope, &mut bank, &text, &batch, &AbortFlag::new())?;
        println!(
            "Imported {} questions into batch {batch} ({} rows skipped){}",
            report.added,
            report.skipped,
            if report.aborted { ", aborted" } else { "" }
        );
        return Ok(None);
    }

    if let Some(batch) = cli.delete_batch {
        let deleted = bank.delete_batch(&mut store, &scope, &batch, &AbortFlag::new())?;
        println!("Deleted {deleted} questions of batch {batch}");
        return Ok(None);
    }

    let mode = match cli.mode {
        Mode::All => SessionMode::All,
        Mode::Review => SessionMode::Review,
        Mode::Custom => SessionMode::Custom {
            batch: cli.batch,
            category: cli.category,
            ranked: cli.ranked,
        },
        Mode::Lookup => SessionMode::Lookup {
            display_id: cli.lookup_id.ok_or(ArgError::MissingLookupId)?,
        },
    };

    let rng = &mut rand::thread_rng();
    let session = match session::build(bank.questions(), &history, &mode, rng) {
        Ok(session) => session,
        //Empty outcomes are results, not faults.
        Err(err) if !err.is_input_error() => {
            println!("{err}");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let history_path = scope.history(&cli.user);
    let runner = QuizRunner::new(session, history_path.clone());
    let summary = console::run_session(runner, &mut history, &mut store)?;

    if history.unsynced_ids().count() > 0 {
        match history.flush_unsynced(&mut store, &history_path) {
            Ok(flushed) => warn!("flushed {flushed} history records that failed earlier"),
            Err(err) => warn!("history records remain unsynced: {err}"),
        }
    }

    Ok(Some(summary))
}

fn resolve_scope(requested: Option<String>) -> Scope {
    match requested {
        Some(app_id) => {
            let scope = Scope::new(app_id);
            if let Err(err) = ScopePreference::save_to_user_home(&scope) {
                warn!("unable to remember scope: {err}");
            }
            scope
        }
        None => match ScopePreference::load_from_user_home() {
            Ok(Some(scope)) => scope,
            Ok(None) => Scope::default(),
            Err(err) => {
                warn!("unable to load scope preference: {err}");
                Scope::default()
            }
        },
    }
}

#[derive(Clone, Debug)]
pub enum Mode {
    All,
    Review,
    Custom,
    Lookup,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();

        if s == "all" {
            Ok(Self::All)
        } else if s == "review" {
            Ok(Self::Review)
        } else if s == "custom" {
            Ok(Self::Custom)
        } else if s == "lookup" {
            Ok(Self::Lookup)
        } else {
            Err(format!("Mode argument not recognized: {s}"))
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::All => "all",
            Mode::Review => "review",
            Mode::Custom => "custom",
            Mode::Lookup => "lookup",
        })
    }
}

#[derive(Debug)]
pub enum MedqbError {
    Question(Box<QuestionError>),
    Bank(BankError),
    Store(StoreError),
    History(HistoryError),
    Session(SessionError),
    Import(ImportError),
    Runner(RunnerError),
    Ui(UiError),
    Arg(ArgError),
}

impl Display for MedqbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Question(err) => f.write_fmt(format_args!("Question: {err}")),
            Self::Bank(err) => f.write_fmt(format_args!("Bank: {err}")),
            Self::Store(err) => f.write_fmt(format_args!("Store: {err}")),
            Self::History(err) => f.write_fmt(format_args!("History: {err}")),
            Self::Session(err) => f.write_fmt(format_args!("Session: {err}")),
            Self::Import(err) => f.write_fmt(format_args!("Import: {err}")),
            Self::Runner(err) => f.write_fmt(format_args!("Runner: {err}")),
            Self::Ui(err) => f.write_fmt(format_args!("Ui: {err}")),
            Self::Arg(err) => f.write_fmt(format_args!("Arg: {err}")),
        }
    }
}

impl From<QuestionError> for MedqbError {
    fn from(err: QuestionError) -> Self {
        Self::Question(Box::new(err))
    }
}

impl From<BankError> for MedqbError {
    fn from(err: BankError) -> Self {
        Self::Bank(err)
    }
}

impl From<StoreError> for MedqbError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<HistoryError> for MedqbError {
    fn from(err: HistoryError) -> Self {
        Self::History(err)
    }
}

impl From<SessionError> for MedqbError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<ImportError> for MedqbError {
    fn from(err: ImportError) -> Self {
        Self::Import(err)
    }
}

impl From<RunnerError> for MedqbError {
    fn from(err: RunnerError) -> Self {
        Self::Runner(err)
    }
}

impl From<UiError> for MedqbError {
    fn from(err: UiError) -> Self {
        Self::Ui(err)
    }
}

impl From<ArgError> for MedqbError {
    fn from(err: ArgError) -> Self {
        Self::Arg(err)
    }
}

#[derive(Debug)]
pub enum UiError {
    IoError(std::io::Error),
}

impl Display for UiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(err) => f.write_fmt(format_args!("IoError: {err}")),
        }
    }
}

impl From<std::io::Error> for UiError {
    fn from(err: std::io::Error) -> Self {
        UiError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ArgError {
    MissingImportBatch,
    MissingLookupId,
}

impl Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingImportBatch => {
                f.write_str("--import requires --import-batch with a batch number")
            }
            Self::MissingLookupId => f.write_str("lookup mode requires --id with a display id"),
        }
    }
}
