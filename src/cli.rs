use std::path::PathBuf;

use clap::Parser;

use crate::Mode;

#[derive(Parser, Debug)]
#[command(name = "medqb", version = env!("CARGO_PKG_VERSION"))]
pub struct MedqbCli {
    #[arg(short = 'm', long = "mode", default_value_t = Mode::All, value_name = "MODE", help = "Study mode", long_help = MODE_HELP)]
    pub mode: Mode,
    #[arg(long = "batch", value_name = "BATCH", help = "Batch filter for custom mode.", long_help = BATCH_HELP)]
    pub batch: Option<String>,
    #[arg(long = "category", value_name = "CATEGORY", help = "Category filter for custom mode.")]
    pub category: Option<String>,
    #[arg(long = "ranked", help = "Rank custom mode by error rate instead of shuffling.", default_value_t = false)]
    pub ranked: bool,
    #[arg(long = "id", value_name = "DISPLAY_ID", help = "Display id for lookup mode.")]
    pub lookup_id: Option<String>,
    #[arg(short = 's', long = "scope", value_name = "SCOPE", help = "Course scope id.", long_help = SCOPE_HELP)]
    pub scope: Option<String>,
    #[arg(short = 'u', long = "user", default_value = "local", value_name = "USER", help = "User id owning the answer history.")]
    pub user: String,
    #[arg(long = "data-dir", value_name = "DIR", help = "Document store directory. Defaults to ~/.config/medqb/store.")]
    pub data_dir: Option<PathBuf>,
    #[arg(long = "import", value_name = "CSV_FILE", help = "Import questions from a CSV file and exit.", long_help = IMPORT_HELP)]
    pub import: Option<PathBuf>,
    #[arg(long = "import-batch", value_name = "BATCH", help = "Batch number for --import.")]
    pub import_batch: Option<String>,
    #[arg(long = "template", value_name = "CSV_FILE", help = "Write the CSV import template and exit.")]
    pub template: Option<PathBuf>,
    #[arg(long = "delete-batch", value_name = "BATCH", help = "Delete every question of an imported batch and exit.")]
    pub delete_batch: Option<String>,
}

const MODE_HELP: &str = r#"Study mode. Possible values:
    all     - Every question, new material first, shuffled
    review  - Wrong or unsure questions, hardest first
    custom  - Filter by --batch and/or --category
    lookup  - One question addressed by --id"#;
const BATCH_HELP: &str = r#"Batch filter for custom mode. Matches the first
`_`-delimited segment of the display id assigned at import time."#;
const SCOPE_HELP: &str = r#"Course scope id. Every question and history
collection lives under one scope; the last used scope is remembered."#;
const IMPORT_HELP: &str = r#"Import questions from a CSV file and exit.
Requires --import-batch with a batch number not yet present in the store.
Example Usage: medqb --import questions.csv --import-batch 3"#;
