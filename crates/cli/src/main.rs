//! formkeep CLI - drive resumable multi-step forms from the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formkeep_core::{FormCatalog, FormData, FormType, UserId};
use formkeep_progress::{
    ControllerConfig, IdentityWatch, LoadOutcome, ProgressController, ProgressView,
};
use formkeep_storage::{JsonStorage, ProgressStore};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "formkeep")]
#[command(about = "Resumable multi-step form progress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage path for progress records
    #[arg(short, long, default_value = ".formkeep")]
    storage: PathBuf,

    /// JSON form catalog (defaults to the built-in forms)
    #[arg(long)]
    forms: Option<PathBuf>,

    /// Signed-in user; omit for an anonymous, unsaved session
    #[arg(short, long)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List known forms
    Forms,
    /// List the user's saved progress
    List,
    /// Show progress for a form
    Show {
        /// Form type
        form: String,
    },
    /// Save answers, optionally landing on another step
    Save {
        /// Form type
        form: String,
        /// Step to land on (defaults to the current step)
        #[arg(long)]
        step: Option<u32>,
        /// Answers as key=value (value parsed as JSON when possible)
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    /// Save answers and move to the next step
    Next {
        /// Form type
        form: String,
        /// Answers as key=value
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    /// Submit the form
    Complete {
        /// Form type
        form: String,
        /// Final answers as key=value
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    /// Delete saved progress and start over
    Reset {
        /// Form type
        form: String,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let catalog = match &cli.forms {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading form catalog {}", path.display()))?;
            FormCatalog::from_json_str(&json)?
        }
        None => FormCatalog::builtin(),
    };

    let store = Arc::new(JsonStorage::new(&cli.storage).await?);
    let user = cli.user.map(UserId::from);
    debug!(storage = %cli.storage.display(), user = ?user, "opened store");

    match cli.command {
        Commands::Forms => {
            println!("Forms ({})", catalog.forms.len());
            for form in &catalog.forms {
                println!("  {} | {} steps | {}", form.form_type, form.total_steps.total(), form.title);
            }
        }
        Commands::List => {
            let Some(user) = user else {
                anyhow::bail!("--user is required to list saved progress");
            };
            let records = store.list(&user).await?;
            println!("Saved progress for {} ({})", user, records.len());
            for record in records {
                println!(
                    "  {} | step {} | {} | {}",
                    record.form_type,
                    record.current_step,
                    if record.is_completed { "COMPLETED" } else { "IN PROGRESS" },
                    record.updated_at,
                );
            }
        }
        Commands::Show { form } => {
            let controller = open(&catalog, store, user, &form).await?;
            print_view(&controller.view())?;
        }
        Commands::Save { form, step, fields } => {
            let controller = open(&catalog, store, user, &form).await?;
            controller.save_progress(to_form_data(fields), step).await?;
            print_view(&controller.view())?;
        }
        Commands::Next { form, fields } => {
            let controller = open(&catalog, store, user, &form).await?;
            let step = controller.next_step(to_form_data(fields)).await?;
            info!("Moved to step {}/{}", step, controller.total_steps());
            print_view(&controller.view())?;
        }
        Commands::Complete { form, fields } => {
            let controller = open(&catalog, store, user, &form)
                .await?
                .on_complete(|view| println!("Submitted {}", view.form_type));
            let view = controller.complete(to_form_data(fields)).await?;
            print_view(&view)?;
        }
        Commands::Reset { form } => {
            let controller = open(&catalog, store, user, &form).await?;
            controller.reset().await?;
            println!("Progress for {} cleared", form);
        }
    }

    Ok(())
}

async fn open(
    catalog: &FormCatalog,
    store: Arc<JsonStorage>,
    user: Option<UserId>,
    form: &str,
) -> Result<ProgressController<JsonStorage>> {
    let form_type = FormType::from(form);
    let definition = catalog.get(&form_type)?;
    let controller = ProgressController::new(
        store,
        IdentityWatch::fixed(user),
        form_type,
        ControllerConfig::for_form(definition),
    );
    match controller.load().await? {
        LoadOutcome::Failed(e) => return Err(e.into()),
        outcome => debug!(?outcome, "loaded"),
    }
    Ok(controller)
}

fn print_view(view: &ProgressView) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(view)?);
    Ok(())
}

fn to_form_data(fields: Vec<(String, Value)>) -> FormData {
    fields.into_iter().collect()
}

/// Parse `key=value`; the value is JSON when it parses, a string otherwise.
fn parse_field(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty field name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
