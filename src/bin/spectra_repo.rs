use std::fs;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use spectra_repo::app::App;
use spectra_repo::category::CategoryDraft;
use spectra_repo::config::ConfigLoader;
use spectra_repo::dataset::{DatasetDraft, DatasetFilter, DatasetPatch};
use spectra_repo::domain::{CategoryId, DatasetId, Principal, UserId};
use spectra_repo::error::{ErrorKind, SpectraError};
use spectra_repo::export::DatasetExport;
use spectra_repo::ingest::Table;
use spectra_repo::output::JsonOutput;

#[derive(Parser)]
#[command(name = "spectra-repo")]
#[command(about = "Spectral dataset repository: category tree, sample ingestion and export")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Keep data in the user data directory")]
    global: bool,

    #[arg(long, global = true, help = "Acting user id")]
    user: Option<String>,

    #[arg(long, global = true)]
    superuser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage the category tree")]
    Category(CategoryArgs),
    #[command(about = "Manage datasets")]
    Dataset(DatasetArgs),
    #[command(about = "Upload spectral data into a dataset")]
    Upload(UploadArgs),
    #[command(about = "Export a dataset as CSV or show its raw file")]
    Export(ExportArgs),
    #[command(about = "Show repository statistics")]
    Stats(StatsArgs),
}

#[derive(Args)]
struct CategoryArgs {
    #[command(subcommand)]
    command: CategoryCommand,
}

#[derive(Subcommand)]
enum CategoryCommand {
    #[command(about = "Create a category")]
    Add(CategoryFields),
    #[command(about = "Rename, describe or move a category")]
    Update {
        id: String,
        #[command(flatten)]
        fields: CategoryFields,
    },
    #[command(about = "Delete a leaf category")]
    Delete { id: String },
    #[command(about = "Show one category")]
    Show { id: String },
    #[command(about = "List all categories")]
    List,
    #[command(about = "Print the category tree")]
    Tree,
}

#[derive(Args)]
struct CategoryFields {
    name: String,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    parent: Option<String>,
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    #[command(about = "Register a dataset")]
    Create(CreateDatasetArgs),
    #[command(about = "Show a dataset (counts as a view)")]
    Show { id: String },
    #[command(about = "List public datasets")]
    List(ListDatasetArgs),
    #[command(about = "Update dataset metadata")]
    Update(UpdateDatasetArgs),
    #[command(about = "Mark a dataset verified (superuser)")]
    Verify {
        id: String,
        #[arg(long)]
        revoke: bool,
    },
    #[command(about = "Delete a dataset and its samples")]
    Delete { id: String },
    #[command(about = "List samples of a dataset")]
    Samples {
        id: String,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct CreateDatasetArgs {
    name: String,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    spectral_type: Option<String>,

    #[arg(long)]
    wavelength_range: Option<String>,

    #[arg(long, default_value = "nm")]
    wavelength_unit: String,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    private: bool,
}

#[derive(Args)]
struct ListDatasetArgs {
    #[arg(long)]
    search: Option<String>,

    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    spectral_type: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    verified: Option<bool>,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    min_samples: Option<u64>,

    #[arg(long)]
    max_samples: Option<u64>,

    #[arg(long, default_value_t = 0)]
    skip: usize,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct UpdateDatasetArgs {
    id: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    category: Option<String>,

    #[arg(long)]
    spectral_type: Option<String>,

    #[arg(long)]
    wavelength_range: Option<String>,

    #[arg(long = "tag")]
    tags: Option<Vec<String>>,

    #[arg(long)]
    public: Option<bool>,
}

#[derive(Args)]
struct UploadArgs {
    #[command(subcommand)]
    command: UploadCommand,
}

#[derive(Subcommand)]
enum UploadCommand {
    #[command(about = "CSV whose header holds wavelengths and an optional name column")]
    Samples { dataset: String, file: Utf8PathBuf },
    #[command(about = "CSV of wavelengths only; every row gets the same label")]
    Labeled {
        dataset: String,
        file: Utf8PathBuf,
        #[arg(long)]
        label: String,
    },
    #[command(about = "Attach the original data file to a dataset")]
    Raw { dataset: String, file: Utf8PathBuf },
}

#[derive(Args)]
struct ExportArgs {
    dataset: String,

    #[arg(long, short)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct StatsArgs {
    #[arg(long, help = "List the N most popular public datasets instead")]
    trending: Option<usize>,
}

#[derive(Serialize)]
struct WrittenExport<'a> {
    file_name: &'a str,
    content_disposition: String,
    path: &'a str,
    bytes: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SpectraError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SpectraError) -> u8 {
    match error.kind() {
        ErrorKind::NotFound => 2,
        ErrorKind::Conflict => 3,
        ErrorKind::Validation => 4,
        ErrorKind::Forbidden => 5,
        ErrorKind::Internal => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = ConfigLoader::resolve(cli.config.as_deref(), cli.global)?;
    let app = App::open(settings)?;
    let principal = principal(cli.user.as_deref(), cli.superuser)?;

    match cli.command {
        Commands::Category(args) => run_category(args.command, &app, principal),
        Commands::Dataset(args) => run_dataset(args.command, &app, principal),
        Commands::Upload(args) => run_upload(args.command, &app, principal),
        Commands::Export(args) => run_export(args, &app, principal),
        Commands::Stats(args) => run_stats(args, &app),
    }
}

fn principal(user: Option<&str>, superuser: bool) -> miette::Result<Option<Principal>> {
    let Some(user) = user else {
        return Ok(None);
    };
    let user_id: UserId = user.parse()?;
    Ok(Some(if superuser {
        Principal::superuser(user_id)
    } else {
        Principal::user(user_id)
    }))
}

fn require(principal: Option<Principal>) -> miette::Result<Principal> {
    principal.ok_or_else(|| miette::Report::msg("this command requires --user <id>"))
}

fn category_id(value: Option<&str>) -> miette::Result<Option<CategoryId>> {
    Ok(value.map(str::parse).transpose()?)
}

fn category_draft(fields: CategoryFields) -> miette::Result<CategoryDraft> {
    Ok(CategoryDraft {
        name: fields.name,
        description: fields.description,
        parent_id: category_id(fields.parent.as_deref())?,
    })
}

fn require_superuser(principal: Option<Principal>) -> miette::Result<Principal> {
    let principal = require(principal)?;
    if !principal.is_superuser {
        return Err(SpectraError::SuperuserRequired.into());
    }
    Ok(principal)
}

fn run_category(
    command: CategoryCommand,
    app: &App,
    principal: Option<Principal>,
) -> miette::Result<()> {
    let tree = app.categories();
    if matches!(
        command,
        CategoryCommand::Update { .. } | CategoryCommand::Delete { .. }
    ) {
        require_superuser(principal)?;
    }
    match command {
        CategoryCommand::Add(fields) => {
            let category = tree.create(category_draft(fields)?)?;
            JsonOutput::print(&category).into_diagnostic()
        }
        CategoryCommand::Update { id, fields } => {
            let category = tree.update(id.parse()?, category_draft(fields)?)?;
            JsonOutput::print(&category).into_diagnostic()
        }
        CategoryCommand::Delete { id } => {
            let id: CategoryId = id.parse()?;
            tree.delete(id)?;
            JsonOutput::print(&serde_json::json!({ "deleted": id })).into_diagnostic()
        }
        CategoryCommand::Show { id } => {
            JsonOutput::print(&tree.get(id.parse()?)?).into_diagnostic()
        }
        CategoryCommand::List => JsonOutput::print(&tree.list_flat()?).into_diagnostic(),
        CategoryCommand::Tree => JsonOutput::print(&tree.tree()?).into_diagnostic(),
    }
}

fn run_dataset(
    command: DatasetCommand,
    app: &App,
    principal: Option<Principal>,
) -> miette::Result<()> {
    let registry = app.datasets();
    match command {
        DatasetCommand::Create(args) => {
            let principal = require(principal)?;
            let draft = DatasetDraft {
                description: args.description,
                category_id: category_id(args.category.as_deref())?,
                spectral_type: args.spectral_type,
                wavelength_range: args.wavelength_range,
                wavelength_unit: args.wavelength_unit,
                tags: args.tags,
                is_public: !args.private,
                ..DatasetDraft::new(args.name)
            };
            JsonOutput::print(&registry.create(&principal, draft)?).into_diagnostic()
        }
        DatasetCommand::Show { id } => {
            JsonOutput::print(&registry.view(id.parse()?)?).into_diagnostic()
        }
        DatasetCommand::List(args) => {
            let filter = DatasetFilter {
                search: args.search,
                category_id: category_id(args.category.as_deref())?,
                spectral_type: args.spectral_type,
                tags: args.tags,
                min_samples: args.min_samples,
                max_samples: args.max_samples,
                is_verified: args.verified,
                owner_id: args.owner.as_deref().map(str::parse).transpose()?,
                skip: args.skip,
                limit: Some(args.limit.unwrap_or(app.settings().default_page_size)),
            };
            JsonOutput::print(&registry.list(&filter)?).into_diagnostic()
        }
        DatasetCommand::Update(args) => {
            let principal = require(principal)?;
            let patch = DatasetPatch {
                name: args.name,
                description: args.description,
                category_id: category_id(args.category.as_deref())?,
                spectral_type: args.spectral_type,
                wavelength_range: args.wavelength_range,
                tags: args.tags,
                extra_metadata: None,
                is_public: args.public,
            };
            JsonOutput::print(&registry.update(&principal, args.id.parse()?, patch)?)
                .into_diagnostic()
        }
        DatasetCommand::Verify { id, revoke } => {
            let principal = require(principal)?;
            JsonOutput::print(&registry.set_verified(&principal, id.parse()?, !revoke)?)
                .into_diagnostic()
        }
        DatasetCommand::Delete { id } => {
            let principal = require(principal)?;
            let id: DatasetId = id.parse()?;
            registry.delete(&principal, id)?;
            JsonOutput::print(&serde_json::json!({ "deleted": id })).into_diagnostic()
        }
        DatasetCommand::Samples { id, skip, limit } => {
            JsonOutput::print(&registry.samples(id.parse()?, skip, limit)?).into_diagnostic()
        }
    }
}

fn run_upload(
    command: UploadCommand,
    app: &App,
    principal: Option<Principal>,
) -> miette::Result<()> {
    let principal = require(principal)?;
    let ingestor = app.ingestor();
    match command {
        UploadCommand::Samples { dataset, file } => {
            let table = read_table(&file)?;
            let result = ingestor.upload_samples_table(&principal, dataset.parse()?, &table)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        UploadCommand::Labeled {
            dataset,
            file,
            label,
        } => {
            let table = read_table(&file)?;
            let result =
                ingestor.upload_labeled_file(&principal, dataset.parse()?, &label, &table)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        UploadCommand::Raw { dataset, file } => {
            let content = fs::read(file.as_std_path()).into_diagnostic()?;
            let file_name = file.file_name().unwrap_or(file.as_str());
            let result =
                ingestor.attach_raw_file(&principal, dataset.parse()?, file_name, &content)?;
            JsonOutput::print(&result).into_diagnostic()
        }
    }
}

fn read_table(file: &Utf8Path) -> miette::Result<Table> {
    let content = fs::read(file.as_std_path()).into_diagnostic()?;
    Ok(Table::parse(&content)?)
}

fn run_export(args: ExportArgs, app: &App, principal: Option<Principal>) -> miette::Result<()> {
    require(principal)?;
    let export = app.exporter().export_dataset(args.dataset.parse()?)?;
    match (&export, args.output) {
        (DatasetExport::Table(table), Some(path)) => {
            fs::write(path.as_std_path(), &table.content).into_diagnostic()?;
            JsonOutput::print(&WrittenExport {
                file_name: &table.file_name,
                content_disposition: table.content_disposition(),
                path: path.as_str(),
                bytes: table.content.len(),
            })
            .into_diagnostic()
        }
        _ => JsonOutput::print_export(&export).into_diagnostic(),
    }
}

fn run_stats(args: StatsArgs, app: &App) -> miette::Result<()> {
    let statistics = app.statistics();
    match args.trending {
        Some(limit) => JsonOutput::print(&statistics.trending(limit)?).into_diagnostic(),
        None => JsonOutput::print(&statistics.summary()?).into_diagnostic(),
    }
}
