use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod config;
mod db;
mod error;
mod format;
mod identity;
mod logging;
mod models;
mod report;
mod session;
mod store;
mod table;

use config::Config;
use db::PgIssuanceStore;
use identity::HtmlIdentityFormatter;
use models::ReportConfig;
use report::{ExportSummary, IssuanceReportTable, Labels};
use session::{DetachedSession, PgSessionLock, SessionLock};
use table::{ExportFormat, SortSpec};

type Report = IssuanceReportTable<PgIssuanceStore, HtmlIdentityFormatter>;

#[derive(Parser)]
#[command(name = "certificate-issue-report")]
#[command(about = "Issued certificate report for a course certificate module", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Scope {
    /// Course module of the certificate
    #[arg(long)]
    cm_id: i64,
    /// Group selected by the viewer, used when the module has a group mode
    #[arg(long)]
    group: Option<i64>,
    /// Sort keys, e.g. `fullname` or `-timecreated,fullname`
    #[arg(long)]
    sort: Option<SortSpec>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import certificate issues from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Render one page of the report as HTML
    Report {
        #[command(flatten)]
        scope: Scope,
        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: u64,
        #[arg(long)]
        page_size: Option<u64>,
        #[arg(long)]
        no_initials_bar: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export every issue of the certificate
    Download {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Session whose write lock is held until the export starts
        #[arg(long)]
        session_id: Option<i64>,
    },
}

fn open_output(out: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

async fn build_report(
    pool: &PgPool,
    config: &Config,
    scope: &Scope,
    page: u64,
    page_size: u64,
) -> anyhow::Result<(Report, ReportConfig)> {
    let module = db::load_module_context(pool, scope.cm_id, scope.group).await?;
    let mut report_config = ReportConfig::for_module(module, page_size);
    report_config.current_page = page;
    report_config.sort = scope.sort.clone().unwrap_or_default();

    let report = IssuanceReportTable::from_config(
        &report_config,
        PgIssuanceStore::new(pool.clone()),
        HtmlIdentityFormatter::new(config.site_url(), config.name_format()),
        config.dates().clone(),
        &Labels::default(),
    )?;
    Ok((report, report_config))
}

async fn run_download<L: SessionLock>(
    report: &mut Report,
    session: &mut L,
    format: ExportFormat,
    out: Option<&Path>,
) -> anyhow::Result<ExportSummary> {
    let writer = open_output(out)?;
    report.download(session, format, writer).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::init()?;
    logging::init_tracing(config.log_format())?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url())
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let cm_id = db::seed(&pool).await?;
            println!("Seed data inserted (course module {cm_id}).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} issues from {}.", csv.display());
        }
        Commands::Report {
            scope,
            page,
            page_size,
            no_initials_bar,
            out,
        } => {
            let page_size = page_size.unwrap_or(config.page_size());
            let (mut report, report_config) =
                build_report(&pool, &config, &scope, page, page_size).await?;
            let use_initials_bar = report_config.use_initials_bar && !no_initials_bar;

            report
                .query_page(report_config.page_size, use_initials_bar)
                .await?;
            let html = table::html::render_page(&report);

            let mut writer = open_output(out.as_deref())?;
            writer.write_all(html.as_bytes())?;
            writer.flush()?;
            info!(cm_id = scope.cm_id, page, "report page rendered");
        }
        Commands::Download {
            scope,
            format,
            out,
            session_id,
        } => {
            let (mut report, _) = build_report(&pool, &config, &scope, 0, config.page_size()).await?;

            let summary = match session_id {
                Some(session_id) => {
                    let mut session = PgSessionLock::acquire(&pool, session_id).await?;
                    run_download(&mut report, &mut session, format, out.as_deref()).await?
                }
                None => {
                    run_download(&mut report, &mut DetachedSession, format, out.as_deref()).await?
                }
            };

            // Without --out the export itself went to stdout.
            let summary = serde_json::to_string(&summary).context("failed to encode export summary")?;
            if out.is_some() {
                println!("{summary}");
            } else {
                eprintln!("{summary}");
            }
        }
    }

    Ok(())
}
