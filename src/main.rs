use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use climate_report::{
    config::Settings,
    export::ParquetExporter,
    fetch::CckpClient,
    plot::PlottersRenderer,
    reference::{Dataset, References},
    report::{ReportBuilder, Selection},
    server::{self, AppState},
};
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Climate and climate change reports from the World Bank CCKP API"
)]
struct Cli {
    /// YAML settings file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Workbook with the `Regions` and `Variables` sheets.
    #[arg(long, global = true)]
    references: Option<PathBuf>,
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Concurrent requests per CMIP6 variable.
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List countries, or the regions of one country.
    Regions {
        #[arg(long)]
        country: Option<String>,
    },
    /// List the variables offered per dataset.
    Variables,
    /// Build a report and write it to disk.
    Report {
        #[arg(long)]
        country: String,
        #[arg(long)]
        region: String,
        /// ERA5 variable codes, comma separated.
        #[arg(long, value_delimiter = ',')]
        era5: Option<Vec<String>>,
        /// CMIP6 variable codes, comma separated.
        #[arg(long, value_delimiter = ',')]
        cmip6: Option<Vec<String>>,
        /// Output file; defaults to `<output_dir>/<country>_<region>.docx`.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also write the fetched series as Parquet.
        #[arg(long)]
        parquet: bool,
    },
    /// Serve the selection form and report endpoint.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,
    },
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(r) = &cli.references {
        settings.references = r.clone();
    }
    if let Some(base) = &cli.api_base {
        settings.api_base = base.clone();
    }
    if let Some(n) = cli.concurrency {
        settings.concurrency = n;
    }
    settings.validate()?;
    Ok(settings)
}

fn report_builder(settings: &Settings, refs: Arc<References>) -> Result<ReportBuilder> {
    let client = CckpClient::new(settings)?;
    Ok(
        ReportBuilder::new(Arc::new(client), Arc::new(PlottersRenderer::default()), refs)
            .with_concurrency(settings.concurrency),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,climate_report=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let refs = Arc::new(References::load(&settings.references)?);

    match cli.command {
        Command::Regions { country } => match country {
            Some(c) => {
                for region in refs.regions.regions(&c) {
                    println!("{}\t{}", region, refs.regions.region_code(&c, region)?);
                }
            }
            None => {
                for c in refs.regions.countries() {
                    println!("{}", c);
                }
            }
        },
        Command::Variables => {
            for dataset in [Dataset::Era5, Dataset::Cmip6] {
                println!("{}", dataset.as_str());
                for var in refs.variables.for_dataset(dataset)? {
                    let mark = if dataset.selected_by_default(&var.code) {
                        "*"
                    } else {
                        " "
                    };
                    println!("  {} {:<10} {} [{}]", mark, var.code, var.name, var.unit);
                }
            }
        }
        Command::Report {
            country,
            region,
            era5,
            cmip6,
            out,
            parquet,
        } => {
            let start = Instant::now();
            let selection = Selection {
                country,
                region,
                era5: era5
                    .or_else(|| settings.era5.clone())
                    .unwrap_or_else(|| Dataset::Era5.default_selection()),
                cmip6: cmip6
                    .or_else(|| settings.cmip6.clone())
                    .unwrap_or_else(|| Dataset::Cmip6.default_selection()),
            };

            let mut builder = report_builder(&settings, refs.clone())?;
            if parquet || settings.export_parquet {
                builder = builder.with_exporter(ParquetExporter::new(
                    settings.output_dir.join("parquet"),
                )?);
            }

            let doc = builder.build(&selection).await?;
            let path = out.unwrap_or_else(|| settings.output_dir.join(selection.file_name()));
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
            doc.save(&path)?;
            info!(
                path = %path.display(),
                elapsed_s = start.elapsed().as_secs_f64(),
                "report written"
            );
        }
        Command::Serve { port, host } => {
            let builder = report_builder(&settings, refs)?;
            server::serve(AppState::new(builder), SocketAddr::new(host, port)).await;
        }
    }

    Ok(())
}
