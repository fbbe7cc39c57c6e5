use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use converter_core::config::{pool_size_from_env_value, template_dir_from_env_value};
use converter_core::constants::{POOL_SIZE_ENV, TEMPLATE_DIR_ENV};
use converter_core::{ConvertRequest, ConverterConfig, DataType, TemplateSource, WorkerPool};

#[derive(Parser)]
#[command(name = "fhir-converter-run")]
#[command(about = "Convert HL7 v2 messages and CDA documents to FHIR bundles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one source file and print the result
    Convert {
        /// Source format: hl7v2 or cda
        #[arg(long)]
        data_type: DataType,
        /// Stored template name, relative to the data type's template directory
        #[arg(long, required_unless_present = "template_file")]
        template: Option<String>,
        /// Template file to render instead of a stored template
        #[arg(long, conflicts_with = "template")]
        template_file: Option<PathBuf>,
        /// Source message or document
        source: PathBuf,
        /// Report HL7 v2 fields no template read
        #[arg(long)]
        unused: bool,
        /// Report HL7 v2 fields templates asked for that were not populated
        #[arg(long)]
        invalid_access: bool,
        /// Patient id exposed to templates as @patientId
        #[arg(long)]
        patient_id: Option<String>,
    },
}

/// Entry point for the converter CLI
///
/// # Environment Variables
/// - `FHIR_CONVERTER_TEMPLATE_DIR`: template root (default: "./templates")
/// - `FHIR_CONVERTER_POOL_SIZE`: number of conversion units (default: logical CPU count)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fhir_converter_run=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ConverterConfig::new(
        template_dir_from_env_value(std::env::var(TEMPLATE_DIR_ENV).ok()),
        pool_size_from_env_value(std::env::var(POOL_SIZE_ENV).ok())?,
    )?;

    match Cli::parse().command {
        Commands::Convert {
            data_type,
            template,
            template_file,
            source,
            unused,
            invalid_access,
            patient_id,
        } => {
            let source_text = std::fs::read_to_string(&source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            let template = match (template, template_file) {
                (_, Some(path)) => TemplateSource::Inline(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                (Some(name), None) => TemplateSource::Stored(name),
                (None, None) => anyhow::bail!("either --template or --template-file is required"),
            };

            let mut request = ConvertRequest::new(data_type, source_text, template)
                .with_coverage(unused, invalid_access);
            if let Some(patient_id) = patient_id {
                request = request.with_patient_id(patient_id);
            }

            tracing::info!(%data_type, source = %source.display(), "converting");
            let pool = WorkerPool::new(config)?;
            let result = pool.convert(request).await;
            pool.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }

    Ok(())
}
