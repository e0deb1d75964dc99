use seo_enrich::query::{semrush::Sign, ProviderKind, QueryProvider, RankProvider};
use seo_enrich::{
    logger, Config, CsvBuilder, HttpTransport, KeyMode, MetaReader, Pipeline, PipelineOptions,
    ResultWriter, SemrushQuery,
};

use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Page fetches give up quickly; a slow site should not stall the run.
const PAGE_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Parser, Debug)]
#[command(name = "seo-enrich", version, about = "Automate SEO lookups with a CSV of URLs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enrich every row of a CSV with page metadata and rank data
    Fetch {
        /// Input CSV
        input: PathBuf,
        /// Column holding the URL (or keyword with --keyword-mode)
        #[arg(short = 'c', long, default_value = "location")]
        column: String,
        /// Output filename prefix
        #[arg(short = 'f', long, default_value = "all_data")]
        prefix: String,
        #[arg(long, default_value = "output_files")]
        output_dir: PathBuf,
        #[arg(long, env = "SEO_API_KEY")]
        api_key: Option<String>,
        #[arg(long, value_enum, default_value_t = ProviderKind::Semrush)]
        provider: ProviderKind,
        /// Rows requested per lookup
        #[arg(long, default_value_t = 25)]
        limit: usize,
        /// Provider report type, e.g. url_organic or url_keywords
        #[arg(long)]
        method: Option<String>,
        /// Database / search engine code, e.g. us or g_us
        #[arg(long)]
        region: Option<String>,
        /// Keys are keywords rather than URLs
        #[arg(long)]
        keyword_mode: bool,
        /// Skip fetching the pages themselves
        #[arg(long)]
        no_meta: bool,
    },
    /// Look up the search volume and trend of one keyword
    Keyword {
        phrase: String,
        #[arg(long, default_value = "us")]
        database: String,
        #[arg(long, env = "SEO_API_KEY")]
        api_key: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Fetch {
            input,
            column,
            prefix,
            output_dir,
            api_key,
            provider,
            limit,
            method,
            region,
            keyword_mode,
            no_meta,
        } => {
            let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
            let output_file = output_dir.join(format!("{prefix}_all_results_{timestamp}.csv"));
            let keyword_file = output_dir.join(format!("{prefix}_keyword_results_{timestamp}.csv"));

            let mut rank = RankProvider::from_config(provider, &config, api_key.as_deref())?;
            if let RankProvider::Semrush(q) = &mut rank {
                // first two result pages only
                q.add_filter(Sign::Include, "Po", "Lt", 21);
            }

            let mut builder = CsvBuilder::open(&input, &output_file)?;
            let mut keyword_writer = ResultWriter::create(&keyword_file, rank.headers())?;

            let options = PipelineOptions {
                mode: if keyword_mode { KeyMode::Keyword } else { KeyMode::Url },
                limit,
                method,
                region,
                ..PipelineOptions::new(column)
            };
            let mut pipeline = Pipeline::new(rank, options);
            if !no_meta {
                pipeline = pipeline.with_source(MetaReader::new(PAGE_TIMEOUT)?);
            }

            info!("Starting enrichment of {:?}...", input);
            let stdout = io::stdout();
            let summary = pipeline.run(&mut builder, &mut keyword_writer, &mut stdout.lock())?;

            info!(
                "Enrichment completed. {} rows written to {:?}, {} keywords to {:?}.",
                summary.processed,
                builder.output_path(),
                keyword_writer.written(),
                keyword_file
            );
        }
        Commands::Keyword {
            phrase,
            database,
            api_key,
        } => {
            let key = api_key
                .or_else(|| config.semrush_token.clone())
                .ok_or("no SEMrush API key (SEMRUSH_TOKEN)")?;
            let transport = HttpTransport::new(config.rank_timeout)?;
            let mut query = SemrushQuery::new(transport, key).with_endpoint(&config.semrush_endpoint);

            query.request_volume(&phrase, &database)?;
            match query.keyword_results() {
                Some(volume) => {
                    let mut fields: Vec<_> = volume.into_iter().collect();
                    fields.sort();
                    for (name, value) in fields {
                        println!("{name}: {value}");
                    }
                }
                None => {
                    error!(
                        "No volume data for '{}': {}",
                        phrase,
                        query.response().unwrap_or_default().trim()
                    );
                }
            }
        }
    }

    Ok(())
}
