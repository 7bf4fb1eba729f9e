use std::process;
use std::sync::Arc;

use crivo_app::AppError;
use crivo_app::cli::{Cli, Commands, EnqueueArgs, ProcessArgs};
use crivo_app::config::{self, AppConfig};
use crivo_app::pipeline::DocumentParser;
use crivo_app::services::{
    BlockGenerator, DocumentStore, Embedder, IngestJob, IngestQueue, JobRunner, OpenAiClient,
    SynthesisOptions, synthesize_from_pdf, synthesize_from_segments, synthesize_legacy,
};
use tracing_subscriber::{filter::LevelFilter, fmt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(determine_log_level(&cli));

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already set; skipping re-initialization");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Worker(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        _ => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Worker(_)) => run_worker().await,
        Some(Commands::Process(args)) => run_process(args).await,
        Some(Commands::Enqueue(args)) => run_enqueue(args).await,
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

fn openai_client(config: &AppConfig) -> Result<Arc<OpenAiClient>, AppError> {
    let api_key = config.require_openai_api_key()?;
    let client = OpenAiClient::new(
        api_key,
        &config.openai_base_url,
        config.chat_model.clone(),
        config.embed_model.clone(),
        config.embedding_dimensions,
    )?;
    Ok(Arc::new(client))
}

async fn run_worker() -> Result<(), AppError> {
    let config = config::load()?;
    let database_url = config.require_database_url()?.to_string();
    let openai = openai_client(&config)?;

    let store = DocumentStore::connect(&database_url).await?;
    let queue = IngestQueue::connect(&config.redis_url).await?;
    let embedder = Embedder::new(openai.clone());

    let mut runner = JobRunner::new(
        &config,
        queue,
        store,
        embedder,
        openai.clone(),
        openai,
    );
    runner.run().await?;
    Ok(())
}

async fn run_process(args: ProcessArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let openai = openai_client(&config)?;
    let generator = BlockGenerator::new();
    let options = SynthesisOptions {
        chunker: config.chunker_options(),
        retrieval: config.retrieval_params(),
        block_delay: std::time::Duration::from_secs(config.pdf_block_delay_sec),
        ..SynthesisOptions::default()
    };

    let file_name = args
        .file_name
        .clone()
        .or_else(|| {
            args.input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "document".to_string());

    let checklist = if args.pdf_native {
        synthesize_from_pdf(&args.input, &file_name, openai.as_ref(), &generator, &options).await?
    } else {
        let parser = DocumentParser::new(config.parse_language.clone());
        let segments = parser.parse(&args.input, &file_name)?;
        if config.use_checklist_blocks {
            let embedder = Embedder::new(openai.clone());
            synthesize_from_segments(
                &segments,
                &embedder,
                openai.as_ref(),
                &generator,
                &options,
                &file_name,
            )
            .await?
        } else {
            synthesize_legacy(&segments, openai.as_ref(), &generator, &file_name).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&checklist)?);
    Ok(())
}

async fn run_enqueue(args: EnqueueArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let mut queue = IngestQueue::connect(&config.redis_url).await?;
    let job = IngestJob {
        document_id: args.document_id,
        user_id: args.user_id,
        file_url: args.file_url,
        file_name: args.file_name,
        use_pdf_file: args.use_pdf_file.then_some(true),
    };
    queue.push(&job).await?;
    tracing::info!(document_id = %job.document_id, "job enqueued");
    println!("enqueued {}", job.document_id);
    Ok(())
}
