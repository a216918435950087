use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use yt_curator::bridge::HtmlPageHost;
use yt_curator::config::Config;
use yt_curator::control::Controller;
use yt_curator::engine::{Engine, InstanceStatus, Params, TargetHandle};
use yt_curator::llm::{create_model_client, ModelClient};
use yt_curator::logging::{init_tracing, LogJournal, LogSink};
use yt_curator::scenarios::{self, RecommendationPipeline, SCENARIO_ID, USER_QUERY};
use yt_curator::state::{load_results, JsonFileStore, MemoryStore, ResultStore};
use yt_curator::transcript::{HttpTranscriptClient, Segmenter};

const DEFAULT_TARGET: &str = "tab-1";

fn page_arg() -> Arg {
    Arg::new("page")
        .short('p')
        .long("page")
        .value_name("FILE")
        .help("Saved search results page; repeat to model successive scrolls")
        .action(ArgAction::Append)
        .required(true)
}

fn target_arg() -> Arg {
    Arg::new("target")
        .short('t')
        .long("target")
        .value_name("ID")
        .help("Handle of the page the scenario drives")
        .default_value(DEFAULT_TARGET)
}

fn cli() -> Command {
    let cmd = Command::new("yt-curator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Curates YouTube search results with an LLM and suggests clips")
        .subcommand_required(true)
        .arg(
            Arg::new("results-dir")
                .short('r')
                .long("results-dir")
                .value_name("DIR")
                .help("Directory for stored results")
                .global(true),
        )
        .arg(
            Arg::new("in-memory")
                .long("in-memory")
                .help("Keep results in memory only")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run the recommendation scenario once and print the clips")
                .arg(page_arg())
                .arg(target_arg())
                .arg(
                    Arg::new("query")
                        .short('q')
                        .long("query")
                        .value_name("TEXT")
                        .help("What the viewer is looking for")
                        .required(true),
                ),
        );

    #[cfg(feature = "api")]
    let cmd = cmd.subcommand(
        Command::new("serve")
            .about("Expose the control surface over HTTP and WebSocket")
            .arg(page_arg())
            .arg(target_arg())
            .arg(
                Arg::new("port")
                    .long("port")
                    .value_name("PORT")
                    .help("Port to listen on"),
            ),
    );

    cmd
}

fn target_of(sub: &ArgMatches) -> TargetHandle {
    TargetHandle::new(
        sub.get_one::<String>("target")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TARGET),
    )
}

// Global flags are propagated into the subcommand's matches
async fn open_store(config: &Config, matches: &ArgMatches) -> Result<Arc<dyn ResultStore>> {
    if matches.get_flag("in-memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let dir = matches
        .get_one::<String>("results-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.storage.results_dir.clone());
    let store = JsonFileStore::new(dir).await?;
    info!("📂 Results directory: {}", store.dir().display());
    Ok(Arc::new(store))
}

/// Wire host, transports, store and engine into a controller
async fn build_controller(config: &Config, sub: &ArgMatches) -> Result<Controller> {
    let target = target_of(sub);
    let pages: Vec<PathBuf> = sub
        .get_many::<String>("page")
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();

    let host = Arc::new(HtmlPageHost::from_files(target.clone(), &pages).await?);
    let model: Arc<dyn ModelClient> = Arc::from(create_model_client(&config.model)?);
    let transcripts = Arc::new(HttpTranscriptClient::new(config.transcript.clone())?);
    let store = open_store(config, sub).await?;
    let segmenter =
        Segmenter::new(config.transcript.token_budget).with_join(config.transcript.fragment_join);

    let journal = Arc::new(LogJournal::new(
        config.logging.max_entries,
        config.logging.mirror_to_tracing,
    ));
    let sink: Arc<dyn LogSink> = journal.clone();
    let engine = Engine::with_retention(host, sink, config.scenario.max_finished_instances);

    let pipeline = RecommendationPipeline::new(
        model,
        transcripts,
        store,
        segmenter,
        config.scenario.clone(),
    );
    scenarios::register_builtin(&engine, &pipeline)?;

    Ok(Controller::new(engine, journal, pipeline, target))
}

async fn run_once(config: &Config, sub: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, sub).await?;
    let query = sub
        .get_one::<String>("query")
        .cloned()
        .unwrap_or_default();

    info!("🔍 Query: {}", query);
    let engine = controller.engine();
    let id = engine.run_registered(
        SCENARIO_ID,
        Params::new().with(USER_QUERY, query),
        target_of(sub),
    )?;

    let start_time = std::time::Instant::now();
    let instance = engine.wait(id).await?;
    let duration = start_time.elapsed();

    match instance.status {
        InstanceStatus::Succeeded => {
            info!("🎉 Scenario completed in {:.2}s", duration.as_secs_f64());
        }
        status => {
            error!(
                "❌ Scenario ended as {:?}: {}",
                status,
                instance.error.as_deref().unwrap_or("no error recorded")
            );
            return Err(anyhow::anyhow!("Scenario did not complete"));
        }
    }

    let results = load_results(controller.pipeline().store().as_ref()).await?;
    info!("✅ {} video(s) with clip suggestions", results.len());
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

#[cfg(feature = "api")]
async fn serve(config: &Config, sub: &ArgMatches) -> Result<()> {
    let controller = build_controller(config, sub).await?;
    let port = match sub.get_one::<String>("port") {
        Some(port) => port.parse()?,
        None => config.server.port,
    };

    yt_curator::api::ApiServer::new(controller, config.server.host.clone(), port)
        .start()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    init_tracing(&config.logging.filter);

    if let Err(e) = config.validate() {
        warn!("Configuration problem: {}", e);
    }
    info!("🚀 yt-curator starting...");
    info!("{}", config.summary());

    match matches.subcommand() {
        Some(("run", sub)) => run_once(&config, sub).await,
        #[cfg(feature = "api")]
        Some(("serve", sub)) => serve(&config, sub).await,
        _ => Err(anyhow::anyhow!("Unknown command")),
    }
}
