mod api;
mod catalog;
mod classifier;
mod config;
mod gesture_client;
mod input;
mod interaction_log;
mod llm;
mod posture;
mod robot;
mod show;
mod stats;

use anyhow::Context;
use catalog::{ EyeColors, GestureCatalog, Program, SceneBook };
use clap::Parser;
use config::{ Command, Config, GesturesArgs, ServeArgs, SessionArgs };
use gesture_client::{ GestureClassifier, GestureClient };
use show::{ ShowDeps, ShowRunner };
use stats::Stats;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{ info, warn };

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber
        ::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();

    match &config.command {
        Command::Serve(args) => serve(args).await,
        Command::Show(args) => {
            let program = match &args.program {
                Some(path) => Program::load(path)?,
                None => Program::default(),
            };
            let mut runner = build_runner(&config, &args.session, Some(config.scenes_path()))?;
            info!(steps = program.steps.len(), "🚀 oli4 show starting");
            runner.run_program(&program).await
        }
        Command::Chat(args) => {
            let mut runner = build_runner(&config, &args.session, None)?;
            info!(posture = %args.posture, "🚀 oli4 chat starting");
            runner.run_chat(&args.system_prompt, args.posture).await
        }
        Command::Gestures(args) => gesture_check(&config, args).await,
    }
}

async fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    info!(
        listen = args.listen_addr(),
        model = ?args.model,
        model_dir = %args.model_dir.display(),
        "🚀 gesture classifier starting"
    );

    // Model download / ONNX init is blocking.
    let model_dir = args.model_dir.clone();
    let choice = args.model;
    let embedding = tokio::task
        ::spawn_blocking(move || classifier::load_embedding_model(&model_dir, choice)).await
        .context("model loader panicked")??;
    let scorer = classifier::ZeroShotClassifier::new(
        embedding,
        args.hypothesis_template.clone(),
        args.temperature
    )?;
    info!("✅ model loaded");

    let stats = Stats::new();
    let stats_clone = stats.clone();
    let stats_interval = args.stats_interval_secs;
    tokio::spawn(async move {
        stats::stats_reporter(stats_clone, stats_interval).await;
    });

    let state = api::AppState {
        scorer: Arc::new(scorer),
        stats,
    };
    let handle = api::start_api_server(&args.host, args.port, state).await?;

    tokio::select! {
        r = handle => r.context("API server task failed")?,
        _ = tokio::signal::ctrl_c() => info!("🛑 shutting down"),
    }
    Ok(())
}

fn build_runner(
    config: &Config,
    session: &SessionArgs,
    scenes_path: Option<PathBuf>
) -> anyhow::Result<ShowRunner> {
    let api_key = session.resolve_api_key(&config.config_dir)?;
    let llm = llm::GeminiClient::new(&session.gemini_base_url, &session.gemini_model, api_key)?;

    let gestures = GestureCatalog::load(&config.gestures_path())?;
    let eye_colors = EyeColors::load_optional(&config.eye_colors_path())?;
    let scenes = match scenes_path {
        Some(path) => SceneBook::load(&path)?,
        None => SceneBook::from_scenes(BTreeMap::new()),
    };

    let classifier: Option<Arc<dyn GestureClassifier>> = if session.no_gestures {
        warn!("gestures disabled, speech only");
        None
    } else {
        let client = GestureClient::new(
            &session.classifier_url,
            Duration::from_secs(session.classifier_timeout_secs)
        )?;
        info!(url = %session.classifier_url, "🏷️  gesture classifier");
        Some(Arc::new(client))
    };

    let log = interaction_log::InteractionLog::create(&session.log_dir, &session.log_tag)?;

    Ok(
        ShowRunner::new(ShowDeps {
            llm: Arc::new(llm),
            classifier,
            gestures,
            eye_colors,
            scenes,
            robot: Arc::new(robot::ConsoleRobot),
            input: Arc::new(input::StdinInput::new()),
            log,
        })
    )
}

async fn gesture_check(config: &Config, args: &GesturesArgs) -> anyhow::Result<()> {
    let gestures = GestureCatalog::load(&config.gestures_path())?;
    let client = GestureClient::new(&args.classifier_url, Duration::from_secs(args.classifier_timeout_secs))?;
    let input = input::StdinInput::new();
    show::run_gesture_check(&client, &gestures, args.posture, &input).await
}
