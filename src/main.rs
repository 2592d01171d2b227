#![deny(clippy::implicit_return)]
#![allow(clippy::needless_return)]

mod application;
mod configuration;
mod domain;
mod infrastructure;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::Error;
use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio::task;

use crate::application::cli;
use crate::application::repl;
use crate::application::repl::Repl;
use crate::configuration::Config;
use crate::domain::models::Action;
use crate::domain::models::Event;
use crate::domain::services::actions::ActionsService;
use crate::domain::services::approvals::ToolApprovals;
use crate::domain::services::orchestrator::Orchestrator;
use crate::infrastructure::backends::openrouter::Route;
use crate::infrastructure::backends::GatewayManager;
use crate::infrastructure::kernels::KernelConnectivity;
use crate::infrastructure::kernels::KernelRegistry;
use crate::infrastructure::persistence::ChatKeyStore;
use crate::infrastructure::persistence::ChatsApi;
use crate::infrastructure::tools::ToolsManager;

fn handle_error(err: Error) {
    eprintln!(
        "{}",
        format!(
            "Oh no! kernelchat has failed with the following app version and error.\n\nVersion: {}\nCommit: {}\nError: {}",
            env!("CARGO_PKG_VERSION"),
            env!("VERGEN_GIT_DESCRIBE"),
            err
        )
        .red()
    );

    let backtrace = err.backtrace();
    if backtrace.to_string() == "disabled backtrace" {
        let args = env::args().collect::<Vec<String>>().join(" ");
        eprintln!("\nRunning the following can help explain further what the issue is:");
        eprintln!("\nRUST_BACKTRACE=1 {args}");
    } else {
        eprintln!("\n{}", backtrace);
    }

    process::exit(1);
}

async fn run() -> Result<()> {
    let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    let registry = Arc::new(KernelRegistry::load(Config::state_path("kernels-to-shutdown.json")).await);
    let connectivity = KernelConnectivity::from_config(registry.clone()).await;
    if !connectivity.available {
        println!(
            "{}",
            "Jupyter server is not reachable, the model will not be able to run code.".yellow()
        );
    }

    let has_caller_key = Route::from_config().has_caller_key();
    let approvals = ToolApprovals::new(event_tx.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        GatewayManager::get(Config::state_path("completions")),
        ToolsManager::get(connectivity),
        Arc::new(approvals.clone()),
        event_tx.clone(),
    ));

    let mut background_futures = task::JoinSet::new();
    background_futures.spawn(async move {
        return ActionsService::start(orchestrator, approvals, event_tx, &mut action_rx).await;
    });

    let repl = Repl::new(
        action_tx,
        ChatsApi::from_config(),
        ChatKeyStore::new(Config::state_path("chat-keys.json")),
        Config::state_path("images"),
        has_caller_key,
    );
    let repl_future = repl::start(repl, event_rx);

    let res = tokio::select!(
        res = background_futures.join_next() => match res {
            Some(Ok(res)) => res,
            Some(Err(err)) => Err(err.into()),
            None => Ok(()),
        },
        res = repl_future => res,
    );

    registry.flush().await;

    return res;
}

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let file_appender = tracing_appender::rolling::never(cli::log_dir(), "debug.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    if env::var("RUST_LOG")
        .unwrap_or_else(|_| return "".to_string())
        .contains("kernelchat")
    {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(writer)
            .init();
    }

    match cli::parse().await {
        Ok(true) => {}
        Ok(false) => process::exit(0),
        Err(err) => handle_error(err),
    }

    if let Err(err) = run().await {
        handle_error(err);
    }

    process::exit(0);
}
