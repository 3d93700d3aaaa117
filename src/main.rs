use std::process::ExitCode;

use clap::Parser;

mod cancel;
mod cli;
mod cursor;
mod error;
mod feed;
mod model;
mod populate;
mod reconcile;
mod repair_index;
mod schedule_time;
mod service_modes;
mod sink;
mod store;

use cancel::CancelToken;
use cli::Args;
use error::SyncError;
use populate::Session;
use store::Store;

async fn run(args: Args) -> Result<(), SyncError> {
    let steps = cli::parse_chain(&args.commands)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after the current row");
            handler_token.cancel();
        }
    });

    if let Some(url) = &args.feed_url {
        feed::download_feed(url, &args.feed_dir).await?;
        cancel.check()?;
    }

    let store = Store::connect(&args.database_url).await?;
    let result = Session::new(&store, &args.feed_dir, args.strict, cancel)
        .run(&steps)
        .await;
    store.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    if let Err(error) = simple_logger::SimpleLogger::new()
        .with_level(args.log_level)
        .init()
    {
        eprintln!("Logger could not be set up: {}", error);
    }

    match run(args).await {
        Ok(()) => {
            log::info!("All done");
            ExitCode::SUCCESS
        }
        Err(error) => {
            log::error!("{}", error);
            ExitCode::from(error.exit_code())
        }
    }
}
