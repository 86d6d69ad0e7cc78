use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;

use hperf::args::{HperfArgs, HperfCommand};
use hperf::control::TestKind;
use hperf::error::AppResult;
use hperf::{agent, client, logger};

fn main() -> ExitCode {
    let args = HperfArgs::parse();
    logger::init_logging(args.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: HperfArgs) -> AppResult<()> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            drop(cancel_tx.send(true));
        }
    });

    match args.command {
        HperfCommand::Server(server_args) => agent::run_agent(&server_args).await,
        HperfCommand::Latency(latency_args) => {
            let config = latency_args.into_config().await?;
            println!();
            println!(" Test ID: {}", config.test_id);
            println!();
            let mut outcome = client::run_test(config.clone(), cancel_rx).await?;
            println!();
            println!(" Testing finished ..");
            client::print_points_and_errors(&outcome, &config);
            client::print_bracket_analysis(&mut outcome, &config);
            Ok(())
        }
        HperfCommand::Bandwidth(test_args) => {
            let config = test_args.into_config(TestKind::Stream).await?;
            println!();
            println!(" Test ID: {}", config.test_id);
            println!();
            let outcome = client::run_test(config.clone(), cancel_rx).await?;
            client::print_points_and_errors(&outcome, &config);
            Ok(())
        }
        HperfCommand::Requests(test_args) => {
            let config = test_args.into_config(TestKind::Request).await?;
            println!();
            println!(" Test ID: {}", config.test_id);
            println!();
            let outcome = client::run_test(config.clone(), cancel_rx).await?;
            client::print_points_and_errors(&outcome, &config);
            Ok(())
        }
        HperfCommand::Listen(select_args) => {
            let config = select_args.into_config().await?;
            client::listen(config, cancel_rx).await?;
            Ok(())
        }
        HperfCommand::List(select_args) => {
            let config = select_args.into_config().await?;
            client::list_tests(config, cancel_rx).await
        }
        HperfCommand::Stop(select_args) => {
            let config = select_args.into_config().await?;
            client::stop(config, cancel_rx).await
        }
        HperfCommand::Download(download_args) => {
            let config = download_args.into_config().await?;
            client::download(config, cancel_rx).await
        }
        HperfCommand::Delete(select_args) => {
            let config = select_args.into_config().await?;
            client::delete_tests(config, cancel_rx).await
        }
        HperfCommand::Analyze(file_args) => {
            let config = file_args.into_config("analyze")?;
            client::analyze_file(config).await
        }
        HperfCommand::Csv(file_args) => {
            let config = file_args.into_config("csv")?;
            client::export_csv(config).await
        }
    }
}
