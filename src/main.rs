//! fanbuild CLI entry point

use clap::Parser;
use std::process::ExitCode;

use fanbuild::backend;
use fanbuild::config::{Cli, Config, Selection};
use fanbuild::{
    bind_signals, with_grace, Context, ForceQuit, Orchestrator, Printer, RunOutcome, Signal,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    log::debug!("fanbuild v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> fanbuild::Result<ExitCode> {
    let config = Config::from_cli(&cli)?;
    if cli.list {
        for name in config.targets.names() {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }
    let targets = config.select()?;

    // First signal cancels the run, the second one exits right away.
    let (ctx, _cancel) = bind_signals(&Context::background(), &Signal::DEFAULT)?;
    let _force_quit = ForceQuit::arm(&Signal::DEFAULT, |_| std::process::exit(130))?;
    // Output gets its own context so failures can still be printed after a
    // cancel. It is unbounded until a signal arrives, during the run or while
    // draining.
    let (drain_ctx, _) = with_grace(&ctx, config.grace);

    log::info!(
        "Loaded {} target(s) from {}",
        config.targets.targets.len(),
        config.targets_path.display()
    );
    let engine = backend::connect(&config.endpoint, config.root.clone()).await?;

    let printer = Printer::stdout(config.progress)?;
    let orchestrator = Orchestrator::new(engine, printer.writer()).with_policy(config.policy);

    let result = match (&config.selection, targets.as_slice()) {
        (Selection::One(_), [target]) => orchestrator.run_one(&ctx, target).await,
        _ => orchestrator.run_all(&ctx, &targets).await,
    };

    let drained = printer.wait(&drain_ctx).await;

    let mut code = ExitCode::SUCCESS;
    match &result {
        Ok(outcomes) => summarize(outcomes),
        Err(e) => {
            summarize(e.outcomes());
            log::error!("{}", e);
            code = ExitCode::FAILURE;
        }
    }
    if let Err(e) = drained {
        log::error!("progress output incomplete ({}): {}", e.as_label(), e);
        code = ExitCode::FAILURE;
    }
    Ok(code)
}

fn summarize(outcomes: &[RunOutcome]) {
    for outcome in outcomes {
        match outcome.result() {
            Ok(result) => log::info!(
                "{}: ok in {:.1}s",
                outcome.target(),
                result.elapsed.as_secs_f64()
            ),
            Err(e) if e.is_canceled() => log::warn!("{}: {}", outcome.target(), e),
            Err(e) => log::error!("{}: {}", outcome.target(), e),
        }
    }
}
