use std::process::ExitCode;

use clap::Parser;

use certbox::cli::presenter::ConsolePresenter;
use certbox::cli::{self, Cli, Commands};
use certbox::sandbox::{ResultPresenter, SandboxError};
use certbox::startup::{self, EXIT_INITIALIZE, EXIT_REQUIREMENTS};
use certbox::Config;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return exit_code(EXIT_INITIALIZE);
        }
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> ExitCode {
    let presenter = ConsolePresenter::new(false);

    // These manage the config file themselves and must work with a broken one.
    match cli.command {
        Commands::Config(args) => {
            init_logging(cli.verbose, "info");
            return report(&presenter, cli::config::run(args, cli.config.as_deref()).await);
        }
        Commands::Paths => {
            init_logging(cli.verbose, "info");
            return report(&presenter, cli::paths::run());
        }
        _ => {}
    }

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose, "info");
            presenter.show_error("configuration", &format!("{:#}", e));
            return exit_code(EXIT_INITIALIZE);
        }
    };
    init_logging(cli.verbose, &config.logging.level);

    if cli.command.needs_startup() {
        let issues = startup::check_requirements(&config);
        for issue in issues.iter().filter(|i| !i.critical) {
            tracing::warn!("{}", issue);
        }
        if let Some(issue) = issues.iter().find(|i| i.critical) {
            presenter.show_error("requirements", &issue.message);
            return exit_code(EXIT_REQUIREMENTS);
        }

        if let Err(e) = startup::initialize(&config) {
            presenter.show_error("initialization", &format!("{:#}", e));
            return exit_code(EXIT_INITIALIZE);
        }
    }

    let result = match cli.command {
        Commands::Services(args) => cli::services::run(args, &config).await,
        Commands::Certs(args) => cli::certs::run(args, &config).await,
        Commands::Create(args) => cli::create::run(args, &config).await,
        Commands::Status => cli::status::run(&config).await,
        Commands::Config(_) | Commands::Paths => Ok(()),
    };
    report(&presenter, result)
}

fn init_logging(verbose: bool, configured: &str) {
    // RUST_LOG wins, then --verbose, then logging.level
    let log_level = if verbose { "debug" } else { configured };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report(presenter: &ConsolePresenter, result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = e
                .downcast_ref::<SandboxError>()
                .map(SandboxError::category)
                .unwrap_or("error");
            presenter.show_error(category, &format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}
