use std::process::ExitCode;

use clap::Parser;

use cloudtune::cli::{self, Cli, Command, RunArgs};
use cloudtune::logging;
use cloudtune::service::{Postgres, Redis, ServicePlugin};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (plugin, args): (Box<dyn ServicePlugin>, RunArgs) = match cli.command {
        Command::Redis(args) => (Box::new(Redis), args),
        Command::Postgres(args) => (Box::new(Postgres), args),
    };

    if let Err(err) = logging::init_tracing(&args.log_level, &args.log_format) {
        eprintln!("error: cannot initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    // Trials mutate shared external infrastructure and the search is
    // inherently sequential, so a current-thread runtime is all we need.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    match rt.block_on(cli::run_service(plugin.as_ref(), &args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
