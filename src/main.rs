use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use cpu_udp_reporter::{CancelToken, Cli, Config, Error, Sampler, UdpTransport};

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_filter())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Cancelled) => {
            info!("cancelled before sampling started");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let config = Config::from_cli(cli)?;

    // SIGINT and SIGTERM both end the run at the next tick boundary
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || on_signal.cancel())?;

    let mut sampler = Sampler::start(config, &cancel, UdpTransport::connect)?;
    let ticks = sampler.run(&cancel)?;
    info!("stopped after {ticks} ticks");
    Ok(())
}
