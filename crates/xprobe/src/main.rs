use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use std::process::ExitCode;
use xprobe::cli::{Cli, Command};
use xprobe::error::exit_code;
use xprobe::report::Report;
use xprobe::{Session, SessionConfig};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(xprobe_err) = e.downcast_ref::<xprobe::Error>() {
                ExitCode::from(xprobe_err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .format_timestamp_micros()
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli.validate()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Invalid arguments")?;

    let config = cli.session_config();
    init_logging(config.verbose);

    match &cli.command {
        Command::Demo { generic, fixed, .. } => {
            let demo = cli
                .demo_config()
                .context("demo subcommand without demo settings")?;
            run_demo(config, &demo, *generic, fixed)?;
        }
        Command::Control => {
            let mut session = Session::new(config);
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout().lock();
            let handled = xprobe::control::serve(&mut session, stdin.lock(), &mut stdout)?;
            log::info!("handled {handled} control commands");
        }
        Command::Path { .. } => {
            println!("{}", config.samples_path().display());
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "xprobe", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn run_demo(
    config: SessionConfig,
    demo: &xprobe::demo::DemoConfig,
    generic: u8,
    fixed: &[u8],
) -> anyhow::Result<()> {
    let mut session = Session::new(config);
    eprintln!("Attached {} probes", session.registry().len());

    if generic > 0 || !fixed.is_empty() {
        xprobe::demo::check_rdpmc_access()?;
        let slot = session.configure_counters(generic, fixed)?;
        eprintln!("Recorder slot {slot}: {generic} generic counters");
        eprintln!("{}", session.recorder().fixed_pmc_set());
    }

    eprintln!(
        "Running {} transactions over {} threads ({} hand-offs each)",
        demo.txns, demo.threads, demo.quanta
    );
    let outcome = xprobe::demo::run(demo)?;
    session.reset_counters();

    let late = session.attach_pending();
    if late > 0 {
        eprintln!("Attached {late} announced probes");
    }

    let report = Report::build(&session, &outcome.streams, outcome.overflow, outcome.elapsed);
    print!("{}", report.render());
    Ok(())
}
