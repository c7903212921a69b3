use crate::demo::DemoConfig;
use crate::session::SessionConfig;
use clap::{Parser, Subcommand};
use std::time::Duration;
use xprobe_trace::{FixedCounter, MAX_GENERIC_PMC};

#[derive(Parser, Debug)]
#[command(name = "xprobe")]
#[command(about = "In-process probes with PMU counter capture")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log control-plane events (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Per-thread sample buffer capacity
    #[arg(long, global = true, default_value_t = xprobe_trace::sample::DEFAULT_CAPACITY)]
    pub capacity: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run tasks that suspend and resume across a thread pool, then report
    Demo {
        /// Worker threads
        #[arg(long = "threads", short = 'T', default_value = "4")]
        threads: usize,

        /// Transactions to run
        #[arg(long = "txns", short = 't', default_value = "100")]
        txns: usize,

        /// Suspend/resume hand-offs per transaction
        #[arg(long, default_value = "4")]
        quanta: u32,

        /// Generic counters to read (needs user-space rdpmc)
        #[arg(long, default_value = "0")]
        generic: u8,

        /// Fixed counter to read, by index (repeatable)
        #[arg(long = "fixed")]
        fixed: Vec<u8>,

        /// Time each quantum spends working, e.g. 50us
        #[arg(long, default_value = "0s", value_parser = parse_duration)]
        work: Duration,
    },

    /// Answer framed probe and counter commands on stdin, replies on stdout
    Control,

    /// Print the samples file path for this process
    Path {
        /// File name prefix
        #[arg(long, default_value = "xprobe")]
        prefix: String,

        /// Append the process id
        #[arg(long)]
        pid: bool,

        /// Append the thread id
        #[arg(long)]
        tid: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 30s, 5m, 1m30s, 90",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("Sample buffer capacity must be at least 1".to_string());
        }

        if let Command::Demo {
            threads,
            generic,
            fixed,
            ..
        } = &self.command
        {
            if *threads == 0 {
                return Err("Demo needs at least one thread".to_string());
            }
            if *generic > MAX_GENERIC_PMC {
                return Err(format!(
                    "At most {MAX_GENERIC_PMC} generic counters, got {generic}"
                ));
            }
            if let Some(index) = fixed.iter().find(|i| **i >= FixedCounter::COUNT) {
                return Err(format!(
                    "Fixed counter index must be below {}, got {index}",
                    FixedCounter::COUNT
                ));
            }
        }

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            verbose: self.verbose,
            sample_capacity: self.capacity,
            ..SessionConfig::default()
        };
        if let Command::Path { prefix, pid, tid } = &self.command {
            config.samples_prefix = prefix.clone();
            config.suffix_pid = *pid;
            config.suffix_tid = *tid;
        }
        config
    }

    pub fn demo_config(&self) -> Option<DemoConfig> {
        match &self.command {
            Command::Demo {
                threads,
                txns,
                quanta,
                work,
                ..
            } => Some(DemoConfig {
                threads: *threads,
                txns: *txns,
                quanta: *quanta,
                work: *work,
            }),
            _ => None,
        }
    }
}
