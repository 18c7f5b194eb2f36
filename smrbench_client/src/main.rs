//! Benchmark client executable driving synthetic rounds against a cluster.

use std::net::{SocketAddr, ToSocketAddrs};
use std::process::{self, ExitCode};
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{self, LevelFilter};

use smrbench::{
    logger_init, pf_error, pf_info, pf_warn, BenchConfig, BenchError,
    BenchParams, OracleStub, RoundController, ME,
};

use tokio::runtime::Builder;
use tokio::sync::watch;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Cluster manager oracle's host.
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    maddr: String,

    /// Cluster manager oracle's port.
    #[arg(long, default_value_t = 7077)]
    mport: u16,

    /// Total number of awaited requests.
    #[arg(short = 'q', long, default_value_t = 5000)]
    reqs: usize,

    /// Split the requests into this many rounds.
    #[arg(short = 'r', long, default_value_t = 1)]
    rounds: usize,

    /// Percentage of writes.
    #[arg(short = 'w', long, default_value_t = 100)]
    writes: u8,

    /// Egalitarian (leaderless) mode.
    #[arg(short = 'e', long, default_value_t = false)]
    leaderless: bool,

    /// Send every request to all replicas immediately.
    #[arg(short = 'f', long, default_value_t = false)]
    fast: bool,

    /// Percentage of conflicts; Zipfian keys if not given.
    #[arg(short = 'c', long)]
    conflicts: Option<u8>,

    /// Extra un-awaited requests issued per round.
    #[arg(long, default_value_t = 0)]
    eps: usize,

    /// Use only the first N replicas.
    #[arg(short = 'N', long = "forced-n")]
    forced_n: Option<u8>,

    /// Force the leader index instead of asking the manager.
    #[arg(short = 'l', long)]
    leader: Option<u8>,

    /// Check that every awaited reply arrives exactly once.
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Number of tokio worker threads.
    #[arg(short = 'p', long, default_value_t = 2)]
    threads: usize,

    /// Benchmark parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(config)` on success or
    /// `Err(BenchError)` on any error.
    fn sanitize(&self) -> Result<BenchConfig, BenchError> {
        if self.mport <= 1024 {
            return Err(BenchError::msg(format!(
                "invalid mport {}",
                self.mport
            )));
        }
        if self.threads < 2 {
            return Err(BenchError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        // parse optional params string if given
        let params_str = self.params.replace('+', "\n");
        let params = BenchParams::from_toml(if params_str.is_empty() {
            None
        } else {
            Some(&params_str[..])
        })?;

        let config = BenchConfig {
            total_reqs: self.reqs,
            rounds: self.rounds,
            writes: self.writes,
            leaderless: self.leaderless,
            fast: self.fast,
            conflicts: self.conflicts,
            eps: self.eps,
            forced_n: self.forced_n,
            forced_leader: self.leader,
            check: self.check,
            params,
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolves the manager oracle's address.
    fn manager_addr(&self) -> Result<SocketAddr, BenchError> {
        (self.maddr.as_str(), self.mport)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                BenchError::msg(format!(
                    "failed to resolve manager '{}:{}'",
                    self.maddr, self.mport
                ))
            })
    }
}

/// Actual main function of the benchmark client.
fn client_main() -> Result<(), BenchError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let config = args.sanitize()?;
    let manager = args.manager_addr()?;

    // set up termination signals handler; a second signal exits outright
    let (tx_term, mut rx_term) = watch::channel(false);
    let signaled = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if signaled.swap(true, Ordering::SeqCst) {
            pf_warn!("terminating on repeated signal");
            process::exit(1);
        }
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-bench")
            .build()?;

        // enter tokio runtime, discover the cluster, and run all rounds
        runtime.block_on(async move {
            let setup = async {
                let oracle = OracleStub::new_by_connect(
                    manager,
                    config.params.connect_retries,
                )
                .await?;
                RoundController::new_and_setup(config, oracle).await
            };
            let mut controller = tokio::select! {
                controller = setup => controller?,

                Ok(_) = rx_term.wait_for(|&stop| stop) => {
                    pf_warn!("terminated during setup");
                    return Ok(());
                }
            };

            let summary = controller.run(&mut rx_term).await?;
            pf_info!(
                "finished {} rounds in {:?}",
                summary.rounds.len(),
                summary.elapsed
            );

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), BenchError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the benchmark client.
fn main() -> ExitCode {
    let _ = ME.set("b".into());
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("client_main exited successfully");
        ExitCode::SUCCESS
    }
}
