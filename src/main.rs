use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use track_mppi::config::SimConfig;
use track_mppi::report;
use track_mppi::simulation::random_initial_state;
use track_mppi::{seeded_rng, CostKind, Mppi, Simulation, Unicycle};

// cargo run --release -- --filename results/run1

#[derive(Debug, Parser)]
#[command(about = "MPPI track following under actuation and process noise")]
struct Cli {
    /// Natural system noise parameter (actuation covariance mu * I)
    #[arg(long, default_value_t = 0.01)]
    mu: f64,

    /// Sampling covariance multiplier, samples are drawn from N(0, nu * Sigma)
    #[arg(long, default_value_t = 0.1)]
    nu: f64,

    /// Number of MPPI samples
    #[arg(short = 'K', long, default_value_t = 200)]
    samples: usize,

    /// MPPI horizon
    #[arg(short = 'T', long, default_value_t = 25)]
    horizon: usize,

    /// Number of simulation time steps
    #[arg(long, default_value_t = 200)]
    tsim: usize,

    /// Temperature (control cost parameter)
    #[arg(long, default_value_t = 0.1)]
    lambda: f64,

    /// Discrete time step
    #[arg(long, default_value_t = 0.05)]
    dt: f64,

    /// The simulation is terminated once sqrt(px^2 + py^2) >= r_exit
    #[arg(long, default_value_t = 5.0)]
    r_exit: f64,

    /// Random number generator seed
    #[arg(long, default_value_t = 100)]
    seed: u64,

    /// Simulate without noise on the input
    #[arg(long)]
    no_noise: bool,

    /// Additional process noise on the velocity channels
    #[arg(long, default_value_t = 0.0)]
    add_noise: f64,

    /// Parameter file, its values override the flags
    #[arg(long, default_value = "./track_params/track_params1.txt")]
    paramfile: PathBuf,

    /// Directory to save results (prints the report when omitted)
    #[arg(long)]
    filename: Option<PathBuf>,

    /// Multiplier of the state cost
    #[arg(long, default_value_t = 1.0)]
    qmult: f64,

    /// Desired speed
    #[arg(long, default_value_t = 3.0)]
    des_speed: f64,

    /// Cost type
    #[arg(long, value_enum, default_value_t = CostKind::Hard)]
    cost: CostKind,

    /// Log every step and the planner's sample statistics
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> SimConfig {
        SimConfig {
            mu: self.mu,
            nu: self.nu,
            samples: self.samples,
            horizon: self.horizon,
            steps: self.tsim,
            lambda: self.lambda,
            dt: self.dt,
            r_exit: self.r_exit,
            seed: self.seed,
            no_noise: self.no_noise,
            add_noise: self.add_noise,
            q_mult: self.qmult,
            desired_speed: self.des_speed,
            cost: self.cost,
            verbose: self.verbose,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()?;

    let mut cfg = cli.config();
    cfg.load_param_file(&cli.paramfile)
        .with_context(|| format!("invalid parameter file {}", cli.paramfile.display()))?;
    cfg.validate()?;
    log::info!(
        "K = {}, T = {}, Tsim = {}, lambda = {}, mu = {}, nu = {}, cost = {}",
        cfg.samples,
        cfg.horizon,
        cfg.steps,
        cfg.lambda,
        cfg.mu,
        cfg.nu,
        cfg.cost
    );

    let mut rng = seeded_rng(cfg.seed);
    let x0 = random_initial_state(&mut rng);
    let planner = Mppi::new(Unicycle, cfg.cost_function(), cfg.sigma(), cfg.mppi_params())?;
    let mut sim = Simulation::new(
        planner,
        Unicycle,
        cfg.cost_function(),
        cfg.noise_model()?,
        cfg.loop_params()?,
        x0,
        cfg.initial_controls(),
    )?;

    let now = std::time::Instant::now();
    let termination = sim.run(&mut rng).context("simulation aborted")?;
    log::info!("elapsed: {:.2} sec", now.elapsed().as_secs_f64());

    let recorder = sim.into_recorder();
    let summary = recorder.summarize(cfg.dt);
    match &cli.filename {
        Some(dir) => report::export(dir, &cfg, &recorder, &summary, termination)
            .with_context(|| format!("failed to export results to {}", dir.display()))?,
        None => println!("{}", report::report_lines(&cfg, &summary, termination).join("\n")),
    }
    Ok(())
}
