use std::path::PathBuf;
use std::str::FromStr;
use anyhow::{bail, Context, Result};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use structopt::StructOpt;
use tracing::*;

use mobius::init_logging;
use mobius::app::{self, create_app, AppConfig, Application};
use mobius::data::{from_file, to_file, InterestMap, Location, Task, Vehicle};
use mobius::mobius::{Mobius, Scheduler};
use mobius::vrp::{OrtoolsSolver, PdptwSolver, Schedule, Solver};

const MAX_ROUNDS: usize = 1000;

#[derive(Debug, Copy, Clone)]
enum Mode {
    Mobius,
    Search,
    Trace,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        return match s {
            "mobius" => Ok(Self::Mobius),
            "search" => Ok(Self::Search),
            "trace" => Ok(Self::Trace),
            _ => Err(format!("invalid mode: {}", s)),
        };
    }
}

#[derive(Debug, Copy, Clone)]
enum SolverChoice {
    Ortools,
    Pdptw,
}

impl FromStr for SolverChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        return match s {
            "ortools" => Ok(Self::Ortools),
            "pdptw" => Ok(Self::Pdptw),
            _ => Err(format!("invalid solver: {}", s)),
        };
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "mobius", about = "fleet scheduler with alpha-fair allocation across apps")]
struct ClArgs {
    /// Scheduler mode (mobius, search, trace)
    #[structopt(long, default_value = "mobius")]
    mode: Mode,
    /// Alpha value (controls fairness)
    #[structopt(long, default_value = "100.0")]
    alpha: f64,
    /// Discount factor on historical throughput (1 = no discount)
    #[structopt(long, default_value = "1.0")]
    discount: f64,
    /// Fairness/planning timescale (seconds)
    #[structopt(long, default_value = "360")]
    horizon: i64,
    /// Replanning interval (seconds)
    #[structopt(long = "replan", default_value = "360")]
    replan_sec: i64,
    /// Experiment duration (seconds); 0 runs until tasks are exhausted
    #[structopt(long = "duration", default_value = "0")]
    duration_sec: i64,
    /// Vehicle capacity (objects; 0 = no constraint)
    #[structopt(long, default_value = "0")]
    capacity: i64,
    /// Period at which to return home (seconds)
    #[structopt(long, default_value = "900")]
    rth: i64,
    /// Path to travel time (distance) matrix
    #[structopt(long = "ttpath", default_value = "")]
    travel_time_path: String,
    /// Solver type (ortools, pdptw)
    #[structopt(long, default_value = "ortools")]
    solver: SolverChoice,
    /// Directory to save logs
    #[structopt(long)]
    dir: Option<PathBuf>,
    /// Trace hull in each round
    #[structopt(long)]
    hull: bool,
    /// Enable verbose logging
    #[structopt(long)]
    verbose: bool,
    /// Write structured logs to this file
    #[structopt(long)]
    log: Option<PathBuf>,
    /// Paths to app configs (repeatable)
    #[structopt(long = "app")]
    apps: Vec<PathBuf>,
    /// Path to vehicles config file
    #[structopt(long = "cfg-vehicles", default_value = "vehicles.cfg")]
    cfg_vehicles: PathBuf,
    /// Number of vehicles (replicate config)
    #[structopt(long = "num-vehicles", default_value = "0")]
    num_vehicles: usize,
    /// Worker threads for parallel solves (0 = one per core)
    #[structopt(long, short = "c", default_value = "0")]
    cpus: usize,
}

/// Snapshot of the effective settings, written next to the round outputs.
#[derive(Debug, Serialize)]
struct ConfigDump {
    mode: String,
    alpha: f64,
    discount: f64,
    horizon: i64,
    replan_sec: i64,
    duration_sec: i64,
    capacity: i64,
    rth: i64,
    travel_time_path: String,
    solver: String,
    hull: bool,
    vehicles: Vec<Vehicle>,
}

impl ConfigDump {
    fn new(args: &ClArgs, vehicles: &[Vehicle]) -> Self {
        ConfigDump {
            mode: format!("{:?}", args.mode).to_lowercase(),
            alpha: args.alpha,
            discount: args.discount,
            horizon: args.horizon,
            replan_sec: args.replan_sec,
            duration_sec: args.duration_sec,
            capacity: args.capacity,
            rth: args.rth,
            travel_time_path: args.travel_time_path.clone(),
            solver: format!("{:?}", args.solver).to_lowercase(),
            hull: args.hull,
            vehicles: vehicles.to_vec(),
        }
    }
}

/// Load the vehicle fleet: either a whole list, or one template replicated
/// `num` times with ids 0..num.
fn load_vehicles(path: &PathBuf, num: usize) -> Result<Vec<Vehicle>> {
    if num > 0 {
        let template: Vehicle = from_file(path)?;
        let vehicles = (0..num)
            .map(|i| Vehicle { id: i as i64, ..template })
            .collect();
        return Ok(vehicles);
    }
    return from_file(path);
}

fn create_env(paths: &[PathBuf]) -> Result<Vec<Box<dyn Application>>> {
    let mut apps = Vec::with_capacity(paths.len());
    for path in paths {
        let cfg: AppConfig = from_file(path)
            .with_context(|| format!("error loading app config {}", path.display()))?;
        apps.push(create_app(cfg)?);
    }
    return Ok(apps);
}

fn get_home(vehicles: &[Vehicle]) -> Vec<Location> {
    vehicles.iter().map(|v| v.location).collect()
}

fn merge_ims(apps: &[Box<dyn Application>]) -> InterestMap {
    app::merge_interest_maps(apps.iter().map(|a| a.interest_map()).collect())
}

fn create_dir(path: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("error creating directory {}", path.display()))
}

/// Save the interest map (plus vehicle markers) and the chosen schedule.
fn save(dir: &PathBuf, im: &InterestMap, s: &Schedule, vehicles: &[Vehicle]) -> Result<()> {
    let mut tasks: Vec<Task> = im.tasks();
    for v in vehicles {
        tasks.push(Task {
            app_id: -1,
            location: v.location,
            destination: Location::invalid(),
            request_time: 0,
        });
    }
    to_file(dir.join("im.json"), &tasks)?;
    to_file(dir.join("sched.json"), s)?;
    Ok(())
}

fn main() -> Result<()> {
    let args: ClArgs = StructOpt::from_args();
    let _g = init_logging(args.log.clone(), args.verbose);
    debug!(?args);

    if args.cpus > 0 {
        ThreadPoolBuilder::new()
            .num_threads(args.cpus)
            .build_global()
            .expect("failed to construct thread pool");
    }

    let vehicles = load_vehicles(&args.cfg_vehicles, args.num_vehicles)?;
    if vehicles.is_empty() {
        bail!("no vehicles configured");
    }
    info!(vehicles = vehicles.len(), apps = args.apps.len(), "loaded config");

    let apps = create_env(&args.apps)?;
    if apps.is_empty() {
        bail!("no apps configured");
    }

    let mut solver: Box<dyn Solver> = match args.solver {
        SolverChoice::Ortools => Box::new(OrtoolsSolver::new()),
        SolverChoice::Pdptw => Box::new(PdptwSolver::new()),
    };
    if !args.travel_time_path.is_empty() {
        solver.set_travel_time_matrix_path(&args.travel_time_path);
    }

    let home = get_home(&vehicles);
    let rth_locs = if args.rth > 0 { Some(home.clone()) } else { None };

    match args.mode {
        Mode::Mobius => {
            let dir = match &args.dir {
                Some(d) => {
                    let dir = d.join(format!("alpha{}", args.alpha));
                    create_dir(&dir)?;
                    to_file(dir.join("config.json"), &ConfigDump::new(&args, &vehicles))?;
                    Some(dir)
                }
                None => None,
            };

            let max_rounds = if args.duration_sec > 0 {
                (args.duration_sec / args.replan_sec) as usize
            } else {
                MAX_ROUNDS
            };

            let mut scheduler = Scheduler::new(apps, vehicles, home, solver);
            scheduler.alpha = args.alpha;
            scheduler.discount = args.discount;
            scheduler.horizon = args.horizon;
            scheduler.replan_sec = args.replan_sec;
            scheduler.max_rounds = max_rounds;
            scheduler.capacity = args.capacity;
            scheduler.rth_sec = args.rth;
            scheduler.dir = dir;
            scheduler.hull = args.hull;
            scheduler.run()?;
            info!(allocation = ?scheduler.allocation(), "done");
        }
        Mode::Trace => {
            let dir = match &args.dir {
                Some(d) => {
                    let dir = d.join("trace");
                    create_dir(&dir)?;
                    to_file(dir.join("config.json"), &ConfigDump::new(&args, &vehicles))?;
                    Some(dir)
                }
                None => None,
            };

            let im = merge_ims(&apps);
            solver.set(
                im.clone(),
                im.clone(),
                vehicles.clone(),
                args.horizon,
                args.capacity,
                rth_locs,
            );

            let mut sp = Mobius::new(
                solver,
                im,
                vehicles,
                args.horizon,
                args.capacity,
                args.alpha,
                args.discount,
            );
            sp.dir = dir;
            sp.init()?;
            let hull = sp.trace_frontier()?;
            let allocations: Vec<_> = hull.iter().map(|s| &s.allocation).collect();
            info!(?allocations, "found hull");
            if let Some(dir) = &sp.dir {
                to_file(dir.join("hull.json"), &hull)?;
            }
        }
        Mode::Search => {
            let dir = match &args.dir {
                Some(d) => {
                    let dir = d.join("search");
                    create_dir(&dir)?;
                    to_file(dir.join("config.json"), &ConfigDump::new(&args, &vehicles))?;
                    Some(dir)
                }
                None => None,
            };

            let im = merge_ims(&apps);
            solver.set(
                im.clone(),
                im.clone(),
                vehicles.clone(),
                args.horizon,
                args.capacity,
                rth_locs,
            );

            let mut sp = Mobius::new(
                solver,
                im.clone(),
                vehicles.clone(),
                args.horizon,
                args.capacity,
                args.alpha,
                args.discount,
            );
            sp.dir = dir.clone();
            sp.init()?;
            let sol = sp.search_frontier()?;
            info!(allocation = ?sol.allocation, "found alpha-fair allocation");

            if let Some(dir) = &dir {
                save(dir, &im, &sol, &vehicles)?;
            }
        }
    }
    return Ok(());
}
