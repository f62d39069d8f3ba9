use std::io::Write;
use std::process::{Command, Stdio};
use anyhow::{bail, Context, Result};
use tracing::*;

use crate::data::{InterestMap, Location, Seconds, Vehicle};
use super::{Schedule, Solver, SolverInput};

const SOLVER_CMD: &str = "python3";
const SOLVER_SCRIPT: &str = "solvers/vrp_ortools.py";

/// Adapter for the general-purpose routing oracle, spoken to over JSON on
/// stdin/stdout of a child process.
#[derive(Debug, Default)]
pub struct OrtoolsSolver {
    interest_map: InterestMap,
    unweighted_interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
    capacity: i64,
    initial_schedule: Schedule,
    rth: Option<Vec<Location>>,
    travel_time_matrix_path: String,
}

impl OrtoolsSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn input(&self) -> SolverInput {
        SolverInput {
            interest_map: self.interest_map.to_list(),
            unweighted_interest_map: self.unweighted_interest_map.to_list(),
            vehicles: self.vehicles.clone(),
            budget: self.budget,
            capacity: self.capacity,
            initial_schedule: self.initial_schedule.clone(),
            travel_time_matrix_path: self.travel_time_matrix_path.clone(),
            rth: self.rth.clone(),
        }
    }
}

/// Run an oracle child process, feeding `input` on stdin and decoding a
/// JSON schedule from stdout. Any failure crossing the process boundary is
/// an error for the caller to treat as fatal.
pub(super) fn run_oracle(mut cmd: Command, input: &[u8]) -> Result<Schedule> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("error spawning oracle {:?}", cmd))?;

    child.stdin.take()
        .expect("child stdin is piped")
        .write_all(input)
        .context("error writing oracle input")?;

    let out = child.wait_with_output().context("error waiting for oracle")?;
    if !out.status.success() {
        bail!("oracle exited with {}", out.status);
    }

    let schedule = serde_json::from_slice(&out.stdout)
        .context("error unmarshaling oracle output")?;
    return Ok(schedule);
}

impl Solver for OrtoolsSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(OrtoolsSolver::new())
    }

    fn set(
        &mut self,
        interest_map: InterestMap,
        unweighted_interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        budget: Seconds,
        capacity: i64,
        rth: Option<Vec<Location>>,
    ) {
        self.interest_map = interest_map;
        self.unweighted_interest_map = unweighted_interest_map;
        self.vehicles = vehicles;
        self.budget = budget;
        self.capacity = capacity;
        self.rth = rth;
    }

    fn set_initial_schedule(&mut self, schedule: Schedule) {
        self.initial_schedule = schedule;
    }

    fn set_travel_time_matrix_path(&mut self, path: &str) {
        self.travel_time_matrix_path = path.to_string();
    }

    fn travel_time_matrix_path(&self) -> &str {
        &self.travel_time_matrix_path
    }

    fn rth(&self) -> Option<&[Location]> {
        self.rth.as_deref()
    }

    fn solve(&self) -> Result<Schedule> {
        let input = serde_json::to_vec(&self.input()).context("error marshaling oracle input")?;
        let mut cmd = Command::new(SOLVER_CMD);
        cmd.arg(SOLVER_SCRIPT);
        let start = std::time::Instant::now();
        let schedule = run_oracle(cmd, &input)?;
        debug!(elapsed_sec = start.elapsed().as_secs_f64(), "oracle returned");
        return Ok(schedule);
    }
}
