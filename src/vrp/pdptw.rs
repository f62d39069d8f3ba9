use std::fmt::Write as _;
use std::process::Command;
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use tracing::*;

use crate::Map;
use crate::data::{InterestMap, Location, Seconds, Task, Vehicle};
use super::ortools::run_oracle;
use super::{Schedule, Solver};

const SOLVER_BIN: &str = "./solvers/or-tools/bin/pdptw";

/// Adapter for the pickup-delivery time-window oracle. The child consumes a
/// tab-separated problem on stdin and emits a JSON schedule on stdout.
#[derive(Debug, Default)]
pub struct PdptwSolver {
    interest_map: InterestMap,
    unweighted_interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
    capacity: i64,
    initial_schedule: Schedule,
    rth: Option<Vec<Location>>,
    travel_time_matrix_path: String,
}

impl PdptwSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the problem in the oracle's tab-separated format: matrix path,
    /// header, one row per vehicle, a pickup and a delivery row per task,
    /// then `-1`-prefixed initial-route lines.
    fn to_txt(&self) -> Result<String> {
        let mut out = String::new();
        let mut idx: usize = 0;
        let mut node_map: Map<Task, usize> = Map::default();

        writeln!(out, "{}", self.travel_time_matrix_path)?;

        writeln!(
            out,
            "{}\t{}\t{:.1}\t{}",
            self.vehicles.len(),
            self.capacity,
            self.vehicles[0].speed,
            self.budget,
        )?;

        for v in &self.vehicles {
            writeln!(
                out,
                "{}\t-1\t0\t{:.6}\t{:.6}\t0\t0\t0\t0\t0\t0",
                idx, v.location.latitude, v.location.longitude,
            )?;
            idx += 1;
        }

        for data in self.interest_map.to_list() {
            let task = data.task();
            let unweighted = self.unweighted_interest_map
                .get(&task)
                .map(|d| d.interest)
                .unwrap_or(0.0);
            writeln!(
                out,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{}\t{:.4}\t{:.4}\t{}\t{}\t{}",
                idx, data.app_id, data.request_time,
                data.location.latitude, data.location.longitude,
                1, data.interest, unweighted, data.fulfill_time, 0, idx + 1,
            )?;
            node_map.insert(task, idx);
            writeln!(
                out,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{}\t{:.4}\t{:.4}\t{}\t{}\t{}",
                idx + 1, data.app_id, data.request_time,
                data.destination.latitude, data.destination.longitude,
                -1, data.interest, unweighted, data.fulfill_time, idx, 0,
            )?;
            let dropoff = Task {
                app_id: data.app_id,
                location: data.destination,
                destination: Location::invalid(),
                request_time: data.request_time,
            };
            node_map.insert(dropoff, idx + 1);
            idx += 2;
        }

        for route in &self.initial_schedule.routes {
            let mut nodes = Vec::with_capacity(route.path.len());
            for (i, t) in route.path.iter().enumerate() {
                let task = t.task();
                let node = match node_map.get(&task) {
                    Some(&n) => n,
                    None => bail!("task {:?} invalid in initial schedule", task),
                };
                if i > 0 && nodes.last() == Some(&node) {
                    bail!(
                        "cannot stay at same node: task {:?} --> task {:?}",
                        route.path[i - 1], route.path[i],
                    );
                }
                nodes.push(node);
            }
            writeln!(out, "-1\t{}", nodes.iter().map(|n| n.to_string()).join("\t"))?;
        }

        return Ok(out);
    }
}

impl Solver for PdptwSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(PdptwSolver::new())
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
        if self.vehicles.is_empty() {
            bail!("pdptw oracle needs at least one vehicle");
        }
        let input = self.to_txt().context("error rendering pdptw input")?;
        let cmd = Command::new(SOLVER_BIN);
        let start = std::time::Instant::now();
        let schedule = run_oracle(cmd, input.as_bytes())?;
        debug!(elapsed_sec = start.elapsed().as_secs_f64(), "oracle returned");
        return Ok(schedule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TaskData;

    #[test]
    fn txt_layout() {
        let mut im = InterestMap::new();
        im.insert(TaskData {
            app_id: 2,
            location: Location::new(1.5, 2.5),
            destination: Location::new(3.5, 4.5),
            interest: 6.0,
            task_time_seconds: 0.0,
            request_time: 7,
            fulfill_time: 0,
        });
        let mut s = PdptwSolver::new();
        s.set(
            im.clone(),
            im,
            vec![Vehicle { id: 0, location: Location::new(0.0, 0.0), speed: 10.0 }],
            360,
            4,
            None,
        );
        let txt = s.to_txt().unwrap();
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "1\t4\t10.0\t360");
        assert_eq!(lines[2], "0\t-1\t0\t0.000000\t0.000000\t0\t0\t0\t0\t0\t0");
        // pickup points at its delivery node and vice versa
        assert_eq!(lines[3], "1\t2\t7\t1.500000\t2.500000\t1\t6.0000\t6.0000\t0\t0\t2");
        assert_eq!(lines[4], "2\t2\t7\t3.500000\t4.500000\t-1\t6.0000\t6.0000\t0\t1\t0");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn initial_route_references_known_nodes() {
        let data = TaskData {
            app_id: 0,
            location: Location::new(1.0, 1.0),
            destination: Location::new(2.0, 2.0),
            interest: 1.0,
            task_time_seconds: 0.0,
            request_time: 0,
            fulfill_time: 0,
        };
        let mut im = InterestMap::new();
        im.insert(data);
        let mut s = PdptwSolver::new();
        s.set(
            im.clone(),
            im,
            vec![Vehicle { id: 0, location: Location::new(0.0, 0.0), speed: 10.0 }],
            360,
            0,
            None,
        );
        s.set_initial_schedule(Schedule {
            routes: vec![super::super::Route { path: vec![data], ..Default::default() }],
            ..Default::default()
        });
        let txt = s.to_txt().unwrap();
        assert!(txt.lines().last().unwrap().starts_with("-1\t1"));

        // a route over a task missing from the map is refused
        let mut stranger = data;
        stranger.location = Location::new(9.0, 9.0);
        s.set_initial_schedule(Schedule {
            routes: vec![super::super::Route { path: vec![stranger], ..Default::default() }],
            ..Default::default()
        });
        assert!(s.to_txt().is_err());
    }
}
