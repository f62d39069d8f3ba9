//! Routing schedules and the adapters that produce them.
//!
//! The scheduler never routes vehicles itself; it hands a (possibly
//! re-weighted) interest map to a [`Solver`] and consumes the returned
//! [`Schedule`]. Out-of-process oracles ([`OrtoolsSolver`], [`PdptwSolver`])
//! and in-process baselines ([`DedicateSolver`], [`RoiSolver`],
//! [`RoundRobinSolver`]) share the same interface.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::Map;
use crate::data::{Allocation, AppId, InterestMap, Location, Seconds, TaskData, Vehicle};

pub mod cost;
mod ortools;
mod pdptw;
mod dedicate;
mod roi;
mod rr;

pub use ortools::OrtoolsSolver;
pub use pdptw::PdptwSolver;
pub use dedicate::DedicateSolver;
pub use roi::RoiSolver;
pub use rr::RoundRobinSolver;

/// One vehicle's leg of a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    pub path: Vec<TaskData>,
    pub total_interest: f64,
    pub total_time: Seconds,
    pub vehicle_start: Location,
    pub vehicle_end: Location,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub weights: Map<AppId, f64>,
    pub alpha: f64,
    pub bound: f64,
}

/// Routing plan returned by a solver, with the per-app interest it serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub routes: Vec<Route>,
    pub allocation: Allocation,
    pub stats: Stats,
}

impl Schedule {
    /// Truncate each route to the tasks fulfilled by `time` and recompute the
    /// allocation from what remains.
    ///
    /// A pickup kept at the boundary drags its delivery leg along, so
    /// pickup-delivery pairs stay intact. The recomputed allocation counts
    /// one unit per retained task with a real destination; delivery legs
    /// (destination = sentinel) are not double counted.
    pub fn trim(&mut self, time: Seconds) {
        let mut alloc = Allocation::new();
        for id in self.allocation.apps() {
            alloc.set(id, 0.0);
        }

        for route in &mut self.routes {
            if route.path.is_empty() {
                continue;
            }

            let mut keep = route.path.iter().take_while(|t| t.fulfill_time <= time).count();

            // finish the request if en route to its dropoff
            if keep > 0 && keep < route.path.len() {
                let last = &route.path[keep - 1];
                let next = &route.path[keep];
                if last.destination.is_valid()
                    && next.location == last.destination
                    && !next.destination.is_valid()
                {
                    keep += 1;
                }
            }

            route.path.truncate(keep);
            for t in &route.path {
                if t.destination.is_valid() {
                    alloc.add(t.app_id, 1.0);
                }
            }
            route.vehicle_end = route.path.last().map(|t| t.location).unwrap_or(route.vehicle_start);
        }
        self.allocation = alloc;
    }

    pub fn elapsed_time(&self) -> Vec<Seconds> {
        self.routes.iter().map(|r| r.total_time).collect()
    }

    pub fn max_time(&self) -> Seconds {
        self.elapsed_time().into_iter().max().unwrap_or(0)
    }
}

/// Input document handed to an out-of-process routing oracle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverInput {
    pub interest_map: Vec<TaskData>,
    pub unweighted_interest_map: Vec<TaskData>,
    pub vehicles: Vec<Vehicle>,
    pub budget: Seconds,
    pub capacity: i64,
    pub initial_schedule: Schedule,
    pub travel_time_matrix_path: String,
    pub rth: Option<Vec<Location>>,
}

/// Interface shared by every routing adapter.
///
/// `solve` maximizes the summed (weighted) interest of routed tasks under the
/// per-vehicle time budget; the returned allocation is stated in unweighted
/// interest. Adapters are cheap to construct so parallel callers obtain a
/// private instance via [`Solver::fresh`].
pub trait Solver: Send + Sync {
    /// A new, unconfigured adapter of the same kind.
    fn fresh(&self) -> Box<dyn Solver>;

    fn set(
        &mut self,
        interest_map: InterestMap,
        unweighted_interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        budget: Seconds,
        capacity: i64,
        rth: Option<Vec<Location>>,
    );

    fn set_initial_schedule(&mut self, schedule: Schedule);

    fn set_travel_time_matrix_path(&mut self, path: &str);

    fn travel_time_matrix_path(&self) -> &str;

    fn rth(&self) -> Option<&[Location]>;

    fn solve(&self) -> Result<Schedule>;
}
