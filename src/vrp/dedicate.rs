use anyhow::{bail, Result};
use tracing::*;

use crate::data::{Allocation, AppId, InterestMap, Location, Seconds, Vehicle};
use super::{Schedule, Solver};

/// Baseline that carves the fleet into one group per application and solves
/// each group in isolation with a fresh instance of the inner adapter,
/// merging the resulting routes.
pub struct DedicateSolver {
    inner: Box<dyn Solver>,
    interest_map: InterestMap,
    unweighted_interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
    capacity: i64,
    initial_schedule: Schedule,
    rth: Option<Vec<Location>>,
    travel_time_matrix_path: String,
    app_ids: Vec<AppId>,
    vehicles_per_app: usize,
}

impl DedicateSolver {
    pub fn new(inner: Box<dyn Solver>) -> Self {
        DedicateSolver {
            inner,
            interest_map: InterestMap::new(),
            unweighted_interest_map: InterestMap::new(),
            vehicles: Vec::new(),
            budget: 0,
            capacity: 0,
            initial_schedule: Schedule::default(),
            rth: None,
            travel_time_matrix_path: String::new(),
            app_ids: Vec::new(),
            vehicles_per_app: 0,
        }
    }
}

impl Solver for DedicateSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(DedicateSolver::new(self.inner.fresh()))
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
        self.app_ids = interest_map.apps();
        self.interest_map = interest_map;
        self.unweighted_interest_map = unweighted_interest_map;
        self.vehicles = vehicles;
        self.budget = budget;
        self.capacity = capacity;
        self.rth = rth;

        if self.app_ids.is_empty() {
            self.vehicles_per_app = 0;
            return;
        }
        if self.vehicles.len() % self.app_ids.len() != 0 {
            warn!(
                apps = self.app_ids.len(),
                vehicles = self.vehicles.len(),
                "dedicating vehicle/app not possible",
            );
        }
        self.vehicles_per_app = self.vehicles.len() / self.app_ids.len();
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
        if self.vehicles_per_app == 0 {
            bail!(
                "cannot dedicate {} vehicles across {} apps",
                self.vehicles.len(),
                self.app_ids.len(),
            );
        }

        let mut master = Schedule::default();
        master.allocation = Allocation::new();
        for (i, &id) in self.app_ids.iter().enumerate() {
            let ima = self.interest_map.filter_by_app(id);
            let group = self.vehicles[i * self.vehicles_per_app..(i + 1) * self.vehicles_per_app].to_vec();
            let rth = self.rth.as_ref()
                .map(|r| r[i * self.vehicles_per_app..(i + 1) * self.vehicles_per_app].to_vec());

            let mut sub = self.inner.fresh();
            sub.set_travel_time_matrix_path(&self.travel_time_matrix_path);
            sub.set(ima.clone(), ima, group, self.budget, self.capacity, rth);
            sub.set_initial_schedule(self.initial_schedule.clone());
            let schedule = sub.solve()?;

            master.routes.extend(schedule.routes);
            master.allocation.set(id, schedule.allocation.get(id));
        }
        master.stats.alpha = -1.0;
        return Ok(master);
    }
}
