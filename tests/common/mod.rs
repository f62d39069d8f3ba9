//! An in-process routing oracle for end-to-end tests: small enough task
//! sets are solved exactly by enumerating every feasible visit order, so the
//! scenarios can rely on the oracle truly maximizing the weighted reward.

use std::sync::{Arc, Mutex};
use anyhow::Result;

use mobius::data::{Allocation, InterestMap, Location, Seconds, TaskData, Vehicle};
use mobius::vrp::cost::travel_time;
use mobius::vrp::{Route, Schedule, Solver};

#[derive(Clone, Default)]
pub struct ExhaustiveSolver {
    interest_map: InterestMap,
    unweighted_interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
    rth: Option<Vec<Location>>,
    travel_time_matrix_path: String,
    /// The rth argument seen by each solve call, shared across fresh copies.
    pub rth_log: Arc<Mutex<Vec<Option<Vec<Location>>>>>,
}

struct Best {
    path: Vec<usize>,
    weighted: f64,
    unweighted: f64,
    elapsed: Seconds,
}

impl ExhaustiveSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn unweighted_interest(&self, t: &TaskData) -> f64 {
        self.unweighted_interest_map
            .get(&t.task())
            .map(|d| d.interest)
            .unwrap_or(t.interest)
    }

    fn dfs(
        &self,
        v: &Vehicle,
        tasks: &[TaskData],
        used: &mut Vec<bool>,
        path: &mut Vec<usize>,
        loc: Location,
        elapsed: Seconds,
        weighted: f64,
        unweighted: f64,
        best: &mut Best,
    ) {
        let better = weighted > best.weighted
            || (weighted == best.weighted && unweighted > best.unweighted)
            || (weighted == best.weighted && unweighted == best.unweighted && elapsed < best.elapsed);
        if better {
            best.path = path.clone();
            best.weighted = weighted;
            best.unweighted = unweighted;
            best.elapsed = elapsed;
        }

        for i in 0..tasks.len() {
            if used[i] {
                continue;
            }
            let t = &tasks[i];
            let tt = travel_time(loc, t.location, v.speed, t.task_time_seconds);
            if elapsed + tt > self.budget {
                continue;
            }
            used[i] = true;
            path.push(i);
            self.dfs(
                v,
                tasks,
                used,
                path,
                t.location,
                elapsed + tt,
                weighted + t.interest,
                unweighted + self.unweighted_interest(t),
                best,
            );
            path.pop();
            used[i] = false;
        }
    }

    fn best_route(&self, v: &Vehicle, tasks: &[TaskData]) -> (Vec<usize>, Seconds) {
        let mut best = Best { path: Vec::new(), weighted: 0.0, unweighted: 0.0, elapsed: 0 };
        let mut used = vec![false; tasks.len()];
        let mut path = Vec::new();
        self.dfs(v, tasks, &mut used, &mut path, v.location, 0, 0.0, 0.0, &mut best);
        (best.path, best.elapsed)
    }
}

impl Solver for ExhaustiveSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(ExhaustiveSolver {
            rth_log: Arc::clone(&self.rth_log),
            ..Default::default()
        })
    }

    fn set(
        &mut self,
        interest_map: InterestMap,
        unweighted_interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        budget: Seconds,
        _capacity: i64,
        rth: Option<Vec<Location>>,
    ) {
        self.interest_map = interest_map;
        self.unweighted_interest_map = unweighted_interest_map;
        self.vehicles = vehicles;
        self.budget = budget;
        self.rth = rth;
    }

    fn set_initial_schedule(&mut self, _schedule: Schedule) {}

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
        self.rth_log.lock().unwrap().push(self.rth.clone());

        let mut remaining = self.interest_map.to_list();
        let mut allocation = Allocation::new();
        for id in self.interest_map.apps() {
            allocation.set(id, 0.0);
        }

        let mut routes = Vec::new();
        for v in &self.vehicles {
            let (indices, _) = self.best_route(v, &remaining);

            let mut path = Vec::new();
            let mut loc = v.location;
            let mut elapsed: Seconds = 0;
            let mut interest = 0.0;
            for &i in &indices {
                let t = &remaining[i];
                elapsed += travel_time(loc, t.location, v.speed, t.task_time_seconds);
                let unweighted = self.unweighted_interest(t);
                let mut served = self.unweighted_interest_map
                    .get(&t.task())
                    .copied()
                    .unwrap_or(*t);
                served.fulfill_time = elapsed;
                allocation.add(t.app_id, unweighted);
                interest += unweighted;
                loc = t.location;
                path.push(served);
            }

            let vehicle_end = path.last().map(|t: &TaskData| t.location).unwrap_or(v.location);
            routes.push(Route {
                path,
                total_interest: interest,
                total_time: elapsed,
                vehicle_start: v.location,
                vehicle_end,
            });

            let mut chosen: Vec<usize> = indices.clone();
            chosen.sort_unstable_by(|a, b| b.cmp(a));
            for i in chosen {
                remaining.remove(i);
            }
        }

        Ok(Schedule { routes, allocation, stats: Default::default() })
    }
}

pub fn task(app_id: i32, lat: f64, lon: f64, interest: f64) -> TaskData {
    TaskData {
        app_id,
        location: Location::new(lat, lon),
        destination: Location::new(lat, lon),
        interest,
        task_time_seconds: 0.0,
        request_time: 0,
        fulfill_time: 0,
    }
}

pub fn vehicle(lat: f64, lon: f64) -> Vehicle {
    Vehicle { id: 0, location: Location::new(lat, lon), speed: 1.0 }
}
