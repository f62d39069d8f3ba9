//! Multi-round driver: collects interest from the applications, plans with
//! the policy picked by alpha, executes the replan prefix and carries the
//! served allocation into the next round's fairness objective.

use std::path::PathBuf;
use anyhow::{bail, Result};
use tracing::*;

use crate::Map;
use crate::app::{merge_interest_maps, Application};
use crate::data::{to_file, Allocation, AppId, InterestMap, Location, Seconds, TaskData, Vehicle};
use crate::vrp::{DedicateSolver, RoundRobinSolver, Schedule, Solver};
use super::Mobius;

/// What to do with a planning round. Positive alpha buys fairness; the
/// remaining variants are the baselines historically selected by the
/// sentinel values 0, -1 and -2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    Fair(f64),
    MaxThroughput,
    Dedicate,
    RoundRobin,
}

impl Policy {
    pub fn from_alpha(alpha: f64) -> Result<Policy> {
        if alpha > 0.0 {
            Ok(Policy::Fair(alpha))
        } else if alpha == 0.0 {
            Ok(Policy::MaxThroughput)
        } else if alpha == -1.0 {
            Ok(Policy::Dedicate)
        } else if alpha == -2.0 {
            Ok(Policy::RoundRobin)
        } else {
            bail!("alpha {} is neither a fairness level nor a known baseline", alpha)
        }
    }
}

pub struct Scheduler {
    pub applications: Vec<Box<dyn Application>>,
    pub vehicles: Vec<Vehicle>,
    pub home: Vec<Location>,
    pub solver: Box<dyn Solver>,
    pub alpha: f64,
    pub discount: f64,
    pub horizon: Seconds,
    pub replan_sec: Seconds,
    pub max_rounds: usize,
    pub capacity: i64,
    pub rth_sec: Seconds,
    pub dir: Option<PathBuf>,
    pub hull: bool,
    allocation: Allocation,
}

impl Scheduler {
    pub fn new(
        applications: Vec<Box<dyn Application>>,
        vehicles: Vec<Vehicle>,
        home: Vec<Location>,
        solver: Box<dyn Solver>,
    ) -> Self {
        Scheduler {
            applications,
            vehicles,
            home,
            solver,
            alpha: 100.0,
            discount: 1.0,
            horizon: 360,
            replan_sec: 360,
            max_rounds: 1000,
            capacity: 0,
            rth_sec: 900,
            dir: None,
            hull: false,
            allocation: Allocation::new(),
        }
    }

    /// Interest served per app since the run started.
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Merge the apps' interest maps. Returns the unfiltered map alongside a
    /// copy with interest and service time capped to the vehicle capacity.
    fn interest_maps(&self) -> (InterestMap, InterestMap) {
        let ims: Vec<InterestMap> = self.applications.iter().map(|a| a.interest_map()).collect();
        let im_all = merge_interest_maps(ims);

        let mut im = InterestMap::new();
        for (_, d) in im_all.iter() {
            let mut d = *d;
            if self.capacity > 0 && d.interest as i64 > self.capacity {
                d.interest = self.capacity as f64;
                d.task_time_seconds = self.capacity as f64;
            }
            im.insert(d);
        }
        return (im_all, im);
    }

    fn update_vehicles(&mut self, schedule: &Schedule) {
        for (i, route) in schedule.routes.iter().enumerate() {
            if let Some(v) = self.vehicles.get_mut(i) {
                v.location = route.vehicle_end;
            }
        }
    }

    /// Report fulfilled tasks back to their owners, shifting fulfill times
    /// into absolute experiment time.
    fn update_apps(&mut self, schedule: &Schedule, time: Seconds) {
        let mut app_tasks: Map<AppId, Vec<TaskData>> = Map::default();
        for route in &schedule.routes {
            for task in &route.path {
                let mut task = *task;
                task.fulfill_time += time;
                if task.destination.is_valid() {
                    app_tasks.entry(task.app_id).or_default().push(task);
                }
            }
        }

        for app in &mut self.applications {
            let tasks = app_tasks.remove(&app.id()).unwrap_or_default();
            app.update(&tasks, time + self.replan_sec);
        }
    }

    /// Run rounds until interest is exhausted or the round cap is reached.
    pub fn run(&mut self) -> Result<()> {
        self.allocation = Allocation::new();
        let policy = Policy::from_alpha(self.alpha)?;
        let (mut im_all, mut im) = self.interest_maps();
        let mut round: usize = 0;
        let mut budget_time: Seconds = 0;
        let mut total_time: Seconds = 0;

        while !im_all.is_empty() && round < self.max_rounds {
            let mut rth: Option<Vec<Location>> = None;
            if self.rth_sec > 0 && budget_time + self.horizon >= self.rth_sec {
                info!(round, "rth enabled");
                rth = Some(self.home.clone());
                budget_time = 0;
            }

            let total: f64 = self.applications.iter().map(|a| a.interest_map().total_interest()).sum();
            info!(
                apps = self.applications.len(),
                interest = total,
                vehicles = self.vehicles.len(),
                "planning round",
            );

            let mut solver = self.solver.fresh();
            solver.set_travel_time_matrix_path(self.solver.travel_time_matrix_path());
            solver.set(
                im.clone(),
                im.clone(),
                self.vehicles.clone(),
                self.horizon,
                self.capacity,
                rth.clone(),
            );
            solver.set_initial_schedule(Schedule::default());

            let mut hull: Vec<Schedule> = Vec::new();
            let mut schedule = match policy {
                Policy::Fair(alpha) => {
                    let mut mobius = Mobius::new(
                        solver,
                        im.clone(),
                        self.vehicles.clone(),
                        self.horizon,
                        self.capacity,
                        alpha,
                        self.discount,
                    );
                    mobius.historical = self.allocation.clone();
                    mobius.dir = self.dir.clone();
                    mobius.init()?;
                    let schedule = mobius.search_frontier()?;
                    if self.hull {
                        hull = mobius.trace_frontier()?;
                    }
                    schedule
                }
                Policy::MaxThroughput => solver.solve()?,
                Policy::Dedicate => {
                    let mut d = DedicateSolver::new(self.solver.fresh());
                    d.set_travel_time_matrix_path(self.solver.travel_time_matrix_path());
                    d.set(
                        im.clone(),
                        im.clone(),
                        self.vehicles.clone(),
                        self.horizon,
                        self.capacity,
                        rth.clone(),
                    );
                    d.solve()?
                }
                Policy::RoundRobin => {
                    let mut r = RoundRobinSolver::new();
                    r.set(
                        im.clone(),
                        im.clone(),
                        self.vehicles.clone(),
                        self.horizon,
                        self.capacity,
                        rth.clone(),
                    );
                    r.solve()?
                }
            };

            info!(
                start = total_time,
                end = total_time + self.horizon,
                allocation = ?schedule.allocation,
                "planned",
            );

            schedule.trim(self.replan_sec);

            if let Some(dir) = &self.dir {
                to_file(dir.join(format!("im_round{:04}.json", round)), &im_all.to_list())?;
                to_file(dir.join(format!("schedule_round{:04}.json", round)), &schedule)?;
                if self.hull {
                    to_file(dir.join(format!("hull_round{:04}.json", round)), &hull)?;
                }
            }

            for (&id, &a) in schedule.allocation.iter() {
                self.allocation.add(id, a);
            }
            info!(
                start = total_time,
                end = total_time + self.replan_sec,
                round,
                allocation = ?schedule.allocation,
                "executed",
            );
            info!(round, cumulative = ?self.allocation, "cumulative allocation");

            self.update_vehicles(&schedule);
            self.update_apps(&schedule, total_time);

            budget_time += self.replan_sec;
            total_time += self.replan_sec;

            let maps = self.interest_maps();
            im_all = maps.0;
            im = maps.1;
            round += 1;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_alpha() {
        assert_eq!(Policy::from_alpha(1.0).unwrap(), Policy::Fair(1.0));
        assert_eq!(Policy::from_alpha(100.0).unwrap(), Policy::Fair(100.0));
        assert_eq!(Policy::from_alpha(0.0).unwrap(), Policy::MaxThroughput);
        assert_eq!(Policy::from_alpha(-1.0).unwrap(), Policy::Dedicate);
        assert_eq!(Policy::from_alpha(-2.0).unwrap(), Policy::RoundRobin);
        assert!(Policy::from_alpha(-7.0).is_err());
    }

    struct OneShotApp {
        id: AppId,
        tasks: Vec<TaskData>,
    }

    impl Application for OneShotApp {
        fn id(&self) -> AppId {
            self.id
        }

        fn interest_map(&self) -> InterestMap {
            self.tasks.iter().copied().collect()
        }

        fn update(&mut self, completed: &[TaskData], _time: Seconds) {
            let done: Vec<_> = completed.iter().map(|t| t.task()).collect();
            self.tasks.retain(|t| !done.contains(&t.task()));
        }
    }

    #[test]
    fn capacity_caps_interest_and_service_time() {
        let app = OneShotApp {
            id: 0,
            tasks: vec![TaskData {
                app_id: 0,
                location: Location::new(1.0, 1.0),
                destination: Location::invalid(),
                interest: 12.0,
                task_time_seconds: 12.0,
                request_time: 0,
                fulfill_time: 0,
            }],
        };
        let mut s = Scheduler::new(
            vec![Box::new(app)],
            vec![],
            vec![],
            Box::new(RoundRobinSolver::new()),
        );
        s.capacity = 5;
        let (im_all, im) = s.interest_maps();
        assert_eq!(im_all.total_interest(), 12.0);
        assert_eq!(im.total_interest(), 5.0);
        let (_, data) = im.iter().next().unwrap();
        assert_eq!(data.task_time_seconds, 5.0);
    }
}
