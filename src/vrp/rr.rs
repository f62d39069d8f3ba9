use anyhow::Result;

use crate::data::{Allocation, AppId, InterestMap, Location, Seconds, TaskData, Vehicle};
use super::cost::travel_time;
use super::{Route, Schedule, Solver};

/// Baseline that cycles through the apps, sending each vehicle to the
/// closest remaining task of the app whose turn it is.
#[derive(Debug, Default)]
pub struct RoundRobinSolver {
    interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
    rth: Option<Vec<Location>>,
}

impl RoundRobinSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_task(&self, v: &Vehicle, im: &InterestMap, app_id: AppId) -> Option<(TaskData, Seconds)> {
        im.iter()
            .filter(|(t, _)| t.app_id == app_id)
            .map(|(t, d)| (*d, travel_time(v.location, t.location, v.speed, d.task_time_seconds)))
            .min_by_key(|&(_, tt)| tt)
    }

    fn travel_time_home(&self, v: &Vehicle, home: Location, loc: Location) -> Seconds {
        travel_time(loc, home, v.speed, 0.0)
    }
}

impl Solver for RoundRobinSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(RoundRobinSolver::new())
    }

    fn set(
        &mut self,
        interest_map: InterestMap,
        _unweighted_interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        budget: Seconds,
        _capacity: i64,
        rth: Option<Vec<Location>>,
    ) {
        self.interest_map = interest_map;
        self.vehicles = vehicles;
        self.budget = budget;
        self.rth = rth;
    }

    fn set_initial_schedule(&mut self, _schedule: Schedule) {}

    fn set_travel_time_matrix_path(&mut self, _path: &str) {}

    fn travel_time_matrix_path(&self) -> &str {
        ""
    }

    fn rth(&self) -> Option<&[Location]> {
        self.rth.as_deref()
    }

    fn solve(&self) -> Result<Schedule> {
        let mut im = self.interest_map.clone();
        let app_ids = self.interest_map.apps();

        let mut s = Schedule::default();
        s.allocation = Allocation::new();
        for (i, vehicle) in self.vehicles.iter().enumerate() {
            let mut vehicle = *vehicle;
            let mut path: Vec<TaskData> = Vec::new();
            let mut interest = 0.0;
            let mut time: Seconds = 0;
            let start = vehicle.location;

            'out: while time <= self.budget {
                for &app in &app_ids {
                    let (next, tt) = match self.next_task(&vehicle, &im, app) {
                        Some(x) => x,
                        None => continue,
                    };
                    let th = match &self.rth {
                        Some(home) => self.travel_time_home(&vehicle, home[i], next.location),
                        None => 0,
                    };
                    if time + tt + th >= self.budget {
                        break 'out;
                    }
                    let task = next.task();
                    let unweighted = self.interest_map.get(&task).map(|d| d.interest).unwrap_or(0.0);
                    path.push(next);
                    interest += unweighted;
                    time += tt;
                    s.allocation.add(app, unweighted);
                    vehicle.location = next.location;
                    im.remove(&task);
                }
                if im.is_empty() {
                    break;
                }
            }

            let end = match (&self.rth, path.last()) {
                (Some(home), Some(last)) => {
                    time += self.travel_time_home(&vehicle, home[i], last.location);
                    home[i]
                }
                (_, Some(last)) => last.location,
                (_, None) => start,
            };
            s.routes.push(Route {
                path,
                total_interest: interest,
                total_time: time,
                vehicle_start: start,
                vehicle_end: end,
            });
        }
        s.stats.alpha = -2.0;
        return Ok(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn td(app_id: AppId, lat: f64, interest: f64) -> TaskData {
        TaskData {
            app_id,
            location: Location::new(lat, 0.0),
            destination: Location::new(lat, 0.0),
            interest,
            task_time_seconds: 1.0,
            request_time: 0,
            fulfill_time: 0,
        }
    }

    #[test]
    fn alternates_between_apps() {
        let im: InterestMap = vec![
            td(0, 0.001, 5.0),
            td(0, 0.002, 5.0),
            td(1, 0.0015, 3.0),
            td(1, 0.0025, 3.0),
        ].into_iter().collect();
        let mut s = RoundRobinSolver::new();
        s.set(
            im.clone(),
            im,
            vec![Vehicle { id: 0, location: Location::new(0.0, 0.0), speed: 50.0 }],
            100_000,
            0,
            None,
        );
        let sched = s.solve().unwrap();
        let path = &sched.routes[0].path;
        assert_eq!(path.len(), 4);
        // strict app alternation: 0, 1, 0, 1
        let order: Vec<AppId> = path.iter().map(|t| t.app_id).collect();
        assert_eq!(order, vec![0, 1, 0, 1]);
        assert_eq!(sched.allocation.get(0), 10.0);
        assert_eq!(sched.allocation.get(1), 6.0);
    }

    #[test]
    fn respects_budget() {
        let im: InterestMap = vec![td(0, 0.5, 5.0), td(0, 1.0, 5.0)].into_iter().collect();
        let mut s = RoundRobinSolver::new();
        s.set(
            im.clone(),
            im,
            vec![Vehicle { id: 0, location: Location::new(0.0, 0.0), speed: 10.0 }],
            10,
            0,
            None,
        );
        let sched = s.solve().unwrap();
        assert!(sched.routes[0].path.is_empty());
        assert_eq!(sched.allocation.total(), 0.0);
        assert_eq!(sched.routes[0].vehicle_end, sched.routes[0].vehicle_start);
    }
}
