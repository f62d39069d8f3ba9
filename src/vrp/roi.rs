use anyhow::{bail, Result};
use tracing::*;

use crate::Set;
use crate::data::{Allocation, AppId, InterestMap, Location, Seconds, Task, TaskData, Vehicle};
use super::cost::travel_time;
use super::{Schedule, Solver};

const EPSILON: f64 = 0.1;

/// Greedy return-on-investment heuristic. Tasks are repeatedly re-scored by
/// their marginal alpha-utility per travel second, collected into a fair set,
/// re-ordered by the inner routing adapter, and finally packed with whatever
/// else still fits.
pub struct RoiSolver {
    pub alpha: f64,
    inner: Box<dyn Solver>,
    interest_map: InterestMap,
    unweighted_interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budget: Seconds,
}

struct RoiProblem {
    interest_map: InterestMap,
    vehicles: Vec<Vehicle>,
    budgets: Vec<Seconds>,
    historical: Allocation,
}

#[derive(Debug, Clone, Copy)]
struct RoiTask {
    task: Task,
    travel_time: Seconds,
    roi: f64,
}

fn midpoint(src: Location, dst: Location) -> Location {
    let lat1 = src.latitude.to_radians();
    let lon1 = src.longitude.to_radians();
    let lat2 = dst.latitude.to_radians();
    let lon2 = dst.longitude.to_radians();

    let bx = lat2.cos() * (lon2 - lon1).cos();
    let by = lat2.cos() * (lon2 - lon1).sin();
    let lat3 = (lat1.sin() + lat2.sin())
        .atan2(((lat1.cos() + bx) * (lat1.cos() + bx) + by * by).sqrt());
    let lon3 = lon1 + by.atan2(lat1.cos() + bx);

    Location {
        latitude: (lat3.to_degrees() * 1e5).round() / 1e5,
        longitude: (lon3.to_degrees() * 1e5).round() / 1e5,
    }
}

fn find_feasible_task(tasks: &[RoiTask], elapsed: Seconds, budget: Seconds) -> Option<RoiTask> {
    tasks.iter()
        .find(|t| elapsed + t.travel_time < budget && t.task.app_id == tasks[0].task.app_id)
        .copied()
}

impl RoiSolver {
    pub fn new(alpha: f64, inner: Box<dyn Solver>) -> Self {
        RoiSolver {
            alpha,
            inner,
            interest_map: InterestMap::new(),
            unweighted_interest_map: InterestMap::new(),
            vehicles: Vec::new(),
            budget: 0,
        }
    }

    fn time_left(&self, et: &[Seconds]) -> Option<Vec<Seconds>> {
        let done = et.iter().filter(|&&t| self.budget >= t).count();
        if done == et.len() {
            return None;
        }
        Some(et.iter().map(|&t| (self.budget - t).max(0)).collect())
    }

    /// Alpha-utility of `a`, optionally as if `td` had also been served.
    fn utility(&self, a: &Allocation, td: Option<&TaskData>) -> f64 {
        let mut u = 0.0;
        for (&id, &x) in a.iter() {
            let mut x = x;
            if let Some(td) = td {
                if td.app_id == id {
                    x += td.interest;
                }
            }
            let x = if x > 0.0 { x } else { EPSILON };
            u += if self.alpha == 1.0 {
                x.ln()
            } else {
                x.powf(1.0 - self.alpha) / (1.0 - self.alpha)
            };
        }
        return u;
    }

    /// Replace each task's interest with its marginal utility against the
    /// running allocation. Marginal utility can never be negative; a decrease
    /// means the model is broken.
    fn reweight_alpha(&self, im: &InterestMap, h: &Allocation) -> Result<InterestMap> {
        let curr_util = self.utility(h, None);
        let mut imw = InterestMap::new();
        for (_, data) in im.iter() {
            let next_util = self.utility(h, Some(data));
            if curr_util > next_util {
                bail!("curr util {} > next util {} in roi reweight", curr_util, next_util);
            }
            let mut data = *data;
            data.interest = next_util - curr_util;
            imw.insert(data);
        }
        return Ok(imw);
    }

    fn sort_by_roi(&self, im: &InterestMap, v: &Vehicle) -> Vec<RoiTask> {
        let mut tasks: Vec<RoiTask> = im.iter()
            .map(|(task, data)| {
                let tt = travel_time(v.location, task.location, v.speed, data.task_time_seconds);
                RoiTask { task: *task, travel_time: tt, roi: data.interest / tt as f64 }
            })
            .collect();
        tasks.sort_by(|a, b| b.roi.partial_cmp(&a.roi).unwrap_or(std::cmp::Ordering::Equal));
        return tasks;
    }

    /// Try to slot one more task of `app_id` between consecutive stops of the
    /// path, accepting the cheapest detour under `tolerance`.
    fn insert_alpha_task(
        &self,
        app_id: AppId,
        path: &[Task],
        scheduled: &Set<Task>,
        tolerance: Seconds,
        v: &Vehicle,
    ) -> Option<(Task, Seconds, usize)> {
        let mut candidates: Vec<(Task, Seconds, usize)> = Vec::new();
        for i in 1..path.len() {
            let mp = midpoint(path[i - 1].location, path[i].location);
            for (task, data) in self.interest_map.iter() {
                if task.app_id == app_id && !scheduled.contains(task) {
                    let tt = travel_time(mp, task.location, v.speed, data.task_time_seconds);
                    if tt < tolerance {
                        candidates.push((*task, tt, i));
                    }
                }
            }
        }
        candidates.sort_by_key(|&(_, extra, _)| extra);
        candidates.into_iter().next()
    }

    /// Greedily pick the fair task set: for each vehicle, chase the highest
    /// marginal-utility-per-second task that still fits the budget, falling
    /// back to detour insertion when the frontrunner app has no reachable
    /// task left.
    fn compute_alpha_tasks(&self, p: &mut RoiProblem) -> Result<Set<Task>> {
        let mut sched_tasks: Set<Task> = Set::default();
        for i in 0..p.vehicles.len() {
            let mut v = p.vehicles[i];
            let mut elapsed: Seconds = 0;
            let mut path: Vec<Task> = Vec::new();

            while elapsed < p.budgets[i] && !p.interest_map.is_empty() {
                let imw = self.reweight_alpha(&p.interest_map, &p.historical)?;
                let tasks_sorted = self.sort_by_roi(&imw, &v);
                if tasks_sorted.is_empty() {
                    break;
                }

                match find_feasible_task(&tasks_sorted, elapsed, p.budgets[i]) {
                    None => {
                        let tol = (tasks_sorted[0].travel_time / 2).min(p.budgets[i] - elapsed);
                        let hit = self.insert_alpha_task(
                            tasks_sorted[0].task.app_id,
                            &path,
                            &sched_tasks,
                            tol,
                            &v,
                        );
                        let (task, extra, pos) = match hit {
                            None => break,
                            Some(x) => x,
                        };
                        path.insert(pos, task);
                        sched_tasks.insert(task);
                        elapsed += 2 * extra;
                        let interest = p.interest_map.get(&task).map(|d| d.interest).unwrap_or(0.0);
                        p.historical.add(task.app_id, interest);
                    }
                    Some(next) => {
                        let interest = p.interest_map.get(&next.task).map(|d| d.interest).unwrap_or(0.0);
                        path.push(next.task);
                        sched_tasks.insert(next.task);
                        elapsed += next.travel_time;
                        p.historical.add(next.task.app_id, interest);
                        v.location = next.task.location;
                        p.interest_map.remove(&next.task);
                    }
                }
            }
        }
        return Ok(sched_tasks);
    }

    /// Hand the fair task set back to the routing adapter for proper ordering.
    fn reorder_with_vrp(&self, im: InterestMap, budget: Seconds) -> Result<Schedule> {
        let mut solver = self.inner.fresh();
        solver.set(im.clone(), im, self.vehicles.clone(), budget, 0, None);
        solver.solve()
    }

    /// Pack the schedule with any remaining tasks, pinning the fair set in
    /// place with a dominating interest.
    fn final_pack(&self, fair_tasks: &Set<Task>, fair_schedule: Schedule) -> Result<Schedule> {
        let mut im = InterestMap::new();
        for (task, data) in self.interest_map.iter() {
            let mut data = *data;
            if fair_tasks.contains(task) {
                data.interest = 1000.0;
            }
            im.insert(data);
        }

        let mut solver = self.inner.fresh();
        solver.set(im, self.interest_map.clone(), self.vehicles.clone(), self.budget, 0, None);
        solver.set_initial_schedule(fair_schedule);
        solver.solve()
    }
}

impl Solver for RoiSolver {
    fn fresh(&self) -> Box<dyn Solver> {
        Box::new(RoiSolver::new(self.alpha, self.inner.fresh()))
    }

    fn set(
        &mut self,
        interest_map: InterestMap,
        unweighted_interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        budget: Seconds,
        _capacity: i64,
        _rth: Option<Vec<Location>>,
    ) {
        self.interest_map = interest_map;
        self.unweighted_interest_map = unweighted_interest_map;
        self.vehicles = vehicles;
        self.budget = budget;
    }

    fn set_initial_schedule(&mut self, _schedule: Schedule) {}

    fn set_travel_time_matrix_path(&mut self, _path: &str) {}

    fn travel_time_matrix_path(&self) -> &str {
        ""
    }

    fn rth(&self) -> Option<&[Location]> {
        None
    }

    fn solve(&self) -> Result<Schedule> {
        let mut time_left: Option<Vec<Seconds>> = Some(vec![self.budget; self.vehicles.len()]);

        let mut im = self.interest_map.clone();
        let vehicles = self.vehicles.clone();
        let mut historical = Allocation::new();
        for id in self.interest_map.apps() {
            historical.set(id, 0.0);
        }

        let mut sched = Schedule::default();
        let mut fair_tasks: Set<Task> = Set::default();
        while let Some(budgets) = time_left {
            let mut problem = RoiProblem {
                interest_map: im,
                vehicles: vehicles.clone(),
                budgets,
                historical,
            };
            fair_tasks = self.compute_alpha_tasks(&mut problem)?;
            im = problem.interest_map;
            historical = problem.historical;

            let imf: InterestMap = fair_tasks.iter()
                .filter_map(|t| self.interest_map.get(t))
                .copied()
                .collect();
            sched = self.reorder_with_vrp(imf, self.budget)?;
            time_left = self.time_left(&sched.elapsed_time());
            debug!(fair_tasks = fair_tasks.len(), "roi iteration");
        }

        // pack the schedule with additional tasks
        return self.final_pack(&fair_tasks, sched);
    }
}
