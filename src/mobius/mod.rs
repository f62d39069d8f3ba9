//! The alpha-fair allocation search.
//!
//! Given a routing adapter that maximizes a single weighted reward, this
//! module re-weights the interest map and re-invokes the adapter to walk the
//! convex hull of achievable per-app allocations: warm-start heuristics seed
//! a bank of schedules, `init_hull` builds the initial simplex from one-hot
//! solves, and `find_extension` pushes faces outward until no strictly
//! better schedule exists.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc;
use anyhow::{bail, Context, Result};
use tracing::*;

use crate::Map;
use crate::data::{Allocation, AppId, InterestMap, Seconds, Vehicle};
use crate::vrp::{DedicateSolver, RoiSolver, Schedule, Solver};

pub mod geometry;
mod search;
mod trace;
pub mod scheduler;

pub use scheduler::{Policy, Scheduler};

/// Floor applied to utility arguments so empty allocations stay finite.
pub(crate) const EPSILON: f64 = 0.1;

const ROI_ALPHAS: [f64; 5] = [0.1, 0.25, 1.0, 5.0, 100.0];

/// A schedule sitting on the frontier, with the weights that produced it.
#[derive(Debug, Clone)]
pub struct FrontierPoint {
    pub schedule: Schedule,
    pub utility: f64,
    pub weights: Map<AppId, f64>,
}

pub struct Mobius {
    pub interest_map: InterestMap,
    pub solver: Box<dyn Solver>,
    pub vehicles: Vec<Vehicle>,
    pub horizon: Seconds,
    pub capacity: i64,
    pub historical: Allocation,
    pub alpha: f64,
    pub discount: f64,
    pub dir: Option<PathBuf>,
    app_ids: Vec<AppId>,
    min_app_id: AppId,
    heuristics: Map<String, Schedule>,
    last_face: Option<Vec<FrontierPoint>>,
    frontier: Option<Mutex<csv::Writer<std::fs::File>>>,
}

impl Mobius {
    pub fn new(
        solver: Box<dyn Solver>,
        interest_map: InterestMap,
        vehicles: Vec<Vehicle>,
        horizon: Seconds,
        capacity: i64,
        alpha: f64,
        discount: f64,
    ) -> Self {
        Mobius {
            interest_map,
            solver,
            vehicles,
            horizon,
            capacity,
            historical: Allocation::new(),
            alpha,
            discount,
            dir: None,
            app_ids: Vec::new(),
            min_app_id: 0,
            heuristics: Map::default(),
            last_face: None,
            frontier: None,
        }
    }

    /// Prepare for a search: discover the apps, open the frontier log and
    /// populate the heuristic bank with warm-start schedules.
    pub fn init(&mut self) -> Result<()> {
        self.app_ids = self.interest_map.apps();
        if self.app_ids.is_empty() {
            bail!("found 0 apps; must have at least 1");
        }
        self.min_app_id = self.app_ids[0];

        if let Some(dir) = &self.dir {
            let path = dir.join("frontier.csv");
            let write_header = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("error opening {}", path.display()))?;
            let mut w = csv::Writer::from_writer(file);
            if write_header {
                let mut header = vec!["env".to_string(), "solver".to_string()];
                header.extend((1..=self.app_ids.len()).map(|i| format!("app{}", i)));
                w.write_record(&header)?;
                w.flush()?;
            }
            self.frontier = Some(Mutex::new(w));
        }

        self.heuristics.clear();
        self.warm_start()?;
        self.last_face = None;
        return Ok(());
    }

    fn csv_row(&self, solver: &str, alloc: &Allocation) -> Vec<String> {
        let env = self.dir.as_ref().map(|d| d.display().to_string()).unwrap_or_default();
        let mut row = vec![env, solver.to_string()];
        row.extend(self.app_ids.iter().map(|&id| format!("{:.2}", alloc.get(id))));
        return row;
    }

    fn log_frontier(&self, solver: &str, alloc: &Allocation) {
        if let Some(w) = &self.frontier {
            let mut w = w.lock().expect("frontier writer poisoned");
            if let Err(e) = w.write_record(self.csv_row(solver, alloc)) {
                warn!(%e, "error writing frontier row");
                return;
            }
            if let Err(e) = w.flush() {
                warn!(%e, "error flushing frontier log");
            }
        }
    }

    /// A configured private copy of the routing adapter.
    fn sub_solver(&self) -> Box<dyn Solver> {
        let mut s = self.solver.fresh();
        s.set_travel_time_matrix_path(self.solver.travel_time_matrix_path());
        s
    }

    /// Precompute schedules to bootstrap the solver. The solves are
    /// independent, so they run concurrently, each on its own adapter.
    fn warm_start(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel::<(String, Result<Schedule>)>();
        let this: &Mobius = self;

        rayon::scope(|sc| {
            // dedicate one vehicle group per app
            if this.vehicles.len() % this.app_ids.len() == 0 {
                let tx = tx.clone();
                sc.spawn(move |_| {
                    let mut d = DedicateSolver::new(this.sub_solver());
                    d.set_travel_time_matrix_path(this.solver.travel_time_matrix_path());
                    d.set(
                        this.interest_map.clone(),
                        this.interest_map.clone(),
                        this.vehicles.clone(),
                        this.horizon,
                        this.capacity,
                        this.solver.rth().map(<[_]>::to_vec),
                    );
                    tx.send(("dedicate".to_string(), d.solve())).ok();
                });
            }

            // max throughput (unit weights)
            {
                let tx = tx.clone();
                sc.spawn(move |_| {
                    let mut s = this.sub_solver();
                    s.set(
                        this.interest_map.clone(),
                        this.interest_map.clone(),
                        this.vehicles.clone(),
                        this.horizon,
                        this.capacity,
                        this.solver.rth().map(<[_]>::to_vec),
                    );
                    tx.send(("maxthp".to_string(), s.solve())).ok();
                });
            }

            // greedy roi sweeps; meaningless under rth or a fixed matrix
            if this.solver.rth().is_none() && this.solver.travel_time_matrix_path().is_empty() {
                for &alpha in &ROI_ALPHAS {
                    let tx = tx.clone();
                    sc.spawn(move |_| {
                        let mut solver = RoiSolver::new(alpha, this.sub_solver());
                        solver.set(
                            this.interest_map.clone(),
                            this.interest_map.clone(),
                            this.vehicles.clone(),
                            this.horizon,
                            0,
                            None,
                        );
                        tx.send((format!("roi_alpha{}", alpha), solver.solve())).ok();
                    });
                }
            }
        });
        drop(tx);

        for (label, result) in rx {
            let schedule = result.with_context(|| format!("warm start {} failed", label))?;
            debug!(
                label = label.as_str(),
                allocation = ?schedule.allocation,
                utility = self.utility(&schedule.allocation),
                "warm start",
            );
            self.log_frontier(&label, &schedule.allocation);
            self.heuristics.insert(label, schedule);
        }
        return Ok(());
    }

    /// Alpha-utility of an allocation on top of the discounted historical.
    pub fn utility(&self, a: &Allocation) -> f64 {
        let mut u = 0.0;
        for &id in &self.app_ids {
            let x = self.discount * self.historical.get(id) + a.get(id);
            let x = if x > 0.0 { x } else { EPSILON };
            u += if self.alpha == 1.0 {
                x.ln()
            } else {
                x.powf(1.0 - self.alpha) / (1.0 - self.alpha)
            };
        }
        return u;
    }

    /// Reweight the interest map and obtain a schedule from the oracle,
    /// warm-started from the bank.
    fn compute_schedule(&self, w: &Map<AppId, f64>) -> Result<(Schedule, f64)> {
        if w.len() != self.app_ids.len() {
            bail!(
                "cannot reweight interest map: {} weights, {} apps",
                w.len(),
                self.app_ids.len(),
            );
        }

        let imw = self.interest_map.reweight(w);
        let initial_schedule = self.choose_init_schedule(w);

        let mut solver = self.sub_solver();
        solver.set(
            imw,
            self.interest_map.clone(),
            self.vehicles.clone(),
            self.horizon,
            self.capacity,
            self.solver.rth().map(<[_]>::to_vec),
        );
        solver.set_initial_schedule(initial_schedule.clone());
        let mut schedule = solver.solve()?;

        // the oracle is authoritative, even when it loses to its warm start
        if weighted_reward(w, &schedule.allocation) < weighted_reward(w, &initial_schedule.allocation) {
            warn!(
                weights = ?w,
                init = ?initial_schedule.allocation,
                got = ?schedule.allocation,
                "schedule did not improve on warm start",
            );
        }
        debug!(
            weights = ?w,
            allocation = ?schedule.allocation,
            utility = self.utility(&schedule.allocation),
            "schedule computed",
        );

        self.log_frontier("vrp", &schedule.allocation);

        schedule.stats.weights = w.clone();
        schedule.stats.alpha = self.alpha;
        let utility = self.utility(&schedule.allocation);
        return Ok((schedule, utility));
    }

    /// Pick the banked schedule with the highest weighted reward.
    fn choose_init_schedule(&self, w: &Map<AppId, f64>) -> Schedule {
        let best = self.heuristics.values()
            .map(|h| (h, weighted_reward(w, &h.allocation)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some((schedule, _)) => {
                debug!(allocation = ?schedule.allocation, "chose init schedule");
                schedule.clone()
            }
            None => Schedule::default(),
        }
    }

    /// Seed the hull with one schedule per app, each solved with a one-hot
    /// weight vector. The solves are independent and run concurrently.
    pub(crate) fn init_hull(&self) -> Result<Vec<FrontierPoint>> {
        let (tx, rx) = mpsc::channel::<Result<FrontierPoint>>();
        let this: &Mobius = self;

        rayon::scope(|sc| {
            for &id in &this.app_ids {
                let tx = tx.clone();
                sc.spawn(move |_| {
                    let mut weights = Map::default();
                    for &other in &this.app_ids {
                        weights.insert(other, if other == id { 1.0 } else { 0.0 });
                    }
                    let fp = this.compute_schedule(&weights).and_then(|(schedule, utility)| {
                        if schedule.allocation.get(id) == 0.0 {
                            bail!("app {}, nothing allocated by its own dedicated solve", id);
                        }
                        Ok(FrontierPoint { schedule, utility, weights })
                    });
                    tx.send(fp).ok();
                });
            }
        });
        drop(tx);

        let mut hull = Vec::with_capacity(self.app_ids.len());
        for fp in rx {
            hull.push(fp?);
        }
        return Ok(hull);
    }

    pub(crate) fn weight_map(&self, weights: &[f64]) -> Map<AppId, f64> {
        self.app_ids.iter().zip(weights).map(|(&id, &w)| (id, w)).collect()
    }

    /// Tag used to index bank entries by their weight vector.
    fn weight_tag(&self, w: &Map<AppId, f64>) -> String {
        let mut tag = String::new();
        for id in &self.app_ids {
            tag.push_str(&format!("{:.2}_", w.get(id).copied().unwrap_or(0.0)));
        }
        return tag;
    }

    /// Look for a schedule strictly beyond the face's hyperplane.
    ///
    /// `Ok(None)` means the face is terminal: its equation is degenerate,
    /// its weights point out of the nonnegative orthant, or the oracle found
    /// nothing new. Oracle failures are errors.
    pub(crate) fn find_extension(
        &mut self,
        face: &[FrontierPoint],
        hull: &[FrontierPoint],
    ) -> Result<Option<FrontierPoint>> {
        let allocs: Vec<&Allocation> = face.iter().map(|f| &f.schedule.allocation).collect();
        let (c, weights) = match geometry::face_equation(&allocs, &self.app_ids, self.min_app_id) {
            Ok(x) => x,
            Err(e) => {
                warn!(%e, "no extension found");
                for f in face {
                    warn!(weights = ?f.weights, allocation = ?f.schedule.allocation);
                }
                return Ok(None);
            }
        };
        if !geometry::valid_weights(&weights) {
            warn!(?weights, "no extension found (invalid weights)");
            return Ok(None);
        }

        let w = self.weight_map(&weights);
        let (schedule, utility) = self.compute_schedule(&w)?;

        let wr = weighted_reward(&w, &schedule.allocation);
        if wr >= c && !contains(hull, &schedule.allocation) {
            self.heuristics.insert(format!("weight_{}", self.weight_tag(&w)), schedule.clone());
            return Ok(Some(FrontierPoint { schedule, utility, weights: w }));
        }
        debug!(wr, c, "no extension found: no better schedule");
        return Ok(None);
    }

    #[cfg(test)]
    pub(crate) fn bank_len(&self) -> usize {
        self.heuristics.len()
    }
}

/// Reward of an allocation under a per-app weight vector.
pub(crate) fn weighted_reward(w: &Map<AppId, f64>, allocation: &Allocation) -> f64 {
    allocation.iter()
        .map(|(id, a)| w.get(id).copied().unwrap_or(0.0) * a)
        .sum()
}

/// Componentwise check whether the hull already holds this allocation.
fn contains(hull: &[FrontierPoint], allocation: &Allocation) -> bool {
    hull.iter().any(|p| {
        p.schedule.allocation.iter().all(|(&id, &a)| allocation.get(id) == a)
    })
}

fn extract_schedules(hull: Vec<FrontierPoint>) -> Vec<Schedule> {
    hull.into_iter().map(|p| p.schedule).collect()
}

/// New face with `fp` first and the `exclude_idx`-th point dropped.
fn create_candidate_face(fp: &FrontierPoint, face: &[FrontierPoint], exclude_idx: usize) -> Vec<FrontierPoint> {
    let mut x = Vec::with_capacity(face.len());
    x.push(fp.clone());
    for (i, p) in face.iter().enumerate() {
        if i != exclude_idx {
            x.push(p.clone());
        }
    }
    return x;
}
