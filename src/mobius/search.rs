//! Directed descent toward the alpha-fair optimum.
//!
//! Each step extends the current face and, among the candidate faces formed
//! by swapping one vertex for the new point, recurses into the one whose
//! Lagrangian optimum falls inside its bounding box. When no candidate
//! contains the optimum the search stops and the best vertex wins.

use anyhow::Result;
use std::cmp::Ordering;
use tracing::*;

use crate::Map;
use crate::data::AppId;
use crate::vrp::Schedule;
use super::{create_candidate_face, geometry, FrontierPoint, Mobius};

impl Mobius {
    /// Multiplier on the face budget constraint at the utility optimum.
    fn lagrangian(&self, w: &Map<AppId, f64>, c: f64) -> f64 {
        let d: f64 = w.values().map(|&x| x.powf(1.0 - 1.0 / self.alpha)).sum();
        return (c / d).powf(-self.alpha);
    }

    /// Utility-maximizing allocation on the face's hyperplane, in `app_ids`
    /// order. `None` when the face has no usable equation.
    fn face_opt(&self, face: &[FrontierPoint]) -> Option<Vec<f64>> {
        let allocs: Vec<_> = face.iter().map(|f| &f.schedule.allocation).collect();
        let (c, weights) = match geometry::face_equation(&allocs, &self.app_ids, self.min_app_id) {
            Ok(x) => x,
            Err(e) => {
                debug!(%e, "error computing face equation");
                return None;
            }
        };
        let w = self.weight_map(&weights);
        let lambda = self.lagrangian(&w, c);

        let opt = self.app_ids.iter()
            .map(|id| (lambda * w[id]).powf(-1.0 / self.alpha))
            .collect();
        return Some(opt);
    }

    /// Does `opt` sit inside the face's componentwise bounding box?
    fn opt_in_face(&self, opt: &[f64], face: &[FrontierPoint]) -> bool {
        self.app_ids.iter().enumerate().all(|(i, &id)| {
            let (min, max) = face.iter()
                .map(|f| f.schedule.allocation.get(id))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), a| (lo.min(a), hi.max(a)));
            min <= opt[i] && opt[i] <= max
        })
    }

    fn eval_face(&self, face: &[FrontierPoint]) -> bool {
        match self.face_opt(face) {
            Some(opt) => self.opt_in_face(&opt, face),
            None => false,
        }
    }

    /// Extend the hull in the direction of the alpha-fair solution.
    fn extend_hull_search(
        &mut self,
        face: Vec<FrontierPoint>,
        mut hull: Vec<FrontierPoint>,
    ) -> Result<Vec<FrontierPoint>> {
        debug_assert!(face.len() >= self.app_ids.len());

        let fp = match self.find_extension(&face, &hull)? {
            None => return Ok(face),
            Some(fp) => fp,
        };
        hull.push(fp.clone());

        for idx in 0..face.len() {
            let candidate = create_candidate_face(&fp, &face, idx);
            if self.eval_face(&candidate) {
                debug!("**** considering face ****");
                for p in &candidate {
                    debug!(allocation = ?p.schedule.allocation, utility = p.utility);
                }
                debug!("**** end face ****");
                return self.extend_hull_search(candidate, hull);
            }
        }
        debug!("no intersecting face found");
        let mut face = face;
        face.push(fp);
        return Ok(face);
    }

    /// Search for the most alpha-fair schedule on the hull.
    ///
    /// A face kept from a previous invocation is reused after re-scoring its
    /// utilities against the current historical allocation.
    pub fn search_frontier(&mut self) -> Result<Schedule> {
        match self.last_face.take() {
            None => {
                let hull = self.init_hull()?;
                let face = self.extend_hull_search(hull.clone(), hull)?;
                debug_assert!(face.len() >= self.app_ids.len());
                self.last_face = Some(face);
            }
            Some(mut face) => {
                for fp in &mut face {
                    fp.utility = self.utility(&fp.schedule.allocation);
                }
                self.last_face = Some(face);
            }
        }

        // best solution on the face: (1) max utility, (2) max total interest
        let face = self.last_face.as_mut().expect("last_face was just set");
        face.sort_by(|a, b| {
            match b.utility.partial_cmp(&a.utility).unwrap_or(Ordering::Equal) {
                Ordering::Equal => b.schedule.allocation.total()
                    .partial_cmp(&a.schedule.allocation.total())
                    .unwrap_or(Ordering::Equal),
                ord => ord,
            }
        });

        debug!("**** sorted hull ****");
        for p in face.iter() {
            debug!(
                allocation = ?p.schedule.allocation,
                total = p.schedule.allocation.total(),
                utility = p.utility,
            );
        }
        debug!("**** end hull ****");

        return Ok(face[0].schedule.clone());
    }
}
