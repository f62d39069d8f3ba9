//! Exhaustive enumeration of the frontier, for diagnostics and plotting.

use anyhow::Result;

use crate::vrp::Schedule;
use crate::Map;
use super::{create_candidate_face, extract_schedules, FrontierPoint, Mobius};

impl Mobius {
    /// Extend the hull along every candidate face and concatenate the
    /// resulting frontiers.
    fn extend_hull_trace(
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

        let mut frontier = Vec::new();
        for idx in 0..face.len() {
            let candidate = create_candidate_face(&fp, &face, idx);
            frontier.extend(self.extend_hull_trace(candidate, hull.clone())?);
        }
        return Ok(frontier);
    }

    /// Drop frontier points that share a weight-vector signature.
    fn clean_hull(&self, hull: Vec<FrontierPoint>) -> Vec<FrontierPoint> {
        let mut found: Map<String, FrontierPoint> = Map::default();
        for p in hull {
            let mut label = String::new();
            for id in &self.app_ids {
                label.push_str(&format!("{:.1} ", p.weights.get(id).copied().unwrap_or(0.0)));
            }
            found.insert(label, p);
        }
        found.into_iter().map(|(_, p)| p).collect()
    }

    /// Trace the convex hull of achievable allocations.
    pub fn trace_frontier(&mut self) -> Result<Vec<Schedule>> {
        let hull = self.init_hull()?;
        let frontier = self.extend_hull_trace(hull.clone(), hull)?;
        let frontier = self.clean_hull(frontier);
        return Ok(extract_schedules(frontier));
    }
}
