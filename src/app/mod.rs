//! Application plugins: the producers of interest.
//!
//! The scheduler only ever sees the trait below; what a task *means* is the
//! plugin's business. A JSON-replay plugin is provided so whole experiments
//! can be driven from task files.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::Map;
use crate::data::{AppId, InterestMap, Seconds, Task, TaskData};

pub trait Application: Send {
    fn id(&self) -> AppId;

    /// The app's current interest. Called at every round boundary.
    fn interest_map(&self) -> InterestMap;

    /// Receive the tasks fulfilled on the app's behalf, with absolute
    /// fulfill times, and the new experiment time.
    fn update(&mut self, completed: &[TaskData], time: Seconds);
}

/// Union of the apps' maps. App ids differ across apps, so task identities
/// never collide; last writer wins if they ever do.
pub fn merge_interest_maps(ims: Vec<InterestMap>) -> InterestMap {
    let mut im = InterestMap::new();
    for x in ims {
        for (_, data) in x.iter() {
            im.insert(*data);
        }
    }
    return im;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_id: AppId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Build an application from its config file contents.
pub fn create_app(cfg: AppConfig) -> Result<Box<dyn Application>> {
    match cfg.kind.as_str() {
        "replay" => Ok(Box::new(ReplayApp::from_config(cfg)?)),
        kind => bail!("app type {} not supported", kind),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayConfig {
    tasks: Vec<TaskData>,
}

/// Replays a canned task list: a task becomes interesting once its request
/// time passes and disappears when fulfilled.
pub struct ReplayApp {
    id: AppId,
    tasks: Map<Task, TaskData>,
    now: Seconds,
}

impl ReplayApp {
    pub fn from_config(cfg: AppConfig) -> Result<Self> {
        let replay: ReplayConfig = serde_json::from_value(cfg.config)?;
        Ok(Self::new(cfg.app_id, replay.tasks))
    }

    pub fn new(id: AppId, tasks: Vec<TaskData>) -> Self {
        let tasks = tasks.into_iter()
            .map(|mut t| {
                t.app_id = id;
                (t.task(), t)
            })
            .collect();
        ReplayApp { id, tasks, now: 0 }
    }
}

impl Application for ReplayApp {
    fn id(&self) -> AppId {
        self.id
    }

    fn interest_map(&self) -> InterestMap {
        self.tasks.values()
            .filter(|t| t.request_time <= self.now)
            .copied()
            .collect()
    }

    fn update(&mut self, completed: &[TaskData], time: Seconds) {
        for t in completed {
            self.tasks.remove(&t.task());
        }
        self.now = time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Location;

    fn td(app_id: AppId, lat: f64, request_time: Seconds) -> TaskData {
        TaskData {
            app_id,
            location: Location::new(lat, 0.0),
            destination: Location::new(lat, 1.0),
            interest: 1.0,
            task_time_seconds: 5.0,
            request_time,
            fulfill_time: 0,
        }
    }

    #[test]
    fn replay_releases_by_request_time() {
        let mut app = ReplayApp::new(0, vec![td(0, 1.0, 0), td(0, 2.0, 500)]);
        assert_eq!(app.interest_map().len(), 1);

        app.update(&[], 600);
        assert_eq!(app.interest_map().len(), 2);
    }

    #[test]
    fn replay_retires_fulfilled_tasks() {
        let t = td(0, 1.0, 0);
        let mut app = ReplayApp::new(0, vec![t, td(0, 2.0, 0)]);
        let mut done = t;
        done.fulfill_time = 120;
        app.update(&[done], 360);
        let im = app.interest_map();
        assert_eq!(im.len(), 1);
        assert!(!im.contains(&t.task()));
    }

    #[test]
    fn merge_is_a_union() {
        let a: InterestMap = vec![td(0, 1.0, 0)].into_iter().collect();
        let b: InterestMap = vec![td(1, 1.0, 0), td(1, 2.0, 0)].into_iter().collect();
        let im = merge_interest_maps(vec![a, b]);
        assert_eq!(im.len(), 3);
        assert_eq!(im.apps(), vec![0, 1]);
    }
}
