//! Core schemas shared by the scheduler and the routing adapters: locations,
//! tasks, interest maps, vehicles and per-application allocations.

use std::hash::{Hash, Hasher};
use std::iter::FromIterator;
use std::path::Path;
use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::Map;

pub type AppId = i32;
pub type Seconds = i64;

pub const INVALID_LOC: f64 = -1.0;

/// Position of a task or vehicle, in decimal degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Location { latitude, longitude }
    }

    /// The "no destination" marker carried by tasks without a dropoff leg.
    pub fn invalid() -> Self {
        Location { latitude: INVALID_LOC, longitude: INVALID_LOC }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        return self.latitude != INVALID_LOC && self.longitude != INVALID_LOC;
    }
}

// Coordinates are copied verbatim from configs and solver output, never
// recomputed, so bit-pattern identity is the right equality for map keys.
impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

/// Identity of a mobile task. Two tasks are the same iff all four fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub app_id: AppId,
    pub location: Location,
    pub destination: Location,
    pub request_time: Seconds,
}

/// A task plus its mutable per-round attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskData {
    pub app_id: AppId,
    pub location: Location,
    pub destination: Location,
    pub interest: f64,
    pub task_time_seconds: f64,
    pub request_time: Seconds,
    pub fulfill_time: Seconds,
}

impl TaskData {
    pub fn task(&self) -> Task {
        Task {
            app_id: self.app_id,
            location: self.location,
            destination: self.destination,
            request_time: self.request_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub location: Location,
    pub speed: f64,
}

/// Interest declared by applications, keyed by task identity.
#[derive(Debug, Clone, Default)]
pub struct InterestMap(Map<Task, TaskData>);

impl InterestMap {
    pub fn new() -> Self {
        InterestMap(Map::default())
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn insert(&mut self, data: TaskData) {
        self.0.insert(data.task(), data);
    }

    pub fn get(&self, task: &Task) -> Option<&TaskData> {
        self.0.get(task)
    }

    pub fn remove(&mut self, task: &Task) -> Option<TaskData> {
        self.0.remove(task)
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.0.contains_key(task)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Task, &TaskData)> {
        self.0.iter()
    }

    /// Distinct app ids present in the map, sorted ascending.
    pub fn apps(&self) -> Vec<AppId> {
        self.0.keys().map(|t| t.app_id).unique().sorted().collect_vec()
    }

    /// Entries as a deterministically ordered list, for serialization.
    pub fn to_list(&self) -> Vec<TaskData> {
        let mut list: Vec<TaskData> = self.0.values().copied().collect();
        list.sort_by(|a, b| {
            (a.app_id, a.request_time)
                .cmp(&(b.app_id, b.request_time))
                .then(a.location.latitude.partial_cmp(&b.location.latitude).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.location.longitude.partial_cmp(&b.location.longitude).unwrap_or(std::cmp::Ordering::Equal))
        });
        return list;
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.0.keys().copied().collect()
    }

    /// Scale each entry's interest by its app's weight.
    pub fn reweight(&self, w: &Map<AppId, f64>) -> InterestMap {
        let mut imw = InterestMap::new();
        for (task, data) in &self.0 {
            let mut data = *data;
            data.interest = w.get(&task.app_id).copied().unwrap_or(0.0) * data.interest;
            imw.0.insert(*task, data);
        }
        return imw;
    }

    pub fn filter_by_app(&self, id: AppId) -> InterestMap {
        let entries = self.0.iter()
            .filter(|(t, _)| t.app_id == id)
            .map(|(t, d)| (*t, *d))
            .collect();
        InterestMap(entries)
    }

    pub fn total_interest(&self) -> f64 {
        self.0.values().map(|d| d.interest).sum()
    }
}

impl FromIterator<TaskData> for InterestMap {
    fn from_iter<I: IntoIterator<Item = TaskData>>(iter: I) -> Self {
        let mut im = InterestMap::new();
        for data in iter {
            im.insert(data);
        }
        im
    }
}

impl IntoIterator for InterestMap {
    type Item = (Task, TaskData);
    type IntoIter = <Map<Task, TaskData> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Interest served per application over some interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation(Map<AppId, f64>);

impl Allocation {
    pub fn new() -> Self {
        Allocation(Map::default())
    }

    pub fn get(&self, id: AppId) -> f64 {
        self.0.get(&id).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, id: AppId, x: f64) {
        self.0.insert(id, x);
    }

    pub fn add(&mut self, id: AppId, x: f64) {
        *self.0.entry(id).or_insert(0.0) += x;
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AppId, &f64)> {
        self.0.iter()
    }

    pub fn apps(&self) -> Vec<AppId> {
        self.0.keys().copied().sorted().collect_vec()
    }
}

/// Read a JSON document from `path` into a typed value.
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("error opening file {}", path.display()))?;
    let x = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("error unmarshaling json from {}", path.display()))?;
    Ok(x)
}

/// Write a value to `path` as pretty-printed JSON.
pub fn to_file<T: Serialize>(path: impl AsRef<Path>, x: &T) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("error creating file {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), x)
        .with_context(|| format!("error marshaling json to {}", path.display()))?;
    Ok(())
}
