//! End-to-end scenarios driven by the exact in-process oracle.

mod common;

use common::{task, vehicle, ExhaustiveSolver};
use mobius::app::ReplayApp;
use mobius::data::{from_file, Allocation, InterestMap, TaskData};
use mobius::mobius::{Mobius, Scheduler};
use mobius::vrp::{Schedule, Solver};

fn fresh_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("mobius_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn searcher(im: InterestMap, alpha: f64) -> Mobius {
    let mut solver = Box::new(ExhaustiveSolver::new());
    solver.set(im.clone(), im.clone(), vec![vehicle(0.0, 0.0)], 250, 0, None);
    Mobius::new(solver, im, vec![vehicle(0.0, 0.0)], 250, 0, alpha, 1.0)
}

/// One app, one vehicle, two reachable tasks: the search degenerates to a
/// single face and the whole interest is served.
#[test]
fn one_app_serves_everything() {
    let im: InterestMap = vec![
        task(0, 0.0002, 0.0, 5.0),
        task(0, 0.0004, 0.0, 3.0),
    ].into_iter().collect();

    let mut sp = searcher(im, 100.0);
    sp.init().unwrap();
    let sol = sp.search_frontier().unwrap();

    assert_eq!(sol.allocation.get(0), 8.0);
    assert_eq!(sol.routes[0].path.len(), 2);
}

/// Two symmetric apps, one vehicle that can only reach one task per round:
/// strong fairness alternates apps across rounds and both end up served.
#[test]
fn two_apps_alternate_across_rounds() {
    let apps: Vec<Box<dyn mobius::app::Application>> = vec![
        Box::new(ReplayApp::new(0, vec![task(0, 0.001, 0.0, 10.0)])),
        Box::new(ReplayApp::new(1, vec![task(1, -0.001, 0.0, 10.0)])),
    ];
    let oracle = ExhaustiveSolver::new();
    let mut s = Scheduler::new(apps, vec![vehicle(0.0, 0.0)], vec![vehicle(0.0, 0.0).location], Box::new(oracle));
    s.alpha = 100.0;
    s.discount = 1.0;
    s.horizon = 250;
    s.replan_sec = 250;
    s.rth_sec = 0;
    s.max_rounds = 10;
    s.run().unwrap();

    // trim counts one unit per served task; each app got its task
    assert_eq!(s.allocation().get(0), 1.0);
    assert_eq!(s.allocation().get(1), 1.0);
}

/// Asymmetric interest: max throughput starves app B, proportional fairness
/// brings B's task into the schedule at the cost of most of A's.
#[test]
fn asymmetric_apps_fairness_includes_minority() {
    // app 0: five cheap tasks in a line; app 1: one expensive task off-axis,
    // reachable together with at most one app-0 task
    let mut tasks: Vec<TaskData> = (1..=5)
        .map(|k| task(0, 0.00027 * k as f64, 0.0, 1.0))
        .collect();
    tasks.push(task(1, 0.0, 0.0015, 3.0));
    let im: InterestMap = tasks.into_iter().collect();

    // alpha = 0 is a single max-throughput solve
    let mut solver = Box::new(ExhaustiveSolver::new());
    solver.set(im.clone(), im.clone(), vec![vehicle(0.0, 0.0)], 250, 0, None);
    let maxthp = solver.solve().unwrap();
    assert_eq!(maxthp.allocation.get(0), 5.0);
    assert_eq!(maxthp.allocation.get(1), 0.0);

    // alpha = 1 trades app-0 tasks for app 1's
    let mut sp = searcher(im, 1.0);
    sp.init().unwrap();
    let sol = sp.search_frontier().unwrap();
    assert_eq!(sol.allocation.get(1), 3.0);
    assert!(sol.allocation.get(0) >= 1.0);
}

/// An app whose one-hot solve cannot serve anything is an invariant
/// violation, not a silent zero.
#[test]
fn unreachable_app_fails_loudly() {
    let im: InterestMap = vec![
        task(0, 0.0002, 0.0, 5.0),
        task(1, 0.0004, 0.0, 5.0),
        // far beyond the budget
        task(2, 0.5, 0.0, 5.0),
    ].into_iter().collect();

    let mut sp = searcher(im, 100.0);
    let err = sp.init().and_then(|_| sp.search_frontier()).unwrap_err();
    assert!(err.to_string().contains("nothing allocated"), "got: {:#}", err);
}

/// Return-to-home engages once the accumulated budget crosses the rth
/// period, and the home locations reach the oracle.
#[test]
fn rth_activates_on_schedule() {
    let apps: Vec<Box<dyn mobius::app::Application>> = vec![Box::new(ReplayApp::new(
        0,
        vec![task(0, 0.0005, 0.0, 1.0), task(0, 0.0010, 0.0, 1.0)],
    ))];
    let home = vehicle(0.0, 0.0).location;
    let oracle = ExhaustiveSolver::new();
    let rth_log = oracle.rth_log.clone();

    let mut s = Scheduler::new(apps, vec![vehicle(0.0, 0.0)], vec![home], Box::new(oracle));
    s.alpha = 0.0; // one oracle call per round
    s.horizon = 60;
    s.replan_sec = 60;
    s.rth_sec = 100;
    s.max_rounds = 5;
    s.run().unwrap();

    let log = rth_log.lock().unwrap();
    assert!(log.len() >= 2, "expected at least two rounds, saw {}", log.len());
    // round 0: budget 0 + horizon 60 < 100, no rth
    assert_eq!(log[0], None);
    // round 1: budget 60 + horizon 60 >= 100, vehicles sent home
    assert_eq!(log[1].as_deref(), Some(&[home][..]));
}

/// The cumulative allocation is exactly the sum of the per-round trimmed
/// allocations written to disk.
#[test]
fn rounds_accumulate() {
    let dir = fresh_dir("accumulate");
    let apps: Vec<Box<dyn mobius::app::Application>> = vec![
        Box::new(ReplayApp::new(0, vec![task(0, 0.0005, 0.0, 1.0), task(0, 0.0005, 0.0005, 1.0)])),
        Box::new(ReplayApp::new(1, vec![task(1, 0.0, 0.0005, 2.0)])),
    ];
    let mut s = Scheduler::new(
        apps,
        vec![vehicle(0.0, 0.0)],
        vec![vehicle(0.0, 0.0).location],
        Box::new(ExhaustiveSolver::new()),
    );
    s.alpha = 0.0;
    s.horizon = 70;
    s.replan_sec = 70;
    s.rth_sec = 0;
    s.max_rounds = 10;
    s.dir = Some(dir.clone());
    s.run().unwrap();

    let mut summed = Allocation::new();
    for round in 0.. {
        let path = dir.join(format!("schedule_round{:04}.json", round));
        if !path.exists() {
            break;
        }
        let snapshot: Schedule = from_file(&path).unwrap();
        for (&id, &a) in snapshot.allocation.iter() {
            summed.add(id, a);
        }
    }
    assert!(summed.total() > 0.0);
    assert_eq!(&summed, s.allocation());
}

/// Trace over three apps: every frontier point carries a distinct weight
/// signature.
#[test]
fn trace_signatures_are_distinct() {
    let im: InterestMap = vec![
        task(0, 0.001, 0.0, 1.0),
        task(1, 0.0, 0.001, 1.0),
        task(2, -0.001, 0.0, 1.0),
    ].into_iter().collect();

    let mut solver = Box::new(ExhaustiveSolver::new());
    solver.set(im.clone(), im.clone(), vec![vehicle(0.0, 0.0)], 220, 0, None);
    let mut sp = Mobius::new(solver, im, vec![vehicle(0.0, 0.0)], 220, 0, 2.0, 1.0);
    sp.init().unwrap();
    let hull = sp.trace_frontier().unwrap();

    assert!(hull.len() >= 3);
    let mut signatures: Vec<String> = hull.iter()
        .map(|s| {
            (0..3)
                .map(|id| format!("{:.1} ", s.stats.weights.get(&id).copied().unwrap_or(0.0)))
                .collect()
        })
        .collect();
    signatures.sort();
    let before = signatures.len();
    signatures.dedup();
    assert_eq!(signatures.len(), before, "duplicate weight signatures on the frontier");
}
