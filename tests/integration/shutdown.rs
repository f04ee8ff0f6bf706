//! Plan-wide and per-service shutdown.

use super::support::{drive, exit, ok, run_id, RecordingStore, World};
use cloudboot::level::LevelStatus;
use cloudboot::remote::{InstanceId, ScriptStep};
use cloudboot::service::{ServiceState, ShutdownState};
use cloudboot::store::PlanStore;
use cloudboot::{BootError, CloudBoot, PlanDescriptor, PlanStatus, SchedulerConfig};
use std::sync::Arc;

const PLAN: &str = r#"
[[levels]]
[[levels.services]]
name = "db"
image = "ami-db"
shutdown_program = "stopdb"

[[levels]]
[[levels.services]]
name = "web"
image = "ami-web"
[[levels.services]]
name = "legacy"
address = "192.168.0.7"
shutdown_program = "stoplegacy"
"#;

fn booted(name: &str, world: &World, store: Arc<RecordingStore>) -> CloudBoot {
    let descriptor = PlanDescriptor::from_toml_str(PLAN).unwrap();
    let mut plan = CloudBoot::from_config(
        &descriptor,
        Some(run_id(name)),
        world.backends(),
        store,
        SchedulerConfig::default(),
    )
    .unwrap();
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);
    plan
}

fn shut_down(plan: &mut CloudBoot) {
    for _ in 0..50 {
        if plan.poll_shutdown().unwrap() {
            return;
        }
    }
    panic!("shutdown did not finish");
}

#[test]
fn shutdown_walks_levels_in_reverse() {
    let world = World::new();
    let store = RecordingStore::new();
    let mut plan = booted("down", &world, store.clone());

    plan.shutdown(false).unwrap();
    shut_down(&mut plan);

    let web_down = world.position("terminate:i-web-2").unwrap();
    let legacy_stop = world.position("spawn:legacy:shutdown").unwrap();
    let db_stop = world.position("spawn:db:shutdown").unwrap();
    let db_down = world.position("terminate:i-db-1").unwrap();
    assert!(web_down < db_stop);
    assert!(legacy_stop < db_stop);
    assert!(db_stop < db_down);

    for view in plan.get_services().iter().flatten() {
        assert_eq!(view.shutdown, ShutdownState::Terminated, "{}", view.name);
        // lifecycle state is kept for reporting
        assert_eq!(view.state, ServiceState::Ready);
    }

    let stored = store.load(&run_id("down")).unwrap().unwrap();
    assert!(stored
        .levels
        .iter()
        .flatten()
        .all(|record| record.shutdown == ShutdownState::Terminated));
    assert_eq!(store.commits().len(), 4);
}

#[test]
fn forced_shutdown_skips_shutdown_programs() {
    let world = World::new();
    let mut plan = booted("forced", &world, RecordingStore::new());

    plan.shutdown(true).unwrap();
    shut_down(&mut plan);

    assert!(world.requests("db", ScriptStep::Shutdown).is_empty());
    assert!(world.requests("legacy", ScriptStep::Shutdown).is_empty());
    assert_eq!(
        world.terminated(),
        vec![
            InstanceId("i-web-2".to_string()),
            InstanceId("i-db-1".to_string())
        ]
    );
}

#[test]
fn failed_shutdown_program_is_recorded_and_retryable() {
    let world = World::new();
    world.reply("legacy", ScriptStep::Shutdown, exit(1, "still serving"));
    let mut plan = booted("stubborn", &world, RecordingStore::new());

    plan.shutdown(false).unwrap();
    shut_down(&mut plan);

    let legacy = plan.get_service("legacy").unwrap();
    assert_eq!(legacy.shutdown, ShutdownState::Failed);
    assert!(legacy
        .shutdown_failure
        .as_deref()
        .unwrap()
        .contains("still serving"));
    assert_eq!(
        plan.get_service("db").unwrap().shutdown,
        ShutdownState::Terminated
    );

    // a second plan shutdown only revisits what is not terminated
    plan.shutdown(false).unwrap();
    shut_down(&mut plan);
    assert_eq!(
        plan.get_service("legacy").unwrap().shutdown,
        ShutdownState::Terminated
    );
    assert_eq!(world.requests("db", ScriptStep::Shutdown).len(), 1);
}

#[test]
fn shutdown_is_refused_while_services_are_in_flight() {
    let world = World::new();
    world.set_launch_delay(5);
    let descriptor = PlanDescriptor::from_toml_str(PLAN).unwrap();
    let mut plan = CloudBoot::from_config(
        &descriptor,
        Some(run_id("busy")),
        world.backends(),
        RecordingStore::new(),
        SchedulerConfig::default(),
    )
    .unwrap();
    plan.start();
    plan.poll().unwrap();

    assert!(matches!(plan.shutdown(false), Err(BootError::Usage(_))));
    assert!(matches!(plan.poll_shutdown(), Err(BootError::Usage(_))));
}

#[test]
fn second_shutdown_request_is_refused_while_one_runs() {
    let world = World::new();
    world.reply("db", ScriptStep::Shutdown, ok(None));
    let mut plan = booted("busy-down", &world, RecordingStore::new());
    // a completed plan keeps answering polls until a shutdown begins
    assert_eq!(plan.poll().unwrap(), PlanStatus::Complete);
    plan.shutdown(false).unwrap();
    assert!(matches!(plan.shutdown(false), Err(BootError::Usage(_))));
    shut_down(&mut plan);
}

#[test]
fn single_service_shutdown_and_poll() {
    let world = World::new();
    let mut plan = booted("one", &world, RecordingStore::new());

    plan.shutdown_service("legacy", false).unwrap();
    assert_eq!(
        plan.poll_service_shutdown("legacy").unwrap(),
        ShutdownState::Terminated
    );
    // other services are untouched
    assert_eq!(
        plan.get_service("web").unwrap().shutdown,
        ShutdownState::Active
    );
    // a terminated service cannot be restarted
    assert!(matches!(
        plan.restart_service("legacy"),
        Err(BootError::Usage(_))
    ));
    assert!(matches!(
        plan.shutdown_service("ghost", false),
        Err(BootError::Usage(_))
    ));
}

#[test]
fn shutdown_between_levels_stops_the_plan_from_booting_further() {
    let world = World::new();
    let store = RecordingStore::new();
    let descriptor = PlanDescriptor::from_toml_str(PLAN).unwrap();
    let mut plan = CloudBoot::from_config(
        &descriptor,
        Some(run_id("halfway")),
        world.backends(),
        store.clone(),
        SchedulerConfig::default(),
    )
    .unwrap();
    plan.start();
    while plan.level_status(0) != Some(LevelStatus::Complete) {
        assert_eq!(plan.poll().unwrap(), PlanStatus::Active);
    }
    assert_eq!(
        plan.get_service("web").unwrap().state,
        ServiceState::NotStarted
    );

    plan.shutdown(false).unwrap();
    shut_down(&mut plan);
    assert_eq!(
        plan.get_service("db").unwrap().shutdown,
        ShutdownState::Terminated
    );

    assert!(matches!(plan.poll(), Err(BootError::Usage(_))));
    assert_eq!(plan.status(), PlanStatus::Active);

    // the stored run refuses to boot the remaining level as well
    let mut reloaded = CloudBoot::from_store(
        &run_id("halfway"),
        world.backends(),
        store,
        SchedulerConfig::default(),
    )
    .unwrap();
    reloaded.start();
    assert!(matches!(reloaded.poll(), Err(BootError::Usage(_))));

    assert_eq!(world.launches_of("web"), 0);
    assert_eq!(
        reloaded.get_service("web").unwrap().state,
        ServiceState::NotStarted
    );
}
