//! Reloading runs from a sled-backed plan store.

use super::support::{drive, exit, ok, run_id, World};
use cloudboot::error::FailedStep;
use cloudboot::remote::{InstanceId, ScriptStep};
use cloudboot::service::{ServiceState, ShutdownState};
use cloudboot::store::PlanStore;
use cloudboot::{
    BootError, CloudBoot, PlanDescriptor, PlanStatus, SchedulerConfig, SledPlanStore, StorageError,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const PLAN: &str = r#"
[[levels]]
[[levels.services]]
name = "webserver"
image = "ami-web"
ready_program = "checkweb"
[levels.services.context]
program = "bootpgm"

[[levels]]
[[levels.services]]
name = "webclient"
image = "ami-client"
[levels.services.context]
program = "clientpgm"
[levels.services.dependencies]
webmessage = "${webserver.webmessage}"
"#;

fn open_store(temp: &TempDir) -> Arc<SledPlanStore> {
    Arc::new(SledPlanStore::open(&temp.path().join("plans.db")).unwrap())
}

fn create(name: &str, world: &World, store: Arc<SledPlanStore>) -> CloudBoot {
    let descriptor = PlanDescriptor::from_toml_str(PLAN).unwrap();
    CloudBoot::from_config(
        &descriptor,
        Some(run_id(name)),
        world.backends(),
        store,
        SchedulerConfig::default(),
    )
    .unwrap()
}

fn reload(name: &str, world: &World, store: Arc<SledPlanStore>) -> CloudBoot {
    CloudBoot::from_store(
        &run_id(name),
        world.backends(),
        store,
        SchedulerConfig::default().with_hooks(world.hooks()),
    )
    .unwrap()
}

#[test]
fn reloaded_failed_run_restarts_without_reprovisioning_ready_services() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);

    let first = World::new();
    first.reply(
        "webserver",
        ScriptStep::Contextualize,
        ok(Some(r#"{"webmessage": "hello::42"}"#)),
    );
    first.reply("webclient", ScriptStep::Contextualize, exit(2, "agent down"));
    {
        let mut plan = create("reload", &first, store.clone());
        plan.start();
        assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Error);
    }

    let second = World::new();
    let mut plan = reload("reload", &second, store.clone());
    assert_eq!(plan.status(), PlanStatus::Error);
    assert_eq!(plan.attribute("webserver", "webmessage").unwrap(), json!("hello::42"));
    let client = plan.get_service("webclient").unwrap();
    assert_eq!(client.failure.unwrap().step, FailedStep::Contextualizing);
    assert_eq!(client.host.as_deref(), Some("i-webclient-2.internal"));

    plan.restart_service("webclient").unwrap();
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);

    // the first start in this process re-verifies level 0 only
    assert_eq!(second.total_launches(), 0);
    assert_eq!(second.requests("webserver", ScriptStep::ReadyCheck).len(), 1);
    assert!(second.requests("webserver", ScriptStep::Contextualize).is_empty());
    let retried = second.requests("webclient", ScriptStep::Contextualize);
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].input["webmessage"], json!("hello::42"));

    let stored = store.load(&run_id("reload")).unwrap().unwrap();
    assert_eq!(stored.status, PlanStatus::Complete);
}

#[test]
fn in_flight_state_reloads_as_interrupted_error() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);

    let first = World::new();
    first.set_launch_delay(10);
    {
        let mut plan = create("interrupted", &first, store.clone());
        plan.start();
        assert_eq!(plan.poll().unwrap(), PlanStatus::Active);
        assert_eq!(
            plan.get_service("webserver").unwrap().state,
            ServiceState::Provisioning
        );
        // a crash after an out-of-band commit of the in-flight state
        store.commit(&plan.snapshot()).unwrap();
    }

    let second = World::new();
    second.reply(
        "webserver",
        ScriptStep::Contextualize,
        ok(Some(r#"{"webmessage": "again"}"#)),
    );
    let mut plan = reload("interrupted", &second, store.clone());
    let web = plan.get_service("webserver").unwrap();
    assert_eq!(web.state, ServiceState::Error);
    let failure = web.failure.unwrap();
    assert_eq!(failure.step, FailedStep::Provisioning);
    assert_eq!(failure.cause, "interrupted");

    // without a restart the level resolves failed straight away
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Error);

    plan.restart_service("webserver").unwrap();
    assert_eq!(
        second.terminated(),
        vec![InstanceId("i-webserver-1".to_string())]
    );
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);
    assert_eq!(second.launches_of("webserver"), 1);
}

#[test]
fn interrupted_shutdown_reloads_as_failed_shutdown() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let world = World::new();
    world.reply(
        "webserver",
        ScriptStep::Contextualize,
        ok(Some(r#"{"webmessage": "x"}"#)),
    );
    {
        let mut plan = create("half-down", &world, store.clone());
        plan.start();
        assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);
        let mut snapshot = plan.snapshot();
        snapshot.levels[1][0].shutdown = ShutdownState::ShuttingDown;
        store.commit(&snapshot).unwrap();
    }

    let plan = reload("half-down", &World::new(), store);
    let client = plan.get_service("webclient").unwrap();
    assert_eq!(client.state, ServiceState::Ready);
    assert_eq!(client.shutdown, ShutdownState::Failed);
    assert_eq!(client.shutdown_failure.as_deref(), Some("interrupted"));
}

#[test]
fn pending_run_is_reloadable_before_any_level_resolves() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    drop(create("fresh", &World::new(), store.clone()));

    let world = World::new();
    world.reply(
        "webserver",
        ScriptStep::Contextualize,
        ok(Some(r#"{"webmessage": "late"}"#)),
    );
    let mut plan = reload("fresh", &world, store);
    assert_eq!(plan.status(), PlanStatus::Pending);
    assert!(plan
        .get_services()
        .iter()
        .flatten()
        .all(|v| v.state == ServiceState::NotStarted));
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);
}

#[test]
fn list_runs_summarizes_each_stored_run() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);

    let good = World::new();
    good.reply(
        "webserver",
        ScriptStep::Contextualize,
        ok(Some(r#"{"webmessage": "ok"}"#)),
    );
    let mut plan = create("good", &good, store.clone());
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Complete);

    let bad = World::new();
    bad.fail_launches("webserver", 1);
    let mut plan = create("bad", &bad, store.clone());
    plan.start();
    assert_eq!(drive(&mut plan).unwrap(), PlanStatus::Error);

    let runs = store.list_runs().unwrap();
    assert_eq!(runs.len(), 2);
    let bad_summary = runs.iter().find(|r| r.run_id.as_str() == "bad").unwrap();
    assert_eq!(bad_summary.status, PlanStatus::Error);
    assert_eq!(bad_summary.failed, 1);
    assert_eq!(bad_summary.services, 2);
    let good_summary = runs.iter().find(|r| r.run_id.as_str() == "good").unwrap();
    assert_eq!(good_summary.failed, 0);
    assert_eq!(good_summary.levels, 2);
}

#[test]
fn unknown_and_corrupt_runs_are_reported() {
    let temp = TempDir::new().unwrap();
    let db = sled::open(temp.path().join("plans.db")).unwrap();
    db.open_tree("plans")
        .unwrap()
        .insert("garbled", b"not json".to_vec())
        .unwrap();
    let store = Arc::new(SledPlanStore::new(db).unwrap());
    let world = World::new();

    let missing = CloudBoot::from_store(
        &run_id("nope"),
        world.backends(),
        store.clone(),
        SchedulerConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(missing, BootError::Usage(_)));

    let corrupt = CloudBoot::from_store(
        &run_id("garbled"),
        world.backends(),
        store,
        SchedulerConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(
        corrupt,
        BootError::Storage(StorageError::CorruptRecord { .. })
    ));
}
