//! Level ordering under random topologies, delays and failures.

use cloudboot::error::{RemoteError, StorageError};
use cloudboot::level::LevelStatus;
use cloudboot::plan::{LevelSpec, PlanDescriptor, ProvisionTarget, ServiceSpec};
use cloudboot::remote::{
    Backends, Progress, ScriptExecutor, ScriptOutcome, ScriptRequest, TaskId,
    UnsupportedProvisioner,
};
use cloudboot::service::ServiceState;
use cloudboot::store::{PlanSnapshot, PlanStore, RunSummary};
use cloudboot::{CloudBoot, PlanStatus, RunId, SchedulerConfig, ServiceName};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Per service: polls before the readiness check finishes, and whether it fails.
type Behaviour = (usize, bool);

struct DelayedChecks {
    behaviour: HashMap<String, Behaviour>,
    next: u64,
    tasks: HashMap<u64, (String, usize)>,
}

impl ScriptExecutor for DelayedChecks {
    fn spawn(&mut self, request: ScriptRequest) -> Result<TaskId, RemoteError> {
        self.next += 1;
        let service = request.service.to_string();
        let (delay, _) = self.behaviour.get(&service).copied().unwrap_or((0, false));
        self.tasks.insert(self.next, (service, delay));
        Ok(TaskId(self.next))
    }

    fn poll(&mut self, task: TaskId) -> Result<Progress<ScriptOutcome>, RemoteError> {
        let (service, left) = self
            .tasks
            .get_mut(&task.0)
            .ok_or_else(|| RemoteError::new("unknown task"))?;
        if *left > 0 {
            *left -= 1;
            return Ok(Progress::Pending);
        }
        let fails = self.behaviour.get(service.as_str()).map_or(false, |b| b.1);
        self.tasks.remove(&task.0);
        Ok(Progress::Done(ScriptOutcome {
            exit_code: Some(if fails { 1 } else { 0 }),
            output: None,
            stderr: String::new(),
        }))
    }
}

#[derive(Default)]
struct MemoryStore {
    plans: Mutex<HashMap<String, PlanSnapshot>>,
}

impl PlanStore for MemoryStore {
    fn load(&self, run_id: &RunId) -> Result<Option<PlanSnapshot>, StorageError> {
        Ok(self.plans.lock().get(run_id.as_str()).cloned())
    }

    fn commit(&self, snapshot: &PlanSnapshot) -> Result<(), StorageError> {
        self.plans
            .lock()
            .insert(snapshot.run_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        Ok(self.plans.lock().values().map(PlanSnapshot::summary).collect())
    }
}

fn build(levels: &[Vec<Behaviour>]) -> CloudBoot {
    let mut descriptor = PlanDescriptor::default();
    let mut behaviour = HashMap::new();
    for (i, level) in levels.iter().enumerate() {
        let mut spec_level = LevelSpec::default();
        for (j, b) in level.iter().enumerate() {
            let name = format!("l{}s{}", i, j);
            let mut spec = ServiceSpec::new(
                ServiceName::new(name.clone()).unwrap(),
                ProvisionTarget::Address {
                    host: format!("10.{}.{}.1", i, j),
                },
            );
            spec.ready_program = Some("check".to_string());
            spec_level.services.push(spec);
            behaviour.insert(name, *b);
        }
        descriptor.levels.push(spec_level);
    }
    let executor = DelayedChecks {
        behaviour,
        next: 0,
        tasks: HashMap::new(),
    };
    CloudBoot::from_config(
        &descriptor,
        Some(RunId::new("prop").unwrap()),
        Backends::new(Box::new(UnsupportedProvisioner), Box::new(executor)),
        Arc::new(MemoryStore::default()),
        SchedulerConfig::default(),
    )
    .unwrap()
}

fn level_touched(boot: &CloudBoot, index: usize) -> bool {
    boot.get_level(index)
        .unwrap()
        .iter()
        .any(|view| view.state != ServiceState::NotStarted)
}

fn topology() -> impl Strategy<Value = Vec<Vec<Behaviour>>> {
    prop::collection::vec(
        prop::collection::vec((0usize..4, prop::bool::weighted(0.15)), 1..4),
        1..5,
    )
}

#[test]
fn later_levels_wait_for_earlier_levels() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&topology(), |levels| {
            let mut boot = build(&levels);
            boot.start();
            let mut status = PlanStatus::Active;
            for _ in 0..200 {
                status = boot.poll().unwrap();
                for index in 1..levels.len() {
                    if level_touched(&boot, index) {
                        prop_assert_eq!(
                            boot.level_status(index - 1),
                            Some(LevelStatus::Complete)
                        );
                    }
                }
                if status.is_terminal() {
                    break;
                }
            }
            prop_assert!(status.is_terminal());

            let first_failing = levels.iter().position(|level| level.iter().any(|b| b.1));
            match first_failing {
                None => prop_assert_eq!(status, PlanStatus::Complete),
                Some(failing) => {
                    prop_assert_eq!(status, PlanStatus::Error);
                    prop_assert_eq!(boot.level_status(failing), Some(LevelStatus::Error));
                    let failed: usize = boot.error_status().iter().map(Vec::len).sum();
                    let expected = levels[failing].iter().filter(|b| b.1).count();
                    prop_assert_eq!(failed, expected);
                    for later in failing + 1..levels.len() {
                        prop_assert!(!level_touched(&boot, later));
                    }
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn level_status_is_independent_of_member_order() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &prop::collection::vec((0usize..3, prop::bool::weighted(0.3)), 1..6),
            |members| {
                let mut reversed = members.clone();
                reversed.reverse();
                let mut forward = build(&[members]);
                let mut backward = build(&[reversed]);
                forward.start();
                backward.start();
                let mut a = PlanStatus::Active;
                let mut b = PlanStatus::Active;
                for _ in 0..50 {
                    a = forward.poll().unwrap();
                    b = backward.poll().unwrap();
                }
                prop_assert_eq!(a, b);
                prop_assert_eq!(forward.level_status(0), backward.level_status(0));
                Ok(())
            },
        )
        .unwrap();
}
