//! Plans driven by real child processes through `LocalExecutor`.
#![cfg(unix)]

use cloudboot::remote::{Backends, LocalExecutor, UnsupportedProvisioner};
use cloudboot::service::ServiceState;
use cloudboot::{CloudBoot, PlanDescriptor, PlanStatus, RunId, SchedulerConfig, SledPlanStore};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    format!("sh {}", path.display())
}

fn start(plan_toml: &str, run: &str, work: &Path) -> CloudBoot {
    let descriptor = PlanDescriptor::from_toml_str(plan_toml).unwrap();
    let backends = Backends::new(
        Box::new(UnsupportedProvisioner),
        Box::new(LocalExecutor::new(work)),
    );
    let mut boot = CloudBoot::from_config(
        &descriptor,
        Some(RunId::new(run).unwrap()),
        backends,
        Arc::new(SledPlanStore::temporary().unwrap()),
        SchedulerConfig::default(),
    )
    .unwrap();
    boot.start();
    boot
}

fn wait(boot: &mut CloudBoot) -> PlanStatus {
    for _ in 0..2000 {
        let status = boot.poll().unwrap();
        if status.is_terminal() {
            return status;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("scripts did not finish");
}

#[test]
fn outputs_of_level_zero_reach_level_one_through_files() {
    let temp = TempDir::new().unwrap();
    let work = temp.path().join("work");
    let boot_pgm = script(
        temp.path(),
        "boot.sh",
        r#"printf '{"webmessage": "hello::%s"}' "$CLOUDBOOT_HOST" > bootout.json"#,
    );
    let ready_pgm = script(temp.path(), "ready.sh", "grep -q webmessage bootconf.json");
    let client_pgm = script(temp.path(), "client.sh", "exit 0");

    let plan = format!(
        r#"
[[levels]]
[[levels.services]]
name = "web"
address = "127.0.0.1"
ready_program = "{ready}"
[levels.services.context]
program = "{boot}"

[[levels]]
[[levels.services]]
name = "client"
address = "127.0.0.2"
[levels.services.context]
program = "{client}"
values = {{ mode = "demo" }}
[levels.services.dependencies]
webmessage = "${{web.webmessage}}"
"#,
        ready = ready_pgm,
        boot = boot_pgm,
        client = client_pgm
    );
    let mut boot = start(&plan, "files", &work);
    assert_eq!(wait(&mut boot), PlanStatus::Complete);
    assert_eq!(
        boot.attribute("web", "webmessage").unwrap(),
        json!("hello::127.0.0.1")
    );

    let input_path = work.join("files/client/contextualize/bootconf.json");
    let input: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(input_path).unwrap()).unwrap();
    assert_eq!(input["webmessage"], json!("hello::127.0.0.1"));
    assert_eq!(input["mode"], json!("demo"));
}

#[test]
fn script_failures_become_service_errors() {
    let temp = TempDir::new().unwrap();
    let work = temp.path().join("work");
    let crash = script(temp.path(), "crash.sh", "echo 'disk full' >&2\nexit 4");
    let array = script(temp.path(), "array.sh", "echo '[1, 2]' > bootout.json");
    let plan = format!(
        r#"
[[levels]]
[[levels.services]]
name = "crash"
address = "127.0.0.1"
ready_program = "{crash}"
[[levels.services]]
name = "array"
address = "127.0.0.1"
[levels.services.context]
program = "{array}"
"#,
        crash = crash,
        array = array
    );
    let mut boot = start(&plan, "failures", &work);
    assert_eq!(wait(&mut boot), PlanStatus::Error);

    let crash = boot.get_service("crash").unwrap();
    assert_eq!(crash.state, ServiceState::Error);
    assert_eq!(
        crash.failure.unwrap().cause,
        "exit code 4: disk full".to_string()
    );
    let array = boot.get_service("array").unwrap();
    assert!(array.failure.unwrap().cause.contains("an array"));
}

#[test]
fn missing_program_fails_the_step() {
    let temp = TempDir::new().unwrap();
    let plan = r#"
[[levels]]
[[levels.services]]
name = "ghost"
address = "127.0.0.1"
ready_program = "/nonexistent/cloudboot-ready"
"#;
    let mut boot = start(plan, "ghost", &temp.path().join("work"));
    assert_eq!(wait(&mut boot), PlanStatus::Error);
    let failure = boot.get_service("ghost").unwrap().failure.unwrap();
    assert!(failure.cause.contains("failed to spawn"));
}
