//! Runner behavior against the in-memory engine.

mod common;

use std::time::Duration;

use common::{observed_from, FakeEngine};
use stevedore::diff::{diff, DiffOptions};
use stevedore::engine::EngineClient;
use stevedore::name::{ContainerName, ImageName};
use stevedore::pod::{ContainerSpec, ObservedState};
use stevedore::runner::{RunContext, Runner};
use stevedore::Error;
use tokio_util::sync::CancellationToken;

fn name(n: &str) -> ContainerName {
    ContainerName::new("test", n)
}

fn spec(n: &str, image: &str) -> ContainerSpec {
    ContainerSpec::new(name(n), ImageName::parse(image).unwrap())
}

fn ctx(dry_run: bool) -> RunContext {
    RunContext {
        namespace: "test".to_string(),
        manifest_hash: "manifest-digest".to_string(),
        dry_run,
    }
}

#[tokio::test]
async fn creates_and_starts_in_plan_order() {
    let db = spec("db", "postgres:16");
    let mut web = spec("web", "myapp:1");
    web.volumes_from.push(name("db"));

    let plan = diff(&[web, db], &[], &DiffOptions::default()).unwrap();
    let engine = FakeEngine::new();
    let report = Runner::new(&engine)
        .run(&plan, &ctx(false))
        .await
        .unwrap();

    assert_eq!(
        engine.events(),
        vec![
            "pull postgres:16",
            "create test.db",
            "start test.db",
            "pull myapp:1",
            "create test.web",
            "start test.web",
        ]
    );
    assert!(report.changed_anything());
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let plan = diff(&[spec("a", "img:1")], &[], &DiffOptions::default()).unwrap();
    let engine = FakeEngine::new();
    let report = Runner::new(&engine).run(&plan, &ctx(true)).await.unwrap();

    assert!(engine.events().is_empty());
    // The prediction still reports the would-be changes.
    assert!(report.changed_anything());
    assert_eq!(report.actions.len(), plan.len());
    assert!(report.dry_run);
}

#[tokio::test]
async fn replacement_removes_before_creating() {
    let old = spec("a", "img:1");
    let new = spec("a", "img:2");
    let observed = vec![observed_from(&old, "id-old", ObservedState::running())];

    let engine = FakeEngine::new()
        .with_observed(observed.clone())
        .with_images(&["img:2"]);
    let plan = diff(&[new], &observed, &DiffOptions::default()).unwrap();
    Runner::new(&engine).run(&plan, &ctx(false)).await.unwrap();

    assert_eq!(
        engine.events(),
        vec!["remove test.a", "create test.a", "start test.a"]
    );
}

#[tokio::test]
async fn ensure_image_reports_unchanged_when_present() {
    let plan = diff(&[spec("a", "img:1")], &[], &DiffOptions::default()).unwrap();
    let engine = FakeEngine::new().with_images(&["img:1"]);
    let report = Runner::new(&engine).run(&plan, &ctx(false)).await.unwrap();

    let ensure = report
        .actions
        .iter()
        .find(|a| a.kind == "ensure-image")
        .unwrap();
    assert!(!ensure.changed);
    // No pull happened.
    assert!(!engine.events().iter().any(|e| e.starts_with("pull")));
}

#[tokio::test]
async fn nonzero_exit_in_wait_window_fails_the_plan() {
    let a = spec("a", "img:1");
    let plan = diff(
        &[a],
        &[],
        &DiffOptions {
            wait: Some(Duration::from_secs(1)),
        },
    )
    .unwrap();

    let engine = FakeEngine::new()
        .with_images(&["img:1"])
        .with_wait_exit(name("a"), 3);
    let err = Runner::new(&engine)
        .run(&plan, &ctx(false))
        .await
        .unwrap_err();

    match err {
        Error::WaitExitNonZero { container, code } => {
            assert_eq!(container, name("a"));
            assert_eq!(code, 3);
        }
        other => panic!("expected wait failure, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_exit_in_wait_window_passes() {
    let a = spec("a", "img:1");
    let plan = diff(
        &[a],
        &[],
        &DiffOptions {
            wait: Some(Duration::from_secs(1)),
        },
    )
    .unwrap();

    let engine = FakeEngine::new()
        .with_images(&["img:1"])
        .with_wait_exit(name("a"), 0);
    assert!(Runner::new(&engine).run(&plan, &ctx(false)).await.is_ok());
}

#[tokio::test]
async fn cancellation_stops_before_the_first_action() {
    let plan = diff(&[spec("a", "img:1")], &[], &DiffOptions::default()).unwrap();
    let engine = FakeEngine::new();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = Runner::with_cancellation(&engine, cancel)
        .run(&plan, &ctx(false))
        .await
        .unwrap_err();

    match err {
        Error::Canceled { completed, total } => {
            assert_eq!(completed, 0);
            assert_eq!(total, plan.len());
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(engine.events().is_empty());
}

#[tokio::test]
async fn apply_then_diff_reaches_a_fixed_point() {
    let db = spec("db", "postgres:16");
    let mut web = spec("web", "myapp:1");
    web.links.push(stevedore::name::LinkRef {
        target: name("db"),
        alias: None,
    });
    let declared = vec![web, db];

    let engine = FakeEngine::new();
    let plan = diff(&declared, &[], &DiffOptions::default()).unwrap();
    Runner::new(&engine).run(&plan, &ctx(false)).await.unwrap();

    // A second diff against the converged engine is all no-ops.
    let observed = engine.list("test").await.unwrap();
    let second = diff(&declared, &observed, &DiffOptions::default()).unwrap();
    assert!(second.is_converged(), "{:?}", second.actions);
    assert_eq!(second.len(), 2);
}
