//! Differ scenarios: plan contents and ordering.

mod common;

use std::time::Duration;

use common::observed_from;
use stevedore::diff::{diff, removal_plan, Action, DiffOptions};
use stevedore::name::{ContainerName, ImageName, LinkRef};
use stevedore::pod::{ContainerSpec, ObservedState};

fn name(n: &str) -> ContainerName {
    ContainerName::new("test", n)
}

fn spec(n: &str, image: &str) -> ContainerSpec {
    ContainerSpec::new(name(n), ImageName::parse(image).unwrap())
}

fn with_volumes_from(mut spec: ContainerSpec, deps: &[&str]) -> ContainerSpec {
    spec.volumes_from = deps.iter().map(|d| name(d)).collect();
    spec
}

fn kinds_and_targets(actions: &[Action]) -> Vec<(String, String)> {
    actions
        .iter()
        .map(|a| (a.kind().to_string(), a.target()))
        .collect()
}

#[test]
fn create_all_orders_dependencies_first_with_images_inline() {
    // a, b -> a, c -> a; nothing observed.
    let a = spec("a", "img-a:1");
    let b = with_volumes_from(spec("b", "img-b:1"), &["a"]);
    let c = with_volumes_from(spec("c", "img-c:1"), &["a"]);

    let plan = diff(&[a, b, c], &[], &DiffOptions::default()).unwrap();
    assert_eq!(
        kinds_and_targets(&plan.actions),
        vec![
            ("ensure-image".to_string(), "img-a:1".to_string()),
            ("create".to_string(), "test.a".to_string()),
            ("ensure-image".to_string(), "img-b:1".to_string()),
            ("create".to_string(), "test.b".to_string()),
            ("ensure-image".to_string(), "img-c:1".to_string()),
            ("create".to_string(), "test.c".to_string()),
        ]
    );
}

#[test]
fn shared_image_is_ensured_once() {
    let a = spec("a", "shared:2");
    let b = spec("b", "shared:2");
    let plan = diff(&[a, b], &[], &DiffOptions::default()).unwrap();
    let ensures = plan
        .actions
        .iter()
        .filter(|a| a.kind() == "ensure-image")
        .count();
    assert_eq!(ensures, 1);
}

#[test]
fn no_change_yields_one_no_action_per_container() {
    let a = spec("a", "img:1");
    let b = spec("b", "img:1");
    let observed = vec![
        observed_from(&a, "id-a", ObservedState::running()),
        observed_from(&b, "id-b", ObservedState::running()),
    ];

    let plan = diff(&[a, b], &observed, &DiffOptions::default()).unwrap();
    assert!(plan.is_converged());
    let kinds: Vec<&str> = plan.actions.iter().map(Action::kind).collect();
    assert_eq!(kinds, vec!["no-action", "no-action"]);
}

#[test]
fn changed_container_is_replaced_remove_first() {
    // Declared b has a new image; observed b was created from the old one.
    let a = spec("a", "img:1");
    let b_old = with_volumes_from(spec("b", "img:1"), &["a"]);
    let b_new = with_volumes_from(spec("b", "img:2"), &["a"]);

    let observed = vec![
        observed_from(&a, "id-a", ObservedState::running()),
        observed_from(&b_old, "id-b", ObservedState::running()),
    ];

    let plan = diff(
        &[a.clone(), b_new.clone()],
        &observed,
        &DiffOptions::default(),
    )
    .unwrap();
    assert_eq!(
        kinds_and_targets(&plan.actions),
        vec![
            ("remove".to_string(), "test.b".to_string()),
            ("ensure-image".to_string(), "img:2".to_string()),
            ("create".to_string(), "test.b".to_string()),
            ("no-action".to_string(), "test.a".to_string()),
        ]
    );
}

#[test]
fn orphan_is_removed() {
    let a = spec("a", "img:1");
    let x = spec("x", "img:1");
    let observed = vec![
        observed_from(&a, "id-a", ObservedState::running()),
        observed_from(&x, "id-x", ObservedState::running()),
    ];

    let plan = diff(&[a], &observed, &DiffOptions::default()).unwrap();
    assert_eq!(
        kinds_and_targets(&plan.actions),
        vec![
            ("remove".to_string(), "test.x".to_string()),
            ("no-action".to_string(), "test.a".to_string()),
        ]
    );
}

#[test]
fn removal_respects_dependents_first() {
    // web depends on db; both orphaned. web must be removed before db.
    let db = spec("db", "img:1");
    let web = with_volumes_from(spec("web", "img:1"), &["db"]);
    let observed = vec![
        observed_from(&db, "id-db", ObservedState::running()),
        observed_from(&web, "id-web", ObservedState::running()),
    ];

    let plan = removal_plan(&observed).unwrap();
    assert_eq!(
        kinds_and_targets(&plan.actions),
        vec![
            ("remove".to_string(), "test.web".to_string()),
            ("remove".to_string(), "test.db".to_string()),
        ]
    );
}

#[test]
fn create_index_follows_dependency_index() {
    // Invariant: for every edge c -> d, Create(c) comes after Create(d),
    // across a deeper chain with links as the edge source.
    let d = spec("d", "img:1");
    let mut c = spec("c", "img:1");
    c.links.push(LinkRef {
        target: name("d"),
        alias: None,
    });
    let b = with_volumes_from(spec("b", "img:1"), &["c"]);

    let plan = diff(
        &[b.clone(), c.clone(), d.clone()],
        &[],
        &DiffOptions::default(),
    )
    .unwrap();

    let create_index = |n: &str| {
        plan.actions
            .iter()
            .position(|a| a.kind() == "create" && a.target() == format!("test.{n}"))
            .unwrap()
    };
    assert!(create_index("d") < create_index("c"));
    assert!(create_index("c") < create_index("b"));
}

#[test]
fn replacement_remove_precedes_its_create() {
    let old = spec("a", "img:1");
    let new = spec("a", "img:2");
    let observed = vec![observed_from(&old, "id-a", ObservedState::running())];

    let plan = diff(&[new], &observed, &DiffOptions::default()).unwrap();
    let remove = plan
        .actions
        .iter()
        .position(|a| a.kind() == "remove")
        .unwrap();
    let create = plan
        .actions
        .iter()
        .position(|a| a.kind() == "create")
        .unwrap();
    assert!(remove < create);
}

#[test]
fn plans_are_deterministic() {
    let specs: Vec<ContainerSpec> = ["c", "a", "d", "b"]
        .iter()
        .map(|n| spec(n, "img:1"))
        .collect();
    let first = diff(&specs, &[], &DiffOptions::default()).unwrap();
    let second = diff(&specs, &[], &DiffOptions::default()).unwrap();
    assert_eq!(
        kinds_and_targets(&first.actions),
        kinds_and_targets(&second.actions)
    );

    // Unconstrained creates come out lexicographically.
    let creates: Vec<String> = first
        .actions
        .iter()
        .filter(|a| a.kind() == "create")
        .map(|a| a.target())
        .collect();
    assert_eq!(creates, vec!["test.a", "test.b", "test.c", "test.d"]);
}

#[test]
fn wait_for_only_with_window() {
    let a = spec("a", "img:1");
    let without = diff(&[a.clone()], &[], &DiffOptions::default()).unwrap();
    assert!(!without.actions.iter().any(|x| x.kind() == "wait"));

    let with = diff(
        &[a],
        &[],
        &DiffOptions {
            wait: Some(Duration::from_secs(3)),
        },
    )
    .unwrap();
    assert_eq!(with.actions.last().unwrap().kind(), "wait");
}
