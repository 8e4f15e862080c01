//! Image retention sweeps.

mod common;

use common::FakeEngine;
use stevedore::name::{ContainerName, ImageName};
use stevedore::pod::{ContainerSpec, Pod};
use stevedore::retention::clean;

fn pod_using(image: &str) -> Pod {
    let spec = ContainerSpec::new(
        ContainerName::new("prod", "app"),
        ImageName::parse(image).unwrap(),
    );
    Pod {
        namespace: "prod".to_string(),
        containers: vec![spec],
        rendered: String::new(),
    }
}

#[tokio::test]
async fn keeps_the_newest_k_tags() {
    let engine = FakeEngine::new().with_tags(
        "repo",
        &["1.0", "1.1", "1.2", "1.3", "1.4", "1.5"],
    );

    let report = clean(&engine, &pod_using("repo:1.5"), 3).await.unwrap();

    let kept: Vec<String> = report.kept.iter().map(|i| i.to_string()).collect();
    let removed: Vec<String> = report.removed.iter().map(|i| i.to_string()).collect();
    assert_eq!(kept, vec!["repo:1.5", "repo:1.4", "repo:1.3"]);
    assert_eq!(removed, vec!["repo:1.2", "repo:1.1", "repo:1.0"]);
}

#[tokio::test]
async fn tags_referenced_by_running_containers_survive() {
    let engine = FakeEngine::new()
        .with_tags("repo", &["1.0", "1.1", "1.2", "1.3"])
        .with_running_images(vec![ImageName::parse("repo:1.0").unwrap()]);

    let report = clean(&engine, &pod_using("repo:1.3"), 2).await.unwrap();

    let kept: Vec<String> = report.kept.iter().map(|i| i.to_string()).collect();
    let removed: Vec<String> = report.removed.iter().map(|i| i.to_string()).collect();
    assert_eq!(kept, vec!["repo:1.3", "repo:1.2", "repo:1.0"]);
    assert_eq!(removed, vec!["repo:1.1"]);
}

#[tokio::test]
async fn numeric_versions_rank_below_floating_tags() {
    // Descending order puts lexicographic tags (latest) first.
    let engine = FakeEngine::new().with_tags("repo", &["1.8", "latest", "2.0", "1.9"]);

    let report = clean(&engine, &pod_using("repo:2.0"), 2).await.unwrap();

    let kept: Vec<String> = report.kept.iter().map(|i| i.to_string()).collect();
    let removed: Vec<String> = report.removed.iter().map(|i| i.to_string()).collect();
    assert_eq!(kept, vec!["repo:latest", "repo:2.0"]);
    assert_eq!(removed, vec!["repo:1.9", "repo:1.8"]);
}

#[tokio::test]
async fn only_the_pods_repositories_are_touched() {
    let engine = FakeEngine::new()
        .with_tags("repo", &["1.0", "1.1"])
        .with_tags("unrelated", &["1.0", "1.1"]);

    clean(&engine, &pod_using("repo:1.1"), 1).await.unwrap();

    let rmis: Vec<String> = engine
        .events()
        .into_iter()
        .filter(|e| e.starts_with("rmi"))
        .collect();
    assert_eq!(rmis, vec!["rmi repo:1.0"]);
}

#[tokio::test]
async fn registry_qualified_repositories_use_the_full_key() {
    let engine = FakeEngine::new().with_tags("registry.example.com:5000/team/app", &["1", "2"]);

    let report = clean(
        &engine,
        &pod_using("registry.example.com:5000/team/app:2"),
        1,
    )
    .await
    .unwrap();

    assert_eq!(report.removed.len(), 1);
    assert_eq!(
        report.removed[0].to_string(),
        "registry.example.com:5000/team/app:1"
    );
}
