//! Integration tests for the state lifecycle.
//!
//! These tests drive the manager against the mock runtime, using the
//! fixture tree under `tests/fixtures`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use pit_state::{
    CancellationToken, Manager, MockRuntime, Naming, PortBinding, RuntimeClient, StateConfig,
    StateError, StateProviderConfig,
};

fn states_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/states")
}

fn mongo_config() -> StateConfig {
    StateConfig::new().with_provider(
        "mongo",
        StateProviderConfig::new(".*waiting for connections.*")
            .unwrap()
            .arg("--nojournal")
            .port(PortBinding::new(27017, 30000))
            .ready_timeout(Duration::from_secs(1)),
    )
}

fn mongo_runtime() -> MockRuntime {
    MockRuntime::new()
        .add_log_line(Duration::ZERO, "[initandlisten] MongoDB starting\n")
        .add_log_line(
            Duration::from_millis(200),
            "[initandlisten] waiting for connections on port 27017\n",
        )
}

fn manager(runtime: &MockRuntime, config: StateConfig) -> Manager {
    Manager::new(
        Arc::new(runtime.clone()),
        Naming::new(states_dir()),
        Arc::new(config),
        "192.168.59.103",
    )
    .with_poll_interval(Duration::from_millis(10))
}

/// Build, start and stop a fixture.
#[tokio::test(start_paused = true)]
async fn test_full_lifecycle() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let image = manager.build("mongo", "several users", &mut out).await.unwrap();

    let build_log = String::from_utf8(out).unwrap();
    assert!(Regex::new(r"(?s).*Successfully built.*").unwrap().is_match(&build_log));
    assert_eq!(image, manager.image_name("mongo", "several users"));
    assert!(image.starts_with("pitstate_mongo_"));

    let state = manager.start("mongo", "several users").await.unwrap();
    assert!(!state.id.is_empty());
    assert_eq!(state.name, image);
    assert_eq!(state.host, "192.168.59.103");
    assert!(!state.host.contains(':'));
    assert_eq!(state.address(27017).as_deref(), Some("192.168.59.103:30000"));

    let containers = runtime.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, image);
    assert_eq!(containers[0].image, image);
    assert_eq!(containers[0].command, vec!["--nojournal".to_string()]);
    assert_eq!(containers[0].ports, vec![PortBinding::new(27017, 30000)]);

    manager.stop("mongo", "several users").await.unwrap();
    assert!(runtime.containers().is_empty());
}

/// The build context path follows the quoted fixture layout.
#[tokio::test]
async fn test_build_uses_quoted_fixture_directory() {
    let runtime = MockRuntime::new();
    let manager = manager(&runtime, StateConfig::new());

    let mut out = Vec::new();
    let image = manager
        .build("mysql", "a single user", &mut out)
        .await
        .unwrap();

    let expected_path = states_dir().join("mysql").join("'a single user'");
    assert_eq!(image, pit_state::image_name("mysql", &expected_path));
    assert_eq!(runtime.images(), vec![image]);
}

/// Building twice reuses the same name.
#[tokio::test]
async fn test_rebuild_overwrites_same_name() {
    let runtime = MockRuntime::new();
    let manager = manager(&runtime, StateConfig::new());

    let mut out = Vec::new();
    let first = manager.build("mongo", "several users", &mut out).await.unwrap();
    let second = manager.build("mongo", "several users", &mut out).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(runtime.images().len(), 1);
    assert_eq!(runtime.get_method_calls("build_image").len(), 2);
}

/// A fixture that does not exist fails before reaching the daemon.
#[tokio::test]
async fn test_build_missing_fixture() {
    let runtime = MockRuntime::new();
    let manager = manager(&runtime, StateConfig::new());

    let mut out = Vec::new();
    let result = manager.build("mongo", "no such fixture", &mut out).await;

    assert!(matches!(result, Err(StateError::ArchiveError { .. })));
    assert!(!runtime.was_called("build_image"));
}

/// Starting an unconfigured provider fails before any runtime call.
#[tokio::test]
async fn test_start_without_config() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, StateConfig::new());

    let result = manager.start("mongo", "several users").await;

    match result {
        Err(StateError::ConfigNotFound { provider }) => assert_eq!(provider, "mongo"),
        other => panic!("Expected ConfigNotFound, got {:?}", other),
    }
    assert!(runtime.get_calls().is_empty());
}

/// Starting a fixture that was never built reports a create error naming the image.
#[tokio::test]
async fn test_start_without_build() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, mongo_config());

    let result = manager.start("mongo", "several users").await;

    match result {
        Err(StateError::ContainerCreateError { image, message }) => {
            assert_eq!(image, manager.image_name("mongo", "several users"));
            assert!(message.contains("No such image"));
        }
        other => panic!("Expected ContainerCreateError, got {:?}", other),
    }
    assert!(!runtime.was_called("start_container"));
}

/// A failing start names the image.
#[tokio::test]
async fn test_start_failure() {
    let image = Naming::new(states_dir()).image_name_for("mongo", "several users");
    let runtime = mongo_runtime()
        .add_existing_image(image.clone())
        .fail_on("start_container", "port is already allocated");
    let manager = manager(&runtime, mongo_config());

    match manager.start("mongo", "several users").await {
        Err(StateError::ContainerStartError { image: i, message }) => {
            assert_eq!(i, image);
            assert!(message.contains("already allocated"));
        }
        other => panic!("Expected ContainerStartError, got {:?}", other),
    }
}

/// A container that never logs the pattern times out and is left in place.
#[tokio::test(start_paused = true)]
async fn test_start_readiness_timeout_keeps_container() {
    let runtime = MockRuntime::new().add_log_line(Duration::ZERO, "journaling...\n");
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let image = manager.build("mongo", "several users", &mut out).await.unwrap();

    match manager.start("mongo", "several users").await {
        Err(StateError::ReadinessTimeout { timeout, .. }) => {
            assert_eq!(timeout, Duration::from_secs(1))
        }
        other => panic!("Expected ReadinessTimeout, got {:?}", other),
    }
    assert!(!runtime.was_called("remove_container"));
    assert_eq!(runtime.containers()[0].name, image);

    manager.stop("mongo", "several users").await.unwrap();
    assert!(runtime.containers().is_empty());
}

/// Starting the same fixture twice is rejected by the daemon.
#[tokio::test(start_paused = true)]
async fn test_second_start_conflicts() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    manager.build("mongo", "several users", &mut out).await.unwrap();
    manager.start("mongo", "several users").await.unwrap();

    match manager.start("mongo", "several users").await {
        Err(StateError::ContainerExists { name }) => {
            assert_eq!(name, manager.image_name("mongo", "several users"))
        }
        other => panic!("Expected ContainerExists, got {:?}", other),
    }
}

/// A start issued while the same fixture is building waits for the build.
#[tokio::test(start_paused = true)]
async fn test_start_waits_for_build_of_same_fixture() {
    let runtime = mongo_runtime().with_delay("build_image", Duration::from_secs(2));
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let (built, started) = tokio::join!(
        manager.build("mongo", "several users", &mut out),
        manager.start("mongo", "several users"),
    );
    let image = built.unwrap();
    assert_eq!(started.unwrap().name, image);

    let calls: Vec<String> = runtime.get_calls().into_iter().map(|c| c.method).collect();
    let build = calls.iter().position(|m| m == "build_image").unwrap();
    let create = calls.iter().position(|m| m == "create_container").unwrap();
    assert!(build < create, "calls out of order: {:?}", calls);
}

/// Different fixtures do not wait for each other.
#[tokio::test(start_paused = true)]
async fn test_different_fixtures_build_concurrently() {
    let delay = Duration::from_secs(2);
    let runtime = MockRuntime::new().with_delay("build_image", delay);
    let manager = manager(&runtime, mongo_config());

    let (mut mongo_out, mut mysql_out) = (Vec::new(), Vec::new());
    let started = tokio::time::Instant::now();
    let (mongo, mysql) = tokio::join!(
        manager.build("mongo", "several users", &mut mongo_out),
        manager.build("mysql", "a single user", &mut mysql_out),
    );
    mongo.unwrap();
    mysql.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= delay);
    assert!(elapsed < delay * 2, "builds ran one after another: {:?}", elapsed);
}

/// A failing inspect after readiness names the state.
#[tokio::test(start_paused = true)]
async fn test_start_inspect_failure() {
    let runtime = mongo_runtime().fail_on("inspect_container", "daemon went away");
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let image = manager.build("mongo", "several users", &mut out).await.unwrap();

    let err = manager.start("mongo", "several users").await.unwrap_err();
    assert!(matches!(err, StateError::InspectError { .. }));
    assert!(err.to_string().contains(&image));
    assert!(err.to_string().contains("daemon went away"));
}

/// A failing removal names the state and leaves the container.
#[tokio::test(start_paused = true)]
async fn test_stop_remove_failure() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let image = manager.build("mongo", "several users", &mut out).await.unwrap();
    manager.start("mongo", "several users").await.unwrap();

    let runtime = runtime.fail_on("remove_container", "device or resource busy");
    let err = manager.stop("mongo", "several users").await.unwrap_err();
    match &err {
        StateError::RemoveError { name, message } => {
            assert_eq!(name, &image);
            assert!(message.contains("device or resource busy"));
        }
        other => panic!("Expected RemoveError, got {:?}", other),
    }
    assert!(err.to_string().contains(&image));
    assert_eq!(runtime.containers().len(), 1);
}

/// Stopping twice reports the missing container and never removes an empty id.
#[tokio::test(start_paused = true)]
async fn test_stop_twice() {
    let runtime = mongo_runtime();
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    manager.build("mongo", "several users", &mut out).await.unwrap();
    manager.start("mongo", "several users").await.unwrap();

    manager.stop("mongo", "several users").await.unwrap();
    let result = manager.stop("mongo", "several users").await;

    match result {
        Err(StateError::ContainerNotFound { name }) => {
            assert_eq!(name, manager.image_name("mongo", "several users"))
        }
        other => panic!("Expected ContainerNotFound, got {:?}", other),
    }

    let removals = runtime.get_method_calls("remove_container");
    assert_eq!(removals.len(), 1);
    assert!(removals
        .iter()
        .all(|c| c.target.as_deref().map_or(false, |id| !id.is_empty())));
}

/// Stop only removes the container of the requested fixture.
#[tokio::test(start_paused = true)]
async fn test_stop_matches_exact_name() {
    let config = mongo_config().with_provider(
        "mysql",
        StateProviderConfig::new("ready for connections")
            .unwrap()
            .port(PortBinding::new(3306, 33060)),
    );
    let runtime = mongo_runtime().add_log_line(Duration::ZERO, "ready for connections\n");
    let manager = manager(&runtime, config);

    let mut out = Vec::new();
    manager.build("mongo", "several users", &mut out).await.unwrap();
    manager.build("mysql", "a single user", &mut out).await.unwrap();
    manager.start("mongo", "several users").await.unwrap();
    manager.start("mysql", "a single user").await.unwrap();

    manager.stop("mysql", "a single user").await.unwrap();

    let remaining = runtime.containers();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, manager.image_name("mongo", "several users"));
}

/// Stop also finds containers that already exited.
#[tokio::test]
async fn test_stop_finds_stopped_container() {
    let runtime = MockRuntime::new();
    let manager = manager(&runtime, mongo_config());

    let mut out = Vec::new();
    let image = manager.build("mongo", "several users", &mut out).await.unwrap();
    runtime
        .create_container(&pit_state::CreateRequest {
            name: image.clone(),
            image,
            command: Vec::new(),
            ports: Vec::new(),
        })
        .await
        .unwrap();

    manager.stop("mongo", "several users").await.unwrap();
    assert!(runtime.containers().is_empty());
}

/// A cancelled start gives up without waiting for the timeout.
#[tokio::test(start_paused = true)]
async fn test_start_cancelled() {
    let runtime = MockRuntime::new();
    let config = StateConfig::new().with_provider(
        "mongo",
        StateProviderConfig::new("never")
            .unwrap()
            .ready_timeout(Duration::from_secs(3600)),
    );
    let manager = manager(&runtime, config);

    let mut out = Vec::new();
    manager.build("mongo", "several users", &mut out).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = manager
        .start_with_cancel("mongo", "several users", &cancel)
        .await;
    assert!(matches!(result, Err(StateError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Provider settings loaded from the fixture config file drive the container.
#[tokio::test(start_paused = true)]
async fn test_start_with_file_config() {
    let config =
        StateConfig::load(&PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pit.yaml"))
            .unwrap();
    let runtime = mongo_runtime();
    let manager = manager(&runtime, config);

    let mut out = Vec::new();
    manager.build("mongo", "several users", &mut out).await.unwrap();
    let state = manager.start("mongo", "several users").await.unwrap();

    assert_eq!(state.address(27017).as_deref(), Some("192.168.59.103:30000"));
    assert_eq!(runtime.containers()[0].command, vec!["--nojournal".to_string()]);
}
