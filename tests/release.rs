//! Release-feed updaters against a local JSON feed

mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use common::serve_files;
use plugkeeper::agent::Shutdown;
use plugkeeper::config::{PathsConfig, ReleaseConfig};
use plugkeeper::store::StateStore;
use plugkeeper::tasks::{Outcome, TaskManager};
use plugkeeper::updater::{Component, HttpClient, HttpConfig, ReleaseUpdater, UpdateProfile};
use tempfile::TempDir;

async fn feed(version: &str) -> String {
    let binary_base = serve_files(HashMap::from([("jdk.tar.gz".to_string(), b"jdk bytes".to_vec())])).await;
    let descriptor = format!(
        r#"{{"version": "{}", "download_url": "{}/files/jdk.tar.gz"}}"#,
        version, binary_base
    );
    let feed_base = serve_files(HashMap::from([("feed.json".to_string(), descriptor.into_bytes())])).await;
    format!("{}/files/feed.json", feed_base)
}

fn updater(
    component: Component,
    profile: UpdateProfile,
    feed_url: String,
    root: PathBuf,
    store: &StateStore,
) -> ReleaseUpdater {
    ReleaseUpdater::builder()
        .component(component)
        .config(ReleaseConfig {
            enabled: true,
            profile,
            feed_url: Some(feed_url),
            target: Some(PathBuf::from("runtime/jdk.tar.gz")),
        })
        .paths(PathsConfig {
            root,
            ..PathsConfig::default()
        })
        .client(Arc::new(HttpClient::new(HttpConfig::default()).unwrap()))
        .store(store.clone())
        .server(Arc::new(AtomicBool::new(false)))
        .build()
}

#[tokio::test]
async fn test_automatic_java_update_installs_in_place() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::open(temp.path().join("state")).unwrap();
    let runtime = temp.path().join("runtime");
    std::fs::create_dir_all(&runtime).unwrap();
    std::fs::write(runtime.join("jdk.tar.gz"), b"old jdk").unwrap();
    store.set_installed_version("java", "17.0.8").unwrap();

    let feed_url = feed("17.0.9").await;
    let manager = TaskManager::new("Updates");
    let handle = manager.start(updater(
        Component::Java,
        UpdateProfile::Automatic,
        feed_url.clone(),
        temp.path().to_path_buf(),
        &store,
    ));
    assert_eq!(handle.wait().await, Outcome::Finished);
    assert!(handle.snapshot().status.starts_with("Installed Java 17.0.9 to "));

    assert_eq!(std::fs::read(runtime.join("jdk.tar.gz")).unwrap(), b"jdk bytes");
    let replaced = temp.path().join(".plugkeeper/replaced/jdk.tar.gz");
    assert_eq!(std::fs::read(replaced).unwrap(), b"old jdk");
    assert_eq!(store.installed_version("java").unwrap().as_deref(), Some("17.0.9"));

    let again = manager.start(updater(
        Component::Java,
        UpdateProfile::Automatic,
        feed_url,
        temp.path().to_path_buf(),
        &store,
    ));
    assert_eq!(again.wait().await, Outcome::Finished);
    assert_eq!(again.snapshot().status, "Java is up to date (17.0.9).");
}

#[tokio::test]
async fn test_manual_server_update_stages_download() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::open(temp.path().join("state")).unwrap();

    let manager = TaskManager::new("Updates");
    let handle = manager.start(updater(
        Component::Server,
        UpdateProfile::Manual,
        feed("1.21.1").await,
        temp.path().to_path_buf(),
        &store,
    ));
    assert_eq!(handle.wait().await, Outcome::Finished);

    let staged = temp.path().join(".plugkeeper/downloads/jdk.tar.gz");
    assert_eq!(std::fs::read(staged).unwrap(), b"jdk bytes");
    assert!(store.installed_version("server").unwrap().is_none());
}

#[tokio::test]
async fn test_notify_reports_unknown_installed_version() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::open(temp.path().join("state")).unwrap();

    let manager = TaskManager::new("Updates");
    let handle = manager.start(updater(
        Component::Java,
        UpdateProfile::Notify,
        feed("21.0.1").await,
        temp.path().to_path_buf(),
        &store,
    ));
    assert_eq!(handle.wait().await, Outcome::Finished);
    assert_eq!(handle.snapshot().status, "Update available (unknown -> 21.0.1).");
    assert!(!temp.path().join(".plugkeeper/downloads").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_automatic_self_update_launches_staged_binary() {
    let temp = TempDir::new().unwrap();
    let store = StateStore::open(temp.path().join("state")).unwrap();
    let script = b"#!/bin/sh\ntouch launched\n".to_vec();
    let binary_base = serve_files(HashMap::from([("next".to_string(), script)])).await;
    let descriptor = format!(r#"{{"version": "999.0.0", "download_url": "{}/files/next"}}"#, binary_base);
    let feed_base = serve_files(HashMap::from([("feed.json".to_string(), descriptor.into_bytes())])).await;

    let shutdown = Shutdown::new();
    let updater = ReleaseUpdater::builder()
        .component(Component::Agent)
        .config(ReleaseConfig {
            enabled: true,
            profile: UpdateProfile::Automatic,
            feed_url: Some(format!("{}/files/feed.json", feed_base)),
            target: None,
        })
        .paths(PathsConfig {
            root: temp.path().to_path_buf(),
            ..PathsConfig::default()
        })
        .client(Arc::new(HttpClient::new(HttpConfig::default()).unwrap()))
        .store(store.clone())
        .server(Arc::new(AtomicBool::new(false)))
        .shutdown(shutdown.clone())
        .exe_name("plugkeeper-next")
        .build();

    let manager = TaskManager::new("Updates");
    let handle = manager.start(updater);
    assert_eq!(handle.wait().await, Outcome::Finished);
    assert_eq!(handle.snapshot().status, "Installed update 999.0.0, restarting.");
    assert!(shutdown.is_triggered());

    let staging = temp.path().join(".plugkeeper/downloads");
    assert!(staging.join("plugkeeper-next").exists());
    let launched = staging.join("launched");
    for _ in 0..100 {
        if launched.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(launched.exists());
}
