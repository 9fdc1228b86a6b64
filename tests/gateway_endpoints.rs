//! Endpoint lifecycle tests
//!
//! Drives a live listener to check that the registration table follows the
//! profile store: enabled profiles with a password are reachable, nothing
//! else is, and credential collisions never replace a live endpoint.

mod common;

use common::*;
use juiced::gateway::{CommandRouter, GatewayError};

#[tokio::test]
async fn enabled_profiles_with_password_are_exposed() {
    let mut disabled = profile("Builder", "buildpw", &[]);
    disabled.enabled = false;
    let harness = started(vec![
        profile("Moderator", "modpw", &["say"]),
        disabled,
        profile("Unprotected", "", &["status"]),
    ]);

    assert!(harness.gateway.has_endpoint(ROOT_PASSWORD));
    assert!(harness.gateway.has_endpoint("modpw"));
    assert!(!harness.gateway.has_endpoint("buildpw"));
    assert!(!harness.gateway.has_endpoint(""));
    assert_eq!(
        harness.gateway.registered_profiles(),
        vec!["Moderator".to_string(), "root".to_string()]
    );

    let _moderator = connect(&harness, "modpw").await;
    assert!(refused(harness.addr, "buildpw").await);
    assert!(refused(harness.addr, "nope").await);
    assert!(refused(harness.addr, "").await);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn empty_root_password_is_not_exposed() {
    let harness = harness_with("", vec![profile("Moderator", "modpw", &[])], |host| host);
    let addr = harness.gateway.start().unwrap();

    assert_eq!(harness.gateway.registered_profiles(), vec!["Moderator".to_string()]);
    assert!(refused(addr, "").await);
    harness.gateway.stop().await;
}

#[tokio::test]
async fn colliding_credentials_abort_start() {
    let harness = harness(vec![
        profile("Alpha", "shared", &[]),
        profile("Beta", "shared", &[]),
    ]);

    let err = harness.gateway.start().unwrap_err();
    assert!(matches!(err, GatewayError::CredentialCollision { .. }));
    assert!(!harness.gateway.is_listening());
    assert!(harness.gateway.registered_profiles().is_empty());
    assert!(!err.to_string().contains("shared"));
}

#[tokio::test]
async fn colliding_registration_keeps_live_endpoint() {
    let harness = started(vec![profile("Alpha", "alphapw", &["status"])]);
    let mut alpha = connect(&harness, "alphapw").await;

    let intruder = profile("Beta", "alphapw", &["*"]);
    assert!(harness.gateway.register_endpoint(&intruder).is_err());
    assert!(harness.gateway.register_endpoint(&profile("Gamma", ROOT_PASSWORD, &[])).is_err());

    send(&mut alpha, "status").await;
    let reply = next_message(&mut alpha).await.unwrap();
    assert!(reply.message.starts_with("hostname"));
    assert_eq!(
        harness.gateway.registered_profiles(),
        vec!["Alpha".to_string(), "root".to_string()]
    );

    harness.gateway.stop().await;
}

#[tokio::test]
async fn register_endpoint_skips_disabled_and_passwordless() {
    let harness = started(vec![]);
    let mut disabled = profile("Off", "offpw", &[]);
    disabled.enabled = false;

    assert!(!harness.gateway.register_endpoint(&disabled).unwrap());
    assert!(!harness.gateway.register_endpoint(&profile("Open", "", &[])).unwrap());
    assert!(!harness.gateway.deregister_endpoint(&profile("Never", "neverpw", &[])));

    let late = profile("Late", "latepw", &[]);
    assert!(harness.gateway.register_endpoint(&late).unwrap());
    let _client = connect(&harness, "latepw").await;
    assert!(harness.gateway.deregister_endpoint(&late));
    assert!(refused(harness.addr, "latepw").await);

    harness.gateway.stop().await;
}

#[tokio::test]
async fn start_twice_keeps_the_listener() {
    let harness = started(vec![]);
    assert_eq!(harness.gateway.start().unwrap(), harness.addr);
    assert_eq!(harness.gateway.local_addr(), Some(harness.addr));
    harness.gateway.stop().await;
}

#[tokio::test]
async fn stop_closes_sessions_and_is_idempotent() {
    let harness = started(vec![profile("Moderator", "modpw", &[])]);
    let mut root = connect(&harness, ROOT_PASSWORD).await;
    let mut moderator = connect(&harness, "modpw").await;

    harness.gateway.stop().await;
    assert!(!harness.gateway.is_listening());
    assert!(harness.gateway.registered_profiles().is_empty());
    assert!(harness.gateway.sessions().is_empty());
    assert!(next_message(&mut root).await.is_none());
    assert!(next_message(&mut moderator).await.is_none());

    harness.gateway.stop().await;
    assert!(refused(harness.addr, ROOT_PASSWORD).await);
}

#[tokio::test]
async fn restart_rebuilds_the_table() {
    let harness = started(vec![profile("Moderator", "modpw", &[])]);
    harness.gateway.stop().await;

    let addr = harness.gateway.start().unwrap();
    assert_eq!(
        harness.gateway.registered_profiles(),
        vec!["Moderator".to_string(), "root".to_string()]
    );
    assert!(!refused(addr, "modpw").await);
    harness.gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_reuses_a_fixed_port() {
    let config = juiced::gateway::GatewayConfig {
        port: free_port(),
        ..common::config(ROOT_PASSWORD)
    };
    let fixed = std::net::SocketAddr::new(config.bind, config.port);
    let mut harness = harness_on(config, vec![profile("Moderator", "modpw", &[])], |host| host);

    for _ in 0..20 {
        harness.addr = harness.gateway.start().unwrap();
        assert_eq!(harness.addr, fixed);
        harness.gateway.stop().await;
        assert!(!harness.gateway.is_listening());
    }

    harness.addr = harness.gateway.start().unwrap();
    let mut moderator = connect(&harness, "modpw").await;
    harness.gateway.stop().await;
    assert!(next_message(&mut moderator).await.is_none());
}

#[tokio::test]
async fn console_disable_then_enable_keeps_the_port() {
    let config = juiced::gateway::GatewayConfig {
        port: free_port(),
        ..common::config(ROOT_PASSWORD)
    };
    let mut harness = harness_on(config, vec![], |host| host);
    harness.addr = harness.gateway.start().unwrap();
    let mut root = connect(&harness, ROOT_PASSWORD).await;

    let router = CommandRouter::new(harness.gateway.clone());
    for _ in 0..5 {
        let console = router.clone();
        let stopped = tokio::task::spawn_blocking(move || console.execute_console("gateway.disable"))
            .await
            .unwrap();
        assert_eq!(stopped.as_deref(), Some("RCON gateway stopped"));
        assert!(next_message(&mut root).await.is_none());

        let console = router.clone();
        let started = tokio::task::spawn_blocking(move || console.execute_console("gateway.enable"))
            .await
            .unwrap();
        assert_eq!(
            started,
            Some(format!("RCON gateway listening on {}", harness.addr))
        );
        root = connect(&harness, ROOT_PASSWORD).await;
    }
    send(&mut root, "status").await;
    assert!(next_message(&mut root).await.is_some());
    harness.gateway.stop().await;
}

#[tokio::test]
async fn disabling_a_profile_closes_its_sessions() {
    let harness = started(vec![profile("Moderator", "modpw", &[])]);
    let mut root = connect(&harness, ROOT_PASSWORD).await;
    let mut moderator = connect(&harness, "modpw").await;

    harness.gateway.disable_profile("Moderator").unwrap();
    assert!(next_message(&mut moderator).await.is_none());
    wait_for_sessions(&harness.gateway, 1).await;

    send(&mut root, "status").await;
    assert!(next_message(&mut root).await.is_some());
    harness.gateway.stop().await;
}

#[tokio::test]
async fn several_sessions_share_one_profile() {
    let harness = started(vec![profile("Moderator", "modpw", &["status"])]);
    let mut first = connect(&harness, "modpw").await;
    let mut second = connect(&harness, "modpw").await;
    assert_eq!(harness.gateway.sessions().len(), 2);

    send(&mut first, "status").await;
    assert!(next_message(&mut first).await.is_some());
    assert_quiet(&mut second, |_| true).await;

    drop(first);
    wait_for_sessions(&harness.gateway, 1).await;
    send(&mut second, "status").await;
    assert!(next_message(&mut second).await.is_some());
    harness.gateway.stop().await;
}
