//! Consul backend against a mock agent.

use std::sync::Arc;
use std::time::Duration;

use discovery_gateway::config::RegistrationConfig;
use discovery_gateway::lifecycle::Shutdown;
use discovery_gateway::registration::{RegistrationManager, RegistrationState, ServiceHealth};
use discovery_gateway::registry::{ConsulRegistry, HealthStatus, Registration, RegistryClient, RegistryError};

mod common;

const T: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_register_list_deregister() {
    let (addr, agent) = common::start_mock_consul().await;
    let consul = ConsulRegistry::new(&format!("http://{}", addr), Some("secret".into())).unwrap();

    let reg = Registration::new("orders-service", "10.0.0.5", 7001)
        .with_tags(vec!["v1".into()])
        .with_health_check("http://10.0.0.5:7001/health", Duration::from_secs(10), Duration::from_secs(5));
    consul.register(&reg, T).await.unwrap();
    assert_eq!(agent.tokens.lock().unwrap().clone(), vec!["secret".to_string()]);

    let listed = consul.list_healthy("orders-service", T).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, reg.service_id);
    assert_eq!(listed[0].address, "10.0.0.5");
    assert_eq!(listed[0].port, 7001);
    assert!(listed[0].tags.contains("v1"));
    assert!(listed[0].healthy);

    assert!(consul.list_healthy("payments", T).await.unwrap().is_empty());

    consul.deregister(&reg.service_id, T).await.unwrap();
    assert!(consul.list_healthy("orders-service", T).await.unwrap().is_empty());
    assert_eq!(agent.deregistered.lock().unwrap().clone(), vec![reg.service_id.clone()]);
}

#[tokio::test]
async fn test_duplicate_id_conflicts() {
    let (addr, _agent) = common::start_mock_consul().await;
    let consul = ConsulRegistry::new(&format!("http://{}", addr), None).unwrap();
    let reg = Registration::new("orders-service", "10.0.0.5", 7001);

    consul.register(&reg, T).await.unwrap();
    assert_eq!(
        consul.register(&reg, T).await,
        Err(RegistryError::Conflict(reg.service_id.clone()))
    );
}

#[tokio::test]
async fn test_deregister_unknown_id_succeeds() {
    let (addr, _agent) = common::start_mock_consul().await;
    let consul = ConsulRegistry::new(&format!("http://{}", addr), None).unwrap();

    assert!(consul.deregister("orders-service-unknown", T).await.is_ok());
    assert!(consul.deregister("orders-service-unknown", T).await.is_ok());
}

#[tokio::test]
async fn test_heartbeat_updates_check() {
    let (addr, agent) = common::start_mock_consul().await;
    let consul = ConsulRegistry::new(&format!("http://{}", addr), None).unwrap();
    let reg = Registration::new("orders-service", "10.0.0.5", 7001);
    consul.register(&reg, T).await.unwrap();

    consul.report_health(&reg.service_id, HealthStatus::Critical, T).await.unwrap();
    assert!(consul.list_healthy("orders-service", T).await.unwrap().is_empty());

    consul.report_health(&reg.service_id, HealthStatus::Passing, T).await.unwrap();
    assert_eq!(consul.list_healthy("orders-service", T).await.unwrap().len(), 1);

    let updates = agent.check_updates.lock().unwrap().clone();
    assert_eq!(
        updates,
        vec![
            ("fail".to_string(), reg.service_id.clone()),
            ("pass".to_string(), reg.service_id.clone()),
        ]
    );

    assert_eq!(
        consul.report_health("orders-service-gone", HealthStatus::Passing, T).await,
        Err(RegistryError::NotRegistered("orders-service-gone".into()))
    );
}

#[tokio::test]
async fn test_unreachable_agent_is_unavailable() {
    let dead = common::dead_address().await;
    let consul = ConsulRegistry::new(&format!("http://{}", dead), None).unwrap();

    assert!(matches!(
        consul.list_healthy("orders-service", Duration::from_millis(500)).await,
        Err(RegistryError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    assert!(ConsulRegistry::new("not a url", None).is_err());
}

#[tokio::test]
async fn test_manager_lifecycle_against_agent() {
    let (addr, agent) = common::start_mock_consul().await;
    let consul = Arc::new(ConsulRegistry::new(&format!("http://{}", addr), None).unwrap());
    let config = RegistrationConfig {
        renew_interval_ms: 30,
        shutdown_deadline_ms: 1000,
        ..RegistrationConfig::default()
    };
    let manager = Arc::new(RegistrationManager::new(
        consul,
        Registration::new("orders-service", "127.0.0.1", 7001),
        config,
        ServiceHealth::new(),
    ));
    let shutdown = Shutdown::new();
    let task = tokio::spawn(manager.clone().run(shutdown.subscribe()));

    let mut state = manager.subscribe();
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == RegistrationState::Registered))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!agent.check_updates.lock().unwrap().is_empty());

    shutdown.trigger();
    assert_eq!(task.await.unwrap(), RegistrationState::Deregistered);
    assert_eq!(
        agent.deregistered.lock().unwrap().clone(),
        vec![manager.service_id().to_string()]
    );
}
