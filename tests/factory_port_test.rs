use ledgerd::domain::gateway::GatewayConfig;
use ledgerd::domain::ports::{GatewayBox, GatewayFactory, GatewayProvider};
use ledgerd::error::LedgerError;
use ledgerd::infrastructure::gateway::registry::GatewayRegistry;
use ledgerd::infrastructure::gateway::sandbox::SandboxGateway;
use std::sync::Arc;

fn config(secret: &str) -> GatewayConfig {
    GatewayConfig {
        key_id: "rzp_test".to_string(),
        key_secret: secret.to_string(),
        webhook_secret: format!("{secret}-hook"),
        currency: "INR".to_string(),
    }
}

fn sandbox_factory() -> GatewayFactory {
    Box::new(|id, config| match id {
        "razorpay" => Ok(Arc::new(SandboxGateway::new(config.clone())) as GatewayBox),
        other => Err(LedgerError::Validation(format!("no adapter for gateway {other}"))),
    })
}

#[tokio::test]
async fn test_factory_instantiation() {
    let factory = sandbox_factory();
    let gateway = factory("razorpay", &config("s1")).unwrap();

    // Verify it works
    let order = gateway
        .create_order(49_900, "INR", "rcpt-1", &Default::default())
        .await
        .unwrap();
    assert!(order.starts_with("order_"));
    assert!(factory("stripe", &config("s1")).is_err());
}

#[tokio::test]
async fn test_registry_in_task() {
    let registry = Arc::new(GatewayRegistry::new(sandbox_factory()));
    registry.configure("razorpay", config("s1")).await;

    let shared = Arc::clone(&registry);
    let handle = tokio::spawn(async move {
        let gateway = shared.get("razorpay").await.unwrap();
        gateway.verify_webhook_signature(b"{}", &SandboxGateway::sign("s1-hook", b"{}"))
    });
    assert!(handle.await.unwrap());

    registry.configure("stripe", config("s2")).await;
    assert!(matches!(
        registry.get("stripe").await,
        Err(LedgerError::Validation(_))
    ));
}
