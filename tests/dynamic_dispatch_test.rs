use ledgerd::config::SettlementConfig;
use ledgerd::domain::ports::SharedStore;
use ledgerd::domain::wallet::WalletKind;
use ledgerd::application::orchestrator::SettlementOrchestrator;
use ledgerd::infrastructure::in_memory::InMemoryLedgerStore;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_store_as_trait_object() {
    let store: SharedStore = Arc::new(InMemoryLedgerStore::new());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        Arc::clone(&store),
        SettlementConfig::default(),
    ));

    // Verify Send + Sync by spawning tasks over the same store
    let users: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let handles: Vec<_> = users
        .iter()
        .map(|&user| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .wallets()
                    .open_wallet(user, WalletKind::Instructor, "INR")
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let wallets = store.wallets().await.unwrap();
    assert_eq!(wallets.len(), users.len());
    assert!(wallets.iter().all(|w| w.kind == WalletKind::Instructor));
}
