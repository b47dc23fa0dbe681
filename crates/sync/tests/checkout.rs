use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use smartmaint_core::{Employee, EmployeeId, ProductId, Transaction, TransactionItem};
use smartmaint_events::{Collection, CrossContextBroadcaster};
use smartmaint_sync::checkout::DEFAULT_OVERRIDE_NOTE;
use smartmaint_sync::{
    CheckoutError, CheckoutOutcome, CheckoutSession, InMemoryRemoteStore, LocalCache, SyncCoordinator, SyncSettings,
};

fn coordinator(remote: &InMemoryRemoteStore) -> SyncCoordinator {
    smartmaint_observability::init();
    SyncCoordinator::new(
        LocalCache::open_in_memory().unwrap(),
        Arc::new(remote.clone()),
        CrossContextBroadcaster::new(8),
        SyncSettings::with_data_dir("/unused").with_probe_timeout(std::time::Duration::from_millis(200)),
    )
    .unwrap()
}

fn history(employee: &Employee, qty: u32, at: DateTime<Utc>) -> Transaction {
    Transaction::withdrawal(
        employee,
        vec![TransactionItem {
            product_id: ProductId::from("p1"),
            quantity: qty,
            product_name: "Cloro Concentrado".to_string(),
        }],
        at,
    )
}

/// Employee `e9` (limit 10) with 12 units of p1 last week and 10 this week.
fn heavy_user(sync: &SyncCoordinator, now: DateTime<Utc>) -> EmployeeId {
    let employee = Employee {
        id: EmployeeId::from("e9"),
        name: "Pedro Ramírez".to_string(),
        employee_number: "M-009".to_string(),
        areas: vec!["Canchas".to_string()],
        permitted_products: vec![ProductId::from("p1")],
        alert_limit: 10,
    };
    sync.upsert_employee(employee.clone()).unwrap();
    sync.add_transaction(history(&employee, 12, now - Duration::days(10))).unwrap();
    sync.add_transaction(history(&employee, 10, now - Duration::days(2))).unwrap();
    employee.id
}

#[tokio::test]
async fn supervisor_override_commits_one_flagged_transaction() {
    let remote = InMemoryRemoteStore::new();
    let sync = coordinator(&remote);
    sync.initialize().await.unwrap();

    let now = Utc::now();
    let e9 = heavy_user(&sync, now);
    let tx_before = sync.transactions().unwrap().len();
    let stock_before = sync.products().unwrap()[0].stock;

    let mut checkout = CheckoutSession::new(sync.clone());
    checkout.select_employee(e9.clone()).unwrap();
    checkout.add_to_cart(&ProductId::from("p1")).unwrap();

    match checkout.submit(now).unwrap() {
        CheckoutOutcome::Blocked(v) => {
            assert_eq!(v.product_id, ProductId::from("p1"));
            assert_eq!(v.limit, 10);
            assert_eq!(v.current_week_total, 11);
            assert_eq!(v.previous_week_total, 12);
        }
        CheckoutOutcome::Committed(_) => panic!("expected smart lock block"),
    }
    assert!(checkout.blocked().is_some());
    assert_eq!(sync.transactions().unwrap().len(), tx_before);

    // wrong PIN changes nothing
    assert!(matches!(
        checkout.override_block("0000", "reposición", now),
        Err(CheckoutError::PinMismatch)
    ));
    assert!(checkout.blocked().is_some());
    assert_eq!(checkout.cart().len(), 1);

    let tx = checkout.override_block("1234", "   ", now).unwrap();
    assert!(tx.anomaly_triggered);
    assert!(tx.override_used);
    assert_eq!(tx.supervisor_note.as_deref(), Some(DEFAULT_OVERRIDE_NOTE));
    assert_eq!(tx.employee_id, e9);

    let transactions = sync.transactions().unwrap();
    assert_eq!(transactions.len(), tx_before + 1);
    assert_eq!(transactions[0], tx);
    assert_eq!(sync.products().unwrap()[0].stock, stock_before - 1);
    assert!(checkout.cart().is_empty());
    assert!(checkout.employee().is_none());
    assert!(checkout.blocked().is_none());

    sync.flush().await;
    let remote_tx = remote.document(Collection::Transactions, tx.id.as_str()).unwrap();
    assert_eq!(remote_tx["bloqueo_activado"], true);
    assert_eq!(remote_tx["desbloqueo_supervisor"], true);
    assert_eq!(remote_tx["notas_supervisor"], DEFAULT_OVERRIDE_NOTE);
}

#[tokio::test]
async fn changing_the_cart_clears_a_block() {
    let sync = coordinator(&InMemoryRemoteStore::unreachable());
    sync.initialize().await.unwrap();

    let now = Utc::now();
    let e9 = heavy_user(&sync, now);
    let mut checkout = CheckoutSession::new(sync);
    checkout.select_employee(e9).unwrap();
    checkout.add_to_cart(&ProductId::from("p1")).unwrap();

    assert!(matches!(checkout.submit(now).unwrap(), CheckoutOutcome::Blocked(_)));
    checkout.remove_from_cart(&ProductId::from("p1"));
    assert!(checkout.blocked().is_none());
    assert!(matches!(checkout.submit(now), Err(CheckoutError::EmptyCart)));
    assert!(matches!(
        checkout.override_block("1234", "ok", now),
        Err(CheckoutError::NotBlocked)
    ));
}

#[tokio::test]
async fn heavy_week_alone_passes_the_lock() {
    let sync = coordinator(&InMemoryRemoteStore::unreachable());
    sync.initialize().await.unwrap();

    let now = Utc::now();
    let employee = Employee {
        id: EmployeeId::from("e8"),
        name: "Lucía Torres".to_string(),
        employee_number: "M-008".to_string(),
        areas: vec![],
        permitted_products: vec![ProductId::from("p1")],
        alert_limit: 10,
    };
    sync.upsert_employee(employee.clone()).unwrap();
    sync.add_transaction(history(&employee, 12, now - Duration::days(10))).unwrap();

    let mut checkout = CheckoutSession::new(sync.clone());
    checkout.select_employee(employee.id.clone()).unwrap();
    checkout.add_to_cart(&ProductId::from("p1")).unwrap();

    match checkout.submit(now).unwrap() {
        CheckoutOutcome::Committed(tx) => {
            assert!(!tx.anomaly_triggered);
            assert_eq!(tx.supervisor_note, None);
            assert_eq!(tx.items[0].product_name, "Cloro Concentrado");
        }
        CheckoutOutcome::Blocked(v) => panic!("unexpected block: {v}"),
    }
}

#[tokio::test]
async fn deleted_product_is_recorded_as_unknown() {
    let sync = coordinator(&InMemoryRemoteStore::unreachable());
    sync.initialize().await.unwrap();

    let mut checkout = CheckoutSession::new(sync.clone());
    checkout.select_employee(EmployeeId::from("e2")).unwrap();
    checkout.add_to_cart(&ProductId::from("p4")).unwrap();
    sync.delete_product(&ProductId::from("p4")).unwrap();

    match checkout.submit(Utc::now()).unwrap() {
        CheckoutOutcome::Committed(tx) => assert_eq!(tx.items[0].product_name, "Desconocido"),
        CheckoutOutcome::Blocked(v) => panic!("unexpected block: {v}"),
    }
}

#[tokio::test]
async fn deleted_product_is_not_scored_by_the_lock() {
    let sync = coordinator(&InMemoryRemoteStore::unreachable());
    sync.initialize().await.unwrap();

    let now = Utc::now();
    let e9 = heavy_user(&sync, now);
    let mut checkout = CheckoutSession::new(sync.clone());
    checkout.select_employee(e9).unwrap();
    checkout.add_to_cart(&ProductId::from("p1")).unwrap();
    sync.delete_product(&ProductId::from("p1")).unwrap();

    match checkout.submit(now).unwrap() {
        CheckoutOutcome::Committed(tx) => {
            assert!(!tx.anomaly_triggered);
            assert_eq!(tx.items[0].product_name, "Desconocido");
        }
        CheckoutOutcome::Blocked(v) => panic!("deleted product was scored: {v}"),
    }
}
