//! Facade tests: the root crate exposes the whole public API.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tvar::{Notifier, NotifierConfig, StmError, Transaction, TxState, Var};

#[test]
fn test_default_variable_through_facade() {
    let var = Var::new(0);
    var.write(5);
    assert_eq!(var.read(), 5);
    assert_eq!(var.version(), Some(2));
    var.write(5);
    assert_eq!(var.version(), Some(3));
}

#[test]
fn test_builtin_equality_variable() {
    let var = Var::new_eq(1);
    assert_eq!(var.version(), None);
    let tx = Transaction::begin();
    tx.read(&var);

    var.write(1);
    assert!(!tx.is_stale());
    var.write(2);
    assert!(tx.is_stale());
    tx.complete();
    assert_eq!(tx.state(), TxState::Completed);
}

#[test]
fn test_blocking_wait_on_global_notifier() {
    let flag = Var::new_eq(false);

    let waiter = {
        let flag = flag.clone();
        thread::spawn(move || loop {
            let tx = Transaction::begin();
            if tx.read(&flag) {
                tx.complete();
                return;
            }
            tx.watch_reads();
            tx.park_timeout(Duration::from_secs(10));
            tx.complete();
        })
    };

    thread::sleep(Duration::from_millis(20));
    flag.write(true);
    waiter.join().unwrap();
}

#[test]
fn test_dedicated_notifier_through_facade() {
    let notifier = Arc::new(Notifier::new(NotifierConfig::default()).unwrap());
    let var = Var::from_snapshot(tvar::Snapshot::custom(1, |a: &i32, b: &i32| a != b), Arc::clone(&notifier));
    assert!(Arc::ptr_eq(var.notifier(), &notifier));
    var.write(2);
    assert_eq!(var.read(), 2);
    notifier.shutdown();
}

#[test]
fn test_invalid_config_surfaces_error() {
    let err = NotifierConfig::from_toml_str("max_queue_depth = 0").unwrap_err();
    assert!(matches!(err, StmError::InvalidConfig(_)));
}
