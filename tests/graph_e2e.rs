//! End-to-end tests over the public API: commits, frames, transactions and
//! traversal pipelines.

use std::sync::Arc;
use std::thread;

use chronograph::{
    parse_time, placeholder, to_frame, Delta, Graph, GraphError, LogPosition, TypeToken, Value,
};

struct Ledger {
    graph: Graph,
    account: TypeToken,
    transaction: TypeToken,
    name: TypeToken,
    amount: TypeToken,
    date: TypeToken,
    has_entry: TypeToken,
}

fn ledger() -> Ledger {
    let graph = Graph::new();
    Ledger {
        account: graph.entity_type("Account").unwrap(),
        transaction: graph.entity_type("Transaction").unwrap(),
        name: graph.relation_type("Name").unwrap(),
        amount: graph.relation_type("Amount").unwrap(),
        date: graph.relation_type("Date").unwrap(),
        has_entry: graph.relation_type("HasEntry").unwrap(),
        graph,
    }
}

#[test]
fn test_general_account_amounts_sum() {
    let l = ledger();
    let dollars = l.graph.enum_value("Unit", "dollars").unwrap();

    let receipt = l
        .graph
        .commit(
            Delta::new()
                .entity(&l.account, "general")
                .fact(placeholder("general"), &l.name, "General")
                .entity(&l.transaction, "t")
                .fact(placeholder("t"), &l.amount, 10.0 * dollars.clone())
                .fact(placeholder("t"), &l.date, parse_time("2021-12-06").unwrap())
                .fact(placeholder("general"), &l.has_entry, placeholder("t")),
        )
        .unwrap();

    let frame = receipt.frame().unwrap();
    let general = frame
        .instances(&l.account)
        .try_filter({
            let name = l.name.clone();
            move |a| {
                Ok(a.query().values(&name).single()? == Value::from("General"))
            }
        })
        .only()
        .unwrap();
    assert_eq!(general, receipt.require("general").unwrap());

    let total = general
        .query()
        .outgoing(&l.has_entry)
        .values(&l.amount)
        .sum()
        .unwrap();
    let total = total.as_quantity().unwrap();
    assert!((total.magnitude - 10.0).abs() < f64::EPSILON);
    assert_eq!(total.unit, dollars);

    let date = receipt
        .require("t")
        .unwrap()
        .query()
        .values(&l.date)
        .single()
        .unwrap();
    assert_eq!(date.as_time().unwrap().date_naive().to_string(), "2021-12-06");
}

#[test]
fn test_three_accounts_in_one_scope_commit_together() {
    let l = ledger();
    let before = l.graph.now();

    let ((), frame) = l
        .graph
        .transact(|tx| {
            for name in ["Cash", "Bank", "Credit"] {
                tx.submit(
                    Delta::new()
                        .entity(&l.account, "a")
                        .fact(placeholder("a"), &l.name, name),
                )?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(frame.position(), before.position().next());
    assert_eq!(frame.instances(&l.account).length().unwrap(), 3);
    assert_eq!(frame.previous().unwrap(), before);
    assert_eq!(before.instances(&l.account).length().unwrap(), 0);
}

#[test]
fn test_terminated_relation_visible_only_before_termination() {
    let l = ledger();
    let receipt = l
        .graph
        .commit(
            Delta::new()
                .entity(&l.account, "a")
                .entity(&l.transaction, "t"),
        )
        .unwrap();
    let a = receipt.require("a").unwrap();
    let t = receipt.require("t").unwrap();

    let f2 = l
        .graph
        .commit(Delta::new().named_fact("e", &a, &l.has_entry, &t))
        .unwrap();
    let edge = f2.require("e").unwrap();
    let f2 = f2.frame().unwrap();

    let f3 = l.graph.terminate(&edge).unwrap();
    let f4 = l
        .graph
        .commit(Delta::new().anonymous_entity(&l.account))
        .unwrap()
        .frame()
        .unwrap();
    assert_eq!(f3.position(), f2.position().next());

    assert!(f2.has_relation(&a, &l.has_entry, &t).unwrap());
    assert!(!f4.has_relation(&a, &l.has_entry, &t).unwrap());
    assert_eq!(a.at(&f2).query().outgoing(&l.has_entry).length().unwrap(), 1);
    assert_eq!(a.at(&f4).query().outgoing(&l.has_entry).length().unwrap(), 0);

    // Endpoints outlive the relation.
    assert!(a.at(&f4).exists().unwrap());
    assert!(t.at(&f4).exists().unwrap());
}

#[test]
fn test_failed_commit_changes_nothing() {
    let l = ledger();
    let a = l
        .graph
        .commit(Delta::new().entity(&l.account, "a"))
        .unwrap()
        .require("a")
        .unwrap();
    l.graph.terminate(&a).unwrap();
    let before = l.graph.now();
    let stats = before.stats().unwrap();

    // The second statement refers to a terminated element.
    let err = l
        .graph
        .commit(
            Delta::new()
                .entity(&l.account, "b")
                .fact(&a.at(&before), &l.name, "stale"),
        )
        .unwrap_err();
    assert!(err.is_validation() || err.is_conflict());

    let after = l.graph.now();
    assert_eq!(after, before);
    assert_eq!(after.stats().unwrap(), stats);
}

#[test]
fn test_snapshot_is_stable_while_writers_commit() {
    let l = ledger();
    for _ in 0..10 {
        l.graph
            .commit(Delta::new().anonymous_entity(&l.account))
            .unwrap();
    }
    let frame = l.graph.now();

    let graph = l.graph.clone();
    let account = l.account.clone();
    let writer = thread::spawn(move || {
        for _ in 0..50 {
            graph.commit(Delta::new().anonymous_entity(&account)).unwrap();
        }
    });

    for _ in 0..20 {
        assert_eq!(frame.instances(&l.account).length().unwrap(), 10);
    }
    writer.join().unwrap();
    assert_eq!(frame.instances(&l.account).length().unwrap(), 10);
    assert_eq!(l.graph.now().instances(&l.account).length().unwrap(), 60);
}

#[test]
fn test_concurrent_writers_serialize() {
    let l = ledger();
    let graph = Arc::new(l.graph.clone());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let graph = graph.clone();
            let account = l.account.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    graph.commit(Delta::new().anonymous_entity(&account)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let now = l.graph.now();
    assert_eq!(now.position(), LogPosition::from_raw(100));
    assert_eq!(now.instances(&l.account).length().unwrap(), 100);
}

#[test]
fn test_placeholders_bind_in_receipt() {
    let l = ledger();
    let receipt = l
        .graph
        .commit(
            Delta::new()
                .entity(&l.account, "acc")
                .entity(&l.transaction, "tx")
                .named_fact("entry", placeholder("acc"), &l.has_entry, placeholder("tx")),
        )
        .unwrap();
    assert_eq!(receipt.names().collect::<Vec<_>>(), vec!["acc", "entry", "tx"]);

    let entry = receipt.require("entry").unwrap();
    assert_eq!(entry.query().source().only().unwrap(), receipt.require("acc").unwrap());
    assert_eq!(entry.query().target().only().unwrap(), receipt.require("tx").unwrap());

    let err = l
        .graph
        .commit(
            Delta::new()
                .fact(placeholder("later"), &l.name, "x")
                .entity(&l.account, "later"),
        )
        .unwrap_err();
    assert!(err.is_dangling_placeholder());
}

#[test]
fn test_cardinality_and_absence() {
    let l = ledger();
    let receipt = l
        .graph
        .commit(
            Delta::new()
                .entity(&l.account, "a")
                .fact(placeholder("a"), &l.name, "Primary")
                .fact(placeholder("a"), &l.name, "Alias")
                .entity(&l.account, "b"),
        )
        .unwrap();
    let a = receipt.require("a").unwrap();
    let b = receipt.require("b").unwrap();

    let err = a.query().values(&l.name).single().unwrap_err();
    assert!(err.is_cardinality());
    assert!(matches!(err.root_cause(), GraphError::Execution(_)));

    let err = a.query().outgoing_one(&l.name).evaluate().unwrap_err();
    assert!(err.is_cardinality());

    let err = b.query().values(&l.name).single().unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        b.query().values(&l.name).value_or(Value::from("unnamed")).unwrap(),
        Value::from("unnamed")
    );
}

#[test]
fn test_to_frame_reanchors_without_validation() {
    let l = ledger();
    let f0 = l.graph.now();
    let a = l
        .graph
        .commit(Delta::new().entity(&l.account, "a"))
        .unwrap()
        .require("a")
        .unwrap();

    let back = to_frame(&f0);
    let old = back(&a);
    assert_eq!(old.frame_position(), Some(LogPosition::ORIGIN));
    let err = old.query().outgoing(&l.has_entry).evaluate().unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_time_travel_by_instant() {
    let l = ledger();
    let before = chrono::Utc::now() - chrono::Duration::seconds(5);
    l.graph
        .commit(Delta::new().anonymous_entity(&l.account))
        .unwrap();
    assert_eq!(l.graph.at(before).unwrap().position(), LogPosition::ORIGIN);
    assert_eq!(l.graph.at(chrono::Utc::now()).unwrap(), l.graph.now());
}
