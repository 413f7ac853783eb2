//! Entry number minting under concurrent writers

mod common;

use common::{setup, TEST_USER};
use futures::future::join_all;
use governance_rs::repos::journal_repo;
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_mint_contiguous_numbers() {
    let ctx = Arc::new(setup().await);

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let request = ctx.student_fee_request(&format!(
                    "JE:students:StudentFee:123:concurrent-{i}"
                ));
                ctx.gateway.create_journal_entry(request, TEST_USER).await
            })
        })
        .collect();

    let results = join_all(tasks).await;

    let mut numbers = BTreeSet::new();
    for result in results {
        let entry = result.expect("task panicked").expect("create failed");
        numbers.insert(entry.number);
    }

    // Ten successful writes: numbers are unique, contiguous, gap-free.
    assert_eq!(numbers.len(), 10);
    let expected: BTreeSet<String> = (1..=10).map(|n| format!("JE-{n:04}")).collect();
    assert_eq!(numbers, expected);
}

#[tokio::test]
async fn failed_write_leaves_no_gap() {
    let ctx = setup().await;

    let first = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:gap-1"),
            TEST_USER,
        )
        .await
        .unwrap();
    assert_eq!(first.number, "JE-0001");

    // A failing write rolls its sequence increment back with the rest of
    // the transaction.
    let mut bad = ctx.student_fee_request("JE:students:StudentFee:123:gap-bad");
    bad.lines[0].account_code = "77777".to_string();
    ctx.gateway.create_journal_entry(bad, TEST_USER).await.unwrap_err();

    let second = ctx
        .gateway
        .create_journal_entry(
            ctx.student_fee_request("JE:students:StudentFee:123:gap-2"),
            TEST_USER,
        )
        .await
        .unwrap();
    assert_eq!(second.number, "JE-0002");

    assert_eq!(journal_repo::count_entries(&ctx.pool).await.unwrap(), 2);
}
