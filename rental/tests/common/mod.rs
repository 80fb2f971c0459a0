//! Shared setup for the end-to-end tests.

#![allow(dead_code)] // Not every test file uses every helper
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use booking_broker::InMemoryBus;
use booking_rental::protocol::{DIRECT_EXCHANGE, FANOUT_EXCHANGE};
use booking_rental::requester::Notice;
use booking_rental::{Application, ClientHandle, Config};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Config with short retry delays and no seed buildings.
pub fn fast_config() -> Config {
    Config {
        username: None,
        seed_buildings: Vec::new(),
        retry_max: 3,
        retry_initial: Duration::from_millis(5),
        shutdown_timeout: Duration::from_secs(2),
        metrics_addr: None,
    }
}

/// Start the system on a fresh in-memory broker.
pub async fn start() -> (Application, InMemoryBus) {
    let bus = InMemoryBus::new(DIRECT_EXCHANGE, FANOUT_EXCHANGE);
    let app = Application::start(fast_config(), Arc::new(bus.clone())).await.unwrap();
    (app, bus)
}

/// Start the system and wait until the agent knows a building per entry of `rooms`.
pub async fn start_with_buildings(rooms: &[usize]) -> (Application, InMemoryBus) {
    let (app, bus) = start().await;
    for count in rooms {
        app.register_building(*count).await.unwrap();
    }
    let expected = rooms.len();
    let running = &app;
    eventually("buildings registered", move || async move {
        running.agent().state(|s| s.buildings.len()).await == expected
            && running.workers().ids().await.len() == expected
    })
    .await;
    (app, bus)
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// For each needle, the first notice containing it, in needle order.
///
/// Notices are emitted from independent tasks, so arrival order is not
/// assumed; notices matching no needle are skipped.
pub async fn notices_containing(client: &mut ClientHandle, needles: &[&str]) -> Vec<Notice> {
    let mut found: Vec<Option<Notice>> = vec![None; needles.len()];
    let collected = tokio::time::timeout(Duration::from_secs(2), async {
        while found.iter().any(Option::is_none) {
            let notice = client.next_notice().await?;
            let slot = needles
                .iter()
                .zip(found.iter_mut())
                .find(|(needle, slot)| slot.is_none() && notice.text.contains(**needle));
            if let Some((_, slot)) = slot {
                *slot = Some(notice);
            }
        }
        Some(())
    })
    .await;

    match collected {
        Ok(Some(())) => found.into_iter().flatten().collect(),
        _ => panic!("missing notices among {needles:?}, got {found:?}"),
    }
}

/// Next notice whose text contains `needle`, skipping the others.
pub async fn notice_containing(client: &mut ClientHandle, needle: &str) -> Notice {
    notices_containing(client, &[needle]).await.remove(0)
}
