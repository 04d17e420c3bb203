// ABOUTME: Shared helpers for integration tests

#![allow(dead_code)]

pub mod fake_transport;
pub mod logs;

use std::time::Duration;

/// Let spawned timer tasks and their follow-ups run
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

/// Let pending timer tasks register, advance paused time, then let woken tasks run
pub async fn advance(duration: Duration) {
    settle().await;
    tokio::time::advance(duration).await;
    settle().await;
}

/// Advance paused time in milliseconds
pub async fn advance_ms(millis: u64) {
    advance(Duration::from_millis(millis)).await;
}
