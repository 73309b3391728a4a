// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `workqueue.rs`

#[cfg(test)]
mod tests {
    use crate::workqueue::{
        BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
        WorkQueue,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_is_idempotent_while_waiting() {
        let queue = WorkQueue::new("test");
        queue.add("ns/a");
        queue.add("ns/a");
        queue.add("ns/b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
        assert_eq!(queue.get().await.as_deref(), Some("ns/b"));
    }

    #[tokio::test]
    async fn test_key_in_flight_is_requeued_on_done() {
        let queue = WorkQueue::new("test");
        queue.add("ns/a");
        let key = queue.get().await.expect("key");

        // Re-added while processing: held back until done
        queue.add("ns/a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new("test");
        queue.add("ns/a");
        let key = queue.get().await.expect("key");
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_stops() {
        let queue = WorkQueue::new("test");
        queue.add("ns/a");
        queue.shut_down();
        queue.add("ns/b");
        assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_workers() {
        let queue = WorkQueue::new("test");
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(worker.await.expect("join"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_fires_once() {
        let queue = WorkQueue::new("test");
        queue.add_after("ns/a", Duration::from_secs(3));
        queue.add_after("ns/a", Duration::from_secs(5));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(queue.len(), 1);
        let key = queue.get().await.expect("key");
        queue.done(&key);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_add_after_replaces_later_one() {
        let queue = WorkQueue::new("test");
        queue.add_after("ns/a", Duration::from_secs(30));
        queue.add_after("ns/a", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_exponential_limiter() {
        let limiter =
            ItemExponentialFailureRateLimiter::new(Duration::from_secs(2), Duration::from_secs(1000));
        let delays: Vec<_> = (0..5).map(|_| limiter.when("ns/a")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(32),
            ]
        );
        assert_eq!(limiter.num_requeues("ns/a"), 5);
        assert_eq!(limiter.num_requeues("ns/b"), 0);

        for _ in 0..40 {
            limiter.when("ns/a");
        }
        assert_eq!(limiter.when("ns/a"), Duration::from_secs(1000));

        limiter.forget("ns/a");
        assert_eq!(limiter.num_requeues("ns/a"), 0);
        assert_eq!(limiter.when("ns/a"), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_limiter_burst_then_throttle() {
        let limiter = BucketRateLimiter::new(10.0, 3.0);
        assert_eq!(limiter.when("a"), Duration::ZERO);
        assert_eq!(limiter.when("b"), Duration::ZERO);
        assert_eq!(limiter.when("c"), Duration::ZERO);
        let wait = limiter.when("d");
        assert!(wait > Duration::from_millis(90) && wait <= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_of_limiter_takes_longest() {
        let limiter = MaxOfRateLimiter::new(vec![
            Box::new(ItemExponentialFailureRateLimiter::new(
                Duration::from_secs(2),
                Duration::from_secs(1000),
            )),
            Box::new(BucketRateLimiter::new(10.0, 100.0)),
        ]);
        assert_eq!(limiter.when("ns/a"), Duration::from_secs(2));
        assert_eq!(limiter.when("ns/a"), Duration::from_secs(4));
        assert_eq!(limiter.num_requeues("ns/a"), 2);
        limiter.forget("ns/a");
        assert_eq!(limiter.num_requeues("ns/a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_counts_requeues() {
        let queue = WorkQueue::new("test");
        queue.add_rate_limited("ns/a");
        assert_eq!(queue.num_requeues("ns/a"), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.len(), 1);
        queue.forget("ns/a");
        assert_eq!(queue.num_requeues("ns/a"), 0);
    }
}
