//! A single-distributor-task fan-out bus (spec §4.6): bounded incoming
//! queue, bounded per-watcher outbound queues, and a choice of backpressure
//! policy when a watcher falls behind.

mod broadcaster;

pub use broadcaster::{Broadcaster, FullChannelPolicy, Stopped, Watcher};

#[cfg(test)]
mod tests {
    use super::*;
    use apiserver_types::Event;
    use futures::StreamExt;

    #[tokio::test]
    async fn late_subscriber_never_sees_earlier_events() {
        let bus: Broadcaster<i32> = Broadcaster::new(8, FullChannelPolicy::WaitIfFull);
        bus.action(Event::Added(1)).await.unwrap();
        bus.action(Event::Added(2)).await.unwrap();

        let mut w = bus.watch().await.unwrap();
        bus.action(Event::Added(3)).await.unwrap();

        let first = w.recv().await.unwrap();
        assert_eq!(first.object().copied(), Some(3));
    }

    #[tokio::test]
    async fn preserves_order_across_multiple_watchers() {
        let bus: Broadcaster<i32> = Broadcaster::new(8, FullChannelPolicy::WaitIfFull);
        let mut a = bus.watch().await.unwrap();
        let mut b = bus.watch().await.unwrap();

        for i in 0..5 {
            bus.action(Event::Added(i)).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(a.recv().await.unwrap().object().copied(), Some(i));
            assert_eq!(b.recv().await.unwrap().object().copied(), Some(i));
        }
    }

    #[tokio::test]
    async fn watch_with_prefix_seeds_before_live_events() {
        let bus: Broadcaster<i32> = Broadcaster::new(8, FullChannelPolicy::WaitIfFull);
        let mut w = bus
            .watch_with_prefix(vec![Event::Added(100), Event::Added(101)])
            .await
            .unwrap();
        bus.action(Event::Added(102)).await.unwrap();

        assert_eq!(w.recv().await.unwrap().object().copied(), Some(100));
        assert_eq!(w.recv().await.unwrap().object().copied(), Some(101));
        assert_eq!(w.recv().await.unwrap().object().copied(), Some(102));
    }

    #[tokio::test]
    async fn drop_if_full_keeps_distributor_unblocked() {
        let bus: Broadcaster<i32> = Broadcaster::new(1, FullChannelPolicy::DropIfFull);
        let mut slow = bus.watch().await.unwrap();
        let mut fast = bus.watch().await.unwrap();

        for i in 0..10 {
            bus.action(Event::Added(i)).await.unwrap();
        }
        // Drain `fast` immediately; it should have received every event since
        // nothing else was contending for its queue.
        let mut got = Vec::new();
        while let Ok(ev) = tokio::time::timeout(std::time::Duration::from_millis(50), fast.recv()).await {
            got.push(ev.unwrap().object().copied().unwrap());
        }
        assert_eq!(got, (0..10).collect::<Vec<_>>());

        // `slow` never read, so most of its queue was dropped; it should
        // still have at least received something without the bus blocking.
        slow.stop();
    }

    #[tokio::test]
    async fn stop_unregisters_watcher() {
        let bus: Broadcaster<i32> = Broadcaster::new(4, FullChannelPolicy::WaitIfFull);
        let w = bus.watch().await.unwrap();
        w.stop();
        // Give the distributor a beat to process the removal marker.
        tokio::task::yield_now().await;
        bus.action(Event::Added(1)).await.unwrap();
        // No assertion beyond "this doesn't hang": a stopped watcher must
        // never block WaitIfFull delivery to anyone else.
    }

    #[tokio::test]
    async fn shutdown_drains_then_closes_every_watcher() {
        let bus: Broadcaster<i32> = Broadcaster::new(8, FullChannelPolicy::WaitIfFull);
        let mut w = bus.watch().await.unwrap();
        bus.action(Event::Added(1)).await.unwrap();
        bus.shutdown().await;

        assert_eq!(w.recv().await.unwrap().object().copied(), Some(1));
        assert_eq!(w.recv().await, None);
        assert!(bus.action(Event::Added(2)).await.is_err());
    }

    #[tokio::test]
    async fn stream_impl_yields_events() {
        let bus: Broadcaster<i32> = Broadcaster::new(4, FullChannelPolicy::WaitIfFull);
        let w = bus.watch().await.unwrap();
        bus.action(Event::Added(7)).await.unwrap();
        bus.shutdown().await;

        let items: Vec<_> = w.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].object().copied(), Some(7));
    }
}
