use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tixgate_core::memory::{MemoryAdmissionStore, MemoryLock};
use tixgate_core::{AdmissionQueue, AdmissionStore, QueuePromoter, ReservationSettings};

fn settings(max_active_slots: u64) -> ReservationSettings {
    ReservationSettings {
        max_active_slots,
        ..ReservationSettings::default()
    }
}

#[tokio::test]
async fn test_ten_thousand_users_drain_in_order() {
    let store = Arc::new(MemoryAdmissionStore::new());
    let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
    for user_id in 1..=10_000 {
        store.enqueue(user_id).await.unwrap();
    }
    let promoter = QueuePromoter::new(queue.clone(), &settings(100));

    let mut admitted = Vec::with_capacity(10_000);
    let mut waiting = queue.waiting_count().await.unwrap();
    assert_eq!(waiting, 10_000);

    while waiting > 0 {
        let report = promoter.tick().await.unwrap();
        assert!(report.promoted.len() <= 100);
        assert!(queue.active_count().await.unwrap() <= 100);

        let now_waiting = queue.waiting_count().await.unwrap();
        assert!(now_waiting < waiting, "queue must shrink every tick");
        waiting = now_waiting;

        // Admitted users finish and hand their slots back.
        for user_id in &report.promoted {
            queue.release(*user_id).await.unwrap();
        }
        admitted.extend(report.promoted);
    }

    assert_eq!(admitted.len(), 10_000);
    assert!(admitted.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_first_tick_admits_at_most_bound() {
    let store = Arc::new(MemoryAdmissionStore::new());
    let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
    for user_id in 1..=10_000 {
        store.enqueue(user_id).await.unwrap();
    }

    let report = QueuePromoter::new(queue.clone(), &settings(100)).tick().await.unwrap();

    assert_eq!(report.promoted, (1..=100).collect::<Vec<i64>>());
    assert_eq!(queue.active_count().await.unwrap(), 100);
    assert_eq!(queue.waiting_count().await.unwrap(), 9_900);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_promoters_respect_bound() {
    let store = Arc::new(MemoryAdmissionStore::new());
    let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
    for user_id in 1..=1_000 {
        store.enqueue(user_id).await.unwrap();
    }
    let lock = Arc::new(MemoryLock::new());
    let promoters: Vec<Arc<QueuePromoter>> = (0..8)
        .map(|_| Arc::new(QueuePromoter::new(queue.clone(), &settings(50)).with_leader_lock(lock.clone())))
        .collect();

    for round in 0..5 {
        let ticks = promoters.iter().map(|promoter| {
            let promoter = promoter.clone();
            tokio::spawn(async move { promoter.tick().await })
        });
        for result in join_all(ticks).await {
            result.unwrap().unwrap();
        }

        let active = queue.active_count().await.unwrap();
        assert!(active <= 50, "round {}: {} active slots", round, active);

        // Free a few slots so later rounds have work to race over.
        let mut freed = 0;
        for user_id in 1..=1_000 {
            if freed == 10 {
                break;
            }
            if queue.is_allowed(user_id).await.unwrap() {
                queue.release(user_id).await.unwrap();
                freed += 1;
            }
        }
    }

    let admitted = 1_000 - queue.waiting_count().await.unwrap();
    assert!(admitted >= 50);
}

#[tokio::test]
async fn test_user_holds_one_place_at_a_time() {
    let store = Arc::new(MemoryAdmissionStore::new());
    let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
    queue.register(1).await.unwrap();
    queue.register(2).await.unwrap();

    QueuePromoter::new(queue.clone(), &settings(1)).tick().await.unwrap();

    assert!(queue.is_allowed(1).await.unwrap());
    assert_eq!(queue.rank(1).await.unwrap(), None);
    assert_eq!(queue.rank(2).await.unwrap(), Some(1));
    assert_eq!(
        queue.register(1).await.unwrap(),
        tixgate_core::Admission::Allowed
    );
    assert_eq!(queue.waiting_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_users_leaving_mid_promotion_never_hold_a_slot() {
    let store = Arc::new(MemoryAdmissionStore::new());
    let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
    for user_id in 1..=2_000 {
        store.enqueue(user_id).await.unwrap();
    }
    let promoter = QueuePromoter::new(queue.clone(), &settings(2_000));

    let leaving = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for user_id in (1..=2_000).step_by(2) {
                queue.release(user_id).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut promoted = Vec::new();
    while queue.waiting_count().await.unwrap() > 0 {
        promoted.extend(promoter.tick().await.unwrap().promoted);
        tokio::task::yield_now().await;
    }
    leaving.await.unwrap();

    for user_id in 1..=2_000 {
        let allowed = queue.is_allowed(user_id).await.unwrap();
        let ranked = queue.rank(user_id).await.unwrap().is_some();
        assert!(!(allowed && ranked), "user {} both waiting and active", user_id);
        if user_id % 2 == 1 {
            assert!(!allowed, "user {} left but holds a slot", user_id);
        } else {
            assert!(allowed, "user {} never admitted", user_id);
        }
    }
    assert!(promoted.windows(2).all(|pair| pair[0] < pair[1]));
}
