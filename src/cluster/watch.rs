//! Change Notifications
//!
//! Watches the cluster objects the admission predicate depends on and turns
//! every event into a coalesced [`ChangeNotice`]. Notices carry no state: the
//! supervisor always re-reads fresh snapshots.

use crate::crd::{ClusterCSIDriver, FeatureGate, Infrastructure};
use crate::domain::ports::{ChangeNotice, NoticeSource};
use futures::StreamExt;
use k8s_openapi::api::storage::v1::CSIDriver;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded depth of the notice queue. One pending notice is enough to
/// guarantee another pass; anything beyond is coalesced into it.
pub const NOTICE_QUEUE_DEPTH: usize = 1;

/// Create the notice channel the supervisor consumes
pub fn notice_channel() -> (mpsc::Sender<ChangeNotice>, mpsc::Receiver<ChangeNotice>) {
    mpsc::channel(NOTICE_QUEUE_DEPTH)
}

/// Queue a notice without blocking. Returns false once the receiver is gone.
pub fn notify(tx: &mpsc::Sender<ChangeNotice>, source: NoticeSource) -> bool {
    match tx.try_send(ChangeNotice::new(source)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(source = %source, "Notice coalesced with pending pass");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Spawn one watcher per relevant kind
pub fn spawn_watchers(
    client: Client,
    tx: mpsc::Sender<ChangeNotice>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        watch_kind(
            Api::<Infrastructure>::all(client.clone()),
            NoticeSource::Infrastructure,
            tx.clone(),
            shutdown.clone(),
        ),
        watch_kind(
            Api::<FeatureGate>::all(client.clone()),
            NoticeSource::FeatureGate,
            tx.clone(),
            shutdown.clone(),
        ),
        watch_kind(
            Api::<CSIDriver>::all(client.clone()),
            NoticeSource::CsiDriver,
            tx.clone(),
            shutdown.clone(),
        ),
        // Errors with backoff until the CRD is installed
        watch_kind(
            Api::<ClusterCSIDriver>::all(client),
            NoticeSource::ClusterCsiDriver,
            tx,
            shutdown,
        ),
    ]
}

fn watch_kind<K>(
    api: Api<K>,
    source: NoticeSource,
    tx: mpsc::Sender<ChangeNotice>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(source = %source, "Starting watch");
        let mut events = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(_)) => {
                        if !notify(&tx, source) {
                            debug!(source = %source, "Notice receiver closed");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(source = %source, error = %e, "Watch error");
                    }
                    None => break,
                }
            }
        }

        info!(source = %source, "Watch stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_notify_coalesces() {
        let (tx, mut rx) = notice_channel();
        assert!(notify(&tx, NoticeSource::Infrastructure));
        assert!(notify(&tx, NoticeSource::FeatureGate));
        assert!(notify(&tx, NoticeSource::CsiDriver));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.source, NoticeSource::Infrastructure);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drained_queue_is_pending() {
        let (tx, mut rx) = notice_channel();
        notify(&tx, NoticeSource::CsiDriver);
        notify(&tx, NoticeSource::ClusterCsiDriver);

        {
            let mut recv = task::spawn(rx.recv());
            let notice = assert_ready!(recv.poll());
            assert_eq!(notice.map(|n| n.source), Some(NoticeSource::CsiDriver));
        }

        let mut recv = task::spawn(rx.recv());
        assert_pending!(recv.poll());
    }

    #[tokio::test]
    async fn test_notify_closed() {
        let (tx, rx) = notice_channel();
        drop(rx);
        assert!(!notify(&tx, NoticeSource::Manual));
    }
}
