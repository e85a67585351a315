//! Live snapshot subscriptions.
//!
//! Each subscription runs a background task that re-runs its query whenever
//! the watched collection is written in this process, and on a polling
//! interval so that writes from other processes sharing the database file
//! are observed too.  Consecutive identical snapshots are suppressed.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A collection whose writes wake subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Conversations,
    Messages,
}

/// A cancellable stream of full result-set snapshots.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) stops the
/// background task.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<Vec<T>>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Stream for Subscription<T> {
    type Item = Result<Vec<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) struct SnapshotSource {
    pub db: Arc<Mutex<Database>>,
    pub changes: broadcast::Receiver<Collection>,
    pub watched: Collection,
    pub poll_interval: Duration,
    pub capacity: usize,
}

pub(crate) fn spawn_snapshots<T, F>(source: SnapshotSource, query: F) -> Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
    F: Fn(&Database) -> Result<Vec<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(source.capacity.max(1));
    let SnapshotSource {
        db,
        changes,
        watched,
        poll_interval,
        ..
    } = source;

    let task = tokio::spawn(async move {
        let mut changes = Some(changes);
        let mut ticker = tokio::time::interval(poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        let mut last: Option<Vec<T>> = None;

        loop {
            match run_query(&db, &query) {
                Ok(docs) => {
                    if last.as_ref() != Some(&docs) {
                        if tx.send(Ok(docs.clone())).await.is_err() {
                            break;
                        }
                        last = Some(docs);
                    }
                }
                Err(e) => {
                    let fatal = e.is_missing_index();
                    warn!(collection = ?watched, error = %e, fatal, "Snapshot query failed");
                    if tx.send(Err(e)).await.is_err() || fatal {
                        break;
                    }
                }
            }

            if !wait_for_change(&mut changes, watched, &mut ticker, &tx).await {
                break;
            }
        }

        debug!(collection = ?watched, "Subscription task ended");
    });

    Subscription { rx, task }
}

fn run_query<T, F>(db: &Mutex<Database>, query: &F) -> Result<Vec<T>>
where
    F: Fn(&Database) -> Result<Vec<T>>,
{
    let guard = db.lock().map_err(|_| StoreError::Poisoned)?;
    query(&guard)
}

enum Wake {
    Closed,
    Tick,
    Change(std::result::Result<Collection, broadcast::error::RecvError>),
}

/// Wait until the snapshot should be re-queried.  Returns `false` once the
/// subscriber has gone away.
async fn wait_for_change<T>(
    changes: &mut Option<broadcast::Receiver<Collection>>,
    watched: Collection,
    ticker: &mut Interval,
    tx: &mpsc::Sender<T>,
) -> bool {
    loop {
        let wake = tokio::select! {
            _ = tx.closed() => Wake::Closed,
            _ = ticker.tick() => Wake::Tick,
            event = next_change(changes) => Wake::Change(event),
        };

        match wake {
            Wake::Closed => return false,
            Wake::Tick => return true,
            Wake::Change(Ok(collection)) if collection == watched => return true,
            Wake::Change(Ok(_)) => continue,
            Wake::Change(Err(broadcast::error::RecvError::Lagged(_))) => return true,
            Wake::Change(Err(broadcast::error::RecvError::Closed)) => {
                // Store handle dropped; keep serving through polling.
                *changes = None;
            }
        }
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<Collection>>,
) -> std::result::Result<Collection, broadcast::error::RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
