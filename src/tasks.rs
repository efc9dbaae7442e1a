//! Process-global background work queues, shared by every open table.
//!
//! Two bounded channels feed two OS-thread workers: the flush queue
//! converts frozen writable segments into readonly segments; the
//! compress queue runs merges and purge rewrites. Tasks carry weak table
//! handles, are idempotent, and check the table's drop flag between
//! steps. Shutdown is deterministic: closing a channel drains it, then
//! the worker joins.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Mutex, Weak};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::table::Table;

const QUEUE_CAPACITY: usize = 1024;

struct Queue {
    tx: Mutex<Option<SyncSender<Weak<Table>>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    fn start(name: &'static str, run: fn(Weak<Table>)) -> Self {
        let (tx, rx): (SyncSender<Weak<Table>>, Receiver<Weak<Table>>) =
            sync_channel(QUEUE_CAPACITY);
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in rx.iter() {
                    run(task);
                }
                tracing::info!(worker = name, "background worker drained and stopped");
            })
            .expect("spawn background worker");
        Self {
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        }
    }

    /// Non-blocking: callers may hold a table write lock, and the worker
    /// needs that lock to drain. A full queue drops the task; every task
    /// is an idempotent "look at this table" hint, so the next trigger
    /// re-enqueues the work.
    fn put(&self, task: Weak<Table>) -> Result<()> {
        use std::sync::mpsc::TrySendError;
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("background queue full, dropping task hint");
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(Error::ShuttingDown),
            },
            None => Err(Error::ShuttingDown),
        }
    }

    /// Close the channel, let the worker drain, and join it.
    fn stop_and_wait(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        if let Some(join) = self.join.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

fn run_flush(task: Weak<Table>) {
    let Some(table) = task.upgrade() else { return };
    table
        .bg_task_num
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    match table.convert_frozen_segments() {
        Ok(converted) => {
            if converted > 0 && table.needs_merge() {
                if let Err(e) = put_to_compress_queue(task.clone()) {
                    tracing::warn!(error = %e, "compress enqueue failed");
                }
            }
        }
        Err(e) => {
            // the segment stays frozen; the next pass retries
            tracing::error!(error = %e, "freeze conversion failed");
        }
    }
    table
        .bg_task_num
        .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
}

fn run_compress(task: Weak<Table>) {
    let Some(table) = task.upgrade() else { return };
    table
        .bg_task_num
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    if let Err(e) = table.run_merge() {
        tracing::error!(error = %e, "merge failed");
    }
    if let Err(e) = table.run_purge_delete() {
        tracing::error!(error = %e, "purge failed");
    }
    table
        .bg_task_num
        .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
}

static FLUSH_QUEUE: Lazy<Queue> = Lazy::new(|| Queue::start("shaledb-flush", run_flush));
static COMPRESS_QUEUE: Lazy<Queue> = Lazy::new(|| Queue::start("shaledb-compress", run_compress));

/// Hand a table with frozen segments to the flush worker.
pub fn put_to_flush_queue(table: Weak<Table>) -> Result<()> {
    FLUSH_QUEUE.put(table)
}

/// Hand a table to the compress worker for merge and purge passes.
pub fn put_to_compress_queue(table: Weak<Table>) -> Result<()> {
    COMPRESS_QUEUE.put(table)
}

/// Stop the flush worker after draining its queue.
pub fn safe_stop_and_wait_for_flush() {
    FLUSH_QUEUE.stop_and_wait();
}

/// Stop the compress worker after draining its queue.
pub fn safe_stop_and_wait_for_compress() {
    COMPRESS_QUEUE.stop_and_wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_weak_task_is_skipped() {
        // a queue must tolerate tables that were dropped before the
        // worker got to them
        let dead: Weak<Table> = Weak::new();
        put_to_flush_queue(dead).unwrap();
        put_to_compress_queue(Weak::new()).unwrap();
    }
}
