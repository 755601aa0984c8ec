//! Background model loading.
//!
//! Fetch and decode run off the frame loop; the viewer polls for the outcome
//! and installs it on its own thread. Every request carries an epoch so a
//! result that arrives after a newer request (or after unmount) can be told
//! apart and dropped.

use super::{AssetError, AssetLoader, LoadedModel};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum WorkerCommand {
    Load { url: String, epoch: u64 },
    Stop,
}

pub struct LoadOutcome {
    pub url: String,
    pub epoch: u64,
    pub result: Result<LoadedModel, AssetError>,
}

pub struct LoadWorker {
    tx: Sender<WorkerCommand>,
    rx: Receiver<LoadOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl LoadWorker {
    pub fn spawn(loader: AssetLoader) -> Self {
        let (cmd_tx, cmd_rx) = channel::<WorkerCommand>();
        let (res_tx, res_rx) = channel::<LoadOutcome>();

        let handle = thread::Builder::new()
            .name("glbview-loader".to_string())
            .spawn(move || worker_loop(loader, cmd_rx, res_tx))
            .map_err(|err| log::warn!("Failed to spawn loader thread: {}", err))
            .ok();

        Self {
            tx: cmd_tx,
            rx: res_rx,
            handle,
        }
    }

    /// Queue a load. Returns false if the worker is gone.
    pub fn request(&self, url: &str, epoch: u64) -> bool {
        self.handle.is_some()
            && self
                .tx
                .send(WorkerCommand::Load {
                    url: url.to_string(),
                    epoch,
                })
                .is_ok()
    }

    /// Non-blocking check for a finished load.
    pub fn try_recv(&self) -> Option<LoadOutcome> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for a finished load.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoadOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop and wait for the worker to finish its current job.
    pub fn stop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Stop without waiting. An in-flight load runs to completion and its
    /// result is discarded with the channel.
    pub fn detach(mut self) {
        let _ = self.tx.send(WorkerCommand::Stop);
        self.handle.take();
    }
}

impl Drop for LoadWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(loader: AssetLoader, rx: Receiver<WorkerCommand>, tx: Sender<LoadOutcome>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            WorkerCommand::Load { url, epoch } => {
                let result = loader.load(&url);
                if let Err(err) = &result {
                    log::warn!("Failed to load {}: {}", url, err);
                }
                if tx.send(LoadOutcome { url, epoch, result }).is_err() {
                    break;
                }
            }
            WorkerCommand::Stop => break,
        }
    }
}
