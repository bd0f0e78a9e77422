use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::converter::{ConversionResult, ConversionStage, Converter};
use crate::progress::{ConversionObserver, ConversionProgress};
use crate::request::ConversionRequest;

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerMessage {
    Stage(ConversionStage),
    Progress(ConversionProgress),
    Finished(ConversionResult),
    Failed(String),
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Finished(_) | WorkerMessage::Failed(_))
    }
}

struct ChannelObserver {
    tx: Sender<WorkerMessage>,
}

impl ChannelObserver {
    // a caller that hung up no longer cares; the conversion carries on
    fn publish(&self, msg: WorkerMessage) {
        let _ = self.tx.send(msg);
    }
}

impl ConversionObserver for ChannelObserver {
    fn progress(&mut self, progress: ConversionProgress) {
        self.publish(WorkerMessage::Progress(progress));
    }

    fn stage(&mut self, stage: ConversionStage) {
        self.publish(WorkerMessage::Stage(stage));
    }
}

/// Runs one conversion on its own thread. The caller reads
/// [`WorkerMessage`]s until the terminal `Finished` or `Failed`, which is
/// sent exactly once after every subprocess has exited.
pub struct ConversionWorker {
    stop: Arc<AtomicBool>,
    rx: Receiver<WorkerMessage>,
    handle: JoinHandle<()>,
}

impl ConversionWorker {
    pub fn spawn(mut converter: Converter, request: ConversionRequest) -> io::Result<Self> {
        let stop = converter.stop_flag();
        let (tx, rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(String::from("gif-forge-worker"))
            .spawn(move || {
                let mut observer = ChannelObserver { tx };
                let msg = match converter.convert(&request, &mut observer) {
                    Ok(result) => WorkerMessage::Finished(result),
                    Err(err) => WorkerMessage::Failed(format!("Error during conversion: {}", err)),
                };
                observer.publish(msg);
            })?;

        Ok(ConversionWorker { stop, rx, handle })
    }

    pub fn cancel(&self) {
        tracing::info!("cancelling conversion");
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn messages(&self) -> &Receiver<WorkerMessage> {
        &self.rx
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("conversion thread panicked");
        }
    }
}
