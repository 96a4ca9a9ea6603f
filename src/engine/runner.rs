//! Engine thread and the handles used to talk to it.
//!
//! All engine state lives on one thread that drains a single queue, so
//! inputs are handled strictly one at a time in arrival order. Every input
//! is stamped with the session epoch of the sender that produced it;
//! inputs from an ended session are dropped instead of leaking into the
//! next one.

use super::input::{EngineInput, Envelope, UserCommand};
use super::observer::{ChannelObserver, EngineEvent, LogObserver, Subscribers};
use super::sync_engine::{EngineConfig, SyncEngine};
use crate::channel::{MessageChannel, ServerMessage};
use crate::config::Config;
use crate::defaults;
use crate::error::{EngineError, Result};
use crate::player::{MediaPlayer, PlayerSignal};
use crate::session::SessionSnapshot;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Feeds inputs for one session into the engine.
///
/// Cheap to clone. Once a newer session starts (or this one ends) every send
/// fails with [`EngineError::SessionEnded`].
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: Sender<Envelope>,
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl InputSender {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this sender still belongs to the running session.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.epoch
    }

    /// Queue an input. Position ticks are dropped when the queue is full;
    /// everything else waits for room.
    pub fn send(&self, input: impl Into<EngineInput>) -> Result<()> {
        if !self.is_current() {
            return Err(EngineError::SessionEnded { epoch: self.epoch });
        }
        let input = input.into();
        let droppable = input.is_droppable();
        let envelope = Envelope::Input {
            epoch: self.epoch,
            input,
        };

        if droppable {
            match self.tx.try_send(envelope) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("input queue full, position tick dropped");
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(EngineError::QueueClosed),
            }
        } else {
            self.tx.send(envelope).map_err(|_| EngineError::QueueClosed)
        }
    }

    /// Queue an input without waiting for room.
    ///
    /// A full queue hands the input back so the caller can wait somewhere
    /// that is allowed to block. Ticks are dropped instead, as with
    /// [`send`](Self::send).
    pub fn try_send(&self, input: impl Into<EngineInput>) -> Result<Option<EngineInput>> {
        if !self.is_current() {
            return Err(EngineError::SessionEnded { epoch: self.epoch });
        }
        let input = input.into();
        let droppable = input.is_droppable();
        let envelope = Envelope::Input {
            epoch: self.epoch,
            input,
        };

        match self.tx.try_send(envelope) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(Envelope::Input { input, .. })) if !droppable => Ok(Some(input)),
            Err(TrySendError::Full(_)) => {
                tracing::trace!("input queue full, position tick dropped");
                Ok(None)
            }
            Err(TrySendError::Disconnected(_)) => Err(EngineError::QueueClosed),
        }
    }

    pub fn position_tick(&self, t: f64) -> Result<()> {
        self.send(PlayerSignal::PositionTick(t))
    }

    pub fn stalled(&self) -> Result<()> {
        self.send(PlayerSignal::Stalled)
    }

    pub fn end_of_media(&self) -> Result<()> {
        self.send(PlayerSignal::EndOfMedia)
    }

    pub fn ready_to_play(&self) -> Result<()> {
        self.send(PlayerSignal::ReadyToPlay)
    }

    pub fn server(&self, message: ServerMessage) -> Result<()> {
        self.send(message)
    }

    pub fn transport_failed(&self, message: impl Into<String>) -> Result<()> {
        self.send(EngineInput::TransportFailed {
            message: message.into(),
        })
    }

    pub fn play(&self) -> Result<()> {
        self.send(UserCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(UserCommand::Pause)
    }

    pub fn toggle(&self) -> Result<()> {
        self.send(UserCommand::Toggle)
    }
}

#[cfg(test)]
impl InputSender {
    /// Sender on a bare queue with no engine behind it.
    pub(crate) fn detached(capacity: usize) -> (Self, Receiver<Envelope>) {
        let (tx, rx) = bounded(capacity);
        let sender = Self {
            tx,
            epoch: 1,
            current: Arc::new(AtomicU64::new(1)),
        };
        (sender, rx)
    }
}

/// Handle to a running engine thread.
pub struct EngineHandle {
    tx: Sender<Envelope>,
    epoch: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Build an engine from `config` and start it.
    ///
    /// Events are logged and published on the returned receiver, which holds
    /// up to `queue.event_buffer` events before new ones are dropped.
    pub fn from_config(
        config: &Config,
        player: Box<dyn MediaPlayer>,
        channel: Box<dyn MessageChannel>,
    ) -> Result<(Self, Receiver<EngineEvent>)> {
        config.validate()?;
        let (events, rx) = ChannelObserver::with_capacity(config.queue.event_buffer);
        let observers = Subscribers::new()
            .with(Box::new(LogObserver))
            .with(Box::new(events));
        let engine = SyncEngine::new(EngineConfig::from(config), player, channel)
            .with_observer(Box::new(observers));
        let handle = Self::spawn(engine, config.queue.input_buffer)?;
        Ok((handle, rx))
    }

    /// Move `engine` onto its own thread.
    pub fn spawn(engine: SyncEngine, input_buffer: usize) -> Result<Self> {
        let (tx, rx) = bounded(input_buffer.max(1));
        let epoch = Arc::new(AtomicU64::new(engine.epoch()));
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = running.clone();
        let thread = thread::Builder::new()
            .name("chapterflow-engine".to_string())
            .spawn(move || run(engine, rx, thread_running))?;

        Ok(Self {
            tx,
            epoch,
            running,
            thread: Some(thread),
        })
    }

    /// Start a new session, ending the current one.
    ///
    /// Returns once the engine has reset, with a sender for the new session.
    pub fn start_session(&self, content_id: &str) -> Result<InputSender> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (ack, ack_rx) = bounded(1);
        self.tx
            .send(Envelope::StartSession {
                epoch,
                content_id: content_id.to_string(),
                ack,
            })
            .map_err(|_| EngineError::QueueClosed)?;
        wait_for_ack(&ack_rx)?;
        Ok(self.sender_for(epoch))
    }

    /// End the current session. Outstanding senders stop working.
    pub fn end_session(&self) -> Result<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (ack, ack_rx) = bounded(1);
        self.tx
            .send(Envelope::EndSession { epoch, ack })
            .map_err(|_| EngineError::QueueClosed)?;
        wait_for_ack(&ack_rx)
    }

    /// Sender for the current session.
    pub fn sender(&self) -> InputSender {
        self.sender_for(self.epoch.load(Ordering::SeqCst))
    }

    /// Session state after every input queued so far has been handled.
    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, reply_rx) = bounded(1);
        self.tx
            .send(Envelope::Snapshot { reply })
            .map_err(|_| EngineError::QueueClosed)?;
        reply_rx
            .recv_timeout(Duration::from_millis(defaults::RESET_ACK_TIMEOUT_MS))
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    EngineError::Other("engine did not answer snapshot request".to_string())
                }
                RecvTimeoutError::Disconnected => EngineError::QueueClosed,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the engine thread.
    ///
    /// Waits up to 1s for the thread to finish, then detaches it.
    pub fn stop(mut self) {
        self.shutdown();

        let Some(handle) = self.thread.take() else {
            return;
        };
        let deadline = Instant::now() + Duration::from_secs(1);
        let poll_interval = Duration::from_millis(10);

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("engine thread still running after shutdown, detaching");
                return;
            }
            thread::sleep(poll_interval);
        }
        if let Err(panic_info) = handle.join() {
            let msg = panic_info
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic");
            tracing::error!("engine thread panicked: {msg}");
        }
    }

    fn sender_for(&self, epoch: u64) -> InputSender {
        InputSender {
            tx: self.tx.clone(),
            epoch,
            current: self.epoch.clone(),
        }
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            // Invalidate outstanding senders before the queue goes away.
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if self.tx.send(Envelope::Shutdown).is_err() {
                tracing::debug!("engine thread already gone");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait_for_ack(ack_rx: &Receiver<()>) -> Result<()> {
    ack_rx
        .recv_timeout(Duration::from_millis(defaults::RESET_ACK_TIMEOUT_MS))
        .map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                EngineError::Other("engine did not acknowledge session change".to_string())
            }
            RecvTimeoutError::Disconnected => EngineError::QueueClosed,
        })
}

fn run(mut engine: SyncEngine, rx: Receiver<Envelope>, running: Arc<AtomicBool>) {
    tracing::debug!("engine thread started");

    while running.load(Ordering::SeqCst) {
        let received = match engine.next_deadline() {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(envelope) => Some(envelope),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(envelope) => Some(envelope),
                Err(_) => break,
            },
        };
        let now = Instant::now();

        match received {
            Some(Envelope::Input { epoch, input }) => {
                if epoch == engine.epoch() {
                    engine.handle(input, now);
                } else {
                    tracing::trace!(epoch, current = engine.epoch(), "stale input dropped");
                }
            }
            Some(Envelope::StartSession {
                epoch,
                content_id,
                ack,
            }) => {
                // Concurrent starts may arrive out of order; the newest wins.
                if epoch >= engine.epoch() {
                    engine.start_session(epoch, &content_id);
                }
                let _ = ack.send(());
            }
            Some(Envelope::EndSession { epoch, ack }) => {
                if epoch >= engine.epoch() {
                    engine.end_session(epoch);
                }
                let _ = ack.send(());
            }
            Some(Envelope::Snapshot { reply }) => {
                let _ = reply.send(engine.snapshot());
            }
            Some(Envelope::Shutdown) => break,
            None => {}
        }

        engine.on_deadline(now);
    }

    tracing::debug!("engine thread exiting");
}
