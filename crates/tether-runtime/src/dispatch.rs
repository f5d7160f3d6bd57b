//! Async dispatcher - one task owning the runtime
//!
//! Inbound messages, timer ticks and user commands are serialised through a
//! single `select!` loop, so the runtime itself never needs a lock.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use tether_core::{TetherError, TetherResult};
use tether_transport::InboundReceiver;

use crate::SyncRuntime;

type Command = Box<dyn FnOnce(&mut SyncRuntime) + Send>;

/// Cloneable handle for running closures on the dispatcher task
#[derive(Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RuntimeHandle {
    /// Queue `f` without waiting for it to run
    pub fn execute<F>(&self, f: F) -> TetherResult<()>
    where
        F: FnOnce(&mut SyncRuntime) + Send + 'static,
    {
        self.commands
            .send(Box::new(f))
            .map_err(|_| TetherError::RuntimeStopped)
    }

    /// Run `f` on the dispatcher task and wait for its result
    pub async fn call<F, R>(&self, f: F) -> TetherResult<R>
    where
        F: FnOnce(&mut SyncRuntime) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move |runtime| {
            let _ = tx.send(f(runtime));
        })?;
        rx.await.map_err(|_| TetherError::RuntimeStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Move `runtime` onto a tokio task fed by `inbound`
///
/// The task stops when `inbound` closes or every handle is dropped, and
/// hands the runtime back through the join handle.
pub fn spawn_dispatcher(
    mut runtime: SyncRuntime,
    mut inbound: InboundReceiver,
) -> (RuntimeHandle, JoinHandle<SyncRuntime>) {
    let (tx, mut commands) = mpsc::unbounded_channel::<Command>();
    let tick_interval = runtime.config().tick_interval;

    let task = tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_interval = ?tick_interval, "dispatcher started");

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    // Failures are counted and logged by the runtime
                    Some(message) => {
                        let _ = runtime.receive(message);
                    }
                    None => {
                        debug!("inbound stream closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => command(&mut runtime),
                    None => {
                        debug!("all runtime handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    runtime.tick();
                }
            }
        }

        info!(stats = ?runtime.stats(), "dispatcher stopped");
        runtime
    });

    (RuntimeHandle { commands: tx }, task)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tether_core::{EventId, Inbound, PathAddress, Value};
    use tether_time::ManualClock;
    use tether_transport::RecordingTransport;

    use super::*;
    use crate::RuntimeConfig;

    fn runtime(transport: RecordingTransport, clock: ManualClock) -> SyncRuntime {
        let config = RuntimeConfig {
            tick_interval: Duration::from_millis(5),
            ..RuntimeConfig::default()
        };
        SyncRuntime::with_clock(config, transport, Arc::new(clock)).unwrap()
    }

    #[tokio::test]
    async fn test_commands_and_inbound_share_one_task() {
        let transport = RecordingTransport::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (handle, task) = spawn_dispatcher(runtime(transport.clone(), ManualClock::new()), inbound_rx);

        let id = handle.call(|rt| rt.set("state.x", 1i64)).await.unwrap().unwrap();
        assert_eq!(id, EventId::ZERO);
        assert_eq!(transport.len(), 1);

        inbound_tx
            .send(Inbound::Set {
                path: PathAddress::parse("state.y").unwrap(),
                id: -1,
                value: Value::from("remote"),
            })
            .await
            .unwrap();
        // Commands queued after the message observe it once it has been applied
        let mut seen = None;
        for _ in 0..100 {
            seen = handle.call(|rt| rt.value("state.y")).await.unwrap();
            if seen.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen, Some(Value::from("remote")));

        drop(inbound_tx);
        let runtime = task.await.unwrap();
        assert_eq!(runtime.stats().received, 1);
        assert!(handle.is_closed());
        assert!(matches!(handle.call(|_| ()).await, Err(TetherError::RuntimeStopped)));
    }

    #[tokio::test]
    async fn test_ticks_raise_disconnected() {
        let clock = ManualClock::new();
        let (_inbound_tx, inbound_rx) = mpsc::channel(16);
        let (handle, task) = spawn_dispatcher(runtime(RecordingTransport::new(), clock.clone()), inbound_rx);

        handle.call(|rt| rt.set("state.x", 1i64)).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(2));

        let mut disconnected = false;
        for _ in 0..100 {
            disconnected = handle.call(|rt| rt.is_disconnected()).await.unwrap();
            if disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(disconnected);

        drop(handle);
        let runtime = task.await.unwrap();
        assert_eq!(runtime.stats().timeouts, 1);
    }
}
