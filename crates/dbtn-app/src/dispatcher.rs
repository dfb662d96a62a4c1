//! Routes device lines to UI events and deploy triggers
//!
//! The dispatcher follows whichever adapter the link supervisor currently
//! holds. When the adapter changes the old command stream is dropped before
//! the new one is subscribed, so lines are never read from two links.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use dbtn_ci::CiClientFactory;
use dbtn_core::prelude::*;
use dbtn_core::{CueEvent, EventBus, UiEvent};
use dbtn_link::{CommandStream, InboundCommand, LinkAdapter};

use crate::cue::CueSink;
use crate::orchestrator::DeployOrchestrator;

pub struct CommandDispatcher<F: CiClientFactory, S> {
    orchestrator: Arc<DeployOrchestrator<F, S>>,
    events: EventBus,
}

impl<F, S> CommandDispatcher<F, S>
where
    F: CiClientFactory,
    S: CueSink + Send + Sync + 'static,
{
    pub fn new(orchestrator: Arc<DeployOrchestrator<F, S>>, events: EventBus) -> Self {
        Self {
            orchestrator,
            events,
        }
    }

    /// Consume lines from the current adapter until `cancel` fires
    pub async fn run(
        &self,
        mut adapters: watch::Receiver<Option<Arc<LinkAdapter>>>,
        cancel: CancellationToken,
    ) {
        debug!("Command dispatcher started");

        'outer: loop {
            let current = adapters.borrow_and_update().clone();
            let mut stream = current.as_ref().map(|adapter| {
                debug!("Dispatching commands from {}", adapter.port_name());
                adapter.commands()
            });

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    changed = adapters.changed() => {
                        if changed.is_err() {
                            debug!("Adapter channel closed");
                            break 'outer;
                        }
                        break;
                    }
                    line = next_line(&mut stream) => match line {
                        Some(line) => self.dispatch(&line),
                        None => {
                            trace!("Command stream ended");
                            stream = None;
                        }
                    },
                }
            }
        }

        debug!("Command dispatcher stopped");
    }

    /// Handle one framed line from the device
    pub fn dispatch(&self, line: &str) {
        match InboundCommand::parse(line) {
            InboundCommand::ButtonPress => {
                debug!("Button pressed");
                self.events.publish(UiEvent::ButtonPressed);
                self.orchestrator.play_cue(CueEvent::ButtonPressed);
            }
            InboundCommand::ButtonRelease => {
                info!("Button released, starting deploy");
                self.events.publish(UiEvent::ButtonReleased);
                // Not awaited so the next line is read while CI is contacted
                self.orchestrator.spawn_trigger();
            }
            InboundCommand::Pong => trace!("Unsolicited PONG"),
            InboundCommand::Unknown(other) => debug!("Ignoring device output: {:?}", other),
        }
    }
}

/// Next line from `stream`, or pending forever when there is none
async fn next_line(stream: &mut Option<CommandStream>) -> Option<String> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MonitorTimings;
    use dbtn_ci::test_utils::StubCi;
    use dbtn_core::{CiConfig, DeployOutcome};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct RecordingCues(Mutex<Vec<CueEvent>>);

    impl CueSink for RecordingCues {
        async fn play(&self, cue: CueEvent) {
            self.0.lock().unwrap().push(cue);
        }
    }

    fn ci_config() -> CiConfig {
        CiConfig {
            base_url: "http://ci".to_string(),
            build_configuration_id: "Deploy".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }

    struct Harness {
        stub: StubCi,
        cues: Arc<RecordingCues>,
        events: EventBus,
        orchestrator: Arc<DeployOrchestrator<StubCi, RecordingCues>>,
        dispatcher: Arc<CommandDispatcher<StubCi, RecordingCues>>,
    }

    fn harness() -> Harness {
        let stub = StubCi::new();
        let cues = Arc::new(RecordingCues::default());
        let events = EventBus::new();
        let orchestrator = Arc::new(
            DeployOrchestrator::new(
                stub.clone(),
                ci_config(),
                Arc::clone(&cues),
                events.clone(),
                MonitorTimings::default(),
            )
            .unwrap(),
        );
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&orchestrator),
            events.clone(),
        ));
        Harness {
            stub,
            cues,
            events,
            orchestrator,
            dispatcher,
        }
    }

    async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<UiEvent>) -> UiEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_press_publishes_and_plays_cue() {
        let h = harness();
        let mut rx = h.events.subscribe();

        h.dispatcher.dispatch("BUTTONPRESS");
        assert_eq!(next_event(&mut rx).await, UiEvent::ButtonPressed);

        h.orchestrator.wait_idle().await;
        assert_eq!(*h.cues.0.lock().unwrap(), vec![CueEvent::ButtonPressed]);
        assert_eq!(h.stub.trigger_calls(), 0);
    }

    #[tokio::test]
    async fn test_release_triggers_deploy() {
        let h = harness();
        let mut rx = h.events.subscribe();

        h.dispatcher.dispatch("BUTTONRELEASE");
        assert_eq!(next_event(&mut rx).await, UiEvent::ButtonReleased);

        match next_event(&mut rx).await {
            UiEvent::BuildStatusChanged { attempt } => {
                assert_eq!(attempt.outcome, DeployOutcome::Queued)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.stub.trigger_calls(), 1);
        h.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_noise_is_ignored() {
        let h = harness();
        let mut rx = h.events.subscribe();

        h.dispatcher.dispatch("PONG");
        h.dispatcher.dispatch("boot v1.2");
        h.dispatcher.dispatch("");

        h.orchestrator.wait_idle().await;
        assert!(rx.try_recv().is_err());
        assert!(h.cues.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_follows_adapter_changes() {
        let h = harness();
        let mut rx = h.events.subscribe();
        let (tx, adapters) = watch::channel(None);
        let cancel = CancellationToken::new();

        let dispatcher = Arc::clone(&h.dispatcher);
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move { dispatcher.run(adapters, run_cancel).await });

        let (host, mut device) = tokio::io::duplex(256);
        let adapter = Arc::new(LinkAdapter::from_stream("TEST0", 9600, Box::new(host)));
        tx.send(Some(Arc::clone(&adapter))).unwrap();

        // Retry until the dispatcher has subscribed to the new stream
        let mut seen = None;
        for _ in 0..50 {
            device.write_all(b"BUTTONPRESS\n").await.unwrap();
            if let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                seen = Some(event);
                break;
            }
        }
        assert_eq!(seen, Some(UiEvent::ButtonPressed));

        tx.send(None).unwrap();
        adapter.disconnect().await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    async fn press_until_seen(
        device: &mut tokio::io::DuplexStream,
        rx: &mut tokio::sync::broadcast::Receiver<UiEvent>,
    ) {
        for _ in 0..50 {
            device.write_all(b"BUTTONPRESS\n").await.unwrap();
            if let Ok(Ok(UiEvent::ButtonPressed)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                return;
            }
        }
        panic!("press never dispatched");
    }

    #[tokio::test]
    async fn test_replaced_adapter_is_no_longer_read() {
        let h = harness();
        let mut rx = h.events.subscribe();
        let (tx, adapters) = watch::channel(None);
        let cancel = CancellationToken::new();

        let dispatcher = Arc::clone(&h.dispatcher);
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move { dispatcher.run(adapters, run_cancel).await });

        let (old_host, mut old_device) = tokio::io::duplex(256);
        let old = Arc::new(LinkAdapter::from_stream("OLD0", 9600, Box::new(old_host)));
        tx.send(Some(Arc::clone(&old))).unwrap();
        press_until_seen(&mut old_device, &mut rx).await;

        let (new_host, mut new_device) = tokio::io::duplex(256);
        let new = Arc::new(LinkAdapter::from_stream("NEW0", 9600, Box::new(new_host)));
        tx.send(Some(Arc::clone(&new))).unwrap();
        press_until_seen(&mut new_device, &mut rx).await;

        // The old link stays open but its lines must not reach the bus
        old_device.write_all(b"BUTTONRELEASE\n").await.unwrap();
        let stray = tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if let Ok(UiEvent::ButtonReleased) = rx.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(stray.is_err(), "release from the replaced adapter was dispatched");
        assert_eq!(h.stub.trigger_calls(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        old.disconnect().await;
        new.disconnect().await;
    }

    #[test]
    fn test_next_line_without_stream_stays_pending() {
        let mut stream = None;
        let mut next = tokio_test::task::spawn(next_line(&mut stream));
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled_without_adapter() {
        let h = harness();
        let (_tx, adapters) = watch::channel(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), h.dispatcher.run(adapters, cancel))
            .await
            .unwrap();
    }
}
