//! Routes received text to the injection queue.
//!
//! Two kinds of text arrive from the network:
//!
//! - **Chat messages** are broadcast to everyone. Only the node currently
//!   acting as host injects them, and never its own messages echoed back.
//! - **Transfer payloads** arrive over a session the local user explicitly
//!   approved, so they are injected whenever a target is selected,
//!   regardless of the host flag.

use std::net::SocketAddr;
use std::sync::Arc;

use lanrelay_core::protocol::sanitize_display_name;
use lanrelay_core::ChatMessage;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::host_role::HostRole;
use crate::application::inject_text::InjectionQueue;

/// Receives decoded payloads from an accepted transfer session.
pub trait PayloadSink: Send + Sync {
    fn deliver(&self, from: SocketAddr, payload: String);
}

/// What [`ChatRelay::handle_chat`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Queued for injection under this job id.
    Injected(Uuid),
    /// This node is not the host.
    NotHost,
    /// The message carries our own sender name.
    OwnMessage,
    /// No target is selected.
    NoTarget,
}

pub struct ChatRelay {
    /// Sanitized the same way outgoing senders are.
    own_name: String,
    role: Arc<HostRole>,
    queue: InjectionQueue,
}

impl ChatRelay {
    pub fn new(own_name: &str, role: Arc<HostRole>, queue: InjectionQueue) -> Self {
        Self {
            own_name: sanitize_display_name(own_name),
            role,
            queue,
        }
    }

    pub fn handle_chat(&self, message: &ChatMessage) -> RelayDecision {
        if message.sender == self.own_name {
            return RelayDecision::OwnMessage;
        }
        if !self.role.is_host() {
            return RelayDecision::NotHost;
        }
        let Some(target) = self.role.target() else {
            debug!("chat from {} not injected: no target selected", message.sender);
            return RelayDecision::NoTarget;
        };
        let job = self.queue.submit(target, message.content.clone());
        debug!("chat from {} queued as job {job}", message.sender);
        RelayDecision::Injected(job)
    }
}

impl PayloadSink for ChatRelay {
    fn deliver(&self, from: SocketAddr, payload: String) {
        match self.role.target() {
            Some(target) => {
                let job = self.queue.submit(target, payload);
                debug!("transfer payload from {from} queued as job {job}");
            }
            None => info!("transfer payload from {from} dropped: no target selected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{event_channel, EventReceiver, NodeEvent};
    use crate::application::inject_text::{
        InjectionConfig, InputInjector, TargetHandle, WindowHandle,
    };
    use crate::infrastructure::input_injection::mock::MockInputInjector;
    use lanrelay_core::{decode_chat, encode_chat};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    struct Fixture {
        relay: ChatRelay,
        role: Arc<HostRole>,
        injector: Arc<MockInputInjector>,
        events: EventReceiver,
        running: Arc<AtomicBool>,
        consumer: JoinHandle<()>,
    }

    impl Fixture {
        fn new(is_host: bool) -> Self {
            Self::named("me", is_host)
        }

        fn named(own_name: &str, is_host: bool) -> Self {
            let injector = Arc::new(MockInputInjector::new());
            let (tx, events) = event_channel();
            let running = Arc::new(AtomicBool::new(true));
            let config = InjectionConfig {
                retry_delay: Duration::from_millis(5),
                idle_poll: Duration::from_millis(5),
                activation_settle: Duration::ZERO,
                ..InjectionConfig::default()
            };
            let (queue, consumer) = InjectionQueue::start(
                Arc::clone(&injector) as Arc<dyn InputInjector>,
                config,
                tx,
                Arc::clone(&running),
            )
            .unwrap();
            let role = Arc::new(HostRole::new(is_host));
            Self {
                relay: ChatRelay::new(own_name, Arc::clone(&role), queue),
                role,
                injector,
                events,
                running,
                consumer,
            }
        }

        fn select_target(&self) {
            self.role
                .set_target(Some(TargetHandle::window(WindowHandle::new(3, "Chat"))));
        }

        fn wait_outcome(&mut self) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Ok(NodeEvent::InjectionOutcome(o)) = self.events.try_recv() {
                    return o.success;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            panic!("no outcome");
        }

        fn stop(self) {
            self.running.store(false, Ordering::Relaxed);
            self.consumer.join().unwrap();
        }
    }

    #[test]
    fn test_host_with_target_injects_chat_content() {
        // Arrange
        let mut fx = Fixture::new(true);
        fx.select_target();

        // Act
        let decision = fx.relay.handle_chat(&ChatMessage::new("alice", "hi|there"));

        // Assert
        assert!(matches!(decision, RelayDecision::Injected(_)));
        assert!(fx.wait_outcome());
        assert_eq!(fx.injector.typed_texts(), vec!["hi|there".to_string()]);
        fx.stop();
    }

    #[test]
    fn test_non_host_does_not_inject_chat() {
        let fx = Fixture::new(false);
        fx.select_target();
        assert_eq!(
            fx.relay.handle_chat(&ChatMessage::new("alice", "hi")),
            RelayDecision::NotHost
        );
        fx.stop();
    }

    #[test]
    fn test_own_messages_are_never_injected() {
        let fx = Fixture::new(true);
        fx.select_target();
        assert_eq!(
            fx.relay.handle_chat(&ChatMessage::new("me", "echo")),
            RelayDecision::OwnMessage
        );
        fx.stop();
    }

    #[test]
    fn test_own_echo_recognised_when_name_contains_delimiter() {
        // Arrange
        let fx = Fixture::named("desk|2", true);
        fx.select_target();
        let echoed = decode_chat(&encode_chat(&ChatMessage::new("desk|2", "echo"))).unwrap();

        // Act
        let decision = fx.relay.handle_chat(&echoed);

        // Assert
        assert_eq!(echoed.sender, "desk_2");
        assert_eq!(decision, RelayDecision::OwnMessage);
        fx.stop();
    }

    #[test]
    fn test_host_without_target_reports_no_target() {
        let fx = Fixture::new(true);
        assert_eq!(
            fx.relay.handle_chat(&ChatMessage::new("alice", "hi")),
            RelayDecision::NoTarget
        );
        fx.stop();
    }

    #[test]
    fn test_transfer_payload_injected_without_host_role() {
        // Arrange
        let mut fx = Fixture::new(false);
        fx.select_target();

        // Act
        fx.relay
            .deliver("10.0.0.5:40000".parse().unwrap(), "payload".to_string());

        // Assert
        assert!(fx.wait_outcome());
        assert_eq!(fx.injector.typed_texts(), vec!["payload".to_string()]);
        fx.stop();
    }

    #[test]
    fn test_transfer_payload_dropped_without_target() {
        let fx = Fixture::new(true);
        fx.relay
            .deliver("10.0.0.5:40000".parse().unwrap(), "payload".to_string());
        std::thread::sleep(Duration::from_millis(50));
        assert!(fx.injector.typed_texts().is_empty());
        fx.stop();
    }

    #[test]
    fn test_failed_injection_is_reported_through_events() {
        let mut fx = Fixture::new(true);
        fx.select_target();
        fx.injector.fail_always();

        fx.relay.handle_chat(&ChatMessage::new("alice", "hi"));

        assert!(!fx.wait_outcome());
        fx.stop();
    }
}
