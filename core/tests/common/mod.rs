// Shared fixtures for the link integration tests
#![allow(dead_code)]

use contactlink_core::link::{ChannelListener, LinkManager, LinkServices, LinkSnapshot};
use contactlink_core::protocol::{SimBehavior, SimPeer};
use contactlink_core::{AppId, LinkConfig, LinkNotification, StaticForeground};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const BROWSER: &str = "com.example.browser";
pub const LAUNCHER: &str = "com.android.launcher";

pub struct Harness {
    pub manager: LinkManager,
    pub peer: SimPeer,
    pub foreground: StaticForeground,
    pub notifications: UnboundedReceiver<LinkNotification>,
}

impl Harness {
    /// Manager with sending and receiving enabled, `app` in the foreground
    pub fn start(behavior: SimBehavior, app: &str) -> Self {
        let peer = SimPeer::new(behavior);
        let foreground = StaticForeground::new(vec![AppId::new(app)]);
        let (listener, notifications) = ChannelListener::new();
        let services = LinkServices::new(
            peer.factory(),
            Arc::new(listener),
            Arc::new(foreground.clone()),
        )
        .with_handoff(peer.handoff());

        let manager = LinkManager::start(LinkConfig::default(), services).unwrap();
        manager.enable(true, true).unwrap();
        Self {
            manager,
            peer,
            foreground,
            notifications,
        }
    }

    /// Next notification; fails the test if none arrives within a minute
    pub async fn next(&mut self) -> LinkNotification {
        tokio::time::timeout(Duration::from_secs(60), self.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("listener channel closed")
    }

    /// Spin the runtime without letting paused time advance until `check`
    /// holds for the current snapshot
    pub async fn settle<F>(&self, check: F) -> LinkSnapshot
    where
        F: Fn(&LinkSnapshot) -> bool,
    {
        for _ in 0..10_000 {
            let snapshot = self.manager.snapshot();
            if check(&snapshot) {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
        panic!("link never settled: {:?}", self.manager.snapshot());
    }

    /// Spin until the peer has no open clients
    pub async fn clients_closed(&self) {
        for _ in 0..10_000 {
            if self.peer.open_clients() == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{} clients left open", self.peer.open_clients());
    }

    pub fn assert_quiet(&mut self) {
        if let Ok(notification) = self.notifications.try_recv() {
            panic!("unexpected notification {:?}", notification);
        }
    }
}
