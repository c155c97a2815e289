//! Scripted in-memory receiver used by the supervision tests

#![allow(dead_code)]

use async_trait::async_trait;
use dashcast_cast::{
    ApplicationStatus, CastConnection, CastConnector, CastError, MediaDescriptor, PlayerState, PlayerStatus,
    ReceiverSession, ReceiverStatus,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

pub const APP_ID: &str = "14E2E176";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Launch(String),
    ReceiverStatus,
    PlayerStatus,
    Load(MediaDescriptor),
    Stop,
    Close,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    connect_failures: usize,
    connect_hangs: bool,
    status_failures: usize,
    stop_hangs: bool,
    receiver: Option<ReceiverStatus>,
    players: VecDeque<PlayerStatus>,
}

#[derive(Clone)]
pub struct FakeCast {
    script: Arc<Mutex<Script>>,
    fault: Arc<watch::Sender<(u64, String)>>,
}

impl Default for FakeCast {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCast {
    pub fn new() -> Self {
        let (fault, _) = watch::channel((0, String::new()));
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            fault: Arc::new(fault),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.script.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn fail_connects(&self, times: usize) {
        self.script.lock().connect_failures = times;
    }

    pub fn hang_connects(&self) {
        self.script.lock().connect_hangs = true;
    }

    pub fn fail_status(&self, times: usize) {
        self.script.lock().status_failures = times;
    }

    pub fn hang_stop(&self) {
        self.script.lock().stop_hangs = true;
    }

    pub fn show_receiver(&self, status: ReceiverStatus) {
        self.script.lock().receiver = Some(status);
    }

    /// Player statuses returned by successive polls; PLAYING once exhausted
    pub fn queue_players(&self, statuses: impl IntoIterator<Item = PlayerStatus>) {
        self.script.lock().players.extend(statuses);
    }

    /// Fault every connection opened so far
    pub fn raise_fault(&self, error: &str) {
        self.fault.send_modify(|(epoch, message)| {
            *epoch += 1;
            *message = error.to_string();
        });
    }

    fn record(&self, call: Call) {
        self.script.lock().calls.push(call);
    }
}

pub fn idle_screen() -> ReceiverStatus {
    ReceiverStatus {
        applications: vec![ApplicationStatus {
            app_id: "E8C28D3C".to_string(),
            is_idle_screen: true,
            display_name: Some("Backdrop".to_string()),
        }],
    }
}

pub fn dashboard_running() -> ReceiverStatus {
    ReceiverStatus {
        applications: vec![ApplicationStatus {
            app_id: APP_ID.to_string(),
            is_idle_screen: false,
            display_name: Some("Dashboard".to_string()),
        }],
    }
}

#[async_trait]
impl CastConnector for FakeCast {
    async fn connect(&self, host: &str) -> Result<Box<dyn CastConnection>, CastError> {
        self.record(Call::Connect(host.to_string()));
        let hangs = {
            let mut script = self.script.lock();
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(CastError::Transport("connection refused".to_string()));
            }
            script.connect_hangs
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        let epoch = self.fault.borrow().0;
        Ok(Box::new(FakeConnection {
            cast: self.clone(),
            epoch,
        }))
    }
}

struct FakeConnection {
    cast: FakeCast,
    epoch: u64,
}

#[async_trait]
impl CastConnection for FakeConnection {
    async fn launch(&self, app_id: &str) -> Result<Box<dyn ReceiverSession>, CastError> {
        self.cast.record(Call::Launch(app_id.to_string()));
        Ok(Box::new(FakeSession { cast: self.cast.clone() }))
    }

    async fn receiver_status(&self) -> Result<ReceiverStatus, CastError> {
        self.cast.record(Call::ReceiverStatus);
        let mut script = self.cast.script.lock();
        if script.status_failures > 0 {
            script.status_failures -= 1;
            return Err(CastError::Status("socket closed".to_string()));
        }
        Ok(script.receiver.clone().unwrap_or_else(dashboard_running))
    }

    async fn fault(&self) -> CastError {
        let mut rx = self.cast.fault.subscribe();
        let error = rx
            .wait_for(|(epoch, _)| *epoch > self.epoch)
            .await
            .ok()
            .map(|fault| fault.1.clone());
        match error {
            Some(error) => CastError::Transport(error),
            None => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.cast.record(Call::Close);
    }
}

struct FakeSession {
    cast: FakeCast,
}

#[async_trait]
impl ReceiverSession for FakeSession {
    async fn player_status(&self) -> Result<PlayerStatus, CastError> {
        self.cast.record(Call::PlayerStatus);
        Ok(self
            .cast
            .script
            .lock()
            .players
            .pop_front()
            .unwrap_or(PlayerStatus::new(PlayerState::Playing)))
    }

    async fn load(&self, media: &MediaDescriptor) -> Result<PlayerStatus, CastError> {
        self.cast.record(Call::Load(media.clone()));
        Ok(PlayerStatus::new(PlayerState::Buffering).at(0.0))
    }

    async fn stop(&self) -> Result<(), CastError> {
        self.cast.record(Call::Stop);
        let hangs = self.cast.script.lock().stop_hangs;
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
