//! In-memory command sink for tests

use std::collections::HashSet;
use std::io;

use crate::error::LinkError;
use crate::link::CommandSink;
use crate::types::Command;

/// Records every command and fails the ones it is told to
#[derive(Debug, Default)]
pub struct ScriptedSink {
    /// Commands that reached the "device", in order
    pub sent: Vec<String>,
    /// Every send attempt, including failed ones
    pub attempted: Vec<String>,
    /// Commands that always fail
    fail_commands: HashSet<String>,
    /// Send indices (over all attempts) that fail
    fail_attempts: HashSet<usize>,
    refuse_connect: bool,
    connected: bool,
    pub closed: bool,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send of exactly this command fails
    pub fn fail_command(mut self, command: &str) -> Self {
        self.fail_commands.insert(command.to_string());
        self
    }

    /// The n-th send attempt (0-based) fails
    pub fn fail_attempt(mut self, n: usize) -> Self {
        self.fail_attempts.insert(n);
        self
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }
}

impl CommandSink for ScriptedSink {
    async fn ensure_connected(&mut self) -> Result<(), LinkError> {
        if self.refuse_connect {
            return Err(LinkError::ConnectFailed {
                endpoint: "scripted".to_string(),
                attempts: 1,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, command: &Command) -> Result<(), LinkError> {
        let wire = command.to_string();
        let index = self.attempted.len();
        self.attempted.push(wire.clone());

        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.fail_commands.contains(&wire) || self.fail_attempts.contains(&index) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure").into());
        }
        self.sent.push(wire);
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
        self.closed = true;
    }
}
