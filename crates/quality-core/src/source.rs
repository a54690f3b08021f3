//! Boundary traits to the transport and media layers
//!
//! Both traits are implemented outside this crate: the signaling/transport
//! layer supplies statistics, and the media layer applies adaptation
//! commands. This crate never touches media APIs directly.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::adaptation::AdaptationCommand;
use crate::error::Result;
use crate::types::{ConnectionId, RawSample};

/// Source of cumulative transport statistics for a connection
///
/// Counters must be non-decreasing between calls for the rate math to be
/// meaningful. Return [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
/// once the connection is gone, which ends monitoring; any other error skips
/// a single tick.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn get_stats(&self, connection_id: &ConnectionId) -> Result<RawSample>;
}

/// Receiver of adaptation commands
///
/// Called synchronously from the tick task, so implementations should hand
/// the command off (for example over a channel) rather than renegotiate
/// inline. Errors are logged and otherwise ignored.
pub trait MediaControlSink: Send + Sync {
    fn submit(&self, command: &AdaptationCommand) -> Result<()>;
}

/// Sink that drops every command; used when only events are wanted
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MediaControlSink for NullSink {
    fn submit(&self, command: &AdaptationCommand) -> Result<()> {
        trace!(connection_id = %command.connection_id, "Dropping adaptation command");
        Ok(())
    }
}

/// Sink that keeps every command in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<AdaptationCommand>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<AdaptationCommand> {
        self.commands.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

impl MediaControlSink for RecordingSink {
    fn submit(&self, command: &AdaptationCommand) -> Result<()> {
        self.commands.lock().push(command.clone());
        Ok(())
    }
}
