//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{AddonEvent, RepositoryEvent, ServerEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients.
pub trait EventEmitter: Send + Sync {
    /// Emits an add-on lifecycle event.
    fn emit_addon(&self, event: AddonEvent);

    /// Emits a repository refresh event.
    fn emit_repository(&self, event: RepositoryEvent);

    /// Emits a device registry event.
    fn emit_server(&self, event: ServerEvent);
}

/// No-op emitter for tests and embedders that consume events elsewhere.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_addon(&self, _event: AddonEvent) {
        // No-op
    }

    fn emit_repository(&self, _event: RepositoryEvent) {
        // No-op
    }

    fn emit_server(&self, _event: ServerEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Useful for debugging event flow
/// or in development environments.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_addon(&self, event: AddonEvent) {
        tracing::debug!(?event, "addon_event");
    }

    fn emit_repository(&self, event: RepositoryEvent) {
        tracing::debug!(?event, "repository_event");
    }

    fn emit_server(&self, event: ServerEvent) {
        tracing::debug!(?event, "server_event");
    }
}
