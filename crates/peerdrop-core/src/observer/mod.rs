//! Progress and result reporting.
//!
//! The core never touches presentation state directly. Every component
//! reports through a [`ShareObserver`], invoked from whatever task performs
//! the work. Front ends that own a UI thread can use [`ChannelObserver`] to
//! turn the callbacks into a stream of [`ShareEvent`]s and consume them
//! wherever their state lives.

use tokio::sync::mpsc;

use crate::error::Error;

/// A progress reading: `current` out of `max`.
///
/// `max` may grow between readings (directory walks discover more files as
/// they go).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units completed so far
    pub current: u64,
    /// Units expected in total
    pub max: u64,
}

impl Progress {
    /// Create a progress reading.
    #[must_use]
    pub const fn new(current: u64, max: u64) -> Self {
        Self { current, max }
    }

    /// Completion as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            (self.current as f64 / self.max as f64) * 100.0
        }
    }
}

/// Category of a user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer does not permit this device to send to it
    NotAllowed,
    /// The peer rejected the proposal for another reason
    Rejected,
    /// The peer could not be reached
    Connection,
    /// The hotspot could not be joined in time
    Hotspot,
    /// The peer answered with something that is not a valid response
    Protocol,
    /// Local bookkeeping failed
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed => write!(f, "Not allowed"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Connection => write!(f, "Connection problem"),
            Self::Hotspot => write!(f, "Hotspot unreachable"),
            Self::Protocol => write!(f, "Protocol error"),
            Self::Storage => write!(f, "Storage error"),
        }
    }
}

impl From<&Error> for ErrorKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::HotspotUnreachable(_) | Error::AssociationFailed(_) => Self::Hotspot,
            Error::ProtocolError(_)
            | Error::UnsupportedVersion { .. }
            | Error::UnexpectedMessage { .. }
            | Error::Serialization(_)
            | Error::AcquaintanceRefused(_) => Self::Protocol,
            Error::RecordNotFound { .. } | Error::StoreError(_) | Error::ConfigError(_) => {
                Self::Storage
            }
            _ => Self::Connection,
        }
    }
}

/// Callback surface consumed by the core.
///
/// All methods default to doing nothing, so observers implement only what
/// they display.
pub trait ShareObserver: Send + Sync {
    /// A unit of work finished.
    fn on_progress(&self, _progress: Progress) {}

    /// The hotspot gateway answered.
    fn on_reachable(&self) {}

    /// A file batch was accepted and fully registered.
    fn on_session_ready(&self, _group_id: i64) {}

    /// Something the user should hear about went wrong.
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
}

impl ShareObserver for () {}

/// An observer event, as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ShareEvent {
    /// See [`ShareObserver::on_progress`]
    Progress(Progress),
    /// See [`ShareObserver::on_reachable`]
    Reachable,
    /// See [`ShareObserver::on_session_ready`]
    SessionReady(i64),
    /// See [`ShareObserver::on_error`]
    Error(ErrorKind, String),
}

/// Observer that forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ShareEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its event stream.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ShareEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ShareEvent) {
        // A closed receiver means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl ShareObserver for ChannelObserver {
    fn on_progress(&self, progress: Progress) {
        self.send(ShareEvent::Progress(progress));
    }

    fn on_reachable(&self) {
        self.send(ShareEvent::Reachable);
    }

    fn on_session_ready(&self, group_id: i64) {
        self.send(ShareEvent::SessionReady(group_id));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.send(ShareEvent::Error(kind, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        assert!((Progress::new(1, 4).percentage() - 25.0).abs() < f64::EPSILON);
        assert!(Progress::new(0, 0).percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn test_channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();

        observer.on_progress(Progress::new(1, 2));
        observer.on_reachable();
        observer.on_session_ready(42);
        observer.on_error(ErrorKind::NotAllowed, "nope");

        assert_eq!(rx.try_recv().unwrap(), ShareEvent::Progress(Progress::new(1, 2)));
        assert_eq!(rx.try_recv().unwrap(), ShareEvent::Reachable);
        assert_eq!(rx.try_recv().unwrap(), ShareEvent::SessionReady(42));
        assert_eq!(
            rx.try_recv().unwrap(),
            ShareEvent::Error(ErrorKind::NotAllowed, "nope".to_string())
        );
    }

    #[test]
    fn test_error_kind_from_error() {
        assert_eq!(
            ErrorKind::from(&Error::ProtocolError("x".into())),
            ErrorKind::Protocol
        );
        assert_eq!(ErrorKind::from(&Error::Timeout(5)), ErrorKind::Connection);
        assert_eq!(
            ErrorKind::from(&Error::StoreError("x".into())),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_reachable();
    }
}
