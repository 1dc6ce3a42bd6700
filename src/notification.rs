//! Notifications from the driver to the application.
//!
//! Nothing real-time sends on this channel. The callback reports through
//! the failure queue and the file writer through its completion channel;
//! [`SoundDriver::housekeeping`](crate::SoundDriver::housekeeping) forwards
//! both here.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tessitura_core::FailureCode;
use tessitura_stream::AudioFileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Failure(FailureCode),
    /// A recording was closed and its file finalized.
    RecordComplete(AudioFileId),
    /// Failures dropped because the real-time queue was full.
    FailuresDropped(u64),
}

/// Unbounded notification channel. Cloned receivers share the stream.
pub(crate) struct Notifier {
    tx: Sender<Notification>,
    rx: Receiver<Notification>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn send(&self, notification: Notification) {
        // Cannot fail: we hold a receiver.
        let _ = self.tx.send(notification);
    }

    pub(crate) fn receiver(&self) -> Receiver<Notification> {
        self.rx.clone()
    }

    pub(crate) fn drain(&self) -> Vec<Notification> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(n) => out.push(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_in_order() {
        let notifier = Notifier::new();
        notifier.send(Notification::Failure(FailureCode::MixUnderrun));
        notifier.send(Notification::RecordComplete(AudioFileId(3)));

        let rx = notifier.receiver();
        assert_eq!(
            notifier.drain(),
            vec![
                Notification::Failure(FailureCode::MixUnderrun),
                Notification::RecordComplete(AudioFileId(3)),
            ]
        );
        assert!(rx.try_recv().is_err());
    }
}
