//! Injected identity of the signed-in user.
//!
//! The controller never reads authentication state from globals. It is
//! handed an [`IdentityWatch`] and reloads when the watched user changes.

use formkeep_core::UserId;
use tokio::sync::watch;

/// Publishing side, owned by whatever resolves authentication.
#[derive(Debug)]
pub struct IdentitySource {
    tx: watch::Sender<Option<UserId>>,
}

impl IdentitySource {
    /// Create a source and its first watcher.
    pub fn new(initial: Option<UserId>) -> (Self, IdentityWatch) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, IdentityWatch { rx })
    }

    /// Publish a signed-in user.
    pub fn sign_in(&self, user_id: UserId) {
        self.tx.send_replace(Some(user_id));
    }

    /// Publish that nobody is signed in.
    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }

    /// Another watcher on this source.
    pub fn watch(&self) -> IdentityWatch {
        IdentityWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side handed to controllers.
#[derive(Debug, Clone)]
pub struct IdentityWatch {
    rx: watch::Receiver<Option<UserId>>,
}

impl IdentityWatch {
    /// A watcher whose user never changes.
    pub fn fixed(user_id: Option<UserId>) -> Self {
        let (_tx, rx) = watch::channel(user_id);
        Self { rx }
    }

    /// A watcher with no user, forever.
    pub fn anonymous() -> Self {
        Self::fixed(None)
    }

    /// The user currently published, if any.
    pub fn current(&self) -> Option<UserId> {
        self.rx.borrow().clone()
    }

    /// Wait until a new value is published.
    ///
    /// Returns `false` once the source is gone and no change can follow.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
