//! Chat presence registry.
//!
//! One actor task owns the map of live connections; everything else talks
//! to it through [`ChatHub`] over an mpsc channel. The actor only pushes
//! text into per-peer unbounded outboxes and never awaits socket I/O, so a
//! slow client cannot stall a relay. A peer whose outbox is gone is
//! dropped on the spot.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    frames::ServerFrame,
    notifier::{unattended_message, EmailSender},
};

pub type ConnId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatIdentity {
    pub username: String,
    pub role: String,
}

impl ChatIdentity {
    pub fn is_admin(&self) -> bool {
        self.role.trim().eq_ignore_ascii_case("admin")
    }
}

/// Outcome of one relay, as seen by the actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub dropped: usize,
    pub admin_online: bool,
    pub escalated: bool,
}

struct Peer {
    identity: ChatIdentity,
    outbox: mpsc::UnboundedSender<String>,
}

enum Command {
    Join {
        conn: ConnId,
        identity: ChatIdentity,
        outbox: mpsc::UnboundedSender<String>,
    },
    Leave {
        conn: ConnId,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ChatIdentity>>,
    },
    Relay {
        sender: String,
        text: String,
        reply: oneshot::Sender<RelayReport>,
    },
}

/// Handle to the registry actor.
#[derive(Clone)]
pub struct ChatHub {
    tx: mpsc::UnboundedSender<Command>,
    next_conn: Arc<AtomicU64>,
    notifier: Arc<dyn EmailSender>,
    operator_email: String,
}

impl ChatHub {
    /// Starts the actor on the current runtime.
    pub fn spawn(notifier: Arc<dyn EmailSender>, operator_email: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self {
            tx,
            next_conn: Arc::new(AtomicU64::new(1)),
            notifier,
            operator_email: operator_email.into(),
        }
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers (or re-registers) a connection under `identity`.
    pub fn join(&self, conn: ConnId, identity: ChatIdentity, outbox: mpsc::UnboundedSender<String>) {
        self.command(Command::Join {
            conn,
            identity,
            outbox,
        });
    }

    pub fn leave(&self, conn: ConnId) {
        self.command(Command::Leave { conn });
    }

    pub async fn snapshot(&self) -> anyhow::Result<Vec<ChatIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply });
        Ok(rx.await?)
    }

    /// Relays a message to the sender's own connections and to every other
    /// admin. With no admin online the operator gets one email.
    pub async fn relay(
        &self,
        sender: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<RelayReport> {
        let text = ServerFrame::Message {
            from: sender.to_string(),
            role: role.to_string(),
            content: content.to_string(),
        }
        .to_text();
        let (reply, rx) = oneshot::channel();
        self.command(Command::Relay {
            sender: sender.to_string(),
            text,
            reply,
        });
        let mut report = rx.await?;

        if !report.admin_online {
            let email = unattended_message(&self.operator_email, sender, content);
            match self.notifier.send(&email).await {
                Ok(()) => report.escalated = true,
                Err(e) => error!(error = %e, to = %email.to, "chat notification failed"),
            }
        }
        Ok(report)
    }

    fn command(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            error!("chat registry is not running");
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut peers: HashMap<ConnId, Peer> = HashMap::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Join {
                conn,
                identity,
                outbox,
            } => {
                info!(conn, username = %identity.username, role = %identity.role, "chat join");
                peers.insert(conn, Peer { identity, outbox });
            }
            Command::Leave { conn } => {
                if let Some(peer) = peers.remove(&conn) {
                    info!(conn, username = %peer.identity.username, "chat leave");
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(peers.values().map(|p| p.identity.clone()).collect());
            }
            Command::Relay {
                sender,
                text,
                reply,
            } => {
                let report = relay(&mut peers, &sender, &text);
                let _ = reply.send(report);
            }
        }
    }
    debug!("chat registry stopped");
}

fn is_recipient(identity: &ChatIdentity, sender: &str) -> bool {
    identity.username == sender || (identity.is_admin() && identity.username != sender)
}

fn relay(peers: &mut HashMap<ConnId, Peer>, sender: &str, text: &str) -> RelayReport {
    let mut report = RelayReport {
        admin_online: peers.values().any(|p| p.identity.is_admin()),
        ..Default::default()
    };
    let mut dead = Vec::new();
    for (conn, peer) in peers.iter() {
        if !is_recipient(&peer.identity, sender) {
            continue;
        }
        if peer.outbox.send(text.to_string()).is_ok() {
            report.delivered += 1;
        } else {
            warn!(conn, username = %peer.identity.username, "chat delivery failed; dropping peer");
            dead.push(*conn);
        }
    }
    report.dropped = dead.len();
    for conn in dead {
        peers.remove(&conn);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::notifier::RecordingEmailSender;

    fn identity(username: &str, role: &str) -> ChatIdentity {
        ChatIdentity {
            username: username.into(),
            role: role.into(),
        }
    }

    fn hub() -> (ChatHub, Arc<RecordingEmailSender>) {
        let sender = Arc::new(RecordingEmailSender::default());
        (ChatHub::spawn(sender.clone(), "ops@example.com"), sender)
    }

    fn connect(
        hub: &ChatHub,
        username: &str,
        role: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let conn = hub.next_conn_id();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.join(conn, identity(username, role), tx);
        (conn, rx)
    }

    #[tokio::test]
    async fn relays_to_sender_and_other_admins_only() {
        let (hub, mail) = hub();
        let (_, mut bob) = connect(&hub, "bob", "user");
        let (_, mut bob_tab2) = connect(&hub, "bob", "user");
        let (_, mut carol) = connect(&hub, "carol", "user");
        let (_, mut root) = connect(&hub, "root", "admin");
        let (_, mut hr) = connect(&hub, "hr", "adminhr");

        let report = hub.relay("bob", "user", "hello").await.unwrap();
        assert_eq!(report.delivered, 3);
        assert!(report.admin_online);
        assert!(!report.escalated);

        for rx in [&mut bob, &mut bob_tab2, &mut root] {
            let text = rx.try_recv().unwrap();
            let v: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v["type"], "message");
            assert_eq!(v["content"], "hello");
        }
        assert!(carol.try_recv().is_err());
        assert!(hr.try_recv().is_err());
        assert!(mail.sent().is_empty());
    }

    #[tokio::test]
    async fn admin_sender_is_not_echoed_twice() {
        let (hub, _) = hub();
        let (_, mut root) = connect(&hub, "root", "admin");
        let (_, mut other_admin) = connect(&hub, "boss", "Admin ");

        let report = hub.relay("root", "admin", "hi").await.unwrap();
        assert_eq!(report.delivered, 2);
        assert!(root.try_recv().is_ok());
        assert!(root.try_recv().is_err());
        assert!(other_admin.try_recv().is_ok());
    }

    #[tokio::test]
    async fn escalates_once_when_no_admin_online() {
        let (hub, mail) = hub();
        let (_, mut bob) = connect(&hub, "bob", "user");
        let (_, _it) = connect(&hub, "it", "adminit");

        let report = hub.relay("bob", "user", "anyone there?").await.unwrap();
        assert!(!report.admin_online);
        assert!(report.escalated);
        assert_eq!(report.delivered, 1);
        assert!(bob.try_recv().is_ok());

        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.com");
        assert!(sent[0].body.contains("bob"));
        assert!(sent[0].body.contains("anyone there?"));
    }

    #[tokio::test]
    async fn dead_peer_is_dropped_and_others_still_receive() {
        let (hub, _) = hub();
        let (_, mut bob) = connect(&hub, "bob", "user");
        let (_, root) = connect(&hub, "root", "admin");
        drop(root);

        let report = hub.relay("bob", "user", "ping").await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert!(bob.try_recv().is_ok());

        let online = hub.snapshot().await.unwrap();
        assert_eq!(online, vec![identity("bob", "user")]);
    }

    #[tokio::test]
    async fn leave_removes_connection() {
        let (hub, _) = hub();
        let (conn, _rx) = connect(&hub, "bob", "user");
        assert_eq!(hub.snapshot().await.unwrap().len(), 1);
        hub.leave(conn);
        assert!(hub.snapshot().await.unwrap().is_empty());
    }
}
