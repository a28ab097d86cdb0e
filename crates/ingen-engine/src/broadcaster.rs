//! Client registry and notification fan-out.
//!
//! Clients register a channel sender and receive the engine's outbound
//! [`ClientMessage`] stream: responses to their own requests, broadcasts
//! of every applied mutation, and per-cycle port peaks/values forwarded
//! from the realtime notice channel. Slow clients lose messages rather
//! than stalling the engine.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use ingen_api::{ClientMessage, Path};
use parking_lot::Mutex;

use crate::run_context::Notice;

/// Identifies a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Fan-out hub for the engine's outbound message stream.
pub struct Broadcaster {
    clients: Mutex<Vec<(ClientId, Sender<ClientMessage>)>>,
    /// Port broadcast cookies → paths, for realtime notices.
    cookies: Mutex<HashMap<u64, Path>>,
    next_client: Mutex<u64>,
}

impl Broadcaster {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            cookies: Mutex::new(HashMap::new()),
            next_client: Mutex::new(1),
        }
    }

    /// Registers a client; messages are delivered through `sender`.
    pub fn register(&self, sender: Sender<ClientMessage>) -> ClientId {
        let mut next = self.next_client.lock();
        let id = ClientId(*next);
        *next += 1;
        self.clients.lock().push((id, sender));
        id
    }

    /// Removes a client.
    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().retain(|(c, _)| *c != id);
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Sends to every registered client.
    pub fn send_all(&self, msg: ClientMessage) {
        for (_, sender) in self.clients.lock().iter() {
            let _ = sender.try_send(msg.clone());
        }
    }

    /// Sends to one client.
    pub fn send_to(&self, id: ClientId, msg: ClientMessage) {
        if let Some((_, sender)) = self.clients.lock().iter().find(|(c, _)| *c == id) {
            let _ = sender.try_send(msg);
        }
    }

    /// Associates a port's broadcast cookie with its path.
    pub fn register_cookie(&self, cookie: u64, path: Path) {
        self.cookies.lock().insert(cookie, path);
    }

    /// Drops a cookie mapping (port deleted).
    pub fn unregister_cookie(&self, cookie: u64) {
        self.cookies.lock().remove(&cookie);
    }

    /// Rewrites cookie paths under a moved entity.
    pub fn rebase_cookies(&self, old_base: &Path, new_base: &Path) {
        let mut cookies = self.cookies.lock();
        for path in cookies.values_mut() {
            if old_base.is_ancestor_of_or_self(path) {
                *path = path.rebased(old_base, new_base);
            }
        }
    }

    /// Translates a realtime notice into client messages.
    pub fn forward_notice(&self, notice: Notice) {
        match notice {
            Notice::PortPeak { cookie, peak } => {
                if let Some(path) = self.cookies.lock().get(&cookie).cloned() {
                    self.send_all(ClientMessage::SetProperty {
                        subject: path,
                        key: "ingen:activity".to_owned(),
                        value: ingen_api::Atom::Float(peak),
                    });
                }
            }
            Notice::PortValue { cookie, value } => {
                if let Some(path) = self.cookies.lock().get(&cookie).cloned() {
                    self.send_all(ClientMessage::SetProperty {
                        subject: path,
                        key: "ingen:value".to_owned(),
                        value: ingen_api::Atom::Float(value),
                    });
                }
            }
            Notice::RtError { kind } => {
                log::warn!("realtime error: {:?}", kind);
                self.send_all(ClientMessage::Error {
                    message: format!("realtime error: {:?}", kind),
                });
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn register_send_unregister() {
        let b = Broadcaster::new();
        let (tx, rx) = bounded(4);
        let id = b.register(tx);
        assert_eq!(b.client_count(), 1);

        b.send_all(ClientMessage::Error {
            message: "hello".into(),
        });
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Error { .. })));

        b.unregister(id);
        assert_eq!(b.client_count(), 0);
    }

    #[test]
    fn send_to_targets_one_client() {
        let b = Broadcaster::new();
        let (tx1, rx1) = bounded(4);
        let (tx2, rx2) = bounded(4);
        let c1 = b.register(tx1);
        b.register(tx2);

        b.send_to(c1, ClientMessage::Undo);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn peak_notices_resolve_cookie_paths() {
        let b = Broadcaster::new();
        let (tx, rx) = bounded(4);
        b.register(tx);
        b.register_cookie(9, Path::parse("/osc/o").unwrap());

        b.forward_notice(Notice::PortPeak { cookie: 9, peak: 0.5 });
        match rx.try_recv().unwrap() {
            ClientMessage::SetProperty { subject, value, .. } => {
                assert_eq!(subject.as_str(), "/osc/o");
                assert_eq!(value, ingen_api::Atom::Float(0.5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cookies_follow_moves() {
        let b = Broadcaster::new();
        b.register_cookie(1, Path::parse("/a/x/out").unwrap());
        b.rebase_cookies(
            &Path::parse("/a/x").unwrap(),
            &Path::parse("/a/y").unwrap(),
        );
        assert_eq!(
            b.cookies.lock().get(&1).unwrap().as_str(),
            "/a/y/out"
        );
    }
}
