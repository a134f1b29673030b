//! Host address pool.
//!
//! The pool is an actor: sessions and protocols talk to it through a cloned
//! [`Hosts`] handle and never share its state. The pool is capacity-bounded,
//! deduplicated by authority, and persisted to a line-oriented cache file
//! across restarts.

use crate::authority::Authority;
use crate::error::{NetworkError, NetworkResult};
use crate::messages::AddressItem;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum HostsCommand {
    Take(oneshot::Sender<NetworkResult<AddressItem>>),
    Fetch(oneshot::Sender<Vec<AddressItem>>),
    Restore(AddressItem, oneshot::Sender<NetworkResult<()>>),
    Save(Vec<AddressItem>, oneshot::Sender<NetworkResult<usize>>),
    Stop(oneshot::Sender<NetworkResult<()>>),
}

/// Handle to the host pool actor.
#[derive(Clone)]
pub struct Hosts {
    commands: mpsc::UnboundedSender<HostsCommand>,
    count: Arc<AtomicUsize>,
}

impl Hosts {
    /// Load the pool from its cache file and spawn the actor.
    ///
    /// A missing file yields an empty pool; an unreadable one is an error.
    pub fn start(file: &Path, capacity: usize) -> NetworkResult<Self> {
        let mut pool = Pool::new(file.to_path_buf(), capacity);
        pool.load()?;

        let count = Arc::new(AtomicUsize::new(pool.len()));
        let (commands, mut receiver) = mpsc::unbounded_channel();

        let counter = count.clone();
        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    HostsCommand::Take(reply) => {
                        let _ = reply.send(pool.take());
                    }
                    HostsCommand::Fetch(reply) => {
                        let _ = reply.send(pool.fetch());
                    }
                    HostsCommand::Restore(item, reply) => {
                        pool.insert(item);
                        let _ = reply.send(Ok(()));
                    }
                    HostsCommand::Save(items, reply) => {
                        let before = pool.len();
                        for item in items {
                            pool.insert(item);
                        }
                        let _ = reply.send(Ok(pool.len() - before));
                    }
                    HostsCommand::Stop(reply) => {
                        let _ = reply.send(pool.store());
                        counter.store(pool.len(), Ordering::Relaxed);
                        return;
                    }
                }
                counter.store(pool.len(), Ordering::Relaxed);
            }
        });

        Ok(Self { commands, count })
    }

    /// Pop one address for an outbound attempt.
    pub async fn take(&self) -> NetworkResult<AddressItem> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostsCommand::Take(reply))
            .map_err(|_| NetworkError::ServiceStopped)?;
        response.await.unwrap_or(Err(NetworkError::ServiceStopped))
    }

    /// Snapshot copy of the pool.
    pub async fn fetch(&self) -> NetworkResult<Vec<AddressItem>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostsCommand::Fetch(reply))
            .map_err(|_| NetworkError::ServiceStopped)?;
        response.await.map_err(|_| NetworkError::ServiceStopped)
    }

    /// Put back an address taken for a failed attempt.
    pub async fn restore(&self, item: AddressItem) -> NetworkResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostsCommand::Restore(item, reply))
            .map_err(|_| NetworkError::ServiceStopped)?;
        response.await.unwrap_or(Err(NetworkError::ServiceStopped))
    }

    /// Bulk insert gossiped addresses. Returns the count actually accepted.
    pub async fn save(&self, items: Vec<AddressItem>) -> NetworkResult<usize> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostsCommand::Save(items, reply))
            .map_err(|_| NetworkError::ServiceStopped)?;
        response.await.unwrap_or(Err(NetworkError::ServiceStopped))
    }

    /// Persist the pool and stop the actor.
    pub async fn stop(&self) -> NetworkResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostsCommand::Stop(reply))
            .map_err(|_| NetworkError::ServiceStopped)?;
        response.await.unwrap_or(Err(NetworkError::ServiceStopped))
    }

    /// Relaxed snapshot of the pool size.
    pub fn address_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// The actor-owned pool state.
struct Pool {
    file: PathBuf,
    capacity: usize,
    items: HashMap<Authority, AddressItem>,
}

impl Pool {
    fn new(file: PathBuf, capacity: usize) -> Self {
        Self { file, capacity, items: HashMap::new() }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn insert(&mut self, item: AddressItem) {
        if self.capacity == 0 {
            return;
        }

        let authority = item.authority();
        if authority.is_unspecified() || authority.port() == 0 {
            return;
        }

        // At capacity, a new address displaces a random existing one.
        if self.items.len() >= self.capacity && !self.items.contains_key(&authority) {
            if let Some(victim) = self.random_authority() {
                self.items.remove(&victim);
            }
        }

        self.items.entry(authority).or_insert(item);
    }

    fn take(&mut self) -> NetworkResult<AddressItem> {
        let authority = self.random_authority().ok_or(NetworkError::AddressNotFound)?;
        Ok(self.items.remove(&authority).expect("selected key exists"))
    }

    fn fetch(&self) -> Vec<AddressItem> {
        self.items.values().copied().collect()
    }

    fn random_authority(&self) -> Option<Authority> {
        if self.items.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.items.len());
        self.items.keys().nth(index).copied()
    }

    fn load(&mut self) -> NetworkResult<()> {
        let text = match std::fs::read_to_string(&self.file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(file = %self.file.display(), error = %e, "host cache unreadable");
                return Err(NetworkError::FileLoad);
            }
        };

        let mut skipped = 0usize;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match line.trim().parse::<Authority>() {
                Ok(authority) => self.insert(AddressItem::new(0, 0, &authority)),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(file = %self.file.display(), skipped, "malformed host cache lines skipped");
        }

        info!(file = %self.file.display(), count = self.items.len(), "host pool loaded");
        Ok(())
    }

    fn store(&self) -> NetworkResult<()> {
        let mut text = String::new();
        for authority in self.items.keys() {
            text.push_str(&authority.to_string());
            text.push('\n');
        }

        std::fs::write(&self.file, text).map_err(|e| {
            warn!(file = %self.file.display(), error = %e, "host cache write failed");
            NetworkError::FileSave
        })?;

        debug!(file = %self.file.display(), count = self.items.len(), "host pool saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> AddressItem {
        AddressItem::new(0, 1, &text.parse().unwrap())
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hosts-test-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_save_take_restore_count() {
        let hosts = Hosts::start(&temp_file("cycle"), 100).unwrap();

        let accepted = hosts
            .save(vec![item("1.2.3.4:8333"), item("5.6.7.8:8333"), item("1.2.3.4:8333")])
            .await
            .unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(hosts.address_count(), 2);

        let taken = hosts.take().await.unwrap();
        assert_eq!(hosts.address_count(), 1);

        hosts.restore(taken).await.unwrap();
        assert_eq!(hosts.address_count(), 2);
    }

    #[tokio::test]
    async fn test_take_empty_pool() {
        let hosts = Hosts::start(&temp_file("empty"), 100).unwrap();
        assert_eq!(hosts.take().await, Err(NetworkError::AddressNotFound));
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let hosts = Hosts::start(&temp_file("capacity"), 2).unwrap();

        hosts
            .save(vec![item("1.1.1.1:1"), item("2.2.2.2:2"), item("3.3.3.3:3")])
            .await
            .unwrap();
        assert_eq!(hosts.address_count(), 2);
    }

    #[tokio::test]
    async fn test_unusable_addresses_filtered() {
        let hosts = Hosts::start(&temp_file("filtered"), 100).unwrap();

        let zero_port = AddressItem::new(0, 0, &"1.2.3.4".parse().unwrap());
        let unspecified = AddressItem::new(0, 0, &Authority::unspecified());
        let accepted = hosts.save(vec![zero_port, unspecified]).await.unwrap();
        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let file = temp_file("roundtrip");
        let _ = std::fs::remove_file(&file);

        let hosts = Hosts::start(&file, 100).unwrap();
        hosts.save(vec![item("9.8.7.6:8333")]).await.unwrap();
        hosts.stop().await.unwrap();

        let reloaded = Hosts::start(&file, 100).unwrap();
        assert_eq!(reloaded.address_count(), 1);
        let taken = reloaded.take().await.unwrap();
        assert_eq!(taken.authority(), "9.8.7.6:8333".parse().unwrap());

        let _ = std::fs::remove_file(&file);
    }
}
