use std::collections::BTreeMap;

use crate::client::Client;

/// Live clients keyed by address, iterated in address order
#[derive(Debug, Default)]
pub(crate) struct Registry {
    clients: BTreeMap<String, Client>,
}

impl Registry {
    pub(crate) fn contains(&self, address: &str) -> bool {
        self.clients.contains_key(address)
    }

    /// Returns `false` if the address was already present; the existing client is kept.
    pub(crate) fn insert(&mut self, client: Client) -> bool {
        if self.clients.contains_key(client.address()) {
            return false;
        }
        self.clients.insert(client.address().to_string(), client);
        true
    }

    pub(crate) fn remove(&mut self, address: &str) -> Option<Client> {
        self.clients.remove(address)
    }

    pub(crate) fn drain(&mut self) -> Vec<Client> {
        std::mem::take(&mut self.clients).into_values().collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Client> {
        self.clients.values().cloned().collect()
    }

    /// Connected clients in address order
    pub(crate) fn connected(&self) -> Vec<&Client> {
        self.clients.values().filter(|c| c.is_connected()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }
}
