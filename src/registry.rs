//! Named clients built once from a table of configurations.

use std::fmt;

use crate::{sync::Mutex, Client, ClientConfig};

/// The name the unnamed client is registered under.
pub const DEFAULT_CLIENT_NAME: &str = "<default>";

/// A set of clients, each built from its own [`ClientConfig`] and looked up
/// by name.
///
/// Names are matched case-insensitively. Entries whose config is disabled
/// are skipped. Dropping the registry closes every client it built.
///
/// ```
/// use docker_transport::{ClientConfig, Registry, DEFAULT_CLIENT_NAME};
///
/// # fn run() -> Result<(), docker_transport::Error> {
/// let registry = Registry::new([
///     (DEFAULT_CLIENT_NAME, ClientConfig::new("tcp://127.0.0.1:2375")),
///     ("build", ClientConfig::new("tcp://10.0.0.5:2375").enabled(false)),
/// ])?;
/// assert!(registry.default_client().is_some());
/// assert!(registry.get("build").is_none());
/// registry.shutdown();
/// # Ok(())
/// # }
/// # run().unwrap();
/// ```
pub struct Registry {
    clients: Vec<(String, Client)>,
    closed: Mutex<bool>,
}

impl Registry {
    /// Builds a client for every enabled entry.
    ///
    /// # Errors
    ///
    /// Fails on the first entry that cannot be built, after closing the
    /// clients already built. Two enabled entries sharing a name are a
    /// configuration error.
    pub fn new<I, N>(configs: I) -> crate::Result<Registry>
    where
        I: IntoIterator<Item = (N, ClientConfig)>,
        N: Into<String>,
    {
        let mut registry = Registry {
            clients: Vec::new(),
            closed: Mutex::new(false),
        };

        for (name, config) in configs {
            let name = name.into();
            if !config.enabled {
                debug!("docker client {:?} is disabled, skipping", name);
                continue;
            }
            if registry.position(&name).is_some() {
                return Err(crate::Error::configuration(format!(
                    "docker client {name:?} is configured twice"
                )));
            }

            // An early return drops the registry, closing what was built.
            let client = Client::from_config(&config)?;
            debug!("docker client {:?} ready for {}", name, client.endpoint());
            registry.clients.push((name, client));
        }

        Ok(registry)
    }

    /// The client registered under `name`, if it was built.
    pub fn get(&self, name: &str) -> Option<&Client> {
        self.position(name).map(|i| &self.clients[i].1)
    }

    /// The client registered under [`DEFAULT_CLIENT_NAME`].
    pub fn default_client(&self) -> Option<&Client> {
        self.get(DEFAULT_CLIENT_NAME)
    }

    /// Names of the built clients, in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(|(name, _)| name.as_str())
    }

    /// Number of built clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client was built.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Closes every client. Calling it again does nothing.
    pub fn shutdown(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        for (name, client) in &self.clients {
            trace!("closing docker client {:?}", name);
            client.close();
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.clients
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.clients.iter().map(|(n, c)| (n, c.endpoint())))
            .finish()
    }
}
