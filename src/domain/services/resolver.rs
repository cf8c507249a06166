//! Server Resolver
//!
//! Pure domain logic mapping free-text queries onto cached servers.
//! This service has no I/O; callers hand it a snapshot.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use crate::domain::value_objects::ServerStatus;
use std::collections::BTreeMap;

/// Resolves names, addresses, identifiers and proxy aliases to servers.
///
/// The alias table maps a proxy-configured backend name to the canonical
/// address of the external server behind it (e.g. `lobby` ->
/// `lobby.example.me:25565`). A trailing `:port` on the address is ignored.
#[derive(Debug, Clone, Default)]
pub struct ServerResolver {
    aliases: BTreeMap<String, String>,
}

impl ServerResolver {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Substitute the query through the alias table.
    pub fn canonical_query<'a>(&'a self, query: &'a str) -> &'a str {
        match self.aliases.get(query) {
            Some(address) => strip_port(address),
            None => query,
        }
    }

    /// Find exactly one server for a query.
    ///
    /// Matches address, display name or identifier by exact equality.
    /// When several servers match, the one whose identifier equals the
    /// query wins; otherwise the smallest identifier is picked so the
    /// result never depends on the order the API listed servers in.
    pub fn resolve<'s>(
        &self,
        servers: &'s [ExternalServer],
        query: &str,
    ) -> Result<&'s ExternalServer, SyncError> {
        let query = self.canonical_query(query);
        let matches: Vec<&ExternalServer> = servers
            .iter()
            .filter(|s| matches_exact(s, query))
            .collect();

        match matches.as_slice() {
            [] => Err(SyncError::NotFound(query.to_string())),
            [only] => Ok(*only),
            many => {
                let picked = many
                    .iter()
                    .find(|s| s.id == query)
                    .or_else(|| many.iter().min_by(|a, b| a.id.cmp(&b.id)))
                    .copied()
                    .ok_or_else(|| SyncError::NotFound(query.to_string()))?;
                tracing::debug!(
                    "query {} matched {} servers, picked {}",
                    query,
                    many.len(),
                    picked.id
                );
                Ok(picked)
            }
        }
    }

    /// Completion candidates for a partial query.
    ///
    /// All matching display names come first, then all matching addresses,
    /// then all matching identifiers.
    pub fn completions(
        &self,
        servers: &[ExternalServer],
        prefix: &str,
        status: Option<ServerStatus>,
    ) -> Vec<String> {
        let matching: Vec<&ExternalServer> = servers
            .iter()
            .filter(|s| status.map_or(true, |wanted| s.has_status(wanted)))
            .filter(|s| matches_prefix(s, prefix))
            .collect();

        let names = matching.iter().map(|s| s.name.clone());
        let addresses = matching.iter().map(|s| s.address.clone());
        let ids = matching.iter().map(|s| s.id.clone());
        names.chain(addresses).chain(ids).collect()
    }

    /// The proxy name configured for an external address, if any.
    pub fn proxy_name_for(&self, address: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, target)| strip_port(target) == address)
            .map(|(name, _)| name.as_str())
    }

    /// The configured alias table.
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }
}

fn matches_exact(server: &ExternalServer, query: &str) -> bool {
    server.address == query || server.name == query || server.id == query
}

fn matches_prefix(server: &ExternalServer, prefix: &str) -> bool {
    server.address.starts_with(prefix)
        || server.name.starts_with(prefix)
        || server.id.starts_with(prefix)
}

/// Drop a trailing `:port` from an address.
pub(crate) fn strip_port(address: &str) -> &str {
    match address.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    }
}
