//! Signing keys used for public-key authentication
//!
//! [`CredentialSet`] is the immutable, shared list of keys offered to the
//! server. [`client_keys`] is the process-wide default source used when a
//! client was built without explicit keys.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use russh::keys::{load_secret_key, PrivateKey};
use tracing::debug;

use crate::error::{Result, SshExecError};

/// Key files tried, in order, by the default key source
const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

static CLIENT_KEYS: OnceLock<CredentialSet> = OnceLock::new();

/// Ordered, immutable set of signing keys
///
/// Cloning is cheap: all clones share the same key material.
#[derive(Clone, Default)]
pub struct CredentialSet {
    keys: Arc<[Arc<PrivateKey>]>,
}

impl CredentialSet {
    /// An empty set
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in the order they are offered to the server
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PrivateKey>> {
        self.keys.iter()
    }
}

impl FromIterator<PrivateKey> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = PrivateKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

impl From<Vec<PrivateKey>> for CredentialSet {
    fn from(keys: Vec<PrivateKey>) -> Self {
        keys.into_iter().collect()
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithms: Vec<String> = self
            .keys
            .iter()
            .map(|key| key.algorithm().to_string())
            .collect();
        f.debug_struct("CredentialSet")
            .field("keys", &algorithms)
            .finish()
    }
}

/// Default keys for this process, loaded from `~/.ssh` on first use
pub fn client_keys() -> CredentialSet {
    CLIENT_KEYS.get_or_init(load_default_keys).clone()
}

fn load_default_keys() -> CredentialSet {
    let Some(home) = std::env::var_os("HOME") else {
        debug!("HOME not set, no default SSH keys");
        return CredentialSet::empty();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");

    let keys: CredentialSet = DEFAULT_KEY_FILES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.exists())
        .filter_map(|path| match load_secret_key(&path, None) {
            Ok(key) => {
                debug!("Loaded default SSH key {}", path.display());
                Some(key)
            }
            Err(e) => {
                debug!("Skipping SSH key {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    debug!("{} default SSH key(s) available", keys.len());
    keys
}

/// Load unencrypted private keys from explicit paths
pub fn load_keys<P: AsRef<Path>>(paths: &[P]) -> Result<CredentialSet> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            load_secret_key(path, None).map_err(|e| {
                SshExecError::SshKey(format!("failed to load {}: {}", path.display(), e))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(CredentialSet::from)
}
