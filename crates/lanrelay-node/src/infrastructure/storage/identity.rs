//! Persistent node identity.
//!
//! A node announcing `DISCOVER:<id>` must present the same id after every
//! restart, so the id is generated once and stored in a `node_id` file next
//! to the config.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// File name of the stored id inside the config directory.
pub const NODE_ID_FILE: &str = "node_id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error accessing node id at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file exists but does not hold a UUID. It is left untouched.
    #[error("node id file {path} does not contain a valid id: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: uuid::Error,
    },
}

/// Returns the id stored at `path`, generating and storing one on first use.
///
/// # Errors
///
/// Returns [`IdentityError::Io`] if the file cannot be read or written, and
/// [`IdentityError::Invalid`] if it holds something other than a UUID.
pub fn get_or_create_persistent_id(path: &Path) -> Result<String, IdentityError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let id = Uuid::parse_str(content.trim()).map_err(|source| IdentityError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(id.to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = Uuid::new_v4().to_string();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|source| IdentityError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(path, format!("{id}\n")).map_err(|source| IdentityError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            info!("generated node id {id} at {}", path.display());
            Ok(id)
        }
        Err(source) => Err(IdentityError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
