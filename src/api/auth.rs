//! Session token access.
//!
//! The cache and mutation layers never look at credentials; they only need a
//! way to attach a token to outgoing requests and a way to end the session
//! when the server rejects it.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Auth collaborator consumed by the resource client and the error path.
#[async_trait]
pub trait AuthProvider: Send + Sync {
  /// Current bearer token, if signed in.
  async fn token(&self) -> Option<String>;

  /// Called whenever a request comes back 401. Must clear the session.
  fn on_unauthorized(&self);
}

/// File-backed token holder.
///
/// The token is read once on open and kept in memory afterwards; writes go to
/// both. `MEDBOOK_TOKEN` takes precedence over the file when set.
pub struct TokenStore {
  path: PathBuf,
  token: Mutex<Option<String>>,
}

impl TokenStore {
  /// Open the token store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(Self::default_path()?)
  }

  /// Open a token store backed by the given file.
  pub fn open_at(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let from_env = std::env::var("MEDBOOK_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty());

    let token = match from_env {
      Some(token) => Some(token),
      None => Self::read_file(&path)?,
    };

    Ok(Self {
      path,
      token: Mutex::new(token),
    })
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("medbook").join("token"))
  }

  fn read_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
      Ok(contents) => {
        let token = contents.trim().to_string();
        Ok((!token.is_empty()).then_some(token))
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read token file {}: {}", path.display(), e)),
    }
  }

  /// Persist a new token.
  pub fn save(&self, token: &str) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create token directory: {}", e))?;
    }
    std::fs::write(&self.path, token)
      .map_err(|e| eyre!("Failed to write token file {}: {}", self.path.display(), e))?;
    *self.token.lock() = Some(token.to_string());
    Ok(())
  }

  /// Forget the token, in memory and on disk.
  pub fn clear(&self) -> Result<()> {
    *self.token.lock() = None;
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove token file {}: {}", self.path.display(), e)),
    }
  }

  pub fn is_signed_in(&self) -> bool {
    self.token.lock().is_some()
  }
}

#[async_trait]
impl AuthProvider for TokenStore {
  async fn token(&self) -> Option<String> {
    self.token.lock().clone()
  }

  fn on_unauthorized(&self) {
    if let Err(e) = self.clear() {
      tracing::error!(error = %e, "Failed to clear session after 401");
    }
  }
}
