use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{MixnetError, Result};

/// A peer's static X25519 key pair, plus the path its public half is
/// published to.
///
/// `StaticSecret` is built with `x25519-dalek`'s `zeroize` feature, so its
/// own backing bytes (not a throwaway copy) are zeroed on drop.
pub struct PeerIdentity {
    id: String,
    secret: StaticSecret,
    public: PublicKey,
    public_key_path: PathBuf,
}

impl PeerIdentity {
    /// Generate a fresh key pair for `id` and publish the public half to
    /// `{config_dir}/{id}.key` as base64 text.
    pub fn generate(id: impl Into<String>, config_dir: impl AsRef<Path>) -> Result<Self> {
        let id = id.into();
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        fs::create_dir_all(&config_dir)?;
        let public_key_path = config_dir.as_ref().join(format!("{id}.key"));
        write_atomic(&public_key_path, BASE64.encode(public.as_bytes()).as_bytes())?;

        Ok(Self {
            id,
            secret,
            public,
            public_key_path,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret
    }

    /// Read a peer's published public key from `{config_dir}/{peer_id}.key`.
    pub fn read_public_key(config_dir: impl AsRef<Path>, peer_id: &str) -> Result<PublicKey> {
        let path = config_dir.as_ref().join(format!("{peer_id}.key"));
        let encoded = fs::read_to_string(&path)?;
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| MixnetError::Crypto(format!("bad public key file {path:?}: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MixnetError::Crypto(format!("public key file {path:?} has wrong length")))?;
        Ok(PublicKey::from(array))
    }

    /// Remove the published public key file. Called on shutdown; keys are
    /// per-session and must not outlive the process that generated them.
    pub fn drop_public_key_file(&self) -> Result<()> {
        if self.public_key_path.exists() {
            fs::remove_file(&self.public_key_path)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("id", &self.id)
            .field("public", &BASE64.encode(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Drop for PeerIdentity {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data)?;
    fs::rename(temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_publishes_readable_key() {
        let dir = TempDir::new().unwrap();
        let identity = PeerIdentity::generate("s1", dir.path()).unwrap();

        let read_back = PeerIdentity::read_public_key(dir.path(), "s1").unwrap();
        assert_eq!(read_back.as_bytes(), identity.public_key().as_bytes());
    }

    #[test]
    fn drop_removes_public_key_file() {
        let dir = TempDir::new().unwrap();
        let identity = PeerIdentity::generate("s1", dir.path()).unwrap();
        let path = dir.path().join("s1.key");
        assert!(path.exists());

        identity.drop_public_key_file().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn two_generations_differ() {
        let dir = TempDir::new().unwrap();
        let a = PeerIdentity::generate("a", dir.path()).unwrap();
        let b = PeerIdentity::generate("b", dir.path()).unwrap();
        assert_ne!(a.public_key().as_bytes(), b.public_key().as_bytes());
    }
}
