//! Access to the replicated world directory
//!
//! Log entries carry paths relative to the world root with `/` separators. Paths
//! received from peers are checked before touching the disk.

use crate::common::{retry_fixed, Error, Result};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// The world directory on this node
#[derive(Debug, Clone)]
pub struct WorldDir {
    root: PathBuf,
}

impl WorldDir {
    /// Open the world directory, creating it if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Logical path of a file inside the world directory
    pub fn relative(&self, path: &Path) -> Result<String> {
        let relative = if path.is_absolute() {
            let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            path.strip_prefix(&root)
                .or_else(|_| path.strip_prefix(&self.root))
                .map_err(|_| Error::InvalidPath(path.display().to_string()))?
        } else {
            path.strip_prefix(&self.root).unwrap_or(path)
        };

        let parts: Vec<String> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => Ok(part.to_string_lossy().into_owned()),
                _ => Err(Error::InvalidPath(path.display().to_string())),
            })
            .collect::<Result<_>>()?;

        if parts.is_empty() {
            return Err(Error::InvalidPath(path.display().to_string()));
        }
        Ok(parts.join("/"))
    }

    /// Resolve a logical path received from a peer
    pub fn resolve(&self, logical: &str) -> Result<PathBuf> {
        let normalized = logical.replace('\\', "/");
        let candidate = Path::new(&normalized);

        if normalized.is_empty()
            || candidate.is_absolute()
            || candidate
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidPath(logical.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    /// Read a file, retrying while the game server holds it
    pub async fn read_with_retry(
        &self,
        logical: &str,
        attempts: usize,
        delay: Duration,
    ) -> Result<Vec<u8>> {
        let path = self.resolve(logical)?;
        let path = path.as_path();
        retry_fixed(
            move || async move { Ok::<_, Error>(tokio::fs::read(path).await?) },
            attempts,
            delay,
        )
        .await
    }

    /// Read a file once; a missing file maps to [`Error::NotFound`]
    pub async fn read(&self, logical: &str) -> Result<Vec<u8>> {
        let path = self.resolve(logical)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(logical.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a file, creating parent directories
    pub async fn write(&self, logical: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(logical)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    /// Remove a file; removing a missing file is not an error.
    ///
    /// A directory is only removed when empty; files inside it arrive as their own
    /// removals.
    pub async fn remove(&self, logical: &str) -> Result<()> {
        let path = self.resolve(logical)?;
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir(&path).await {
                tracing::debug!("Keeping directory {}: {}", logical, e);
            }
            return Ok(());
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();

        assert!(world.resolve("world/level.dat").is_ok());
        assert!(world.resolve("world\\region\\r.0.0.mca").is_ok());
        assert!(world.resolve("../etc/passwd").is_err());
        assert!(world.resolve("world/../../x").is_err());
        assert!(world.resolve("/etc/passwd").is_err());
        assert!(world.resolve("").is_err());
    }

    #[test]
    fn test_relative() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();

        let file = world.root().join("world").join("level.dat");
        assert_eq!(world.relative(&file).unwrap(), "world/level.dat");
        assert_eq!(
            world.relative(Path::new("world/level.dat")).unwrap(),
            "world/level.dat"
        );
        assert!(world.relative(Path::new("/somewhere/else")).is_err());
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();

        world.write("world/data/raids.dat", b"raid").await.unwrap();
        assert_eq!(world.read("world/data/raids.dat").await.unwrap(), b"raid");

        world.remove("world/data/raids.dat").await.unwrap();
        world.remove("world/data/raids.dat").await.unwrap();
        assert!(matches!(
            world.read("world/data/raids.dat").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_tolerates_directories() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();
        world.write("region/r.0.0.mca", b"chunk").await.unwrap();

        // Non-empty directory stays, without failing
        world.remove("region").await.unwrap();
        assert!(dir.path().join("region/r.0.0.mca").exists());

        world.remove("region/r.0.0.mca").await.unwrap();
        world.remove("region").await.unwrap();
        assert!(!dir.path().join("region").exists());
    }

    #[tokio::test]
    async fn test_read_with_retry_gives_up() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();

        let result = world
            .read_with_retry("missing.dat", 3, Duration::from_millis(1))
            .await;
        assert!(result.is_err());
    }
}
