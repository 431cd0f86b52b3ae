use crate::Error;
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Filesystem-backed repository rooted at `data_path`. Writes go through a
/// temporary sibling and a rename, so a crash never leaves a partial
/// artifact at its final path.
#[derive(Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn open(root: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(root).map_err(|source| Error::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root: root.to_owned(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        for part in path.split('/') {
            out.push(part);
        }
        out
    }

    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), Error> {
        let target = self.resolve(path);
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let io = |source| Error::Io {
                path: path.clone(),
                source,
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io)?;
            }
            let tmp = target.with_extension("tmp");
            std::fs::write(&tmp, &bytes).map_err(io)?;
            std::fs::rename(&tmp, &target).map_err(io)?;
            Ok(())
        })
        .await
        .expect("put does not panic")
    }

    pub async fn has(&self, path: &str) -> Result<bool, Error> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(Error::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Option<Bytes>, Error> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let root = self.root.clone();
        let dir = self.resolve(prefix);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            if !dir.exists() {
                return Ok(out);
            }
            walk(&root, &dir, &mut out).map_err(|source| Error::Io {
                path: prefix.clone(),
                source,
            })?;
            Ok(out)
        })
        .await
        .expect("list_prefix does not panic")
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        let dir = self.resolve(prefix);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io {
                path: prefix.to_string(),
                source,
            }),
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        let path = dirent.path();
        if dirent.file_type()?.is_dir() {
            walk(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is under the root");
            // Repository paths are `/`-separated regardless of platform.
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_put_get_has_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(tmp.path()).unwrap();

        let path = "fq/4x/q0/0d/fq4xq00d/fq4xq00d.pdf";
        assert!(!repo.has(path).await.unwrap());
        assert_eq!(repo.get(path).await.unwrap(), None);

        repo.put(path, Bytes::from_static(b"%PDF-1.4 body")).await.unwrap();
        assert!(repo.has(path).await.unwrap());
        assert_eq!(
            repo.get(path).await.unwrap().unwrap(),
            Bytes::from_static(b"%PDF-1.4 body")
        );
    }

    #[tokio::test]
    async fn test_list_and_delete_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(tmp.path()).unwrap();

        repo.put("aa/bb/cc/dd/x/x.pdf", Bytes::from_static(b"a"))
            .await
            .unwrap();
        repo.put("aa/bb/cc/dd/x/x.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        repo.put("aa/bb/cc/de/y/y.pdf", Bytes::from_static(b"b"))
            .await
            .unwrap();

        let mut listed = repo.list_prefix("aa/bb/cc/dd").await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["aa/bb/cc/dd/x/x.json", "aa/bb/cc/dd/x/x.pdf"]);

        repo.delete_prefix("aa/bb/cc/dd").await.unwrap();
        assert!(repo.list_prefix("aa/bb/cc/dd").await.unwrap().is_empty());
        assert!(repo.has("aa/bb/cc/de/y/y.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_file_is_not_present() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalRepository::open(tmp.path()).unwrap();
        repo.put("aa/bb/cc/dd/z/z.pdf", Bytes::new()).await.unwrap();
        assert!(!repo.has("aa/bb/cc/dd/z/z.pdf").await.unwrap());
    }
}
