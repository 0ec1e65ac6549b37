/*
 * vFilter mail filtering relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Location of the original bytes of a message on disk.
///
/// The file is removed when the spool is dropped, once the message has
/// been disposed of.
#[derive(Debug)]
pub struct Spool {
    path: std::path::PathBuf,
    persistent: bool,
}

impl Spool {
    /// Spool file for the message `id` in `directory`. The file itself is
    /// created by whoever receives the message.
    #[must_use]
    #[inline]
    pub fn new(directory: &std::path::Path, id: &crate::SuspectId) -> Self {
        Self {
            path: directory.join(format!("vfilter-{id}.eml")),
            persistent: false,
        }
    }

    /// Use an existing file, which is left in place on drop.
    #[must_use]
    #[inline]
    pub fn existing(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            persistent: true,
        }
    }

    /// Path of the spooled file.
    #[must_use]
    #[inline]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the whole spooled message.
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Size of the spooled message.
    ///
    /// # Errors
    ///
    /// * the file metadata cannot be read
    pub async fn len(&self) -> std::io::Result<u64> {
        tokio::fs::metadata(&self.path).await.map(|m| m.len())
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if self.persistent {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove(&path));
            }
            Err(_) => remove(&path),
        }
    }
}

fn remove(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Spool removed."),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
        Err(e) => tracing::warn!(path = %path.display(), %e, "Could not remove spool."),
    }
}

#[cfg(test)]
mod tests {
    use super::Spool;
    use crate::SuspectId;

    #[test]
    fn removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), &SuspectId::new());
        std::fs::write(spool.path(), b"Subject: hi\r\n\r\nbody\r\n").unwrap();
        let path = spool.path().to_path_buf();

        drop(spool);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn removed_on_drop_within_a_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), &SuspectId::new());
        std::fs::write(spool.path(), b"Subject: hi\r\n\r\nbody\r\n").unwrap();
        let path = spool.path().to_path_buf();

        assert_eq!(spool.len().await.unwrap(), 21);
        assert_eq!(spool.read().await.unwrap().len(), 21);
        drop(spool);

        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("{} still exists", path.display());
    }

    #[test]
    fn existing_is_kept() {
        let file = tempfile::NamedTempFile::new().unwrap();
        drop(Spool::existing(file.path()));
        assert!(file.path().exists());
    }
}
