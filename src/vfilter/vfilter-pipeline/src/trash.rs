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

use tokio::io::AsyncWriteExt;
use vfilter_common::Suspect;

/// Archive of the deleted messages.
///
/// Each message is written in its own file named after the suspect id, and a
/// line is appended to `trash.log`:
/// `timestamp<TAB>from<TAB>to,to<TAB>section<TAB>filename`.
#[derive(Debug)]
pub struct Trash {
    directory: std::path::PathBuf,
    log: tokio::sync::Mutex<()>,
}

impl Trash {
    ///
    #[must_use]
    pub fn new(directory: impl Into<std::path::PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            log: tokio::sync::Mutex::new(()),
        }
    }

    ///
    #[must_use]
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    /// Copy the message as it was received in the trash, `section` is the
    /// plugin which deleted it.
    ///
    /// # Errors
    ///
    /// * the directory or the files cannot be written
    /// * the message cannot be read
    #[tracing::instrument(skip_all, fields(suspect = %suspect.id(), %section), err)]
    pub async fn archive(
        &self,
        suspect: &Suspect,
        section: &str,
    ) -> std::io::Result<std::path::PathBuf> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let filename = self.directory.join(suspect.id().to_string());
        tokio::fs::write(&filename, suspect.original_source().await?).await?;

        let timestamp = suspect
            .timestamp()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let line = format!(
            "{timestamp}\t{}\t{}\t{section}\t{}\n",
            suspect.from_address(),
            suspect
                .to()
                .iter()
                .map(vfilter_common::Address::full)
                .collect::<Vec<_>>()
                .join(","),
            filename.display()
        );

        let _guard = self.log.lock().await;
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join("trash.log"))
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;

        tracing::info!(path = %filename.display(), "Message moved to trash.");
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfilter_common::{Spool, SuspectId, ValidationStrategy};

    async fn suspect(spool_dir: &std::path::Path) -> Suspect {
        let id = SuspectId::new();
        let spool = Spool::new(spool_dir, &id);
        std::fs::write(spool.path(), b"Subject: bad\r\n\r\nexe\r\n").unwrap();
        Suspect::new(
            id,
            "s@x.com",
            &["a@y.com".to_owned(), "b@y.com".to_owned()],
            spool,
            ValidationStrategy::Simple,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn archive() {
        let spool_dir = tempfile::tempdir().unwrap();
        let trash_dir = tempfile::tempdir().unwrap();

        let suspect = suspect(spool_dir.path()).await;
        let id = *suspect.id();

        let trash = Trash::new(trash_dir.path().join("trash"));
        let path = trash.archive(&suspect, "attachments").await.unwrap();

        assert_eq!(path.file_name().unwrap().to_str().unwrap(), id.to_string());
        assert_eq!(std::fs::read(&path).unwrap(), b"Subject: bad\r\n\r\nexe\r\n");

        let log = std::fs::read_to_string(trash.directory().join("trash.log")).unwrap();
        let fields = log.trim_end().split('\t').collect::<Vec<_>>();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "s@x.com");
        assert_eq!(fields[2], "a@y.com,b@y.com");
        assert_eq!(fields[3], "attachments");
        assert_eq!(fields[4], path.display().to_string());
    }

    #[tokio::test]
    async fn original_content_is_archived() {
        let spool_dir = tempfile::tempdir().unwrap();
        let trash_dir = tempfile::tempdir().unwrap();

        let mut suspect = suspect(spool_dir.path()).await;
        suspect.add_header("X-Scanned", "yes", true).await.unwrap();
        suspect.add_header("X-Staged", "yes", false).await.unwrap();

        let trash = Trash::new(trash_dir.path());
        let path = trash.archive(&suspect, "attachments").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"Subject: bad\r\n\r\nexe\r\n");
    }
}
