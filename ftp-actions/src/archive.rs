// ZIP expansion
// The remote stream is spooled to an anonymous temp file first, so archives whose
// entries carry data descriptors (sizes written after the data) expand as well.

use crate::errors::ActionError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Walks the entries of a ZIP archive read from a remote stream
pub struct ZipExpander {
    archive: ZipArchive<File>,
    name: String,
}

impl ZipExpander {
    /// Copy `reader` to a temp file and open it as an archive
    ///
    /// The temp file is unlinked on creation and goes away with the expander.
    pub fn spool<R: Read + ?Sized>(
        reader: &mut R,
        name: impl Into<String>,
    ) -> Result<Self, ActionError> {
        let name = name.into();
        let spool_error = |e: io::Error| {
            ActionError::transfer(name.clone(), format!("Failed to spool archive: {}", e))
        };

        let mut file = tempfile::tempfile().map_err(spool_error)?;
        let bytes = io::copy(reader, &mut file).map_err(spool_error)?;
        file.seek(SeekFrom::Start(0)).map_err(spool_error)?;
        debug!(archive = %name, bytes = bytes, "Archive spooled");

        let archive = ZipArchive::new(file).map_err(|e| {
            ActionError::transfer(name.clone(), format!("Invalid zip archive: {}", e))
        })?;
        Ok(Self { archive, name })
    }

    /// Number of entries, directories included
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Hand every file entry to `sink` in archive order, skipping directories and unsafe names
    ///
    /// Returns the number of entries handed over.
    pub fn for_each_file<F>(&mut self, mut sink: F) -> Result<usize, ActionError>
    where
        F: FnMut(&str, &mut dyn Read) -> Result<(), ActionError>,
    {
        let mut expanded = 0;
        for index in 0..self.archive.len() {
            let mut entry = self.archive.by_index(index).map_err(|e| {
                ActionError::transfer(
                    self.name.clone(),
                    format!("Failed to read entry {}: {}", index, e),
                )
            })?;
            if entry.is_dir() {
                debug!(entry = %entry.name(), "Skipping directory entry in archive");
                continue;
            }
            let safe_name = entry
                .enclosed_name()
                .map(|path| path.to_string_lossy().replace('\\', "/"))
                .filter(|name| !name.is_empty());
            let Some(name) = safe_name else {
                warn!(
                    archive = %self.name,
                    entry = %entry.name(),
                    "Skipping archive entry that escapes the destination"
                );
                continue;
            };
            debug!(archive = %self.name, entry = %name, "Extracting");
            sink(&name, &mut entry)?;
            expanded += 1;
        }
        Ok(expanded)
    }
}
