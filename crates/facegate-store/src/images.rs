//! Registered photos kept on disk as JPEG files.

use crate::{Result, StoreError};
use facegate_core::{ImageStore, ImageStoreError};
use image::{ImageFormat, RgbImage};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Photo archive rooted at a single directory.
///
/// References are bare file names (`<uuid-hex>.jpg`); they never contain a
/// path separator.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    /// Open the archive at `dir`, creating it if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::info!(dir = %dir.display(), "opened face image store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem location of a stored reference.
    pub fn path_of(&self, reference: &str) -> Result<PathBuf> {
        let is_plain_name = !reference.is_empty()
            && Path::new(reference).file_name().and_then(|n| n.to_str()) == Some(reference);
        if !is_plain_name {
            return Err(StoreError::InvalidReference(reference.to_string()));
        }
        Ok(self.dir.join(reference))
    }

    fn write_new(&self, image: &RgbImage) -> Result<String> {
        let reference = format!("{}.jpg", Uuid::new_v4().simple());
        let path = self.dir.join(&reference);

        // create_new: an existing file is never overwritten.
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        let written = image
            .write_to(&mut writer, ImageFormat::Jpeg)
            .map_err(StoreError::from)
            .and_then(|()| writer.flush().map_err(StoreError::from));

        if let Err(err) = written {
            let _ = fs::remove_file(&path);
            return Err(err);
        }

        tracing::debug!(reference = %reference, "saved face image");
        Ok(reference)
    }

    fn remove(&self, reference: &str) -> Result<()> {
        let path = self.path_of(reference)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(reference = %reference, "deleted face image");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ImageStore for FsImageStore {
    fn save(&self, image: &RgbImage) -> std::result::Result<String, ImageStoreError> {
        Ok(self.write_new(image)?)
    }

    fn delete(&self, reference: &str) -> std::result::Result<(), ImageStoreError> {
        Ok(self.remove(reference)?)
    }
}
