// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OpenBK Updater.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Local firmware artifact store
//!
//! Firmware images are written under a single directory and served back to
//! devices from there. File names come straight from the release asset.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A firmware image written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the stored bytes
    pub sha256: String,
}

/// Why a lookup in the store was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The name would escape the store directory
    Forbidden,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A store filename must be a single normal path component
    pub fn is_valid_filename(filename: &str) -> bool {
        let mut components = Path::new(filename).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !filename.contains(['/', '\\'])
    }

    /// Write `bytes` as `filename`, replacing any existing file of that name
    pub async fn put(&self, filename: &str, bytes: &[u8]) -> io::Result<StoredArtifact> {
        if !Self::is_valid_filename(filename) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to store firmware under {filename:?}"),
            ));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(filename);
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());

        Ok(StoredArtifact {
            path,
            size: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
        })
    }

    /// Path of a stored file, refusing anything outside the store
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, ResolveError> {
        if !Self::is_valid_filename(filename) {
            return Err(ResolveError::Forbidden);
        }

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|_| ResolveError::NotFound)?;
        let path = tokio::fs::canonicalize(root.join(filename))
            .await
            .map_err(|_| ResolveError::NotFound)?;

        // Symlinks may still point elsewhere
        if !path.starts_with(&root) {
            return Err(ResolveError::Forbidden);
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ResolveError::NotFound),
        }
    }
}
