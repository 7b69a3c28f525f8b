use std::{
    fs,
    io::{self, Read, Seek},
    path::{Component, Path, PathBuf},
};

use nodedeck_process::ServerId;
use serde::Serialize;

use crate::support::unix_millis;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("path must be relative")]
    Absolute,
    #[error("path traversal is not allowed")]
    Traversal,
    #[error("refusing to operate on the project root")]
    Root,
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid archive: {0}")]
    Archive(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<zip::result::ZipError> for FsError {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(err) => Self::Io(err),
            other => Self::Archive(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Unix millis.
    pub modified: Option<u64>,
}

pub fn normalize_rel_path(rel: &str) -> Result<PathBuf, FsError> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Ok(PathBuf::new());
    }

    let p = Path::new(rel);
    if p.is_absolute() {
        return Err(FsError::Absolute);
    }

    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => out.push(seg),
            Component::ParentDir => return Err(FsError::Traversal),
            Component::Prefix(_) | Component::RootDir => return Err(FsError::Absolute),
        }
    }
    Ok(out)
}

/// `root` joined with the normalized form of `rel`.
pub fn scoped(root: &Path, rel: &str) -> Result<PathBuf, FsError> {
    Ok(root.join(normalize_rel_path(rel)?))
}

pub fn server_root(data_root: &Path, server_id: &ServerId) -> PathBuf {
    data_root.join("servers").join(server_id.as_str())
}

pub fn uploads_dir(data_root: &Path) -> PathBuf {
    data_root.join("uploads")
}

/// Names of the regular files directly inside `dir`, sorted.
pub async fn list_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut rd = tokio::fs::read_dir(dir).await?;
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        if entry.file_type().await?.is_file() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out.sort();
    Ok(out)
}

/// Directory listing, directories first.
pub async fn list_entries(dir: &Path) -> Result<Vec<FileEntry>, FsError> {
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FsError::NotFound(dir.display().to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        let meta = entry.metadata().await?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        out.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified,
        });
    }
    out.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(out)
}

/// Common top-level folder of every entry, if the archive was zipped as one folder.
fn shared_top_level(names: &[PathBuf]) -> Option<PathBuf> {
    let mut top: Option<&std::ffi::OsStr> = None;
    let mut nested = false;
    for n in names {
        let mut comps = n.components();
        let first = comps.next()?.as_os_str();
        if comps.next().is_some() {
            nested = true;
        }
        match top {
            None => top = Some(first),
            Some(t) if t == first => {}
            Some(_) => return None,
        }
    }
    if nested { top.map(PathBuf::from) } else { None }
}

/// Unpacks `archive` into `dest`. Entries whose names would escape `dest` are
/// skipped. Returns the number of files written.
pub fn extract_zip<R: Read + Seek>(archive: R, dest: &Path) -> Result<usize, FsError> {
    let mut archive = zip::ZipArchive::new(archive)?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        match file.enclosed_name() {
            Some(name) if !name.starts_with("__MACOSX") => names.push(Some(name)),
            Some(_) => names.push(None),
            None => {
                tracing::warn!(entry = %file.name(), "skipping unsafe archive entry");
                names.push(None);
            }
        }
    }
    let kept: Vec<PathBuf> = names.iter().flatten().cloned().collect();
    let strip = shared_top_level(&kept);

    fs::create_dir_all(dest)?;
    let mut written = 0;
    for (i, name) in names.into_iter().enumerate() {
        let Some(name) = name else { continue };
        let rel = match &strip {
            Some(prefix) => match name.strip_prefix(prefix) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            },
            None => name,
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let mut file = archive.by_index(i)?;
        let out_path = dest.join(&rel);
        if file.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut file, &mut out)?;
        written += 1;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode().map(|m| m & 0o777).filter(|m| *m != 0) {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(written)
}

/// Replaces the tree at `dest` with the contents of the zip in `body`.
///
/// The body is parked under `<data_root>/uploads/` and unpacked into a staging
/// directory next to it; `dest` is only touched once extraction succeeded.
pub async fn install_upload(
    data_root: &Path,
    server_id: &ServerId,
    body: &[u8],
    dest: &Path,
) -> Result<usize, FsError> {
    let uploads = uploads_dir(data_root);
    tokio::fs::create_dir_all(&uploads).await?;
    let stamp = format!("{}-{}", server_id.as_str(), unix_millis());
    let artifact = uploads.join(format!("{stamp}.zip"));
    let staging = uploads.join(format!("{stamp}.d"));

    tokio::fs::write(&artifact, body).await?;

    let extracted = {
        let artifact = artifact.clone();
        let staging = staging.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, FsError> {
            let f = fs::File::open(&artifact)?;
            extract_zip(io::BufReader::new(f), &staging)
        })
        .await
        .map_err(|e| FsError::Io(io::Error::other(e)))
    };
    let _ = tokio::fs::remove_file(&artifact).await;

    let written = match extracted.and_then(|r| r) {
        Ok(n) => n,
        Err(err) => {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(err);
        }
    };

    remove_root(dest).await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&staging, dest).await?;
    tracing::info!(server_id = %server_id, files = written, dest = %dest.display(), "project uploaded");
    Ok(written)
}

/// `path` with `-<unix millis>` inserted before its extension.
fn collision_free(path: &Path) -> PathBuf {
    let stamp = unix_millis();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    };
    path.with_file_name(name)
}

/// Moves `from` to `to` inside `root`; an occupied destination gets a
/// timestamp suffix. Returns the final relative destination.
pub async fn move_entry(root: &Path, from: &str, to: &str) -> Result<PathBuf, FsError> {
    let from_rel = normalize_rel_path(from)?;
    let to_rel = normalize_rel_path(to)?;
    if from_rel.as_os_str().is_empty() || to_rel.as_os_str().is_empty() {
        return Err(FsError::Root);
    }

    let src = root.join(&from_rel);
    if !tokio::fs::try_exists(&src).await? {
        return Err(FsError::NotFound(from_rel.display().to_string()));
    }

    let mut dst_rel = to_rel;
    if tokio::fs::try_exists(root.join(&dst_rel)).await? {
        dst_rel = collision_free(&dst_rel);
    }
    let dst = root.join(&dst_rel);
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&src, &dst).await?;
    Ok(dst_rel)
}

pub async fn delete_entry(root: &Path, rel: &str) -> Result<(), FsError> {
    let rel = normalize_rel_path(rel)?;
    if rel.as_os_str().is_empty() {
        return Err(FsError::Root);
    }
    let path = root.join(&rel);
    let meta = match tokio::fs::symlink_metadata(&path).await {
        Ok(m) => m,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FsError::NotFound(rel.display().to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(&path).await?;
    } else {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}

/// Removes a whole project tree. A missing tree is not an error.
pub async fn remove_root(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
