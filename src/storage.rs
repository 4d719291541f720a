use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

/// 上传文件的存储根目录，所有路径都被限制在其下。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 解析 `dir/filename` 形式的上传目标，返回目标目录与文件路径。
    pub async fn resolve_upload_target(
        &self,
        dir: &str,
        filename: &str,
    ) -> Result<(PathBuf, PathBuf), StorageError> {
        validate_filename(filename)?;
        let dir_path = self.resolve(dir)?;
        if dir_path == self.root {
            return Err(StorageError::InvalidPath);
        }
        let target = dir_path.join(filename);
        self.ensure_no_symlink_components(&target, true).await?;
        Ok((dir_path, target))
    }

    /// `/` 与 `\` 都视为分隔符，与返回 URL 的分段方式一致。
    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        for segment in relative.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => return Err(StorageError::InvalidPath),
                _ => {}
            }
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => normalized.push(part),
                _ => return Err(StorageError::InvalidPath),
            }
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

/// 文件名必须是单个普通路径段。
pub fn validate_filename(filename: &str) -> Result<(), StorageError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename
            .chars()
            .any(|ch| ch == '/' || ch == '\\' || ch.is_control())
    {
        return Err(StorageError::InvalidFilename);
    }
    Ok(())
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    InvalidFilename,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
