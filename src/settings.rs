//! 持久化的服务设置：存储目录、地址白名单与对外访问 URL。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// settings.json 的原始文档结构。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsDocument {
    pub dir: String,
    #[serde(default)]
    pub ip: Vec<String>,
    pub url: String,
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            dir: "storage".to_string(),
            ip: vec!["127.0.0.1".to_string(), "::1".to_string()],
            url: "http://127.0.0.1:4545/files".to_string(),
        }
    }
}

/// 启动时加载、之后只读共享的设置。
#[derive(Debug, Clone)]
pub struct Settings {
    dir: PathBuf,
    allowlist: Allowlist,
    base_url: String,
}

impl Settings {
    pub fn from_document(document: SettingsDocument) -> Result<Self, SettingsError> {
        let allowlist = Allowlist::parse(document.ip.as_slice())?;
        Ok(Self {
            dir: PathBuf::from(document.dir),
            allowlist,
            base_url: document.url.trim_end_matches('/').to_string(),
        })
    }

    /// 读取设置文件；文件不存在时写入默认值后返回默认设置。
    pub async fn load_or_init(path: &Path) -> Result<Self, SettingsError> {
        let document = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {
                let bytes = fs::read(path).await?;
                serde_json::from_slice(&bytes)?
            }
            Ok(_) => {
                return Err(SettingsError::Io(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} is not a file", path.display()),
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let document = SettingsDocument::default();
                let content = serde_json::to_vec_pretty(&document)?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(path, content).await?;
                info!(path = ?path, "wrote default settings");
                document
            }
            Err(err) => return Err(SettingsError::Io(err)),
        };
        Self::from_document(document)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// 允许上传的来源地址集合，空集合表示不做限制。
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    addresses: HashSet<IpAddr>,
}

impl Allowlist {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, SettingsError> {
        let addresses = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<IpAddr>()
                    .map(|ip| ip.to_canonical())
                    .map_err(|_| SettingsError::InvalidAddress(entry.to_string()))
            })
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { addresses })
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// 空白名单放行所有地址。
    pub fn permits(&self, ip: IpAddr) -> bool {
        self.addresses.is_empty() || self.addresses.contains(&ip)
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(io::Error),
    Parse(serde_json::Error),
    InvalidAddress(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "settings io error: {err}"),
            SettingsError::Parse(err) => write!(f, "settings parse error: {err}"),
            SettingsError::InvalidAddress(entry) => {
                write!(f, "invalid address in allowlist: {entry:?}")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<io::Error> for SettingsError {
    fn from(err: io::Error) -> Self {
        SettingsError::Io(err)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn load_or_init_writes_defaults_when_missing() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");

        let settings = Settings::load_or_init(&path).await.expect("load settings");
        assert_eq!(settings.dir(), Path::new("storage"));
        assert_eq!(settings.base_url(), "http://127.0.0.1:4545/files");
        assert!(settings.allowlist().permits("127.0.0.1".parse().expect("ip")));
        assert!(!settings.allowlist().permits("10.0.0.1".parse().expect("ip")));

        let written = std::fs::read(&path).expect("read settings");
        let document: SettingsDocument = serde_json::from_slice(&written).expect("parse");
        assert_eq!(document, SettingsDocument::default());
    }

    #[tokio::test]
    async fn load_or_init_reads_existing_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "dir": "/srv/files", "ip": [], "url": "https://files.example.com/drop/" }"#,
        )
        .expect("write settings");

        let settings = Settings::load_or_init(&path).await.expect("load settings");
        assert_eq!(settings.dir(), Path::new("/srv/files"));
        assert_eq!(settings.base_url(), "https://files.example.com/drop");
        assert!(settings.allowlist().is_empty());
        assert!(settings.allowlist().permits("203.0.113.9".parse().expect("ip")));
    }

    #[tokio::test]
    async fn load_or_init_rejects_invalid_address() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "dir": "files", "ip": ["127.0.0.1", "not-an-ip"], "url": "http://x" }"#,
        )
        .expect("write settings");

        let result = Settings::load_or_init(&path).await;
        assert!(matches!(result, Err(SettingsError::InvalidAddress(entry)) if entry == "not-an-ip"));
    }

    #[test]
    fn allowlist_stores_ipv4_mapped_entries_as_ipv4() {
        let allowlist = Allowlist::parse(&["::ffff:192.0.2.1"]).expect("allowlist");
        assert!(allowlist.permits("192.0.2.1".parse().expect("ip")));
    }

    #[tokio::test]
    async fn load_or_init_rejects_malformed_json() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        std::fs::write(&path, b"{ \"dir\": ").expect("write settings");

        let result = Settings::load_or_init(&path).await;
        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }
}
