//! Remote transfer of finished archives
//!
//! Both transports are blocking and run on the blocking pool.

use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use ssh2::Session;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};
use thiserror::Error;
use tracing::info;

use crate::config::UploadConfig;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload is missing {0}")]
    Incomplete(&'static str),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, UploadError>;

/// A transport that copies one local file to the remote directory
pub trait Uploader: Send + Sync {
    fn protocol(&self) -> &'static str;

    /// Upload `archive`, returning the bytes sent.
    fn upload(&self, archive: &Path) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct Target {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    remote_path: String,
}

impl Target {
    fn from_config(config: &UploadConfig) -> Result<Self> {
        let host = config.host.clone().ok_or(UploadError::Incomplete("host"))?;
        let user = config.user.clone().ok_or(UploadError::Incomplete("user"))?;
        Ok(Self {
            host,
            port: config.port,
            user,
            password: config.password.clone(),
            remote_path: config.remote_path.clone(),
        })
    }

    fn remote_file(&self, archive: &Path) -> String {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backup.zip".to_string());
        format!("{}/{}", self.remote_path.trim_end_matches('/'), name)
    }
}

/// SFTP with public-key authentication; the password, if any, unlocks the key
pub struct SftpUploader {
    target: Target,
    private_key: PathBuf,
}

impl Uploader for SftpUploader {
    fn protocol(&self) -> &'static str {
        "sftp"
    }

    fn upload(&self, archive: &Path) -> Result<u64> {
        let tcp = TcpStream::connect((self.target.host.as_str(), self.target.port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_pubkey_file(
            &self.target.user,
            None,
            &self.private_key,
            self.target.password.as_deref(),
        )?;

        let sftp = session.sftp()?;
        let remote = self.target.remote_file(archive);
        let mut remote_file = sftp.create(Path::new(&remote))?;
        let mut local = File::open(archive)?;
        let sent = io::copy(&mut local, &mut remote_file)?;
        info!(host = %self.target.host, %remote, bytes = sent, "Backup uploaded over SFTP");
        Ok(sent)
    }
}

/// Explicit FTPS with password login
pub struct FtpsUploader {
    target: Target,
}

impl Uploader for FtpsUploader {
    fn protocol(&self) -> &'static str {
        "ftps"
    }

    fn upload(&self, archive: &Path) -> Result<u64> {
        let connector = TlsConnector::new().map_err(|e| UploadError::Tls(e.to_string()))?;
        let stream = NativeTlsFtpStream::connect((self.target.host.as_str(), self.target.port))?;
        let mut stream = stream.into_secure(NativeTlsConnector::from(connector), &self.target.host)?;

        stream.login(self.target.user.as_str(), self.target.password.as_deref().unwrap_or_default())?;
        stream.transfer_type(FileType::Binary)?;
        let remote_dir = self.target.remote_path.trim_end_matches('/');
        if !remote_dir.is_empty() {
            stream.cwd(remote_dir)?;
        }

        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backup.zip".to_string());
        let mut local = File::open(archive)?;
        let sent = stream.put_file(&name, &mut local)?;
        let _ = stream.quit();
        info!(host = %self.target.host, remote = %self.target.remote_file(archive), bytes = sent, "Backup uploaded over FTPS");
        Ok(sent)
    }
}

/// SFTP when a private key is configured, FTPS otherwise.
pub fn uploader_for(config: &UploadConfig) -> Result<Box<dyn Uploader>> {
    let target = Target::from_config(config)?;
    Ok(match &config.private_key {
        Some(key) => Box::new(SftpUploader {
            target,
            private_key: key.clone(),
        }),
        None => Box::new(FtpsUploader { target }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UploadConfig {
        UploadConfig {
            enabled: true,
            host: Some("backup.example.com".to_string()),
            user: Some("mc".to_string()),
            remote_path: "/backups/".to_string(),
            ..UploadConfig::default()
        }
    }

    #[test]
    fn test_protocol_selection() {
        assert_eq!(uploader_for(&config()).unwrap().protocol(), "ftps");

        let mut with_key = config();
        with_key.private_key = Some(PathBuf::from("/home/mc/.ssh/id_ed25519"));
        assert_eq!(uploader_for(&with_key).unwrap().protocol(), "sftp");
    }

    #[test]
    fn test_incomplete_target() {
        let mut missing = config();
        missing.user = None;
        assert!(matches!(uploader_for(&missing), Err(UploadError::Incomplete("user"))));
    }

    #[test]
    fn test_remote_file() {
        let target = Target::from_config(&config()).unwrap();
        assert_eq!(
            target.remote_file(Path::new("/srv/.plugkeeper/backups/backup-a.zip")),
            "/backups/backup-a.zip"
        );
    }
}
