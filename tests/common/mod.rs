//! Shared fixtures for integration tests
//!
//! `serve_files` starts an axum server on an ephemeral port. `FakeRemote` accepts connections
//! on another one and performs the remote half of the handshake.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::{Router, extract::Path as UrlPath, http::StatusCode, routing::get};
use plugkeeper::net::{WireReader, WireWriter};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use zip::write::SimpleFileOptions;

pub const SERVER_KEY: &str = "test-key";

/// Serve `files` under `/files/<name>`; anything else is a 404.
pub async fn serve_files(files: HashMap<String, Vec<u8>>) -> String {
    let app = Router::new().route(
        "/files/{name}",
        get(move |UrlPath(name): UrlPath<String>| {
            let body = files.get(&name).cloned();
            async move { body.ok_or(StatusCode::NOT_FOUND) }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Write a plugin jar whose `plugin.yml` names `name` at `version`.
pub fn write_plugin_jar(dir: &Path, file: &str, name: &str, version: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(file);
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("plugin.yml", SimpleFileOptions::default()).unwrap();
    write!(zip, "name: {}\nversion: '{}'\nauthor: author\nmain: x.Main\n", name, version).unwrap();
    zip.finish().unwrap();
    path
}

pub type RemoteReader = WireReader<BufReader<OwnedReadHalf>>;
pub type RemoteWriter = WireWriter<BufWriter<OwnedWriteHalf>>;

/// The remote end of the connection layer
pub struct FakeRemote {
    listener: TcpListener,
}

impl FakeRemote {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Accept one connection, accept its handshake and return the secondary kind byte it sent.
    pub async fn accept_secondary(&self) -> (u8, RemoteReader, RemoteWriter) {
        let (stream, _) = self.listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = WireReader::new(BufReader::new(read_half));
        let mut writer = WireWriter::new(BufWriter::new(write_half));

        let key = reader.read_utf().await.unwrap();
        let _identity = reader.read_utf().await.unwrap();
        assert_eq!(key, SERVER_KEY);
        writer.write_bool(true).await.unwrap();
        writer.flush().await.unwrap();

        let kind = reader.read_u8().await.unwrap();
        (kind, reader, writer)
    }
}
