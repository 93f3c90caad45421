use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio_util::io::StreamReader;
use url::form_urlencoded;

use super::{ContainerEngine, ContainerSpec, LogStream};
use crate::config::EngineConfig;
use crate::error::{BencherError, Result};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest<'a> {
    image: &'a str,
    cmd: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
    env: &'a [String],
    labels: &'a BTreeMap<String, String>,
    attach_stdout: bool,
    attach_stderr: bool,
    // Without a TTY the engine multiplexes stdout and stderr into one framed stream.
    tty: bool,
    host_config: HostConfig<'a>,
}

impl<'a> CreateRequest<'a> {
    fn from_spec(spec: &'a ContainerSpec) -> Self {
        Self {
            image: &spec.image,
            cmd: &spec.command,
            entrypoint: spec.entrypoint.as_deref(),
            working_dir: spec.working_dir.as_deref(),
            env: &spec.env,
            labels: &spec.labels,
            attach_stdout: false,
            attach_stderr: false,
            tty: false,
            host_config: HostConfig {
                mounts: spec
                    .mounts
                    .iter()
                    .map(|m| MountRequest {
                        kind: "bind",
                        source: &m.source,
                        target: &m.target,
                        read_only: m.read_only,
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig<'a> {
    mounts: Vec<MountRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    source: &'a str,
    target: &'a str,
    read_only: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitResponse {
    status_code: i64,
    #[serde(default)]
    error: Option<WaitError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

fn segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Turn a non-2xx reply into an engine error carrying the daemon's message.
async fn read_body(context: &str, response: Response<Incoming>) -> Result<Bytes> {
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| BencherError::engine(context, e))?
        .to_bytes();

    // 304: start on a running container, stop on a stopped one.
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(body);
    }

    let message = serde_json::from_slice::<ErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
    Err(BencherError::engine_status(context, status.as_u16(), message))
}

/// Docker Engine API client speaking HTTP/1.1 over the daemon's unix socket.
///
/// Uses one connection per call. Log streams keep theirs open until the
/// container stops.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    socket: PathBuf,
    api_version: String,
}

impl DockerEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            socket: config.socket_path.clone(),
            api_version: config.api_version.clone(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            BencherError::engine(format!("connect {}", self.socket.display()), e)
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| BencherError::engine("handshake", e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Engine connection closed");
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(format!("/{}{}", self.api_version, path))
            .header(HOST, "docker")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| BencherError::engine("build request", e))?;

        sender
            .send_request(request)
            .await
            .map_err(|e| BencherError::engine(path, e))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let body = CreateRequest::from_spec(spec);

        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("name", &spec.name)
            .finish();
        let context = format!("create {}", spec.name);
        let response = self
            .request(
                Method::POST,
                &format!("/containers/create?{query}"),
                Some(serde_json::to_vec(&body)?),
            )
            .await?;

        let created: CreateResponse = serde_json::from_slice(&read_body(&context, response).await?)?;
        for warning in created.warnings.iter().flatten() {
            tracing::warn!(name = %spec.name, warning, "Engine warning on create");
        }
        Ok(created.id)
    }

    async fn start(&self, handle: &str) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/containers/{}/start", segment(handle)), None)
            .await?;
        read_body(&format!("start {handle}"), response).await?;
        Ok(())
    }

    async fn wait(&self, handle: &str) -> Result<i64> {
        let context = format!("wait {handle}");
        let response = self
            .request(
                Method::POST,
                &format!("/containers/{}/wait?condition=not-running", segment(handle)),
                None,
            )
            .await?;

        let waited: WaitResponse = serde_json::from_slice(&read_body(&context, response).await?)?;
        match waited.error {
            Some(err) if !err.message.is_empty() => Err(BencherError::engine(context, err.message)),
            _ => Ok(waited.status_code),
        }
    }

    async fn logs(&self, handle: &str) -> Result<LogStream> {
        let response = self
            .request(
                Method::GET,
                &format!(
                    "/containers/{}/logs?follow=1&stdout=1&stderr=1",
                    segment(handle)
                ),
                None,
            )
            .await?;

        if !response.status().is_success() {
            read_body(&format!("logs {handle}"), response).await?;
            return Err(BencherError::engine(format!("logs {handle}"), "unexpected status"));
        }

        let stream = response
            .into_body()
            .into_data_stream()
            .map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn remove(&self, handle: &str, force: bool) -> Result<()> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/containers/{}?force={}", segment(handle), force),
                None,
            )
            .await?;
        read_body(&format!("remove {handle}"), response).await?;
        Ok(())
    }

    async fn prune(&self, label: &str) -> Result<()> {
        let filters = serde_json::json!({ "label": [label] }).to_string();
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("filters", &filters)
            .finish();
        let response = self
            .request(Method::POST, &format!("/containers/prune?{query}"), None)
            .await?;
        read_body(&format!("prune {label}"), response).await?;
        Ok(())
    }
}
