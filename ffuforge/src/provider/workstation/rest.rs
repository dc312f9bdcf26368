//! Client for the local `vmrest` control plane.

use crate::config::WorkstationSettings;
use ffuforge_shared::errors::{FfuError, FfuResult};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

const TOOL: &str = "vmrest";
const CONTENT_TYPE: &str = "application/vnd.vmware.vmw.rest-v1+json";

/// Power operations accepted by `PUT /vms/{id}/power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PowerOp {
    On,
    Off,
    Shutdown,
}

impl PowerOp {
    fn as_str(&self) -> &'static str {
        match self {
            PowerOp::On => "on",
            PowerOp::Off => "off",
            PowerOp::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    name: &'a str,
    path: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct VmEntry {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct PowerResponse {
    power_state: String,
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

/// HTTP client for one `vmrest` endpoint.
pub(super) struct VmRestClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl VmRestClient {
    pub(super) fn new(settings: &WorkstationSettings, timeout: Duration) -> FfuResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FfuError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, CONTENT_TYPE);
        if let Some(user) = &self.username {
            builder = builder.basic_auth(user, self.password.as_ref());
        }
        builder
    }

    /// Send and map transport failures and error statuses.
    async fn send(&self, operation: &str, builder: RequestBuilder) -> FfuResult<reqwest::Response> {
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FfuError::timeout(format!("{TOOL} {operation}"), started.elapsed())
            } else if e.is_connect() {
                FfuError::ProviderUnavailable(format!("{TOOL} is not reachable: {}", e))
            } else {
                FfuError::ExternalTool {
                    tool: TOOL.to_string(),
                    code: None,
                    detail: format!("{operation}: {e}"),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(FfuError::VmNotFound(format!("{operation}: {}", body.trim())));
        }
        Err(FfuError::ExternalTool {
            tool: TOOL.to_string(),
            code: Some(i32::from(status.as_u16())),
            detail: format!("{operation}: {}", body.trim()),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> FfuResult<T> {
        response.json().await.map_err(|e| FfuError::ExternalTool {
            tool: TOOL.to_string(),
            code: None,
            detail: format!("{operation}: unexpected response: {e}"),
        })
    }

    pub(super) async fn list(&self) -> FfuResult<Vec<VmEntry>> {
        let response = self.send("list", self.request(Method::GET, "/vms")).await?;
        self.json("list", response).await
    }

    pub(super) async fn register(&self, name: &str, vmx_path: &Path) -> FfuResult<String> {
        let body = RegistrationRequest {
            name,
            path: vmx_path.display().to_string(),
        };
        let builder = self
            .request(Method::POST, "/vms/registration")
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&body);
        let response = self.send("register", builder).await?;
        let entry: VmEntry = self.json("register", response).await?;
        Ok(entry.id)
    }

    pub(super) async fn power(&self, id: &str, op: PowerOp) -> FfuResult<String> {
        let builder = self
            .request(Method::PUT, &format!("/vms/{id}/power"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(op.as_str());
        let response = self.send(&format!("power {}", op.as_str()), builder).await?;
        let state: PowerResponse = self.json("power", response).await?;
        Ok(state.power_state)
    }

    pub(super) async fn power_state(&self, id: &str) -> FfuResult<String> {
        let response = self
            .send("power state", self.request(Method::GET, &format!("/vms/{id}/power")))
            .await?;
        let state: PowerResponse = self.json("power state", response).await?;
        Ok(state.power_state)
    }

    /// Guest address; `None` while guest tools are not yet reporting.
    pub(super) async fn ip(&self, id: &str) -> FfuResult<Option<String>> {
        match self
            .send("ip", self.request(Method::GET, &format!("/vms/{id}/ip")))
            .await
        {
            Ok(response) => {
                let ip: IpResponse = self.json("ip", response).await?;
                Ok(Some(ip.ip).filter(|ip| !ip.is_empty()))
            }
            Err(FfuError::ExternalTool { code: Some(500), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(super) async fn delete(&self, id: &str) -> FfuResult<()> {
        self.send("delete", self.request(Method::DELETE, &format!("/vms/{id}")))
            .await?;
        Ok(())
    }

    pub(super) fn timeout(&self) -> Duration {
        self.timeout
    }
}
