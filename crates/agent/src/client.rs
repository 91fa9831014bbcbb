use anyhow::{bail, Context};
use fleet_core::api::{
    CommandResultRequest, ErrorResponse, PendingCommandsResponse, RegisterMachineRequest,
    RegisterMachineResponse,
};
use fleet_core::model::{CommandId, PendingCommand};

/// HTTP client for the daemon endpoints an agent uses.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base: String,
}

impl DaemonClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Announce presence. Creates the machine on first call.
    pub async fn register(&self, name: &str) -> anyhow::Result<RegisterMachineResponse> {
        let resp = self
            .http
            .post(format!("{}/v1/machines/register", self.base))
            .json(&RegisterMachineRequest {
                name: name.to_string(),
            })
            .send()
            .await
            .context("register request")?;
        decode(resp).await
    }

    pub async fn pending(&self, machine_id: &str) -> anyhow::Result<Vec<PendingCommand>> {
        let resp = self
            .http
            .get(format!("{}/v1/commands/{}", self.base, machine_id))
            .send()
            .await
            .context("pending request")?;
        let body: PendingCommandsResponse = decode(resp).await?;
        Ok(body.commands)
    }

    pub async fn report(&self, command_id: CommandId, output: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(format!("{}/v1/commands/{}/result", self.base, command_id))
            .json(&CommandResultRequest {
                output: output.to_string(),
            })
            .send()
            .await
            .context("result request")?;
        let _: serde_json::Value = decode(resp).await?;
        Ok(())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let detail = match resp.json::<ErrorResponse>().await {
            Ok(err) => format!("{} ({})", err.error, err.kind),
            Err(_) => "no error body".to_string(),
        };
        bail!("daemon returned {status}: {detail}");
    }
    Ok(resp.json::<T>().await?)
}
