use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use fleet_core::api::{
    ErrorResponse, ExecuteRequest, ExecuteResponse, LatestResultResponse, MachinesResponse,
    RegisterScriptRequest, RegisterScriptResponse,
};
use fleet_core::now_ms;
use reqwest::Url;
use serde::de::DeserializeOwned;

#[derive(Parser, Debug)]
#[command(name = "fleetctl")]
struct Args {
    /// Daemon base URL.
    #[arg(long, env = "FLEET_DAEMON", default_value = "http://127.0.0.1:8000")]
    daemon: String,

    /// Operator token sent as a bearer token on script registration and execution.
    #[arg(long, env = "FLEET_OPERATOR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print raw JSON responses.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Machines seen in the last five minutes.
    Machines,
    /// Register or overwrite a script. Unsafe content is refused.
    #[command(group(ArgGroup::new("source").required(true).args(["content", "file"])))]
    RegisterScript {
        name: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Queue a registered script for a machine.
    Execute { machine: String, script: String },
    /// Most recent completed result for a machine.
    Latest { machine: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = Url::parse(&args.daemon)
        .with_context(|| format!("invalid daemon URL {}", args.daemon))?;

    match args.cmd {
        Cmd::Machines => {
            let resp: MachinesResponse =
                decode(client.get(endpoint(&base, &["v1", "machines"])?).send().await?).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else if resp.machines.is_empty() {
                println!("no active machines");
            } else {
                let now = now_ms();
                for m in resp.machines {
                    let ago = (now - m.last_seen_ms).max(0) / 1000;
                    println!("{}\t{}\tseen {}s ago", m.name, m.id, ago);
                }
            }
        }
        Cmd::RegisterScript {
            name,
            content,
            file,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("read {}", path.display()))?,
                (None, None) => bail!("either --content or --file is required"),
            };
            let req = RegisterScriptRequest { name, content };
            let resp: RegisterScriptResponse = decode(
                operator(
                    client.post(endpoint(&base, &["v1", "scripts"])?),
                    args.token.as_deref(),
                )
                .json(&req)
                .send()
                .await?,
            )
            .await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else if resp.created {
                println!("script '{}' registered", resp.name);
            } else {
                println!("script '{}' updated", resp.name);
            }
        }
        Cmd::Execute { machine, script } => {
            let req = ExecuteRequest {
                machine_name: machine.clone(),
                script_name: script.clone(),
            };
            let resp: ExecuteResponse = decode(
                operator(
                    client.post(endpoint(&base, &["v1", "execute"])?),
                    args.token.as_deref(),
                )
                .json(&req)
                .send()
                .await?,
            )
            .await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                println!(
                    "queued '{script}' on {machine} as command {}",
                    resp.command_id
                );
            }
        }
        Cmd::Latest { machine } => {
            let resp: LatestResultResponse = decode(
                client
                    .get(endpoint(&base, &["v1", "machines", machine.as_str(), "latest"])?)
                    .send()
                    .await?,
            )
            .await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                match resp.command {
                    Some(cmd) => {
                        println!("command {} ({}) on {machine}:", cmd.id, cmd.script_name);
                        print!("{}", cmd.output);
                        if !cmd.output.ends_with('\n') {
                            println!();
                        }
                    }
                    None => println!("no completed commands for {machine}"),
                }
            }
        }
    }

    Ok(())
}

/// `base` with `segments` appended, each percent-encoded as one path segment.
fn endpoint(base: &Url, segments: &[&str]) -> anyhow::Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("daemon URL {base} cannot take a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn operator(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

/// Decode a success body, or turn the daemon's error body into a readable refusal.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context("decode response");
    }
    match resp.json::<ErrorResponse>().await {
        Ok(err) if err.kind == "rejected_unsafe" => bail!("refused: {}", err.error),
        Ok(err) if err.kind == "not_found" => bail!("{}", err.error),
        Ok(err) if err.kind == "unauthorized" => {
            bail!("refused: {} (set --token or FLEET_OPERATOR_TOKEN)", err.error)
        }
        Ok(err) => bail!("daemon returned {status}: {}", err.error),
        Err(_) => bail!("daemon returned {status}"),
    }
}
