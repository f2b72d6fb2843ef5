use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cliclack::{input, spinner};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heron::agent::{Agent, AgentConfig};
use heron::catalog::RemoteToolCatalog;
use heron::config::{CredentialSettings, Settings};
use heron::credentials::{ClientCredentialsProvider, CredentialProvider, StaticCredentialProvider};
use heron::providers::azure::{AzureGatewayConfig, AzureModelGateway};
use heron::session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Question to answer in one shot; omit for an interactive session
    question: Option<String>,

    /// Print the assistant's answer incrementally as it is generated
    #[arg(long)]
    stream: bool,

    /// Maximum model-call rounds per request
    #[arg(long)]
    max_turns: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("heron=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let credentials: Arc<dyn CredentialProvider> = match settings.credentials.clone() {
        CredentialSettings::Static {
            model_token,
            tool_token,
        } => Arc::new(StaticCredentialProvider::new(model_token, tool_token)),
        CredentialSettings::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            model_scope,
            tool_scope,
        } => Arc::new(ClientCredentialsProvider::new(
            token_url,
            client_id,
            client_secret,
            model_scope,
            tool_scope,
        )?),
    };

    info!(url = %settings.tool_server_url, "connecting to tool server");
    let catalog = RemoteToolCatalog::connect(
        settings.tool_server_url.clone(),
        credentials.clone(),
        settings.tool_timeout,
    )
    .await
    .context("failed to connect to tool server")?;

    let gateway = AzureModelGateway::new(
        AzureGatewayConfig {
            endpoint: settings.endpoint.clone(),
            api_version: settings.api_version.clone(),
            deployment: settings.deployment.clone(),
            timeout: settings.model_timeout,
        },
        credentials,
    )?;

    let config = AgentConfig {
        max_turns: cli.max_turns.unwrap_or(settings.max_turns),
        ..AgentConfig::default()
    };
    let agent = Agent::new(Box::new(gateway), Box::new(catalog), config);

    match cli.question {
        Some(question) => run_once(&agent, question, cli.stream).await,
        None => repl(&agent, cli.stream).await,
    }
}

/// Answer a single question and exit: zero with the answer on stdout, or
/// non-zero with the failure on stderr.
async fn run_once(agent: &Agent, question: String, stream: bool) -> Result<()> {
    let mut session = cancellable_session();
    let answer = ask(agent, &mut session, question, stream).await?;
    if stream {
        println!();
    } else {
        println!("{answer}");
    }
    Ok(())
}

async fn repl(agent: &Agent, stream: bool) -> Result<()> {
    println!(
        "heron {}",
        style("- type \"exit\" to end the session").dim()
    );

    let mut session = cancellable_session();
    loop {
        let line: String = input("You:").placeholder("").interact()?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if ["exit", "quit", "bye"].contains(&trimmed.to_lowercase().as_str()) {
            break;
        }

        if stream {
            print!("{} ", style("Assistant:").bold());
            std::io::stdout().flush().ok();
            match ask(agent, &mut session, trimmed.to_string(), true).await {
                Ok(_) => println!(),
                Err(e) => return Err(e),
            }
        } else {
            let spin = spinner();
            spin.start("awaiting reply");
            let answer = ask(agent, &mut session, trimmed.to_string(), false).await;
            spin.stop("");
            match answer {
                Ok(answer) => println!("{} {answer}", style("Assistant:").bold()),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

async fn ask(
    agent: &Agent,
    session: &mut Session,
    question: String,
    stream: bool,
) -> Result<String> {
    let answer = if stream {
        agent
            .run_streaming(question, session, |delta| {
                print!("{delta}");
                std::io::stdout().flush().ok();
            })
            .await
    } else {
        agent.run(question, session).await
    };
    answer.context("agent run failed")
}

/// A session whose cancellation token fires on ctrl-c, so an in-flight
/// turn stops scheduling work instead of being killed mid-call.
fn cancellable_session() -> Session {
    let cancel = CancellationToken::new();
    let session = Session::with_cancel_token(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    session
}
