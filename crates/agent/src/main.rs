use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kubectl_agent::{
    agent::{
        provider::create_provider,
        tools::{context::KubectlContextTool, kubectl::RunKubectlTool},
        AgentRuntime, SafetyValidator, Session, ToolRegistry,
    },
    config::{CliOverrides, Config},
    kubernetes::{ClusterContext, CommandRunner, CommandSpec, ContextTracker, KubectlExecutor},
    repl,
};

#[derive(Parser)]
#[command(author, version, about = "Operate a Kubernetes cluster in plain language through kubectl", long_about = None)]
struct Cli {
    /// Model provider (bedrock, anthropic, mock) [default: $KUBECTL_AGENT_PROVIDER or bedrock]
    #[arg(long)]
    provider: Option<String>,

    /// AWS region for Bedrock [default: $BEDROCK_MODEL_REGION or us-east-1]
    #[arg(long)]
    region: Option<String>,

    /// Model identifier for the selected provider [default: $BEDROCK_MODEL_ID or $ANTHROPIC_MODEL]
    #[arg(long)]
    model_id: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging; stdout belongs to the REPL
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kubectl_agent=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = start(cli).await {
        eprintln!("\n❌ Failed to start kubectl agent: {:#}", e);
        eprintln!("\nTroubleshooting:");
        eprintln!("  • Check that kubectl is installed and on PATH (or set KUBECTL_BINARY)");
        eprintln!("  • Check that your kubeconfig has a current context: kubectl config current-context");
        eprintln!("  • Check that the cluster is reachable: kubectl cluster-info");
        eprintln!("  • For Bedrock, check AWS credentials and BEDROCK_MODEL_REGION / BEDROCK_MODEL_ID");
        eprintln!("  • For the Anthropic API, check ANTHROPIC_API_KEY");
        std::process::exit(1);
    }
}

async fn start(cli: Cli) -> Result<()> {
    // Load configuration
    let config = Config::load_with(&CliOverrides {
        provider: cli.provider,
        region: cli.region,
        model_id: cli.model_id,
    })?;
    info!(
        "Loaded configuration: provider={}, model={}, max_rounds={}",
        config.llm.provider, config.llm.model, config.session.max_rounds
    );

    let client = create_provider(&config.llm)
        .await
        .context("could not initialize the model provider")?;

    let executor: Arc<dyn CommandRunner> =
        Arc::new(KubectlExecutor::new().with_binary(config.kubectl.binary.clone()));
    let tracker = ContextTracker::new(executor.clone(), config.context_timeout());

    let cluster = preflight(&config, executor.as_ref(), &tracker).await?;
    info!("Session pinned to context '{}'", cluster.active.as_deref().unwrap_or_default());

    let registry = ToolRegistry::new()
        .with_tool(Arc::new(RunKubectlTool::new(
            executor.clone(),
            SafetyValidator::new(config.safety_config()),
        )))
        .with_tool(Arc::new(KubectlContextTool::new(tracker)));

    let runtime = AgentRuntime::new(client, registry).with_inference_timeout(config.inference_timeout());
    let mut session = Session::new(cluster, config.session_limits());
    info!("Starting session {} with provider {}", session.id, runtime.provider_name());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    repl::run(&runtime, &mut session, stdin, &mut stdout).await?;
    Ok(())
}

/// Pin the kubeconfig's current context and check the cluster answers.
async fn preflight(
    config: &Config,
    runner: &dyn CommandRunner,
    tracker: &ContextTracker,
) -> Result<ClusterContext> {
    let cancel = CancellationToken::new();
    let current = tracker
        .kubeconfig_current(&cancel)
        .await
        .context("could not read the current kubectl context")?;
    let mut cluster = ClusterContext::new(current.clone());

    if let Err(e) = tracker.list(&mut cluster, &cancel).await {
        warn!("Could not list kubectl contexts: {}", e);
    }

    if config.kubectl.skip_preflight {
        info!("Skipping cluster reachability check");
        return Ok(cluster);
    }

    let spec = CommandSpec::parse("kubectl cluster-info")?.with_context(&current);
    let output = runner
        .run(&spec, Duration::from_secs(config.session.command_timeout_secs), &cancel)
        .await
        .context("could not run kubectl cluster-info")?;
    if !output.exit.is_success() {
        bail!(
            "cluster for context '{}' is not reachable: {}",
            current,
            output.stderr.trim()
        );
    }
    Ok(cluster)
}
