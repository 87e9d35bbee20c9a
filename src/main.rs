use clap::Parser;
use miette::{IntoDiagnostic, Result};
use spsp_pay::application::payment::PaymentOrchestrator;
use spsp_pay::config::PaymentConfig;
use spsp_pay::domain::ports::{DiscoveryBox, TransportBox};
use spsp_pay::infrastructure::ilp_over_http::IlpOverHttp;
use spsp_pay::infrastructure::spsp::SpspClient;
use spsp_pay::interfaces::console::ConsoleReporter;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about = "Send a streaming payment to an SPSP receiver", long_about = None)]
struct Cli {
    /// Payment pointer (`$example.com/alice`) or SPSP URL of the receiver
    receiver: String,

    /// Amount to deliver, in the sender's base units
    amount: u64,

    /// ILP-over-HTTP endpoint of the connector
    #[arg(long, env = "ILP_CONNECTOR_URL", default_value = "http://127.0.0.1:7770/ilp")]
    connector_url: String,

    /// Bearer token for the connector
    #[arg(long, env = "ILP_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// How often progress is reported, in milliseconds
    #[arg(long, default_value_t = 250)]
    poll_interval_ms: u64,

    /// How long to wait for the receiver to acknowledge the close, in milliseconds
    #[arg(long, default_value_t = 5000)]
    close_timeout_ms: u64,

    /// Largest amount to put in a single packet
    #[arg(long)]
    max_packet_amount: Option<u64>,

    /// Print the receipt as JSON instead of the summary line
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn payment_config(&self) -> PaymentConfig {
        PaymentConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            max_packet_amount: self.max_packet_amount,
            ..Default::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let discovery: DiscoveryBox = Box::new(SpspClient::new()?);
    let transport: TransportBox = Arc::new(IlpOverHttp::new(
        &cli.connector_url,
        cli.auth_token.clone(),
    )?);
    let reporter = Arc::new(ConsoleReporter::stdout());

    let mut orchestrator =
        PaymentOrchestrator::new(discovery, transport, reporter.clone(), cli.payment_config());
    let receipt = orchestrator.pay(&cli.receiver, cli.amount).await?;

    if cli.json {
        reporter.write_receipt_json(&receipt).into_diagnostic()?;
    } else {
        reporter.write_receipt(&receipt).into_diagnostic()?;
    }
    Ok(())
}
