use clap::Parser;

/// secretsctx: resolves SSM parameters and Secrets Manager secrets and hands
/// them to the function through the Lambda client context.
#[derive(Parser, Debug, Default)]
#[command(name = "secretsctx", version, about)]
pub struct Cli {
    /// Address the local runtime API proxy listens on
    #[arg(long)]
    pub proxy_addr: Option<String>,

    /// Process whose memory holds the runtime API address
    #[arg(long)]
    pub target_pid: Option<i32>,

    /// Serve the proxy without rewriting any process memory
    #[arg(long)]
    pub skip_patch: bool,

    /// Keep the last good context when a periodic refresh fails
    #[arg(long)]
    pub tolerate_refresh_errors: bool,
}
