use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use fc2live::{SourceManager, common::logger, configs::Config};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    /// RTMP parameters as JSON
    Json,
    /// An rtmpdump argument list
    Rtmpdump,
    /// Only the tcUrl
    Url,
}

#[derive(Parser, Debug)]
#[command(name = "fc2live")]
#[command(about = "Resolve an FC2 Live channel into RTMP connection parameters")]
struct Args {
    /// Channel page, e.g. https://live.fc2.com/39153575/
    url: String,

    /// Config file (defaults to config.toml or config.default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// FC2 account e-mail
    #[arg(long, env = "FC2_USERNAME")]
    username: Option<String>,

    /// FC2 account password
    #[arg(long, env = "FC2_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Drop cached session cookies and authenticate again
    #[arg(long)]
    purge_credentials: bool,

    #[arg(short, long, value_enum, default_value = "json")]
    output: Output,

    /// Keep the control connection open until Ctrl-C or the broadcast ends
    #[arg(long)]
    hold: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if args.username.is_some() {
        config.fc2.username = args.username.clone();
    }
    if args.password.is_some() {
        config.fc2.password = args.password.clone();
    }
    config.fc2.purge_credentials |= args.purge_credentials;

    logger::init(config.logging.as_ref());

    let manager = SourceManager::new(&config)?;
    let stream = manager.resolve(&args.url).await?;

    match args.output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&stream.params)?),
        Output::Rtmpdump => println!("rtmpdump {}", shell_join(&stream.params.rtmpdump_args())),
        Output::Url => println!("{}", stream.params.tc_url),
    }

    if args.hold {
        info!("Holding control connection open, press Ctrl-C to stop");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = stream.channel.closed() => info!("Control connection closed by server"),
        }
    }

    Ok(())
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:?=&,".contains(c)) {
                a.clone()
            } else {
                format!("'{}'", a.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
