use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hush", about = "hush — share secrets as one-time links", version)]
struct Cli {
    /// hush server URL (default: http://localhost:8080 or $HUSH_SERVER)
    #[arg(long, env = "HUSH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Opaque owner identity sent as a bearer token ($HUSH_OWNER)
    #[arg(long, env = "HUSH_OWNER")]
    owner: Option<String>,

    /// Display name shown to recipients ($HUSH_OWNER_NAME)
    #[arg(long, env = "HUSH_OWNER_NAME")]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hush HTTP server
    Serve {
        /// Port to listen on (default: $HUSH_PORT or 8080)
        #[arg(long, env = "HUSH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $HUSH_HOST or 0.0.0.0)
        #[arg(long, env = "HUSH_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Create a secret and print its redemption link. Pass `-` to read
    /// the content from stdin.
    Create {
        /// Secret text (or `-` for stdin)
        content: String,
        /// Destroy the secret after its first successful reveal
        #[arg(long)]
        one_time: bool,
        /// Lifetime e.g. 1h, 30m, 7d (max 7d)
        #[arg(long)]
        expires_in: Option<String>,
        /// Require this password at reveal time
        #[arg(long)]
        password: Option<String>,
    },
    /// Show availability and policy for a token, without consuming it
    Info {
        /// Redemption token
        token: String,
    },
    /// Reveal a secret. A one-time secret is consumed by this call.
    Reveal {
        /// Redemption token
        token: String,
        /// Password, if the secret is gated
        #[arg(long)]
        password: Option<String>,
    },
    /// List your own secrets (metadata only)
    List,
    /// Delete one of your secrets by id
    Delete {
        /// Secret id (from `hush list`)
        id: String,
    },
    /// Print the shareable URL for a token
    Share {
        /// Redemption token
        token: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = ClientCtx {
        server: cli.server.trim_end_matches('/').to_owned(),
        owner: cli.owner,
        name: cli.name,
    };

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Create {
            content,
            one_time,
            expires_in,
            password,
        } => cmd_create(&ctx, content, one_time, expires_in.as_deref(), password).await,

        Commands::Info { token } => cmd_info(&ctx, &token).await,

        Commands::Reveal { token, password } => cmd_reveal(&ctx, &token, password).await,

        Commands::List => cmd_list(&ctx).await,

        Commands::Delete { id } => cmd_delete(&ctx, &id).await,

        Commands::Share { token } => {
            println!("{}/secret/{token}", ctx.server);
            Ok(())
        }
    }
}

struct ClientCtx {
    server: String,
    owner: Option<String>,
    name: Option<String>,
}

impl ClientCtx {
    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(ref owner) = self.owner {
            builder = builder.bearer_auth(owner);
        }
        if let Some(ref name) = self.name {
            builder = builder.header("x-hush-owner-name", name);
        }
        builder
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = hush_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    hush_server::run(cfg).await
}

async fn cmd_create(
    ctx: &ClientCtx,
    content: String,
    one_time: bool,
    expires_in: Option<&str>,
    password: Option<String>,
) -> Result<()> {
    let content = if content == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        buf.trim_end_matches('\n').to_owned()
    } else {
        content
    };

    let expires_in_ms = expires_in.map(parse_duration_ms).transpose()?;

    let body = serde_json::json!({
        "content": content,
        "is_one_time_view": one_time,
        "expires_in_ms": expires_in_ms,
        "password": password,
    });

    let client = Client::new();
    let resp = ctx
        .request(client.post(format!("{}/secrets", ctx.server)))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let token = json["token"].as_str().unwrap_or("");
    println!("token: {token}");
    println!("link:  {}/secret/{token}", ctx.server);
    if one_time {
        println!("note:  this secret self-destructs after its first reveal");
    }
    Ok(())
}

async fn cmd_info(ctx: &ClientCtx, token: &str) -> Result<()> {
    let client = Client::new();
    let resp = ctx
        .request(client.get(format!("{}/secrets/{token}", ctx.server)))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let available = json["is_available"].as_bool().unwrap_or(false);
    println!(
        "available:  {}",
        if available { "yes" } else { "no" }
    );
    println!(
        "one-time:   {}",
        if json["is_one_time_view"].as_bool().unwrap_or(false) {
            "yes"
        } else {
            "no"
        }
    );
    println!(
        "password:   {}",
        if json["has_password"].as_bool().unwrap_or(false) {
            "required"
        } else {
            "none"
        }
    );
    match json["expires_at"].as_i64() {
        Some(exp) => println!("expires:    {}", format_deadline(exp)),
        None => println!("expires:    never"),
    }
    println!("created by: {}", json["owner_display"].as_str().unwrap_or("Anonymous"));
    Ok(())
}

async fn cmd_reveal(ctx: &ClientCtx, token: &str, password: Option<String>) -> Result<()> {
    let client = Client::new();
    let body = serde_json::json!({ "password": password });
    let resp = ctx
        .request(client.post(format!("{}/secrets/{token}/redeem", ctx.server)))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        println!("{}", json["content"].as_str().unwrap_or(""));
    } else {
        match json["error"].as_str() {
            Some("password_required") => {
                anyhow::bail!("this secret requires a password (--password)")
            }
            Some("invalid_password") => anyhow::bail!("invalid password"),
            Some("already_viewed") => anyhow::bail!("this secret has already been viewed"),
            Some("expired") => anyhow::bail!("this secret has expired"),
            _ => anyhow::bail!("server returned {status}: {}", error_message(&json)),
        }
    }
    Ok(())
}

async fn cmd_list(ctx: &ClientCtx) -> Result<()> {
    if ctx.owner.is_none() {
        anyhow::bail!("--owner / HUSH_OWNER is required for this command");
    }

    let client = Client::new();
    let resp = ctx
        .request(client.get(format!("{}/secrets", ctx.server)))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }

    let secrets = json["secrets"].as_array().cloned().unwrap_or_default();
    if secrets.is_empty() {
        println!("(no secrets)");
        return Ok(());
    }

    for s in &secrets {
        let id = s["id"].as_str().unwrap_or("");
        let token = s["token"].as_str().unwrap_or("");
        let status = s["status"].as_str().unwrap_or("");
        let expiry = match s["expires_at"].as_i64() {
            Some(exp) => format_deadline(exp),
            None => "no expiry".to_owned(),
        };
        let flags = match (
            s["is_one_time_view"].as_bool().unwrap_or(false),
            s["has_password"].as_bool().unwrap_or(false),
        ) {
            (true, true) => " [one-time, password]",
            (true, false) => " [one-time]",
            (false, true) => " [password]",
            (false, false) => "",
        };
        println!("  {id}  {token}  {status}  {expiry}{flags}");
    }
    Ok(())
}

async fn cmd_delete(ctx: &ClientCtx, id: &str) -> Result<()> {
    if ctx.owner.is_none() {
        anyhow::bail!("--owner / HUSH_OWNER is required for this command");
    }

    let client = Client::new();
    let resp = ctx
        .request(client.delete(format!("{}/secrets/{id}", ctx.server)))
        .send()
        .await
        .context("HTTP request failed")?;

    if resp.status().is_success() {
        println!("✓ deleted {id}");
    } else {
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!("server returned {status}: {}", error_message(&json));
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "1h", "30m", "7d" into milliseconds.
fn parse_duration_ms(s: &str) -> Result<i64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_millis() as i64)
}

fn error_message(json: &Value) -> &str {
    json["message"]
        .as_str()
        .or_else(|| json["error"].as_str())
        .unwrap_or("unknown error")
}

/// Render an absolute expiry timestamp as a relative deadline.
fn format_deadline(expires_at_ms: i64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let left_secs = (expires_at_ms - now) / 1000;
    if left_secs <= 0 {
        return "expired".to_owned();
    }
    let left = left_secs as u64;
    if left >= 86400 {
        format!("expires in {}d", left / 86400)
    } else if left >= 3600 {
        format!("expires in {}h", left / 3600)
    } else if left >= 60 {
        format!("expires in {}m", left / 60)
    } else {
        format!("expires in {}s", left)
    }
}
