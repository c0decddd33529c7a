use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use fundguard::crypto::{FieldCipher, ENCRYPTION_KEY_ENV};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for fundguard", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key
    #[arg(short, long, env = "FUNDGUARD_ADMIN_API_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check guard status
    Status,
    /// List security events
    Events {
        #[arg(long)]
        ip: Option<String>,
        #[arg(long = "type")]
        event_type: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Security event statistics
    Stats {
        #[arg(long)]
        from: Option<String>,
    },
    /// Blocked and suspicious IPs
    Ips,
    /// Block an IP
    Block {
        ip: String,
        #[arg(long)]
        reason: Option<String>,
        /// Administrator user id recorded in the audit log
        #[arg(long)]
        actor: Option<String>,
    },
    /// Unblock an IP
    Unblock {
        ip: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// List audit log entries
    Audit {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Audit statistics by category
    AuditStats {
        #[arg(long)]
        from: Option<String>,
    },
    /// Print a fresh encryption key
    Keygen,
    /// Encrypt a value with the key from the environment
    Encrypt { value: String },
    /// Decrypt a stored value with the key from the environment
    Decrypt { value: String },
    /// Search hash of a value
    Hash { value: String },
    /// Encrypt unmigrated rows of a SQLite table in place
    #[cfg(feature = "sqlite")]
    Migrate {
        database: String,
        table: String,
        /// Columns to encrypt (defaults to the KYC fields)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Keygen => {
            println!("{}", FieldCipher::generate_hex_key());
            return Ok(());
        }
        Commands::Encrypt { value } => {
            let cipher = cipher_from_env()?;
            if let Some(encrypted) = cipher.encrypt(Some(value))? {
                println!("{encrypted}");
            }
            return Ok(());
        }
        Commands::Decrypt { value } => {
            let cipher = cipher_from_env()?;
            println!("{}", cipher.try_decrypt(value)?);
            return Ok(());
        }
        Commands::Hash { value } => {
            println!("{}", FieldCipher::hash_for_search(value));
            return Ok(());
        }
        #[cfg(feature = "sqlite")]
        Commands::Migrate {
            database,
            table,
            fields,
            batch_size,
        } => {
            return migrate(database, table, fields, *batch_size).await;
        }
        _ => {}
    }

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Events {
            ip,
            event_type,
            severity,
            limit,
        } => client
            .get(format!("{base}/admin/security/events"))
            .query(&query(&[
                ("ip", ip),
                ("type", event_type),
                ("severity", severity),
                ("limit", limit.map(|l| l.to_string())),
            ])),
        Commands::Stats { from } => client
            .get(format!("{base}/admin/security/stats"))
            .query(&query(&[("from", from)])),
        Commands::Ips => client.get(format!("{base}/admin/security/ips")),
        Commands::Block { ip, reason, actor } => client
            .post(format!("{base}/admin/security/block"))
            .json(&ip_action(ip, reason, actor)),
        Commands::Unblock { ip, reason, actor } => client
            .post(format!("{base}/admin/security/unblock"))
            .json(&ip_action(ip, reason, actor)),
        Commands::Audit {
            user,
            category,
            action,
            limit,
        } => client
            .get(format!("{base}/admin/audit/logs"))
            .query(&query(&[
                ("user_id", user),
                ("category", category),
                ("action", action),
                ("limit", limit.map(|l| l.to_string())),
            ])),
        Commands::AuditStats { from } => client
            .get(format!("{base}/admin/audit/stats"))
            .query(&query(&[("from", from)])),
        _ => unreachable!("local commands return early"),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

fn cipher_from_env() -> Result<FieldCipher, Box<dyn std::error::Error>> {
    FieldCipher::from_env().map_err(|e| format!("{e} (set {ENCRYPTION_KEY_ENV})").into())
}

fn query(pairs: &[(&'static str, Option<String>)]) -> Vec<(&'static str, String)> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (*k, v)))
        .collect()
}

fn ip_action(ip: String, reason: Option<String>, actor: Option<String>) -> Value {
    json!({
        "ip": ip,
        "reason": reason,
        "actor": actor.map(|user_id| json!({ "user_id": user_id, "email": null })),
    })
}

#[cfg(feature = "sqlite")]
async fn migrate(
    database: &str,
    table: &str,
    fields: &[String],
    batch_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    use fundguard::crypto::migration::SqliteRecordStore;
    use fundguard::crypto::{FieldMigration, KYC_FIELDS};

    let cipher = cipher_from_env()?;
    let fields: Vec<&str> = if fields.is_empty() {
        KYC_FIELDS.to_vec()
    } else {
        fields.iter().map(String::as_str).collect()
    };
    let store = SqliteRecordStore::open(database, table, &fields)?;
    let report = FieldMigration::new(&cipher, &fields, batch_size)
        .run(&store)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
