// # zonebridge - Zone and Record Management CLI
//
// A thin front end over `zonebridge_core::ZoneService`: one operation per
// run, no DNS or provider logic of its own. Provider adapters are compiled in
// through cargo features and registered at startup.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### State Store
// - `ZONEBRIDGE_STORE_PATH`: Path of the JSON state file (required)
//
// ### DNS Provider
// - `ZONEBRIDGE_PROVIDER`: Provider type (desec, powerdns, cloudflare,
//   hetzner, vultr, dnsimple, cloudns)
// - `ZONEBRIDGE_PROVIDER_<KEY>`: Provider option `<key>`, e.g.
//   `ZONEBRIDGE_PROVIDER_API_KEY`, `ZONEBRIDGE_PROVIDER_API_URL`,
//   `ZONEBRIDGE_PROVIDER_SECONDARY_URL_1`
//
// `create-domain` needs a provider configuration. Every other command falls
// back to the configuration stored with the zone when `ZONEBRIDGE_PROVIDER`
// is unset.
//
// ### Logging
// - `ZONEBRIDGE_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export ZONEBRIDGE_STORE_PATH=/var/lib/zonebridge/state.json
// export ZONEBRIDGE_PROVIDER=desec
// export ZONEBRIDGE_PROVIDER_API_KEY=your_token
//
// zonebridge create-domain example.com
// zonebridge add-record example.com --host www --type A --value 203.0.113.10
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

use zonebridge_core::{
    ErrorClass, FileStore, LocalId, NewRecord, ProviderConfig, ProviderRegistry, RecordChanges,
    RecordType, ZoneRow, ZoneService,
};

const PROVIDER_VAR: &str = "ZONEBRIDGE_PROVIDER";
const PROVIDER_OPTION_PREFIX: &str = "ZONEBRIDGE_PROVIDER_";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Success
/// - 1: Configuration or input error
/// - 2: Runtime error
/// - 3: Provider succeeded but the local mirror was not updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZonebridgeExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
    PartialFailure = 3,
}

impl From<ZonebridgeExitCode> for ExitCode {
    fn from(code: ZonebridgeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl ZonebridgeExitCode {
    /// Exit code for a failed run
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<zonebridge_core::Error>().map(|e| e.class()) {
            Some(ErrorClass::Configuration) => Self::ConfigError,
            Some(ErrorClass::Inconsistent) => Self::PartialFailure,
            _ => Self::RuntimeError,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage DNS zones and records across providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Create a zone at the provider and register it locally
    CreateDomain {
        domain: String,
        /// Owning client/tenant
        #[arg(long, value_name = "ID")]
        client_id: Option<String>,
    },
    /// Delete a zone at the provider along with its local records
    DeleteDomain { domain: String },
    /// Show a registered zone
    ShowDomain { domain: String },
    /// List the locally recorded values of a zone
    ListRecords { domain: String },
    /// Publish one record value
    AddRecord {
        domain: String,
        /// Relative host, "@" for the apex
        #[arg(long, default_value = "@")]
        host: String,
        #[arg(long = "type", value_name = "TYPE")]
        rtype: RecordType,
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = 3600)]
        ttl: u32,
        /// MX/SRV priority
        #[arg(long)]
        priority: Option<u16>,
    },
    /// Change one recorded value
    UpdateRecord {
        domain: String,
        /// Local record id as printed by list-records
        id: String,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        ttl: Option<u32>,
        #[arg(long)]
        priority: Option<u16>,
    },
    /// Remove one recorded value
    DeleteRecord { domain: String, id: String },
    /// Print the provider's zone file
    Export { domain: String },
    /// Enable DNSSEC and print the DS records to publish at the parent
    EnableDnssec { domain: String },
    /// Disable DNSSEC
    DisableDnssec { domain: String },
    /// Print the DNSSEC state of a zone
    DnssecStatus { domain: String },
    /// Print the DS records of a zone
    DsRecords { domain: String },
    /// List the providers compiled into this binary
    Providers,
}

/// Application configuration
struct Config {
    store_path: String,
    provider: Option<ProviderConfig>,
    log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_path", &self.store_path)
            .field("provider", &self.provider.as_ref().map(|p| p.type_name()))
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let store_path = vars
            .get("ZONEBRIDGE_STORE_PATH")
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .context(
                "ZONEBRIDGE_STORE_PATH is required. \
                Set it via: export ZONEBRIDGE_STORE_PATH=/var/lib/zonebridge/state.json",
            )?;

        let provider = match vars.get(PROVIDER_VAR).filter(|p| !p.trim().is_empty()) {
            Some(kind) => {
                let mut flat: HashMap<String, String> = vars
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(PROVIDER_OPTION_PREFIX)
                            .map(|key| (key.to_ascii_lowercase(), v.clone()))
                    })
                    .collect();
                flat.insert("provider".to_string(), kind.trim().to_string());
                Some(ProviderConfig::from_flat(&flat)?)
            }
            None => None,
        };

        Ok(Self {
            store_path,
            provider,
            log_level: vars
                .get("ZONEBRIDGE_LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.store_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "ZONEBRIDGE_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if let Some(provider) = &self.provider {
            provider.validate()?;
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ZONEBRIDGE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn require_provider(&self) -> Result<&ProviderConfig> {
        self.provider.as_ref().with_context(|| {
            format!("{PROVIDER_VAR} is required for this command. Set it via: export {PROVIDER_VAR}=desec")
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ZonebridgeExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ZonebridgeExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ZonebridgeExitCode::ConfigError.into();
    }

    debug!("Configuration loaded: {:?}", config);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ZonebridgeExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(cli.command, config).await {
            Ok(()) => ZonebridgeExitCode::Success,
            Err(e) => {
                let code = ZonebridgeExitCode::for_error(&e);
                error!("{:#}", e);
                code
            }
        }
    });

    code.into()
}

/// Build a registry holding every provider compiled into this binary
fn registry() -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "desec")]
    zonebridge_provider_desec::register(&registry);
    #[cfg(feature = "powerdns")]
    zonebridge_provider_powerdns::register(&registry);
    #[cfg(feature = "cloudflare")]
    zonebridge_provider_cloudflare::register(&registry);
    #[cfg(feature = "hetzner")]
    zonebridge_provider_hetzner::register(&registry);
    #[cfg(feature = "vultr")]
    zonebridge_provider_vultr::register(&registry);
    #[cfg(feature = "dnsimple")]
    zonebridge_provider_dnsimple::register(&registry);
    #[cfg(feature = "cloudns")]
    zonebridge_provider_cloudns::register(&registry);

    registry
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Zone summary without the credentials held in its config
fn print_zone(zone: &ZoneRow) {
    println!(
        "{}\tprovider={}\tzone_id={}\tclient={}",
        zone.domain_name,
        zone.provider,
        zone.provider_zone_id.as_deref().unwrap_or("-"),
        zone.client_id.as_deref().unwrap_or("-"),
    );
}

/// Run one command
async fn run(command: Command, config: Config) -> Result<()> {
    let registry = Arc::new(registry());

    if let Command::Providers = command {
        for kind in registry.list_providers() {
            println!("{kind}");
        }
        return Ok(());
    }

    let store = FileStore::new(&config.store_path)
        .await
        .with_context(|| format!("opening state store {}", config.store_path))?;
    let service = ZoneService::new(registry, Arc::new(store));
    let provider = config.provider.as_ref();

    match command {
        Command::CreateDomain { domain, client_id } => {
            let zone = service
                .create_domain(&domain, client_id, config.require_provider()?.clone())
                .await?;
            print_zone(&zone);
        }
        Command::DeleteDomain { domain } => {
            let removed = service.delete_domain(&domain, provider).await?;
            info!("Removed {} local record(s) of {}", removed, domain);
        }
        Command::ShowDomain { domain } => match service.get_zone(&domain).await? {
            Some(zone) => print_zone(&zone),
            None => return Err(zonebridge_core::Error::not_found(format!("domain {domain} is not registered")).into()),
        },
        Command::ListRecords { domain } => {
            print_json(&service.list_records(&domain).await?)?;
        }
        Command::AddRecord {
            domain,
            host,
            rtype,
            value,
            ttl,
            priority,
        } => {
            let row = service
                .add_record(NewRecord {
                    domain,
                    host,
                    rtype,
                    value,
                    ttl,
                    priority,
                })
                .await?;
            print_json(&row)?;
        }
        Command::UpdateRecord {
            domain,
            id,
            value,
            ttl,
            priority,
        } => {
            let changes = RecordChanges { value, ttl, priority };
            let row = service
                .update_record(&domain, &LocalId::from(id), changes)
                .await?;
            print_json(&row)?;
        }
        Command::DeleteRecord { domain, id } => {
            service.delete_record(&domain, &LocalId::from(id)).await?;
        }
        Command::Export { domain } => {
            print!("{}", service.export_zonefile(&domain, provider).await?);
        }
        Command::EnableDnssec { domain } => {
            for ds in service.enable_dnssec(&domain, provider).await? {
                println!("{ds}");
            }
        }
        Command::DisableDnssec { domain } => {
            service.disable_dnssec(&domain, provider).await?;
        }
        Command::DnssecStatus { domain } => {
            print_json(&service.dnssec_status(&domain, provider).await?)?;
        }
        Command::DsRecords { domain } => {
            for ds in service.ds_records(&domain, provider).await? {
                println!("{ds}");
            }
        }
        Command::Providers => {}
    }

    Ok(())
}
