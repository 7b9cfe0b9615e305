//! CryptoGuard CLI Application
//!
//! Guardian-protected accounts, transfer anomaly checks and time-bounded
//! recovery from the command line or over HTTP.

use clap::{Parser, Subcommand};
use cryptoguard::api::{self, ApiState};
use cryptoguard::cli::{self, AppState};
use cryptoguard::protocol::AccountManager;
use cryptoguard::storage::Storage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cryptoguard")]
#[command(version = "0.1.0")]
#[command(about = "Guardian recovery and transfer anomaly protection", long_about = None)]
struct Cli {
    /// Data directory for protocol state and identities
    #[arg(short, long, default_value = ".cryptoguard_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Local key identities
    Identity {
        #[command(subcommand)]
        action: IdentityCommands,
    },

    /// Protected accounts and guardians
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },

    /// Transfer patterns and anomaly checks
    Monitor {
        #[command(subcommand)]
        action: MonitorCommands,
    },

    /// Guardian recovery
    Recovery {
        #[command(subcommand)]
        action: RecoveryCommands,
    },

    /// Show the event ledger
    Events {
        /// First sequence number to show
        #[arg(short, long, default_value = "0")]
        since: u64,

        /// Only events of this account
        #[arg(short, long)]
        account: Option<String>,

        /// Verify the hash chain
        #[arg(long)]
        verify: bool,
    },

    /// Saved state and backups
    State {
        #[command(subcommand)]
        action: StateCommands,
    },

    /// REST API server
    Api {
        #[command(subcommand)]
        action: ApiCommands,
    },
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Create a new identity
    New {
        /// Optional label for the identity
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List all identities
    List,
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create a protected account for an identity
    Create {
        /// Identity acting as owner
        #[arg(long = "as")]
        caller: String,

        /// Comma-separated guardian addresses
        #[arg(short, long)]
        guardians: String,

        /// Approvals required for recovery
        #[arg(short, long)]
        threshold: u32,

        /// 32-byte encrypted key blob as hex (random when omitted)
        #[arg(short, long)]
        key_blob: Option<String>,
    },

    /// Add a guardian to the caller's account
    AddGuardian {
        #[arg(long = "as")]
        caller: String,

        #[arg(short, long)]
        guardian: String,
    },

    /// Change the caller's threshold
    Threshold {
        #[arg(long = "as")]
        caller: String,

        #[arg(short, long)]
        threshold: u32,
    },

    /// Show a protected account
    Show {
        #[arg(short, long)]
        address: String,
    },

    /// Check guardian membership
    IsGuardian {
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        candidate: String,
    },
}

#[derive(Subcommand)]
enum MonitorCommands {
    /// Set the caller's transfer pattern
    SetPattern {
        #[arg(long = "as")]
        caller: String,

        /// Max transfers per window
        #[arg(short, long)]
        frequency: u32,

        /// Max value of a single transfer
        #[arg(short, long)]
        max_amount: u128,

        /// Window length in seconds
        #[arg(short, long)]
        window: u64,
    },

    /// Check a proposed transfer
    Check {
        #[arg(short, long)]
        account: String,

        #[arg(short = 'n', long)]
        amount: u128,
    },

    /// Show an account's pattern
    Show {
        #[arg(short, long)]
        address: String,
    },
}

#[derive(Subcommand)]
enum RecoveryCommands {
    /// Open a recovery request
    Initiate {
        #[arg(long = "as")]
        caller: String,

        #[arg(short, long)]
        account: String,
    },

    /// Approve the active request
    Approve {
        #[arg(long = "as")]
        caller: String,

        #[arg(short, long)]
        account: String,
    },

    /// Close a timed-out request
    Expire {
        #[arg(long = "as")]
        caller: String,

        #[arg(short, long)]
        account: String,
    },

    /// Show the request of an account
    Status {
        #[arg(short, long)]
        account: String,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show state statistics
    Info,

    /// List backups
    Backups,

    /// Restore a backup (0 is newest)
    Restore {
        #[arg(short, long)]
        index: usize,
    },
}

#[derive(Subcommand)]
enum ApiCommands {
    /// Start the REST API server
    Start {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Handle API commands with tokio runtime
    if let Commands::Api { ref action } = cli.command {
        return run_api_command(action, &cli.data_dir);
    }

    let mut state = AppState::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Api { .. } => unreachable!(),

        Commands::Identity { action } => match action {
            IdentityCommands::New { label } => cli::cmd_identity_new(&state, label.as_deref())?,
            IdentityCommands::List => cli::cmd_identity_list(&state)?,
        },

        Commands::Account { action } => match action {
            AccountCommands::Create {
                caller,
                guardians,
                threshold,
                key_blob,
            } => cli::cmd_account_create(
                &mut state,
                &caller,
                &guardians,
                threshold,
                key_blob.as_deref(),
            )?,
            AccountCommands::AddGuardian { caller, guardian } => {
                cli::cmd_account_add_guardian(&mut state, &caller, &guardian)?
            }
            AccountCommands::Threshold { caller, threshold } => {
                cli::cmd_account_threshold(&mut state, &caller, threshold)?
            }
            AccountCommands::Show { address } => cli::cmd_account_show(&state, &address)?,
            AccountCommands::IsGuardian { address, candidate } => {
                cli::cmd_account_is_guardian(&state, &address, &candidate)?
            }
        },

        Commands::Monitor { action } => match action {
            MonitorCommands::SetPattern {
                caller,
                frequency,
                max_amount,
                window,
            } => cli::cmd_monitor_set_pattern(&mut state, &caller, frequency, max_amount, window)?,
            MonitorCommands::Check { account, amount } => {
                cli::cmd_monitor_check(&mut state, &account, amount)?
            }
            MonitorCommands::Show { address } => cli::cmd_monitor_show(&state, &address)?,
        },

        Commands::Recovery { action } => match action {
            RecoveryCommands::Initiate { caller, account } => {
                cli::cmd_recovery_initiate(&mut state, &caller, &account)?
            }
            RecoveryCommands::Approve { caller, account } => {
                cli::cmd_recovery_approve(&mut state, &caller, &account)?
            }
            RecoveryCommands::Expire { caller, account } => {
                cli::cmd_recovery_expire(&mut state, &caller, &account)?
            }
            RecoveryCommands::Status { account } => cli::cmd_recovery_status(&state, &account)?,
        },

        Commands::Events {
            since,
            account,
            verify,
        } => cli::cmd_events(&state, since, account.as_deref(), verify)?,

        Commands::State { action } => match action {
            StateCommands::Info => cli::cmd_state_info(&state)?,
            StateCommands::Backups => cli::cmd_state_backups(&state)?,
            StateCommands::Restore { index } => cli::cmd_state_restore(&mut state, index)?,
        },
    }

    Ok(())
}

fn run_api_command(
    action: &ApiCommands,
    data_dir: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        match action {
            ApiCommands::Start { port } => {
                let storage = Storage::at(data_dir)?;
                let manager = storage.load_or_else(AccountManager::default)?;
                let stats = manager.stats();

                println!("🛡️  CryptoGuard API");
                println!("   📁 Data directory: {:?}", data_dir);
                println!(
                    "   📊 {} accounts, {} events",
                    stats.accounts, stats.events
                );
                println!("   🌐 http://localhost:{}", port);

                let state = ApiState::new(manager, storage);

                tokio::spawn(async {
                    tokio::signal::ctrl_c().await.ok();
                    println!("\n📴 Shutting down API server...");
                    std::process::exit(0);
                });

                api::serve(state, *port).await?;
            }
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
