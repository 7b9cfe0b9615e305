//! CLI commands for the protocol
//!
//! Every command loads state from the data directory, runs one call and
//! saves the state back when the call changed it.

use crate::clock::format_timestamp;
use crate::events::EventRecord;
use crate::guardian::KeyBlob;
use crate::identity::{Address, Keystore, Principal};
use crate::protocol::AccountManager;
use crate::recovery::ApprovalOutcome;
use crate::storage::Storage;
use std::path::PathBuf;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub manager: AccountManager,
    pub storage: Storage,
    pub keystore: Keystore,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load state from `data_dir`, starting fresh if nothing is saved yet
    pub fn new(data_dir: PathBuf) -> CliResult<Self> {
        let storage = Storage::at(&data_dir)?;
        let keystore = Keystore::new(&data_dir.join("identities"))?;
        let manager = storage.load_or_else(AccountManager::default)?;

        Ok(Self {
            manager,
            storage,
            keystore,
            data_dir,
        })
    }

    /// Save the current state
    pub fn save(&self) -> CliResult<()> {
        self.storage.save(&self.manager)?;
        Ok(())
    }

    /// Authenticate as a keystore identity by key possession
    fn principal(&self, address: &str) -> CliResult<Principal> {
        Ok(self.keystore.load_identity(address)?.principal())
    }
}

fn print_events(records: &[EventRecord]) {
    for record in records {
        println!(
            "   📣 #{} {} ({})",
            record.seq,
            record.event.name(),
            format_timestamp(record.timestamp)
        );
    }
}

fn parse_guardians(raw: &str) -> Vec<Address> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Address::from)
        .collect()
}

// ============================================================================
// Identities
// ============================================================================

/// Create a new identity
pub fn cmd_identity_new(state: &AppState, label: Option<&str>) -> CliResult<()> {
    let identity = state.keystore.create_identity(label)?;

    println!("🔐 New identity created!");
    println!("   📍 Address: {}", identity.address());
    println!("   🔑 Public Key: {}", identity.key_pair().public_key_hex());
    if let Some(l) = &identity.label {
        println!("   🏷️  Label: {}", l);
    }
    println!("\n   ⚠️  The private key is stored in {:?}", state.keystore.dir());

    Ok(())
}

/// List identities in the keystore
pub fn cmd_identity_list(state: &AppState) -> CliResult<()> {
    let identities = state.keystore.list_identities()?;

    if identities.is_empty() {
        println!("📭 No identities found. Create one with: cryptoguard identity new");
        return Ok(());
    }

    println!("📋 Identities:");
    for info in &identities {
        let label = info.label.as_deref().unwrap_or("-");
        let protected = if state.manager.account(&info.address).is_some() {
            "protected"
        } else {
            "unprotected"
        };
        println!("   {} ({}) - {}", info.address, label, protected);
    }

    Ok(())
}

// ============================================================================
// Accounts
// ============================================================================

/// Create the caller's protected account
pub fn cmd_account_create(
    state: &mut AppState,
    caller: &str,
    guardians: &str,
    threshold: u32,
    key_blob: Option<&str>,
) -> CliResult<()> {
    let principal = state.principal(caller)?;
    let key_blob = match key_blob {
        Some(hex_blob) => KeyBlob::from_hex(hex_blob)?,
        None => KeyBlob::random(),
    };

    let receipt =
        state
            .manager
            .create_account(&principal, key_blob, parse_guardians(guardians), threshold)?;
    state.save()?;

    println!("🛡️  Protected account created!");
    println!("   📍 Account: {}", receipt.value.owner);
    println!("   👥 Guardians: {}", receipt.value.guardian_count());
    println!("   🔢 Threshold: {}", receipt.value.description());
    print_events(&receipt.events);

    Ok(())
}

/// Add a guardian to the caller's account
pub fn cmd_account_add_guardian(state: &mut AppState, caller: &str, guardian: &str) -> CliResult<()> {
    let principal = state.principal(caller)?;
    let account = principal.address().clone();

    let receipt = state
        .manager
        .add_guardian(&principal, &account, Address::from(guardian))?;
    state.save()?;

    println!("✅ Guardian {} added to {}", guardian, account);
    println!("   👥 Guardians: {}", receipt.value);
    print_events(&receipt.events);

    Ok(())
}

/// Change the threshold of the caller's account
pub fn cmd_account_threshold(state: &mut AppState, caller: &str, threshold: u32) -> CliResult<()> {
    let principal = state.principal(caller)?;
    let account = principal.address().clone();

    let receipt = state
        .manager
        .update_threshold(&principal, &account, threshold)?;
    state.save()?;

    println!("✅ Threshold of {} set to {}", account, receipt.value);
    print_events(&receipt.events);

    Ok(())
}

/// Show a protected account
pub fn cmd_account_show(state: &AppState, address: &str) -> CliResult<()> {
    let account = Address::from(address);

    let guarding = state.manager.guarded_by(&account);
    if !guarding.is_empty() {
        println!("🤝 {} guards {} account(s):", address, guarding.len());
        for guarded in &guarding {
            println!("   └─ {}", guarded.owner);
        }
    }

    let Some(record) = state.manager.account(&account) else {
        println!("❌ No protected account for {}", address);
        return Ok(());
    };

    println!("🛡️  Account {}", record.owner);
    println!("   ├─ Active: {}", record.is_active);
    println!("   ├─ Created: {}", format_timestamp(record.created_at));
    println!("   ├─ Threshold: {}", record.description());
    println!("   └─ Guardians:");
    for guardian in record.guardians() {
        println!("      └─ {}", guardian);
    }

    if let Some(recovery) = state.manager.recovery_request(&account) {
        println!(
            "   🔄 Recovery: {:?} ({} approvals)",
            recovery.status, recovery.approval_count
        );
    }

    Ok(())
}

/// Membership query
pub fn cmd_account_is_guardian(state: &AppState, address: &str, candidate: &str) -> CliResult<()> {
    let is_guardian = state
        .manager
        .is_guardian(&Address::from(address), &Address::from(candidate));

    if is_guardian {
        println!("✅ {} is a guardian of {}", candidate, address);
    } else {
        println!("❌ {} is not a guardian of {}", candidate, address);
    }

    Ok(())
}

// ============================================================================
// Monitor
// ============================================================================

/// Set the caller's transfer pattern
pub fn cmd_monitor_set_pattern(
    state: &mut AppState,
    caller: &str,
    frequency: u32,
    max_amount: u128,
    window: u64,
) -> CliResult<()> {
    let principal = state.principal(caller)?;

    let receipt = state
        .manager
        .set_pattern(&principal, frequency, max_amount, window);
    state.save()?;

    println!("📈 Pattern set for {}", principal.address());
    println!("   ├─ Frequency: {} per {}s", receipt.value.frequency, receipt.value.time_window);
    println!("   └─ Max amount: {}", receipt.value.max_amount);

    Ok(())
}

/// Run the anomaly gate for a transfer
pub fn cmd_monitor_check(state: &mut AppState, account: &str, amount: u128) -> CliResult<()> {
    let receipt = state
        .manager
        .check_transaction(&Address::from(account), amount)?;
    state.save()?;

    match receipt.value.reason() {
        None => println!("✅ Transfer of {} from {} allowed", amount, account),
        Some(reason) => println!("🚨 Transfer of {} from {} denied: {}", amount, account, reason),
    }
    print_events(&receipt.events);

    Ok(())
}

/// Show an account's pattern
pub fn cmd_monitor_show(state: &AppState, address: &str) -> CliResult<()> {
    let account = Address::from(address);

    match state.manager.pattern(&account) {
        Some(pattern) => {
            println!("📈 Pattern for {}", address);
            println!("   ├─ Frequency: {} per {}s", pattern.frequency, pattern.time_window);
            println!("   ├─ Max amount: {}", pattern.max_amount);
            println!(
                "   └─ Recent transfers: {}",
                state.manager.recent_transfers(&account)
            );
        }
        None => println!("📭 No pattern set for {}", address),
    }

    Ok(())
}

// ============================================================================
// Recovery
// ============================================================================

/// Open a recovery request as a guardian
pub fn cmd_recovery_initiate(state: &mut AppState, caller: &str, account: &str) -> CliResult<()> {
    let principal = state.principal(caller)?;

    let receipt = state
        .manager
        .initiate_recovery(&principal, &Address::from(account))?;
    state.save()?;

    println!("🔄 Recovery of {} initiated", account);
    println!("   ⏳ Approvals accepted until {}", format_timestamp(receipt.value.deadline));
    print_events(&receipt.events);

    Ok(())
}

/// Approve the active recovery request
pub fn cmd_recovery_approve(state: &mut AppState, caller: &str, account: &str) -> CliResult<()> {
    let principal = state.principal(caller)?;

    let receipt = state
        .manager
        .approve_recovery(&principal, &Address::from(account))?;
    state.save()?;

    match receipt.value {
        ApprovalOutcome::Approved {
            approvals,
            threshold,
        } => println!("✍️  Approval recorded ({}/{})", approvals, threshold),
        ApprovalOutcome::Completed { approvals } => {
            println!("🎉 Recovery of {} completed with {} approvals", account, approvals)
        }
    }
    print_events(&receipt.events);

    Ok(())
}

/// Close a timed-out recovery request
pub fn cmd_recovery_expire(state: &mut AppState, caller: &str, account: &str) -> CliResult<()> {
    let principal = state.principal(caller)?;

    let receipt = state
        .manager
        .expire_recovery(&principal, &Address::from(account))?;
    state.save()?;

    println!("⌛ Recovery of {} expired", account);
    print_events(&receipt.events);

    Ok(())
}

/// Show the recovery request of an account
pub fn cmd_recovery_status(state: &AppState, account: &str) -> CliResult<()> {
    let Some(request) = state.manager.recovery_request(&Address::from(account)) else {
        println!("📭 No recovery request for {}", account);
        return Ok(());
    };

    println!("🔄 Recovery of {}", account);
    println!("   ├─ Status: {:?}", request.status);
    println!("   ├─ Initiator: {}", request.initiator);
    println!("   ├─ Initiated: {}", format_timestamp(request.initiated_at));
    println!("   ├─ Deadline: {}", format_timestamp(request.deadline));
    println!("   └─ Approvals: {}", request.approval_count);
    for guardian in &request.approvals {
        println!("      └─ {}", guardian);
    }

    Ok(())
}

// ============================================================================
// Events and state
// ============================================================================

/// List ledger records, optionally verifying the hash chain
pub fn cmd_events(
    state: &AppState,
    since: u64,
    account: Option<&str>,
    verify: bool,
) -> CliResult<()> {
    let records: Vec<&EventRecord> = match account {
        Some(address) => state.manager.account_events(&Address::from(address), since),
        None => state.manager.events(since).iter().collect(),
    };

    if records.is_empty() {
        println!("📭 No events since #{}", since);
    } else {
        println!("📜 Events:");
        for record in records {
            println!(
                "   #{} | {} | {} | {}",
                record.seq,
                format_timestamp(record.timestamp),
                record.event.name(),
                record.event.account()
            );
        }
    }

    if verify {
        println!("🔍 Verifying event ledger...");
        match state.manager.verify_events() {
            Ok(()) => println!(
                "✅ Ledger is intact ({} records)",
                state.manager.event_log().len()
            ),
            Err(e) => println!("❌ Ledger verification FAILED: {}", e),
        }
    }

    Ok(())
}

/// Show protocol and storage statistics
pub fn cmd_state_info(state: &AppState) -> CliResult<()> {
    let stats = state.manager.stats();
    let storage = state.storage.stats()?;

    println!("🛡️  CryptoGuard State");
    println!("   ├─ Accounts: {}", stats.accounts);
    println!("   ├─ Patterns: {}", stats.patterns);
    println!("   ├─ Active recoveries: {}", stats.active_recoveries);
    println!("   ├─ Events: {}", stats.events);
    println!("   ├─ Latest hash: {}...", &stats.latest_hash[..16]);
    println!("   ├─ State file: {} bytes", storage.file_size);
    println!("   └─ Backups: {}", storage.backup_count);

    Ok(())
}

/// Replace the current state with a backup
pub fn cmd_state_restore(state: &mut AppState, index: usize) -> CliResult<()> {
    let restored = state.storage.restore_backup(index)?;
    state.manager = restored;
    state.save()?;

    println!("📥 State restored from backup {}", index);
    println!("   Events: {}", state.manager.event_log().len());

    Ok(())
}

/// List available backups
pub fn cmd_state_backups(state: &AppState) -> CliResult<()> {
    let backups = state.storage.list_backups();

    if backups.is_empty() {
        println!("📭 No backups in {:?}", state.storage.data_dir());
    } else {
        println!("🗂️  Backups (0 is newest): {:?}", backups);
    }

    Ok(())
}
