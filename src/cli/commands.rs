//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dialoguer::{Confirm, Input, Password};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::{mask_secret, Config};
use crate::error::Error;
use crate::risk::{assess, summary_text, wallet_label};
use crate::security::SessionState;
use crate::store::sync::{load_with_sync, push, MergeOutcome};
use crate::store::{keys, load_vec, save};
use crate::update::UpdateEvent;
use crate::wallet::{
    daily_totals, parse_wallet_line, to_wallet_line, upsert_wallet, CexAccount, CexName,
    ChainType, HistoryRecord, Settings, Wallet, WalletStatus, WalletType,
};

use super::App;

/// Settings the user never edits directly
const MANAGED_SETTINGS: [&str; 3] = ["isEncrypted", "encryptionVersion", "_timestamp"];

/// Settings read from a hidden prompt when no value is given
const SECRET_SETTINGS: [&str; 2] = ["openRouterApiKey", "siliconFlowApiKey"];

fn short(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

fn status_label(status: WalletStatus) -> &'static str {
    match status {
        WalletStatus::Pending => "pending",
        WalletStatus::Success => "ok",
        WalletStatus::Error => "error",
    }
}

fn confirm(prompt: String, force: bool) -> Result<bool> {
    if force {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

async fn load_wallets(app: &App) -> Result<Vec<Wallet>> {
    Ok(load_vec(app.local.as_ref(), keys::WALLETS).await?)
}

async fn save_wallets(app: &App, wallets: &[Wallet]) -> Result<()> {
    Ok(save(app.local.as_ref(), keys::WALLETS, wallets).await?)
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// First-time master password; encrypts any secrets already stored
pub async fn password_setup(app: &App) -> Result<()> {
    if app.session().has_master_password().await? {
        anyhow::bail!("A master password is already set; use `password change`");
    }

    let password = Zeroizing::new(
        Password::new()
            .with_prompt("New master password")
            .with_confirmation("Confirm master password", "Passwords do not match")
            .interact()?,
    );
    app.session().setup_password(&password).await?;
    app.credentials
        .encrypt_existing_data()
        .await
        .context("Password set, but encrypting stored secrets failed")?;

    println!("Master password set. Stored secrets are now encrypted.");
    Ok(())
}

pub async fn password_change(app: &App) -> Result<()> {
    if !app.session().has_master_password().await? {
        anyhow::bail!("No master password set; use `password setup`");
    }

    let old = Zeroizing::new(Password::new().with_prompt("Current master password").interact()?);
    let new = Zeroizing::new(
        Password::new()
            .with_prompt("New master password")
            .with_confirmation("Confirm new master password", "Passwords do not match")
            .interact()?,
    );
    app.credentials.change_password(&old, &new).await?;

    println!("Master password changed. All secrets re-encrypted.");
    Ok(())
}

pub async fn password_status(app: &App) -> Result<()> {
    match app.session().state().await? {
        SessionState::NoPasswordSet => {
            println!("No master password set. Secrets are stored in plaintext.")
        }
        SessionState::Locked => println!("Master password set. Session locked."),
        SessionState::Unlocked { expiry } => {
            let until = DateTime::<Utc>::from_timestamp_millis(expiry)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| expiry.to_string());
            println!("Session unlocked until {}", until);
        }
    }
    Ok(())
}

/// Add or replace a wallet by identity
pub async fn wallet_add(
    app: &App,
    address: &str,
    chain: &str,
    remark: &str,
    wallet_type: Option<&str>,
) -> Result<()> {
    let chain_type: ChainType = chain.parse()?;
    let wallet_type = match wallet_type {
        Some(t) => t.parse()?,
        None => WalletType::default_for(chain_type),
    };
    if address.trim().is_empty() && wallet_type != WalletType::Cold {
        anyhow::bail!("Only cold wallets may omit the address");
    }
    store_wallet(app, Wallet::new(address, chain_type, remark, wallet_type)).await
}

/// Add a wallet from an `address, chain, remark, type` line
pub async fn wallet_add_line(app: &App, line: &str) -> Result<()> {
    let wallet = parse_wallet_line(line)?;
    store_wallet(app, wallet).await
}

async fn store_wallet(app: &App, wallet: Wallet) -> Result<()> {
    if wallet.chain_type() == ChainType::Cex {
        anyhow::bail!("Exchange wallets are created from `cex add`");
    }
    let line = to_wallet_line(&wallet);
    let mut wallets = load_wallets(app).await?;
    let replaced = upsert_wallet(&mut wallets, wallet);
    save_wallets(app, &wallets).await?;

    info!("{} wallet: {}", if replaced { "Updated" } else { "Added" }, line);
    println!("{}: {}", if replaced { "Updated" } else { "Added" }, line);
    Ok(())
}

pub async fn wallet_list(app: &App) -> Result<()> {
    let wallets = load_wallets(app).await?;

    println!("\n=== WALLETS ===\n");
    if wallets.is_empty() {
        println!("No wallets. Add one with `wallet add` or `cex add`.\n");
        return Ok(());
    }

    println!(
        "{:<4} {:<24} {:<6} {:<6} {:>14} {:<8} {}",
        "#", "LABEL", "CHAIN", "TYPE", "BALANCE", "STATUS", "UPDATED"
    );
    println!("{}", "-".repeat(90));

    for (i, wallet) in wallets.iter().enumerate() {
        let updated = wallet
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<24} {:<6} {:<6} {:>14.2} {:<8} {}",
            i + 1,
            short(&wallet_label(wallet), 21),
            wallet.chain_type().to_string(),
            wallet.wallet_type.to_string(),
            wallet.balance,
            status_label(wallet.status),
            updated
        );
        if let Some(error) = &wallet.error {
            println!("     ! {}", short(error, 80));
        }
        for (category, usd) in &wallet.breakdown {
            println!("     {:<20} {:>14.2}", category, usd);
        }
    }

    let total: f64 = wallets.iter().map(|w| w.balance).sum();
    println!("{}", "-".repeat(90));
    println!("{:<42} {:>14.2}\n", "TOTAL (USD)", total);
    Ok(())
}

/// Remove a wallet by its 1-based position in `wallet list`
pub async fn wallet_remove(app: &App, index: usize, force: bool) -> Result<()> {
    let mut wallets = load_wallets(app).await?;
    if index == 0 || index > wallets.len() {
        anyhow::bail!("No wallet #{} (have {})", index, wallets.len());
    }
    let wallet = &wallets[index - 1];
    if wallet.is_cex() {
        anyhow::bail!("Exchange rows follow their account; use `cex remove`");
    }

    if !confirm(format!("Remove wallet {}?", wallet_label(wallet)), force)? {
        info!("Wallet removal cancelled by user");
        return Ok(());
    }
    let removed = wallets.remove(index - 1);
    save_wallets(app, &wallets).await?;
    println!("Removed {}", wallet_label(&removed));
    Ok(())
}

fn find_account<'a>(accounts: &'a [CexAccount], id: &str) -> Result<&'a CexAccount> {
    let matches: Vec<&CexAccount> = accounts.iter().filter(|a| a.id.starts_with(id)).collect();
    match matches.as_slice() {
        [account] => Ok(*account),
        [] => anyhow::bail!("No exchange account with id {}", id),
        _ => anyhow::bail!("Id prefix {} is ambiguous", id),
    }
}

/// Prompt for keys, test them, then store the account
pub async fn cex_add(app: &App, exchange: &str, remark: &str, force: bool) -> Result<()> {
    let cex_name: CexName = exchange.parse()?;
    app.unlock().await?;

    let api_key: String = Input::new().with_prompt("API key").interact_text()?;
    let api_secret = Zeroizing::new(Password::new().with_prompt("API secret").interact()?);
    let passphrase = if cex_name.requires_passphrase() {
        Zeroizing::new(Password::new().with_prompt("API passphrase").interact()?)
    } else {
        Zeroizing::new(String::new())
    };

    print!("Testing {} connection... ", cex_name);
    let result = app
        .exchanges()
        .test_cex_api(cex_name, &api_key, &api_secret, &passphrase)
        .await;
    if result.success {
        println!("OK (${:.2})", result.balance.unwrap_or_default());
    } else {
        println!("FAILED: {}", result.error.as_deref().unwrap_or("unknown error"));
        if !confirm("Save the account anyway?".to_string(), force)? {
            return Ok(());
        }
    }

    let account = app
        .credentials
        .add_cex_account(CexAccount::new(
            cex_name,
            &api_key,
            &api_secret,
            &passphrase,
            remark,
        ))
        .await?;
    println!(
        "Added {} account \"{}\" ({})",
        cex_name,
        account.display_remark(),
        short(&account.id, 8)
    );
    Ok(())
}

/// List accounts without touching secrets
pub async fn cex_list(app: &App) -> Result<()> {
    let accounts = app.credentials.raw_cex_accounts().await?;

    println!("\n=== EXCHANGE ACCOUNTS ===\n");
    println!(
        "{:<10} {:<10} {:<20} {:<16} {}",
        "ID", "EXCHANGE", "REMARK", "API KEY", "ENCRYPTED"
    );
    println!("{}", "-".repeat(70));
    for account in &accounts {
        println!(
            "{:<10} {:<10} {:<20} {:<16} {}",
            short(&account.id, 8),
            account.cex_name.to_string(),
            short(&account.display_remark(), 17),
            mask_secret(&account.api_key),
            if account.is_encrypted { "yes" } else { "no" }
        );
    }
    println!();
    Ok(())
}

pub async fn cex_remove(app: &App, id: &str, force: bool) -> Result<()> {
    let accounts = app.credentials.raw_cex_accounts().await?;
    let account = find_account(&accounts, id)?;

    if !confirm(
        format!(
            "Remove {} account \"{}\"?",
            account.cex_name,
            account.display_remark()
        ),
        force,
    )? {
        info!("Account removal cancelled by user");
        return Ok(());
    }

    app.unlock().await?;
    app.credentials.delete_cex_account(&account.id).await?;
    println!("Removed. Its wallet row is pruned on the next update.");
    Ok(())
}

/// Re-test a stored account's keys
pub async fn cex_test(app: &App, id: &str) -> Result<()> {
    app.unlock().await?;
    let accounts = app.credentials.decrypted_cex_accounts().await?;
    let account = find_account(&accounts, id)?;

    let result = app
        .exchanges()
        .test_cex_api(
            account.cex_name,
            &account.api_key,
            &account.api_secret,
            &account.passphrase,
        )
        .await;
    if result.success {
        println!(
            "{} \"{}\": OK, ${:.2}",
            account.cex_name,
            account.display_remark(),
            result.balance.unwrap_or_default()
        );
        Ok(())
    } else {
        anyhow::bail!(
            "{} \"{}\" failed: {}",
            account.cex_name,
            account.display_remark(),
            result.error.unwrap_or_default()
        )
    }
}

/// Apply one `key=value` edit to plaintext settings
pub fn apply_setting(settings: &Settings, key: &str, value: &str) -> crate::Result<Settings> {
    if MANAGED_SETTINGS.contains(&key) {
        return Err(Error::Config(format!("{} is managed automatically", key)));
    }

    let mut json = serde_json::to_value(settings)?;
    let slot = json
        .get_mut(key)
        .ok_or_else(|| Error::Config(format!("unknown setting: {}", key)))?;
    *slot = match *slot {
        Value::Bool(_) => Value::Bool(
            value
                .trim()
                .parse()
                .map_err(|_| Error::Parse(format!("{} expects true or false", key)))?,
        ),
        _ => Value::String(value.trim().to_string()),
    };

    serde_json::from_value(json)
        .map_err(|e| Error::Config(format!("invalid value for {}: {}", key, e)))
}

pub async fn settings_show(app: &App) -> Result<()> {
    let settings = app.credentials.settings_for_read().await?;

    println!("\n=== SETTINGS ===\n");
    println!("evmSource:          {:?}", settings.evm_source);
    println!("solSource:          {:?}", settings.sol_source);
    println!("etherscanApiKey:    {}", mask_secret(&settings.etherscan_api_key));
    println!("heliusApiKey:       {}", mask_secret(&settings.helius_api_key));
    println!(
        "solCustomRpc:       {}",
        crate::config::mask_url(&settings.sol_custom_rpc)
    );
    println!("aiProvider:         {}", settings.ai_provider);
    println!("openRouterApiKey:   {}", mask_secret(&settings.open_router_api_key));
    println!("siliconFlowApiKey:  {}", mask_secret(&settings.silicon_flow_api_key));
    println!("syncEnabled:        {}", settings.sync_enabled);
    println!("syncWallets:        {}", settings.sync_wallets);
    println!("syncCexAccounts:    {}", settings.sync_cex_accounts);
    println!();
    Ok(())
}

/// Edit one setting; secret keys are prompted for when `value` is omitted
pub async fn settings_set(app: &App, key: &str, value: Option<String>) -> Result<()> {
    app.unlock().await?;

    let value = match value {
        Some(v) => Zeroizing::new(v),
        None if SECRET_SETTINGS.contains(&key) => {
            Zeroizing::new(Password::new().with_prompt(key).interact()?)
        }
        None => anyhow::bail!("A value is required for {}", key),
    };

    let settings = app.credentials.decrypted_settings().await?;
    let updated = apply_setting(&settings, key, &value)?;
    app.credentials.save_settings(updated).await?;
    println!("{} updated", key);
    Ok(())
}

/// Run one update cycle in the foreground with progress output
pub async fn update(app: &App) -> Result<()> {
    if let Err(e) = app.unlock().await {
        warn!("Continuing locked, exchange accounts will be skipped: {}", e);
    }

    let orchestrator = app.orchestrator();
    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UpdateEvent::UpdateStatus { current, total }) => {
                    println!("[{}/{}] fetching...", current, total)
                }
                Ok(UpdateEvent::Countdown { remaining }) if remaining > 0 => {
                    println!("    capturing in {}s", remaining)
                }
                Ok(UpdateEvent::UpdateComplete) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    });

    let report = match orchestrator.run_cycle().await {
        Ok(report) => report,
        Err(e) => {
            printer.abort();
            return Err(e.into());
        }
    };
    let _ = printer.await;

    println!(
        "\nUpdated {} item(s), {} failed. Total ${:.2}",
        report.succeeded, report.failed, report.total_usd
    );
    if report.cex_skipped {
        println!("Exchange accounts were skipped: unlock with the master password to include them.");
    }
    wallet_list(app).await
}

/// Daily portfolio totals, newest last
pub async fn history(app: &App, limit: usize) -> Result<()> {
    let records: Vec<HistoryRecord> = load_vec(app.local.as_ref(), keys::HISTORY).await?;
    let totals = daily_totals(&records);

    println!("\n=== PORTFOLIO HISTORY ===\n");
    if totals.is_empty() {
        println!("No history yet. Run `update` first.\n");
        return Ok(());
    }

    println!("{:<12} {:>14} {:>12}", "DATE", "TOTAL (USD)", "CHANGE");
    println!("{}", "-".repeat(40));
    let start = totals.len().saturating_sub(limit);
    for i in start..totals.len() {
        let (date, total) = &totals[i];
        let change = if i > 0 {
            format!("{:+.2}", total - totals[i - 1].1)
        } else {
            "-".to_string()
        };
        println!("{:<12} {:>14.2} {:>12}", date, total, change);
    }
    println!();
    Ok(())
}

pub async fn sync_push(app: &App) -> Result<()> {
    let report = push(app.local.as_ref(), app.sync.as_ref()).await?;
    if !report.settings {
        println!("Sync is disabled. Enable it with `settings set syncEnabled true`.");
        return Ok(());
    }
    println!(
        "Pushed settings{}{}",
        if report.wallets { ", wallets" } else { "" },
        if report.cex_accounts { ", exchange accounts" } else { "" }
    );
    for key in &report.skipped {
        println!("Skipped {}: over the sync quota", key);
    }
    Ok(())
}

pub async fn sync_pull(app: &App) -> Result<()> {
    match load_with_sync(app.local.as_ref(), app.sync.as_ref()).await? {
        MergeOutcome::AdoptedCloud => println!("Adopted newer synced data."),
        MergeOutcome::KeptLocal => println!("Local data is up to date."),
    }
    Ok(())
}

pub async fn risk(app: &App) -> Result<()> {
    let wallets = load_wallets(app).await?;
    let report = assess(&wallets, &app.config.risk);

    println!("\n=== RISK ===\n");
    println!("Total: ${:.2}", report.total);
    for share in &report.by_wallet_type {
        println!(
            "  {:<6} ${:>14.2}  {:>5.1}%",
            share.wallet_type.to_string(),
            share.usd,
            share.pct
        );
    }
    if let Some(largest) = &report.largest_wallet {
        println!(
            "Largest: {} (${:.2}, {:.1}%)",
            largest.label, largest.usd, largest.pct
        );
    }
    if report.warnings.is_empty() {
        println!("\nNo warnings.");
    } else {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

/// Ask the configured AI provider to review the portfolio
pub async fn analyze(app: &App) -> Result<()> {
    app.unlock().await?;
    let settings = app.credentials.decrypted_settings().await?;
    let api_key = settings.active_ai_key();
    if api_key.is_empty() {
        anyhow::bail!(
            "No AI key configured; run `settings set {}`",
            settings.active_ai_key_field()
        );
    }

    let wallets = load_wallets(app).await?;
    let report = assess(&wallets, &app.config.risk);
    let summary = summary_text(&wallets, &report);

    info!("Requesting portfolio analysis from {}", settings.ai_provider);
    let reply = app
        .vision()
        .analyze_portfolio(settings.ai_provider, api_key, &summary)
        .await?;
    println!("\n=== ANALYSIS ===\n\n{}\n", reply);
    Ok(())
}
