// ABOUTME: gitkey CLI entry point.
// ABOUTME: Dispatches status, list, show, copy, generate, delete, test, and config subcommands.

mod clipboard;
mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clipboard::{Clipboard, CommandClipboard};
use colored::Colorize;
use config::Config;
use gitkey_ssh::{
    public_path_for, validate_key_name, DirectoryAccess, ErrorKind, GeneratedKey, GenerationOutcome,
    GenerationRequest, KeyManager, KeyPair, KeyType, Passphrase, Registration,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gitkey")]
#[command(about = "Set up and verify SSH keys for Git hosting")]
#[command(version)]
struct Cli {
    /// SSH key directory (defaults to ~/.ssh)
    #[arg(long, global = true, env = "GITKEY_SSH_DIR")]
    ssh_dir: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, global = true, env = "GITKEY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the default key pair and OpenSSH tool availability
    Status,

    /// List every key pair in the SSH directory
    List,

    /// Print a public key
    Show {
        /// Private key file name (e.g. id_ed25519)
        name: String,
    },

    /// Copy a public key to the clipboard
    Copy {
        /// Private key file name (e.g. id_ed25519)
        name: String,
    },

    /// Generate a new key pair and load it into ssh-agent
    Generate(GenerateArgs),

    /// Delete a key pair
    Delete {
        /// Private key file name (e.g. id_rsa)
        name: String,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Test SSH authentication against the Git host
    Test {
        /// Git host (defaults to config, then github.com)
        #[arg(long)]
        host: Option<String>,

        /// SSH user on the host
        #[arg(long)]
        user: Option<String>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Configuration file commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show version information
    Version,
}

#[derive(Args)]
struct GenerateArgs {
    /// Email or comment embedded in the key (defaults to user@hostname)
    #[arg(long, short = 'e')]
    email: Option<String>,

    /// Private key file name (disables RSA fallback)
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Key algorithm (disables RSA fallback)
    #[arg(long, short = 'a', value_enum)]
    algorithm: Option<AlgorithmArg>,

    /// Passphrase for the key (empty for none)
    #[arg(long, conflicts_with_all = ["ask_passphrase", "interactive"])]
    passphrase: Option<String>,

    /// Prompt for the passphrase
    #[arg(long, conflicts_with = "interactive")]
    ask_passphrase: bool,

    /// Run ssh-keygen in a new terminal window and enter the passphrase there
    #[arg(long)]
    interactive: bool,

    /// Replace an existing key with the same name
    #[arg(long)]
    overwrite: bool,
}

/// Algorithms `generate` accepts as an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlgorithmArg {
    Ed25519,
    Rsa,
}

impl From<AlgorithmArg> for KeyType {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Ed25519 => KeyType::Ed25519,
            AlgorithmArg::Rsa => KeyType::Rsa,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with default values
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let _log = gitkey_log::init_session("gitkey");

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Config(cmd) => run_config(cmd, &config_path),
        Commands::Version => {
            print_version();
            Ok(())
        }
        command => {
            let config = Config::load_or_default(&config_path)?;
            let ssh_dir = match cli.ssh_dir {
                Some(dir) => dir,
                None => config.ssh_dir_expanded()?,
            };
            let manager = KeyManager::system(ssh_dir, config.toolchain());
            run(command, &manager, &config).await
        }
    }
}

async fn run(command: Commands, manager: &KeyManager, config: &Config) -> Result<()> {
    match command {
        Commands::Status => run_status(manager).await,
        Commands::List => run_list(manager).await,
        Commands::Show { name } => {
            let pair = require_pair(manager, &name).await?;
            println!("{}", manager.store().load_public_key(&pair.public_path)?);
            Ok(())
        }
        Commands::Copy { name } => run_copy(manager, &name).await,
        Commands::Generate(args) => run_generate(manager, args).await,
        Commands::Delete { name, yes } => run_delete(manager, &name, yes).await,
        Commands::Test {
            host,
            user,
            timeout,
        } => {
            let host = host.unwrap_or_else(|| config.host.clone());
            let user = user.unwrap_or_else(|| config.user.clone());
            run_test(manager, &host, &user, timeout).await
        }
        Commands::Config(_) | Commands::Version => Ok(()),
    }
}

fn run_config(cmd: ConfigCommands, path: &std::path::Path) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config already exists at {}. Use --force to replace it.",
                    path.display()
                );
            }
            Config::default().save(path)?;
            println!("{} {}", "Wrote".green(), path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = Config::load_or_default(path)?;
            println!("{}", format!("# {}", path.display()).dimmed());
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(())
        }
    }
}

async fn run_status(manager: &KeyManager) -> Result<()> {
    println!("{}", "SSH Key Status".bold());
    println!("  Directory: {}", manager.store().dir().display());
    if let DirectoryAccess::Loose(mode) = manager.store().ensure_directory().await? {
        println!(
            "  {} directory mode is {:o}; run {} to restrict it",
            "warning:".yellow(),
            mode,
            format!("chmod 700 {}", manager.store().dir().display()).bold()
        );
    }

    match manager.store().find_default_key_pair().await? {
        Some(pair) => {
            println!("  Default key: {}", pair.private_path.display().to_string().green());
            print_pair_details(&pair);
        }
        None => {
            println!("  Default key: {}", "none".yellow());
            println!(
                "  Run {} to create one.",
                "gitkey generate --email you@example.com".bold()
            );
        }
    }

    println!();
    println!("{}", "OpenSSH tools".bold());
    for (tool, available) in manager.tool_report().await {
        let mark = if available {
            "found".green()
        } else {
            "missing".red()
        };
        println!("  {:<12} {}", tool, mark);
    }
    Ok(())
}

fn print_pair_details(pair: &KeyPair) {
    println!("    Type:        {}", pair.key_type);
    if !pair.comment.is_empty() {
        println!("    Comment:     {}", pair.comment);
    }
    if let Some(fingerprint) = pair.fingerprint() {
        println!("    Fingerprint: {}", fingerprint.dimmed());
    }
    let protection = match pair.is_protected() {
        Some(true) => "passphrase",
        Some(false) => "none",
        None => "unknown",
    };
    println!("    Protection:  {}", protection);
}

async fn run_list(manager: &KeyManager) -> Result<()> {
    let pairs = manager.store().find_all_key_pairs().await?;
    if pairs.is_empty() {
        println!(
            "No SSH key pairs in {}",
            manager.store().dir().display()
        );
        return Ok(());
    }
    for pair in &pairs {
        println!("{}", pair.name().bold());
        print_pair_details(pair);
    }
    Ok(())
}

async fn require_pair(manager: &KeyManager, name: &str) -> Result<KeyPair> {
    manager.store().find_pair(name).await?.with_context(|| {
        format!(
            "No key pair named '{}' in {}",
            name,
            manager.store().dir().display()
        )
    })
}

async fn run_copy(manager: &KeyManager, name: &str) -> Result<()> {
    let pair = require_pair(manager, name).await?;
    let public_key = manager.store().load_public_key(&pair.public_path)?;
    CommandClipboard::for_current_platform().copy(&public_key)?;
    println!("{} Public key copied to clipboard", "✓".green());
    Ok(())
}

fn passphrase_from(args: &GenerateArgs) -> Result<Passphrase> {
    if args.interactive {
        return Ok(Passphrase::Interactive);
    }
    if args.ask_passphrase {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Passphrase (empty for none)")
            .with_confirmation("Confirm passphrase", "Passphrases do not match")
            .allow_empty_password(true)
            .interact()?;
        return Ok(Passphrase::from_option(Some(passphrase)));
    }
    Ok(Passphrase::from_option(Some(
        args.passphrase.clone().unwrap_or_default(),
    )))
}

async fn run_generate(manager: &KeyManager, args: GenerateArgs) -> Result<()> {
    let mut request = GenerationRequest::new(args.email.clone().unwrap_or_default())
        .passphrase(passphrase_from(&args)?)
        .overwrite(args.overwrite);
    if let Some(name) = &args.name {
        request = request.name(name);
    }
    if let Some(algorithm) = args.algorithm {
        request = request.algorithm(algorithm.into());
    }

    println!("{} Generating SSH key...", "[1/2]".dimmed());
    let outcome = match manager.generate(request.clone()).await {
        Err(e) if e.kind() == ErrorKind::Collision && confirm_overwrite(&e.to_string())? => {
            manager.generate(request.overwrite(true)).await?
        }
        result => result?,
    };

    match outcome {
        GenerationOutcome::Generated(key) => print_generated(manager, &key),
        GenerationOutcome::InteractiveStarted {
            private_path,
            message,
            ..
        } => {
            println!("{} {}", "!".yellow().bold(), message);
            println!(
                "  When it finishes, run {} to load the key into ssh-agent.",
                format!("ssh-add {}", private_path.display()).bold()
            );
            Ok(())
        }
    }
}

fn confirm_overwrite(reason: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    println!("{} {}", "!".yellow().bold(), reason);
    let confirm = dialoguer::Confirm::new()
        .with_prompt("Replace the existing key?")
        .default(false)
        .interact()?;
    Ok(confirm)
}

fn print_generated(manager: &KeyManager, key: &GeneratedKey) -> Result<()> {
    println!("  {}", key.summary);
    println!("{} Loading key into ssh-agent...", "[2/2]".dimmed());
    match &key.registration {
        Registration::Loaded { keychain: true } => {
            println!("  {}", "Added to ssh-agent and macOS keychain".green())
        }
        Registration::Loaded { keychain: false } => {
            println!("  {}", "Added to ssh-agent".green())
        }
        Registration::Degraded { reason } => {
            println!("  {} {}", "Not loaded into ssh-agent:".yellow(), reason);
            println!(
                "  Run {} later.",
                format!("ssh-add {}", key.private_path.display()).bold()
            );
        }
    }
    if !key.permissions_applied {
        println!(
            "  {} Could not restrict key file permissions",
            "!".yellow().bold()
        );
    }

    let public_key = manager.store().load_public_key(&key.public_path)?;
    println!();
    println!("{}", "━".repeat(50).dimmed());
    println!("{}", public_key);
    println!("{}", "━".repeat(50).dimmed());
    println!();
    println!("Next steps:");
    println!("  1. Copy the key: gitkey copy {}", file_name(&key.private_path));
    println!("  2. Add it to your Git host account (Settings > SSH and GPG keys)");
    println!("  3. Verify: gitkey test");
    Ok(())
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn run_delete(manager: &KeyManager, name: &str, yes: bool) -> Result<()> {
    validate_key_name(name)?;
    manager.store().ensure_directory().await?;
    let private = manager.store().dir().join(name);
    let public = public_path_for(&private);
    if !private.exists() && !public.exists() {
        bail!(
            "No key named '{}' in {}",
            name,
            manager.store().dir().display()
        );
    }

    if !yes {
        if !std::io::stdin().is_terminal() {
            bail!("Refusing to delete without confirmation; pass --yes");
        }
        let confirm = dialoguer::Confirm::new()
            .with_prompt(format!("Delete {} and {}?", private.display(), public.display()))
            .default(false)
            .interact()?;
        if !confirm {
            println!("Aborted.");
            return Ok(());
        }
    }

    manager.store().delete_pair(&private, &public).await?;
    println!("{} Deleted {}", "✓".green(), name);
    Ok(())
}

async fn run_test(
    manager: &KeyManager,
    host: &str,
    user: &str,
    timeout: Option<u64>,
) -> Result<()> {
    println!("Testing SSH connection to {}@{}...", user, host);
    let outcome = match timeout {
        Some(secs) => {
            manager
                .test_connection_within(host, user, Duration::from_secs(secs))
                .await
        }
        None => manager.test_connection(host, user).await,
    };

    if outcome.success {
        println!("{} {}", "✓".green(), outcome.guidance.green().bold());
        return Ok(());
    }

    println!("{} {}", "✗".red(), outcome.guidance.red());
    if !outcome.raw_output.is_empty() {
        println!();
        println!("{}", "ssh output:".dimmed());
        for line in outcome.raw_output.lines() {
            println!("  {}", line.dimmed());
        }
    }
    let code = outcome
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    bail!("Connection test failed (exit code {})", code);
}

/// Print version information
fn print_version() {
    println!("gitkey {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Component versions:");
    println!("  gitkey-cli: {}", env!("CARGO_PKG_VERSION"));
    println!("  gitkey-ssh: (linked)");
}
