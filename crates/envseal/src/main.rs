//! envseal - Move plaintext environment variables into a secret store
//!
//! Commands:
//! - migrate <FILES>...: Select variables, store them as one secret, rewrite the files
//! - scan <FILES>...: Show every variable and where values conflict
//! - init: Initialize the local vault and write a default config
//! - show <NAME>: Decrypt and print a stored secret

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use envseal::decide::{PolicyDecider, PromptDecider};
use envseal::document::{Diagnostic, DocumentStore, OutputOptions};
use envseal::ledger::aggregate;
use envseal::pipeline::{apply, select, Migration};
use envseal::resolver::{Decider, SkipReason, Skipped};
use envseal::sink::{MemorySink, SecretSink};
use envseal::vault::VaultSink;
use envseal_core::{Config, Paths};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envseal")]
#[command(version)]
#[command(about = "Move plaintext environment variables out of ECS task definitions and into a secret store")]
#[command(after_help = r#"HOW IT WORKS:
    1. Every environment entry of every container in every file is collected
    2. You decide which variables become secrets; conflicting values must be
       resolved to one value present in every file
    3. The chosen values are stored as one JSON secret
    4. Each container gets a `secrets` entry pointing at <reference>:<NAME>::
       and the plaintext entry is removed

OUTPUT:
    Rewritten files are saved as updated_<file> unless --in-place is given.
    Nothing is written if storing the secret fails."#)]
struct Cli {
    /// Config file (default: ~/.config/envseal/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate selected variables into a secret and rewrite the task definitions
    Migrate {
        /// Task definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name of the secret to create or update
        #[arg(long)]
        secret_name: Option<String>,

        /// YAML policy answering the questions instead of prompting
        #[arg(long, conflicts_with = "yes")]
        policy: Option<PathBuf>,

        /// Accept every variable with a consistent value, skip conflicts
        #[arg(short, long)]
        yes: bool,

        /// Don't store anything or write files, print the rewritten documents
        #[arg(long)]
        dry_run: bool,

        /// Directory for rewritten files
        #[arg(long, conflicts_with = "in_place")]
        output_dir: Option<PathBuf>,

        /// Prefix for rewritten file names
        #[arg(long, conflicts_with = "in_place")]
        prefix: Option<String>,

        /// Overwrite the input files
        #[arg(long)]
        in_place: bool,
    },

    /// List variables across task definitions without changing anything
    Scan {
        /// Task definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Initialize the local vault, generate its identity key and write a default config
    Init,

    /// Decrypt and print a stored secret
    Show {
        /// Secret name
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = Paths::new();
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let config = Config::load(&config_path)?;
    let vault_root = config.vault_dir.clone().unwrap_or_else(|| paths.vault());

    match cli.command {
        Commands::Migrate {
            files,
            secret_name,
            policy,
            yes,
            dry_run,
            output_dir,
            prefix,
            in_place,
        } => {
            let output = OutputOptions {
                dir: output_dir,
                prefix: prefix.unwrap_or_else(|| config.output_prefix.clone()),
                in_place,
                indent: config.indent,
            };
            let request = MigrateRequest {
                files,
                secret_name: secret_name.or_else(|| config.secret_name.clone()),
                policy,
                yes,
                dry_run,
                output,
            };
            cmd_migrate(request, &vault_root)
        }
        Commands::Scan { files, json } => cmd_scan(&files, json),
        Commands::Init => cmd_init(&vault_root, &config_path, &config),
        Commands::Show { name } => cmd_show(&vault_root, &name),
    }
}

struct MigrateRequest {
    files: Vec<PathBuf>,
    secret_name: Option<String>,
    policy: Option<PathBuf>,
    yes: bool,
    dry_run: bool,
    output: OutputOptions,
}

impl MigrateRequest {
    fn interactive(&self) -> bool {
        self.policy.is_none() && !self.yes
    }
}

fn report_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("warning: skipping {}", diagnostic);
    }
}

fn report_skipped(skipped: &[Skipped]) {
    for skip in skipped {
        if let SkipReason::Rejected { candidate, missing } = &skip.reason {
            let files: Vec<&str> = missing.iter().map(|d| d.as_str()).collect();
            println!(
                "Chosen value '{}' for '{}' is not present in the following file(s): {:?}. Skipping secret for '{}'.",
                candidate, skip.name, files, skip.name
            );
        }
    }
}

/// Run the migration
fn cmd_migrate(request: MigrateRequest, vault_root: &Path) -> Result<()> {
    let (mut store, diagnostics) = DocumentStore::load(&request.files);
    report_diagnostics(&diagnostics);

    let selection = {
        let mut decider: Box<dyn Decider> = match (&request.policy, request.yes) {
            (Some(path), _) => Box::new(PolicyDecider::load_from(path)?),
            (None, true) => Box::new(PolicyDecider::accept_all()),
            (None, false) => Box::new(PromptDecider::stdio()),
        };
        select(&store, decider.as_mut())?
    };
    report_diagnostics(&selection.diagnostics);

    if selection.variables == 0 {
        println!("No environment variables found in the provided task definition files.");
        return Ok(());
    }

    report_skipped(&selection.resolution.skipped);
    let secrets = selection.resolution.secrets;
    if secrets.is_empty() {
        println!("No secrets selected. Exiting without making changes.");
        return Ok(());
    }

    let secret_name = match request.secret_name.clone() {
        Some(name) => name,
        None if request.interactive() => PromptDecider::stdio()
            .secret_name()?
            .context("A secret name is required")?,
        None => bail!("--secret-name is required when not prompting"),
    };

    let sink: Box<dyn SecretSink> = if request.dry_run {
        Box::new(MemorySink::new("dry-run"))
    } else {
        Box::new(VaultSink::new(vault_root))
    };

    let migration = apply(&mut store, &secrets, sink.as_ref(), &secret_name)?;
    print_migration(&migration);

    if request.dry_run {
        for document in store.iter() {
            println!();
            println!("# {}", document.id());
            print!("{}", document.to_json(request.output.indent)?);
        }
        return Ok(());
    }

    let summary = store.write_all(&request.output);
    for path in &summary.written {
        println!("Updated task definition saved to '{}'.", path.display());
    }
    for (id, e) in &summary.failed {
        eprintln!("error: Could not write updated task definition for {}: {}", id, e);
    }
    if !summary.failed.is_empty() {
        bail!("{} task definition(s) could not be written", summary.failed.len());
    }

    Ok(())
}

fn print_migration(migration: &Migration) {
    println!(
        "Stored secret '{}' as {}",
        migration.secret_name, migration.reference
    );
    for (document, names) in &migration.rewritten.moved {
        println!("  {}: {}", document, names.join(", "));
    }
}

/// Show the variable ledger
fn cmd_scan(files: &[PathBuf], json: bool) -> Result<()> {
    let (store, mut diagnostics) = DocumentStore::load(files);
    let (ledger, scan_diagnostics) = aggregate(&store);
    diagnostics.extend(scan_diagnostics);

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        report_diagnostics(&diagnostics);
        return Ok(());
    }

    report_diagnostics(&diagnostics);

    if ledger.is_empty() {
        println!("No environment variables found in the provided task definition files.");
        return Ok(());
    }

    println!(
        "Environment Variables ({} found, {} conflicting)",
        ledger.len(),
        ledger.conflicts()
    );
    println!();

    for (name, entry) in ledger.iter() {
        if entry.is_consistent() {
            println!("  {:<30} {} file(s)", name, entry.documents.len());
        } else {
            println!("  {:<30} CONFLICT", name);
            for (document, values) in &entry.documents {
                let shown: Vec<String> = values
                    .iter()
                    .map(|v| v.as_deref().map_or("<absent>".to_string(), |s| format!("{:?}", s)))
                    .collect();
                println!("      {}: [{}]", document, shown.join(", "));
            }
        }
    }

    Ok(())
}

/// Initialize the vault and the config file
fn cmd_init(vault_root: &Path, config_path: &Path, config: &Config) -> Result<()> {
    if !config_path.exists() {
        config.save(config_path)?;
        println!("info: Wrote default config to {}", config_path.display());
    }

    let vault = VaultSink::new(vault_root);

    if vault.is_initialized() {
        println!("warning: Vault already initialized");
        println!("Public key: {}", vault.public_key()?);
        return Ok(());
    }

    println!("info: Generating new identity key...");
    let pubkey = vault.init()?;

    println!("success: Vault initialized at {}", vault_root.display());
    println!();
    println!("Public key:");
    println!("  {}", pubkey);

    Ok(())
}

/// Print a stored secret
fn cmd_show(vault_root: &Path, name: &str) -> Result<()> {
    let vault = VaultSink::new(vault_root);
    let values = vault.read(name)?;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
