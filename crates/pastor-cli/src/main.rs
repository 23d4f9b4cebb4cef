use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};
use pastor_core::config::{kdf_params_from_env, DEFAULT_LOG_FILTER, LOG_ENV};
use pastor_core::lookup::{self, ImportRequest, LineUrl, Passphrase};
use pastor_core::{KdfParams, PasswordPolicy, PastorError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(name = "pastor")]
#[command(version, about = "Look up, import and generate passwords in an encrypted store", long_about = None)]
#[command(group(ArgGroup::new("action").args(["create", "import", "generate"])))]
struct Cli {
    /// Password to the database; prompted for when absent
    #[arg(short = 'p', long = "password", env = "PASTOR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to the encrypted database
    #[arg(value_name = "DATABASE")]
    database: PathBuf,

    /// URL or hostname to look up, or `-` to read it from stdin
    #[arg(value_name = "DOMAIN")]
    domain: Option<String>,

    /// Create a new, empty database
    #[arg(short = 'c', long)]
    create: bool,

    /// Import PASSWORD for DOMAIN
    #[arg(short = 'i', long, value_name = "PASSWORD")]
    import: Option<String>,

    /// Generate a password for DOMAIN, store it and print it
    #[arg(short = 'g', long)]
    generate: bool,

    /// Replace an existing password for DOMAIN without refusing
    #[arg(short = 'f', long)]
    force: bool,

    /// Free-form note stored next to an imported password
    #[arg(long, value_name = "TEXT", requires = "import")]
    metadata: Option<String>,

    #[command(flatten)]
    policy: PolicyArgs,

    #[command(flatten)]
    kdf: KdfArgs,
}

#[derive(clap::Args, Debug)]
#[command(next_help_heading = "Password generation")]
struct PolicyArgs {
    /// Minimum number of characters in the password
    #[arg(long, value_name = "MINIMUM")]
    min: Option<usize>,

    /// Maximum number of characters in the password
    #[arg(long, value_name = "MAXIMUM")]
    max: Option<usize>,

    /// Required number of uppercase letters
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    number_of_uppercase: usize,

    /// Required number of lowercase letters
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    number_of_lowercase: usize,

    /// Required number of digits
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    number_of_digits: usize,

    /// Required number of special characters
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    number_of_special_characters: usize,

    /// Allowed special characters
    #[arg(long, value_name = "CHARS")]
    special_characters: Option<String>,

    /// Do not use digits
    #[arg(long)]
    no_digits: bool,

    /// Do not use special characters
    #[arg(long)]
    no_special_characters: bool,
}

impl PolicyArgs {
    fn to_policy(&self) -> PasswordPolicy {
        PasswordPolicy {
            min: self.min,
            max: self.max,
            uppercase: self.number_of_uppercase,
            lowercase: self.number_of_lowercase,
            digits: self.number_of_digits,
            special: self.number_of_special_characters,
            special_characters: self.special_characters.clone(),
            no_digits: self.no_digits,
            no_special: self.no_special_characters,
        }
    }
}

#[derive(clap::Args, Debug)]
#[command(next_help_heading = "Key derivation (new databases)")]
struct KdfArgs {
    /// Argon2 memory cost in KiB [env: PASTOR_KDF_MEMORY_KIB]
    #[arg(long, value_name = "KIB")]
    kdf_memory_kib: Option<u32>,

    /// Argon2 iterations [env: PASTOR_KDF_ITERATIONS]
    #[arg(long, value_name = "N")]
    kdf_iterations: Option<u32>,

    /// Argon2 lanes [env: PASTOR_KDF_LANES]
    #[arg(long, value_name = "N")]
    kdf_lanes: Option<u32>,
}

impl KdfArgs {
    fn resolve(&self) -> Result<KdfParams> {
        let env = kdf_params_from_env()?;
        Ok(KdfParams::new(
            self.kdf_memory_kib.unwrap_or(env.memory_kib),
            self.kdf_iterations.unwrap_or(env.iterations),
            self.kdf_lanes.unwrap_or(env.lanes),
        ))
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => PastorError::EXIT_INVALID_ARGUMENT,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pastor: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<PastorError>() {
        err.exit_code()
    } else if err.downcast_ref::<io::Error>().is_some() {
        PastorError::EXIT_IO
    } else {
        PastorError::EXIT_INVALID_ARGUMENT
    }
}

fn run(cli: Cli) -> Result<()> {
    debug!(database = %cli.database.display(), "starting");
    if cli.create {
        if cli.domain.is_some() {
            return Err(PastorError::InvalidArgument("--create takes no DOMAIN".into()).into());
        }
        let kdf = cli.kdf.resolve()?;
        let passphrase = passphrase_confirmed(cli.password)?;
        lookup::create_store(&cli.database, passphrase, &kdf)?;
        writeln!(io::stdout().lock(), "Database created: {}", cli.database.display())?;
        return Ok(());
    }

    let domain = cli
        .domain
        .ok_or_else(|| PastorError::InvalidArgument("DOMAIN is required".into()))?;
    let passphrase = passphrase_once(cli.password)?;

    if let Some(password) = cli.import {
        lookup::import(
            &cli.database,
            passphrase,
            ImportRequest {
                domain,
                secret: Zeroizing::new(password),
                metadata: cli.metadata,
                force: cli.force,
            },
        )?;
    } else if cli.generate {
        let policy = cli.policy.to_policy();
        let secret = lookup::generate(&cli.database, passphrase, &domain, &policy, cli.force)?;
        writeln!(io::stdout().lock(), "{}", secret.expose())?;
    } else {
        let secret = if domain == "-" {
            let mut source = LineUrl(io::stdin().lock());
            lookup::run_with(&cli.database, passphrase, &mut source)?
        } else {
            lookup::run(&cli.database, passphrase, &domain)?
        };
        writeln!(io::stdout().lock(), "{}", secret.expose())?;
    }
    Ok(())
}

fn passphrase_once(given: Option<String>) -> Result<Passphrase> {
    if let Some(password) = given {
        return Ok(Passphrase::from(password));
    }
    let password = rpassword::prompt_password("Enter key: ").context("read passphrase")?;
    Ok(Passphrase::from(password))
}

fn passphrase_confirmed(given: Option<String>) -> Result<Passphrase> {
    if let Some(password) = given {
        return Ok(Passphrase::from(password));
    }
    let first = Zeroizing::new(
        rpassword::prompt_password("Enter key: ").context("read passphrase")?,
    );
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm key: ").context("read passphrase")?,
    );
    if *first != *second {
        return Err(anyhow!(PastorError::InvalidArgument(
            "passphrases do not match".into()
        )));
    }
    Ok(Passphrase::from(first.as_str()))
}
