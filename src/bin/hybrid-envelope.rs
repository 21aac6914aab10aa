//! hybrid-envelope CLI: operational tooling over the `Crypto` façade
//!
//! Usage:
//!   hybrid-envelope keygen --output <dir>
//!   hybrid-envelope fingerprint <public_key>
//!   hybrid-envelope encrypt --recipient <pk_file>... [--password] --input <file> --output <file>
//!   hybrid-envelope decrypt (--key <sk_file> | --password) --input <file> --output <file>
//!   hybrid-envelope sign --key <sk_file> --input <file> --output <sig_file>
//!   hybrid-envelope verify --key <pk_file> --signature <sig_file> --input <file>
//!   hybrid-envelope inspect <file>
//!
//! Passwords are read from `HYBRID_ENVELOPE_PASSWORD`; set `RUST_LOG=debug`
//! for envelope-level events.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use hybrid_envelope::cipher::{self, Credential};
use hybrid_envelope::wire::{self, RecipientInfo};
use hybrid_envelope::{oid, ContentMode, Crypto, CryptoConfig, ParamValue, PrivateKey, PublicKey};

const PASSWORD_ENV: &str = "HYBRID_ENVELOPE_PASSWORD";

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "hybrid-envelope", version, about = "Multi-recipient envelope encryption")]
struct Cli {
    /// JSON file with a `CryptoConfig`; absent fields take defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new keypair
    Keygen {
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Protect the private key with the password from the environment
        #[arg(long)]
        protect: bool,
    },
    /// Print the receiver id of a public key
    Fingerprint { key: PathBuf },
    /// Encrypt a file for one or more recipients
    Encrypt {
        #[arg(short, long = "recipient")]
        recipients: Vec<PathBuf>,
        /// Add a password recipient
        #[arg(long)]
        password: bool,
        /// Sign with this private key before encrypting
        #[arg(long)]
        sign_with: Option<PathBuf>,
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decrypt a file
    Decrypt {
        #[arg(short, long, conflicts_with = "password")]
        key: Option<PathBuf>,
        #[arg(long)]
        password: bool,
        /// Require a signature from one of these public keys
        #[arg(long = "verify-with")]
        verifiers: Vec<PathBuf>,
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Produce a detached signature
    Sign {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check a detached signature
    Verify {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long)]
        signature: PathBuf,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Show envelope metadata (no decryption)
    Inspect { file: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = load_crypto(cli.config.as_deref()).and_then(|crypto| run(&crypto, cli.command));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(crypto: &Crypto, command: Command) -> CliResult {
    match command {
        Command::Keygen { output, protect } => cmd_keygen(crypto, &output, protect),
        Command::Fingerprint { key } => cmd_fingerprint(crypto, &key),
        Command::Encrypt {
            recipients,
            password,
            sign_with,
            input,
            output,
        } => cmd_encrypt(crypto, &recipients, password, sign_with.as_deref(), input.as_deref(), &output),
        Command::Decrypt {
            key,
            password,
            verifiers,
            input,
            output,
        } => cmd_decrypt(crypto, key.as_deref(), password, &verifiers, input.as_deref(), output.as_deref()),
        Command::Sign { key, input, output } => cmd_sign(crypto, &key, input.as_deref(), &output),
        Command::Verify { key, signature, input } => cmd_verify(crypto, &key, &signature, input.as_deref()),
        Command::Inspect { file } => cmd_inspect(&file),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_crypto(path: Option<&Path>) -> Result<Crypto, Box<dyn std::error::Error>> {
    let config = match path {
        Some(p) => CryptoConfig::from_json(&fs::read_to_string(p)?)?,
        None => CryptoConfig::default(),
    };
    Ok(Crypto::new(config)?)
}

fn password() -> Result<Zeroizing<Vec<u8>>, Box<dyn std::error::Error>> {
    let value = std::env::var(PASSWORD_ENV).map_err(|_| format!("{} is not set", PASSWORD_ENV))?;
    if value.is_empty() {
        return Err(format!("{} is empty", PASSWORD_ENV).into());
    }
    Ok(Zeroizing::new(value.into_bytes()))
}

fn load_public(crypto: &Crypto, path: &Path) -> Result<PublicKey, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    crypto
        .import_public_key(&bytes)
        .map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Plain keys load as-is; protected ones need the environment password.
fn load_private(crypto: &Crypto, path: &Path) -> Result<PrivateKey, Box<dyn std::error::Error>> {
    let bytes = Zeroizing::new(fs::read(path)?);
    match crypto.import_private_key(&bytes, None) {
        Ok(key) => Ok(key),
        Err(_) => {
            let pw = password()?;
            crypto
                .import_private_key(&bytes, Some(&pw[..]))
                .map_err(|e| format!("{}: {}", path.display(), e).into())
        }
    }
}

fn open_input(path: Option<&Path>) -> io::Result<Box<dyn Read>> {
    Ok(match path {
        Some(p) => Box::new(BufReader::new(File::open(p)?)),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn read_all(path: Option<&Path>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    open_input(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_keygen(crypto: &Crypto, output_dir: &Path, protect: bool) -> CliResult {
    fs::create_dir_all(output_dir)?;

    let kp = crypto.generate_keypair()?;
    let pk_path = output_dir.join("public.key");
    let sk_path = output_dir.join("private.key");

    let sk_der = if protect {
        let pw = password()?;
        crypto.export_private_key(&kp.private_key, Some(&pw[..]))?
    } else {
        crypto.export_private_key(&kp.private_key, None)?
    };

    fs::write(&pk_path, crypto.export_public_key(&kp.public_key))?;
    fs::write(&sk_path, &sk_der[..])?;

    // Restrict private key permissions (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&sk_path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&sk_path, perms)?;
    }

    eprintln!("Generated {:?} keypair:", kp.private_key.algorithm());
    eprintln!("  Public key:   {}", pk_path.display());
    eprintln!(
        "  Private key:  {} (mode 600{})",
        sk_path.display(),
        if protect { ", password-protected" } else { "" }
    );
    eprintln!("  Receiver id:  {}", hex::encode(kp.public_key.receiver_id().as_bytes()));

    Ok(())
}

fn cmd_fingerprint(crypto: &Crypto, key: &Path) -> CliResult {
    let pk = load_public(crypto, key)?;
    println!("{}", hex::encode(pk.receiver_id().as_bytes()));
    Ok(())
}

fn cmd_encrypt(
    crypto: &Crypto,
    recipients: &[PathBuf],
    with_password: bool,
    signer: Option<&Path>,
    input: Option<&Path>,
    output: &Path,
) -> CliResult {
    if recipients.is_empty() && !with_password {
        return Err("need at least one --recipient or --password".into());
    }
    let publics = recipients
        .iter()
        .map(|p| load_public(crypto, p))
        .collect::<Result<Vec<_>, _>>()?;

    // Signing needs the whole plaintext up front; otherwise stream.
    if let Some(signer) = signer {
        if with_password {
            return Err("--sign-with only supports key recipients".into());
        }
        let sk = load_private(crypto, signer)?;
        let plaintext = read_all(input)?;
        let ciphertext = crypto.sign_then_encrypt(&plaintext, &sk, &publics)?;
        fs::write(output, &ciphertext)?;
        eprintln!("Signed and encrypted {} bytes -> {} bytes", plaintext.len(), ciphertext.len());
        eprintln!("Output: {}", output.display());
        return Ok(());
    }

    let mut c = crypto.cipher()?;
    for pk in &publics {
        c.add_key_recipient(pk)?;
    }
    if with_password {
        let pw = password()?;
        c.add_password_recipient(&pw, crypto.config().password_iterations)?;
    }

    let mut reader = open_input(input)?;
    let mut writer = open_output(Some(output))?;
    c.encrypt_stream(&mut reader, &mut writer)?;
    writer.flush()?;

    eprintln!(
        "Encrypted for {} recipient(s){}",
        publics.len(),
        if with_password { " + password" } else { "" }
    );
    eprintln!("Output: {}", output.display());

    Ok(())
}

fn cmd_decrypt(
    crypto: &Crypto,
    key: Option<&Path>,
    with_password: bool,
    verifiers: &[PathBuf],
    input: Option<&Path>,
    output: Option<&Path>,
) -> CliResult {
    if !verifiers.is_empty() {
        let key = key.ok_or("--verify-with requires --key")?;
        let sk = load_private(crypto, key)?;
        let publics = verifiers
            .iter()
            .map(|p| load_public(crypto, p))
            .collect::<Result<Vec<_>, _>>()?;
        let ciphertext = read_all(input)?;
        let plaintext = crypto.decrypt_then_verify(&ciphertext, &sk, &publics)?;
        let mut writer = open_output(output)?;
        writer.write_all(&plaintext)?;
        writer.flush()?;
        eprintln!("Signature OK");
        return Ok(());
    }

    let sk;
    let pw;
    let credential = match (key, with_password) {
        (Some(path), false) => {
            sk = load_private(crypto, path)?;
            Credential::Key(&sk)
        }
        (None, true) => {
            pw = password()?;
            Credential::Password(&pw)
        }
        _ => return Err("need exactly one of --key or --password".into()),
    };

    // Output is only trustworthy once this returns Ok; remove it otherwise.
    let mut reader = open_input(input)?;
    let mut writer = open_output(output)?;
    let result = cipher::open_stream(&mut reader, &mut writer, credential).and_then(|params| {
        writer.flush()?;
        Ok(params)
    });
    let params = match result {
        Ok(params) => params,
        Err(e) => {
            drop(writer);
            if let Some(p) = output {
                let _ = fs::remove_file(p);
            }
            return Err(e.into());
        }
    };

    if let Some(p) = output {
        eprintln!("Decrypted -> {}", p.display());
    }
    if !params.is_empty() {
        eprintln!("Custom params: {}", params.keys().cloned().collect::<Vec<_>>().join(", "));
    }

    Ok(())
}

fn cmd_sign(crypto: &Crypto, key: &Path, input: Option<&Path>, output: &Path) -> CliResult {
    let sk = load_private(crypto, key)?;
    let mut reader = open_input(input)?;
    let signature = crypto.sign_stream(&mut reader, &sk)?;
    fs::write(output, &signature)?;
    eprintln!("Signature: {} ({} bytes)", output.display(), signature.len());
    Ok(())
}

fn cmd_verify(crypto: &Crypto, key: &Path, signature: &Path, input: Option<&Path>) -> CliResult {
    let pk = load_public(crypto, key)?;
    let signature = fs::read(signature)?;
    let mut reader = open_input(input)?;
    crypto.verify_stream(&mut reader, &signature, &pk)?;
    println!("OK");
    Ok(())
}

fn cmd_inspect(path: &Path) -> CliResult {
    let data = fs::read(path)?;
    let (envelope, header_len) = wire::decode(&data)?;

    println!("Envelope");
    println!("========");
    println!("Header Size:     {} bytes", header_len);
    println!("Body Size:       {} bytes", data.len() - header_len);
    match envelope.content.mode {
        ContentMode::Stream => println!("Content Mode:    stream"),
        ContentMode::Chunked { chunk_size } => println!("Content Mode:    chunked ({} bytes)", chunk_size),
    }
    println!("Nonce:           {}", hex::encode(envelope.content.nonce));
    println!();
    println!("Recipients ({}):", envelope.recipients.len());
    for (i, r) in envelope.recipients.iter().enumerate() {
        match r {
            RecipientInfo::PublicKey(k) => {
                let alg = k.key_algorithm.oid();
                println!(
                    "  [{}] key       id={}  alg={} ({})",
                    i,
                    hex::encode(&k.recipient_id),
                    oid::name(alg).unwrap_or("unknown"),
                    oid::dotted(alg)
                );
            }
            RecipientInfo::Password(p) => {
                println!("  [{}] password  pbkdf2 iterations={}  salt={} bytes", i, p.iterations, p.salt.len());
            }
        }
    }

    if !envelope.custom_params.is_empty() {
        println!();
        println!("Custom Params ({}):", envelope.custom_params.len());
        for (k, v) in &envelope.custom_params {
            match v {
                ParamValue::Int(n) => println!("  {} = {}", k, n),
                ParamValue::Str(s) => println!("  {} = {:?}", k, s),
                ParamValue::Bytes(b) => println!("  {} = <{} bytes>", k, b.len()),
            }
        }
    }

    Ok(())
}
