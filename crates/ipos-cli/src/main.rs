//! ipos-crypt: DARE object encryption from the command line
//!
//! Commands:
//!   encrypt                 - encrypt a file (or stdin) into a DARE stream
//!   decrypt                 - decrypt a DARE stream, optionally only a byte range
//!   size encrypted <n>      - ciphertext size of an n-byte plaintext
//!   size decrypted <n>      - plaintext size of an n-byte ciphertext
//!   kms generate            - generate a data key with the configured KMS
//!   kms unseal              - unseal a data key with the configured KMS
//!   kms info                - describe the configured KMS

use anyhow::{bail, Context as _, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ipos_crypto::{parse_master_key, Context, Kms, KmsConfig};
use ipos_sio::{CipherSuite, Config, DecryptReaderAt, Version};
use secrecy::{ExposeSecret, SecretString};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Buffer size for range decryption
const COPY_BUFFER_SIZE: usize = 1 << 20;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ipos-crypt",
    version,
    about = "Encrypt, decrypt and inspect DARE objects",
    long_about = "ipos-crypt: DARE stream encryption, size math, and KMS data keys"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "IPOS_LOG", default_value = "warn", global = true)]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "IPOS_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file or stdin
    Encrypt {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        key: KeyArgs,
        /// DARE version to produce (default: v2)
        #[arg(long, value_enum)]
        dare: Option<DareVersion>,
        /// Cipher suite (default: AES-256-GCM on hardware with AES support)
        #[arg(long, value_enum)]
        cipher: Option<Cipher>,
    },

    /// Decrypt a file or stdin
    ///
    /// With --offset/--length only that plaintext range is decrypted; this
    /// needs a seekable input file.
    Decrypt {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        key: KeyArgs,
        /// First plaintext byte to decrypt
        #[arg(long)]
        offset: Option<u64>,
        /// Number of plaintext bytes to decrypt (default: to the end)
        #[arg(long)]
        length: Option<u64>,
    },

    /// DARE size arithmetic
    Size {
        #[command(subcommand)]
        kind: SizeKind,
    },

    /// Data keys from the configured KMS
    Kms {
        /// KMS configuration file (TOML); falls back to IPOS_KMS_MASTER_KEY
        #[arg(long, short = 'c', env = "IPOS_KMS_CONFIG")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: KmsAction,
    },
}

#[derive(Args)]
struct IoArgs {
    /// Input file (default: stdin)
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,
    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct KeyArgs {
    /// 256-bit key as 64 hex characters
    #[arg(long, env = "IPOS_CRYPT_KEY", hide_env_values = true)]
    key: String,
}

#[derive(Subcommand, Debug)]
enum SizeKind {
    /// Ciphertext size of a plaintext of <SIZE> bytes
    Encrypted { size: u64 },
    /// Plaintext size of a ciphertext of <SIZE> bytes
    Decrypted { size: u64 },
}

#[derive(Subcommand, Debug)]
enum KmsAction {
    /// Generate a new data key; prints key ID, plaintext and sealed key (base64)
    Generate {
        /// Master key ID (default: the KMS default key)
        #[arg(long)]
        key_id: Option<String>,
        /// Context entry as key=value (repeatable)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// Unseal a sealed data key (base64); prints the plaintext key (base64)
    Unseal {
        #[arg(long)]
        key_id: Option<String>,
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
        /// Sealed data key, base64
        #[arg(long)]
        sealed: String,
    },
    /// Describe the configured KMS
    Info,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DareVersion {
    V1,
    V2,
}

impl From<DareVersion> for Version {
    fn from(v: DareVersion) -> Self {
        match v {
            DareVersion::V1 => Version::V1,
            DareVersion::V2 => Version::V2,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Cipher {
    #[value(name = "aes-256-gcm")]
    Aes256Gcm,
    #[value(name = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl From<Cipher> for CipherSuite {
    fn from(c: Cipher) -> Self {
        match c {
            Cipher::Aes256Gcm => CipherSuite::Aes256Gcm,
            Cipher::ChaCha20Poly1305 => CipherSuite::ChaCha20Poly1305,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    match cli.command {
        Commands::Encrypt { io, key, dare, cipher } => {
            let key = parse_key(&SecretString::from(key.key))?;
            let mut config = Config::new(*key);
            if let Some(dare) = dare {
                config = config.with_version(dare.into());
            }
            if let Some(cipher) = cipher {
                config = config.with_cipher_suites(&[cipher.into()]);
            }
            cmd_encrypt(&io, config)
        }
        Commands::Decrypt { io, key, offset, length } => {
            let key = parse_key(&SecretString::from(key.key))?;
            let config = Config::new(*key);
            if offset.is_none() && length.is_none() {
                cmd_decrypt(&io, config)
            } else {
                cmd_decrypt_range(&io, config, offset.unwrap_or(0), length)
            }
        }
        Commands::Size { kind } => cmd_size(&kind),
        Commands::Kms { config, action } => {
            let kms = load_kms(config.as_deref())?;
            cmd_kms(kms.as_ref(), action)
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_encrypt(io: &IoArgs, config: Config) -> Result<()> {
    let input = open_input(io.input.as_deref())?;
    let mut output = open_output(io.output.as_deref())?;
    let n = ipos_sio::encrypt(&mut output, input, config).context("encrypting")?;
    output.flush()?;
    info!(bytes = n, "encrypted");
    Ok(())
}

fn cmd_decrypt(io: &IoArgs, config: Config) -> Result<()> {
    let input = open_input(io.input.as_deref())?;
    let mut output = open_output(io.output.as_deref())?;
    let n = ipos_sio::decrypt(&mut output, input, config).context("decrypting")?;
    output.flush()?;
    info!(bytes = n, "decrypted");
    Ok(())
}

fn cmd_decrypt_range(io: &IoArgs, config: Config, offset: u64, length: Option<u64>) -> Result<()> {
    let path = match io.input.as_deref() {
        Some(p) if p != Path::new("-") => p,
        _ => bail!("range decryption needs an input file (--input)"),
    };
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let total = ipos_sio::decrypted_size(file.metadata()?.len())
        .with_context(|| format!("{} is not a DARE stream", path.display()))?;
    if offset > total {
        bail!("offset {offset} is beyond the end of the object ({total} bytes)");
    }
    let end = offset + length.unwrap_or(total - offset).min(total - offset);
    debug!(offset, end, total, "decrypting range");

    let reader = DecryptReaderAt::new(file, config)?;
    if end == total {
        // Reading at the end authenticates the closing package of the stream.
        let n = reader
            .read_at(&mut [0u8; 1], end)
            .with_context(|| format!("checking the end of {}", path.display()))?;
        if n != 0 {
            bail!("{} holds more data than its size implies", path.display());
        }
    }
    let mut output = open_output(io.output.as_deref())?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut pos = offset;
    while pos < end {
        let want = (end - pos).min(buf.len() as u64) as usize;
        let n = reader
            .read_at(&mut buf[..want], pos)
            .with_context(|| format!("decrypting at offset {pos}"))?;
        if n == 0 {
            bail!("unexpected end of object at offset {pos}");
        }
        output.write_all(&buf[..n])?;
        pos += n as u64;
    }
    output.flush()?;
    info!(bytes = end - offset, "decrypted range");
    Ok(())
}

fn cmd_size(kind: &SizeKind) -> Result<()> {
    let size = match *kind {
        SizeKind::Encrypted { size } => ipos_sio::encrypted_size(size)?,
        SizeKind::Decrypted { size } => ipos_sio::decrypted_size(size)?,
    };
    println!("{size}");
    Ok(())
}

fn cmd_kms(kms: &dyn Kms, action: KmsAction) -> Result<()> {
    match action {
        KmsAction::Generate { key_id, context } => {
            let key_id = key_id.unwrap_or_else(|| kms.key_id().to_string());
            let ctx = parse_context(&context)?;
            let (key, sealed) = kms
                .generate_key(&key_id, &ctx)
                .context("generating data key")?;
            let out = serde_json::json!({
                "key_id": key_id,
                "plaintext": STANDARD.encode(&key[..]),
                "ciphertext": STANDARD.encode(&sealed),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        KmsAction::Unseal { key_id, context, sealed } => {
            let key_id = key_id.unwrap_or_else(|| kms.key_id().to_string());
            let ctx = parse_context(&context)?;
            let sealed = STANDARD.decode(sealed.trim()).context("decoding sealed key")?;
            let key = kms
                .unseal_key(&key_id, &sealed, &ctx)
                .context("unsealing data key")?;
            let out = serde_json::json!({ "plaintext": STANDARD.encode(&key[..]) });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        KmsAction::Info => {
            println!("{}", serde_json::to_string_pretty(&kms.info())?);
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries object data; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

fn parse_key(hex_key: &SecretString) -> Result<Zeroizing<[u8; 32]>> {
    let hex_key = hex_key.expose_secret().trim();
    if hex_key.len() != 64 {
        bail!("key must be 64 hex characters (256 bit)");
    }
    let mut key = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(hex_key, &mut *key).context("key is not valid hex")?;
    Ok(key)
}

fn parse_context(entries: &[String]) -> Result<Context> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .with_context(|| format!("invalid context entry '{entry}', expected KEY=VALUE"))
        })
        .collect()
}

fn load_kms(config: Option<&Path>) -> Result<Box<dyn Kms>> {
    if let Some(path) = config {
        let config = KmsConfig::load(path)
            .with_context(|| format!("loading KMS config {}", path.display()))?;
        return Ok(config.build()?);
    }
    match std::env::var("IPOS_KMS_MASTER_KEY") {
        Ok(value) => {
            let value = SecretString::from(value);
            Ok(Box::new(parse_master_key(value.expose_secret())?))
        }
        Err(_) => bail!("no KMS configured: pass --config or set IPOS_KMS_MASTER_KEY"),
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(p) if p != Path::new("-") => {
            let file = File::open(p).with_context(|| format!("opening {}", p.display()))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) if p != Path::new("-") => {
            let file = File::create(p).with_context(|| format!("creating {}", p.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}
