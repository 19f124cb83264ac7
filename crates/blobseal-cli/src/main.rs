//! blobseal: attachment container CLI
//!
//! Commands:
//!   encrypt <input>                 - seal a file; metadata goes to <container>.meta.json
//!   decrypt <container>             - verify and decrypt a container
//!   validate <container>            - verify MAC and digest without writing plaintext
//!   read <container>                - write a plaintext byte range to stdout
//!   reencrypt <container> <output>  - re-seal the plaintext (or a suffix of it) under a fresh key
//!   digest <file>                   - SHA-256 of a file, hex
//!   bucket <size>...                - padding bucket for plaintext sizes
//!   config show                     - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroize;

use blobseal_core::config::BlobsealConfig;
use blobseal_crypto::{
    decrypt_file_with, decrypt_stream, encrypt_stream, open_seekable, padded_size, reencrypt,
    sha256_file, CombinedKey, CryptoError, DecryptOptions, EncryptOptions, EncryptionMetadata,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "blobseal",
    version,
    about = "Authenticated, size-bucketed attachment encryption",
    long_about = "blobseal: encrypt attachments into AES-256-CBC + HMAC-SHA256 containers, \
                  verify them, and read plaintext ranges back out"
)]
struct Cli {
    /// Path to blobseal.toml configuration file
    #[arg(long, short = 'c', env = "BLOBSEAL_CONFIG", default_value = "/etc/blobseal/config.toml")]
    config: PathBuf,

    /// Log level (overrides config; RUST_LOG overrides both)
    #[arg(long, env = "BLOBSEAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (overrides config)
    #[arg(long, value_enum, env = "BLOBSEAL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file into a container
    ///
    /// The metadata (key, digest, lengths) is written next to the container as
    /// <container>.meta.json. Anyone holding it can decrypt the container.
    Encrypt {
        /// Plaintext file
        input: PathBuf,
        /// Container path (default: <input>.enc)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Base64 combined key (64 bytes); a random key is generated when absent
        #[arg(long, env = "BLOBSEAL_KEY", hide_env_values = true)]
        key: Option<String>,
        /// Skip size-bucket padding (PKCS#7 only)
        #[arg(long)]
        no_padding: bool,
    },

    /// Decrypt a container, verifying its MAC and digest
    Decrypt {
        container: PathBuf,
        /// Plaintext path (default: container path without .enc, or with .dec appended)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Metadata file (default: <container>.meta.json)
        #[arg(long, short = 'm')]
        meta: Option<PathBuf>,
        /// Skip MAC and digest checks (only for containers validated earlier)
        #[arg(long)]
        no_verify: bool,
    },

    /// Verify a container without writing any plaintext
    Validate {
        container: PathBuf,
        #[arg(long, short = 'm')]
        meta: Option<PathBuf>,
    },

    /// Write a plaintext byte range to stdout
    ///
    /// Range reads seek directly to the requested block and do not verify the
    /// container; run `validate` first for untrusted input.
    Read {
        container: PathBuf,
        #[arg(long, short = 'm')]
        meta: Option<PathBuf>,
        /// First plaintext byte to read
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Number of bytes to read (default: through end of file)
        #[arg(long)]
        length: Option<u64>,
    },

    /// Re-encrypt a container's plaintext under a fresh random key
    Reencrypt {
        container: PathBuf,
        output: PathBuf,
        #[arg(long, short = 'm')]
        meta: Option<PathBuf>,
        /// Start re-encrypting from this plaintext offset
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Skip size-bucket padding in the new container
        #[arg(long)]
        no_padding: bool,
    },

    /// Print the SHA-256 of a file (hex), e.g. to compare against a container digest
    Digest { file: PathBuf },

    /// Print the padding bucket for one or more plaintext sizes
    Bucket {
        #[arg(required = true)]
        sizes: Vec<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = blobseal_core::load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, format);

    if !cli.config.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Encrypt { input, output, key, no_padding } => {
            cmd_encrypt(&config, &input, output.as_deref(), key, no_padding)
        }
        Commands::Decrypt { container, output, meta, no_verify } => {
            cmd_decrypt(&config, &container, output.as_deref(), meta.as_deref(), no_verify)
        }
        Commands::Validate { container, meta } => cmd_validate(&config, &container, meta.as_deref()),
        Commands::Read { container, meta, offset, length } => {
            cmd_read(&container, meta.as_deref(), offset, length)
        }
        Commands::Reencrypt { container, output, meta, offset, no_padding } => {
            cmd_reencrypt(&config, &container, &output, meta.as_deref(), offset, no_padding)
        }
        Commands::Digest { file } => cmd_digest(&file),
        Commands::Bucket { sizes } => cmd_bucket(&sizes),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries plaintext for `read`; logs always go to stderr.
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

// ── Helpers ───────────────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Sidecar metadata path for a container
fn meta_path_for(container: &Path) -> PathBuf {
    with_suffix(container, ".meta.json")
}

fn default_plaintext_path(container: &Path) -> PathBuf {
    if container.extension().is_some_and(|ext| ext == "enc") {
        container.with_extension("")
    } else {
        with_suffix(container, ".dec")
    }
}

fn read_metadata(container: &Path, meta: Option<&Path>) -> Result<EncryptionMetadata> {
    let path = meta.map(Path::to_path_buf).unwrap_or_else(|| meta_path_for(container));
    let bytes = std::fs::read(&path).with_context(|| format!("reading metadata {}", path.display()))?;
    EncryptionMetadata::from_bytes(&bytes).with_context(|| format!("parsing metadata {}", path.display()))
}

/// Write metadata readable by the owner only; it carries the key.
fn write_metadata(path: &Path, metadata: &EncryptionMetadata) -> Result<()> {
    let mut bytes = metadata.to_bytes().context("serializing metadata")?;
    let result = write_private_file(path, &bytes);
    bytes.zeroize();
    result.with_context(|| format!("writing metadata {}", path.display()))
}

#[cfg(unix)]
fn write_private_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::write(path, bytes)
}

fn parse_key(encoded: &str) -> Result<CombinedKey> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let mut bytes = STANDARD.decode(encoded.trim()).context("decoding base64 key")?;
    let key = CombinedKey::from_slice(&bytes);
    bytes.zeroize();
    Ok(key?)
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), "failed to remove partial output: {e}");
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn require_digest(config: &BlobsealConfig, metadata: &EncryptionMetadata) -> Result<()> {
    if config.crypto.require_digest && metadata.digest.is_none() {
        return Err(CryptoError::MissingDigest)
            .context("metadata has no digest (set crypto.require_digest = false to accept MAC-only containers)");
    }
    Ok(())
}

fn decrypt_options(config: &BlobsealConfig, validate: bool) -> DecryptOptions {
    DecryptOptions {
        validate,
        chunk_size: config.crypto.verify_chunk_size,
    }
}

fn verify_container(config: &BlobsealConfig, container: &Path, metadata: &EncryptionMetadata) -> Result<()> {
    require_digest(config, metadata)?;
    let file = File::open(container).with_context(|| format!("opening {}", container.display()))?;
    let mut source = BufReader::with_capacity(config.crypto.page_size, file);
    decrypt_stream(&mut source, metadata, &decrypt_options(config, true), io::sink())
        .with_context(|| format!("verifying {}", container.display()))?;
    Ok(())
}

// ── `blobseal encrypt` ────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &BlobsealConfig,
    input: &Path,
    output: Option<&Path>,
    key: Option<String>,
    no_padding: bool,
) -> Result<()> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| with_suffix(input, ".enc"));
    let key = match key {
        Some(mut encoded) => {
            let key = parse_key(&encoded);
            encoded.zeroize();
            Some(key?)
        }
        None => None,
    };
    let extra_padding = config.crypto.extra_padding && !no_padding;

    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let total = source.metadata().map(|m| m.len()).unwrap_or(0);
    let sink = File::create(&output).with_context(|| format!("creating {}", output.display()))?;

    let pb = make_progress_bar(total, "encrypt");
    let options = EncryptOptions {
        key,
        iv: None,
        extra_padding,
        page_size: config.crypto.page_size,
    };
    let result = encrypt_stream(
        pb.wrap_read(source),
        BufWriter::with_capacity(config.crypto.page_size, sink),
        options,
    );
    let metadata = match result {
        Ok(metadata) => metadata,
        Err(e) => {
            pb.abandon();
            remove_partial(&output);
            return Err(e).with_context(|| format!("encrypting {}", input.display()));
        }
    };
    pb.finish_and_clear();

    let meta_path = meta_path_for(&output);
    write_metadata(&meta_path, &metadata)?;

    info!(
        input = %input.display(),
        container = %output.display(),
        container_bytes = metadata.length,
        extra_padding,
        "encrypted"
    );
    println!("{}", output.display());
    println!("  metadata:  {}", meta_path.display());
    if let Some(length) = metadata.length {
        println!("  size:      {length} bytes ({total} plaintext)");
    }
    if let Some(digest) = metadata.digest {
        println!("  digest:    {}", hex(&digest));
    }
    Ok(())
}

// ── `blobseal decrypt` ────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &BlobsealConfig,
    container: &Path,
    output: Option<&Path>,
    meta: Option<&Path>,
    no_verify: bool,
) -> Result<()> {
    let metadata = read_metadata(container, meta)?;
    if !no_verify {
        require_digest(config, &metadata)?;
    }
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_plaintext_path(container));

    let pb = make_spinner("decrypt");
    pb.set_message(container.display().to_string());
    let result = decrypt_file_with(container, &metadata, &output, &decrypt_options(config, !no_verify));
    pb.finish_and_clear();
    let written = result.with_context(|| format!("decrypting {}", container.display()))?;

    if no_verify {
        warn!(container = %container.display(), "decrypted without integrity checks");
    }
    info!(container = %container.display(), output = %output.display(), bytes = written, "decrypted");
    println!("{}  ({written} bytes)", output.display());
    Ok(())
}

// ── `blobseal validate` ───────────────────────────────────────────────────────

fn cmd_validate(config: &BlobsealConfig, container: &Path, meta: Option<&Path>) -> Result<()> {
    let metadata = read_metadata(container, meta)?;
    verify_container(config, container, &metadata)?;
    println!("{}: ok", container.display());
    Ok(())
}

// ── `blobseal read` ───────────────────────────────────────────────────────────

fn cmd_read(container: &Path, meta: Option<&Path>, offset: u64, length: Option<u64>) -> Result<()> {
    let metadata = read_metadata(container, meta)?;
    let file = File::open(container).with_context(|| format!("opening {}", container.display()))?;
    let mut handle = open_seekable(BufReader::new(file), &metadata)
        .with_context(|| format!("opening container {}", container.display()))?;

    handle.seek(offset).context("seeking")?;
    let remaining = handle.plaintext_length() - offset;
    let wanted = length.map_or(remaining, |l| l.min(remaining));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let copied = io::copy(&mut (&mut handle).take(wanted), &mut out).context("reading plaintext")?;
    out.flush()?;

    tracing::debug!(offset, bytes = copied, "range read");
    Ok(())
}

// ── `blobseal reencrypt` ──────────────────────────────────────────────────────

fn cmd_reencrypt(
    config: &BlobsealConfig,
    container: &Path,
    output: &Path,
    meta: Option<&Path>,
    offset: u64,
    no_padding: bool,
) -> Result<()> {
    let metadata = read_metadata(container, meta)?;
    // The handle does not authenticate what it reads.
    verify_container(config, container, &metadata)?;

    let file = File::open(container).with_context(|| format!("opening {}", container.display()))?;
    let mut handle = open_seekable(BufReader::new(file), &metadata)
        .with_context(|| format!("opening container {}", container.display()))?;
    handle.seek(offset).context("seeking")?;

    let extra_padding = config.crypto.extra_padding && !no_padding;
    let pb = make_spinner("reencrypt");
    let result = reencrypt(&mut handle, output, None, extra_padding);
    pb.finish_and_clear();
    let new_metadata = result.with_context(|| format!("re-encrypting {}", container.display()))?;

    let meta_path = meta_path_for(output);
    write_metadata(&meta_path, &new_metadata)?;

    info!(source = %container.display(), container = %output.display(), offset, "re-encrypted");
    println!("{}", output.display());
    println!("  metadata:  {}", meta_path.display());
    Ok(())
}

// ── `blobseal digest` / `blobseal bucket` ─────────────────────────────────────

fn cmd_digest(file: &Path) -> Result<()> {
    let digest = sha256_file(file).with_context(|| format!("hashing {}", file.display()))?;
    println!("{}  {}", hex(&digest), file.display());
    Ok(())
}

fn cmd_bucket(sizes: &[u64]) -> Result<()> {
    for &size in sizes {
        let bucket = padded_size(size);
        println!("{size}\t{bucket}\t(+{})", bucket.saturating_sub(size));
    }
    Ok(())
}

// ── `blobseal config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &BlobsealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_and_default_paths() {
        assert_eq!(
            meta_path_for(Path::new("/tmp/photo.jpg.enc")),
            PathBuf::from("/tmp/photo.jpg.enc.meta.json")
        );
        assert_eq!(
            default_plaintext_path(Path::new("/tmp/photo.jpg.enc")),
            PathBuf::from("/tmp/photo.jpg")
        );
        assert_eq!(
            default_plaintext_path(Path::new("/tmp/blob")),
            PathBuf::from("/tmp/blob.dec")
        );
    }

    #[test]
    fn test_parse_key() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let encoded = STANDARD.encode([7u8; 64]);
        let key = parse_key(&encoded).unwrap();
        assert_eq!(*key.to_bytes(), [7u8; 64]);

        assert!(parse_key(&STANDARD.encode([7u8; 32])).is_err());
        assert!(parse_key("not base64!").is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn test_encrypt_then_decrypt_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("note.txt");
        std::fs::write(&input, b"meet at the usual place").unwrap();
        let config = BlobsealConfig::default();

        cmd_encrypt(&config, &input, None, None, false).unwrap();
        let container = tmp.path().join("note.txt.enc");
        assert!(container.exists());
        assert!(meta_path_for(&container).exists());

        cmd_validate(&config, &container, None).unwrap();

        let output = tmp.path().join("roundtrip.txt");
        cmd_decrypt(&config, &container, Some(&output), None, false).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"meet at the usual place");
    }

    #[test]
    fn test_validate_command_requires_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("a.bin");
        std::fs::write(&input, [1u8; 100]).unwrap();
        let config = BlobsealConfig::default();

        cmd_encrypt(&config, &input, None, None, true).unwrap();
        let container = tmp.path().join("a.bin.enc");
        let meta_path = meta_path_for(&container);

        let mut metadata = read_metadata(&container, None).unwrap();
        metadata.digest = None;
        write_metadata(&meta_path, &metadata).unwrap();

        assert!(cmd_validate(&config, &container, None).is_err());

        let mut relaxed = BlobsealConfig::default();
        relaxed.crypto.require_digest = false;
        cmd_validate(&relaxed, &container, None).unwrap();
    }
}
