#![forbid(unsafe_code)]

//! Strom CLI: streaming canonicalization, part digests, signing and verification.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use strom_c14n::C14nMode;
use strom_core::{algorithm, Error, SecurityProperties};
use strom_crypto::SigningKey;
use strom_dsig::{DsigContext, VerifyResult};
use strom_stream::{
    FileResolver, OutputProcessorChain, SecurePart, SecurityContext, SignatureOutputProcessor,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "strom",
    about = "Strom: streaming XML canonicalization, digest and signature pipeline",
    version
)]
struct Cli {
    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Security properties as JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize a document or one of its elements
    C14n {
        /// Input XML file
        file: PathBuf,

        /// Canonicalization algorithm URI
        #[arg(long, default_value = algorithm::C14N)]
        mode: String,

        /// Canonicalize only the element with this Id
        #[arg(long)]
        id: Option<String>,

        /// InclusiveNamespaces PrefixList for exclusive modes
        #[arg(long = "prefix-list")]
        prefix_list: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Digest the element with the given Id the way a signature reference would
    Digest {
        /// Input XML file
        file: PathBuf,

        /// Id of the element to digest
        #[arg(long)]
        id: String,

        /// Digest algorithm URI (default from the security properties)
        #[arg(long)]
        digest: Option<String>,

        /// Transform algorithm URI, repeatable, applied in order
        #[arg(long = "transform")]
        transforms: Vec<String>,
    },

    /// Sign elements of a document with an HMAC key
    Sign {
        /// Input XML file
        file: PathBuf,

        /// Id of an element to sign, repeatable
        #[arg(long = "id", required = true)]
        ids: Vec<String>,

        /// External resource URI to sign, repeatable
        #[arg(long = "external")]
        externals: Vec<String>,

        /// Raw HMAC key (binary file)
        #[arg(long = "hmac-key")]
        hmac_key: PathBuf,

        /// Transform algorithm URI for every in-document reference
        #[arg(long = "transform")]
        transforms: Vec<String>,

        /// SignedInfo canonicalization algorithm URI
        #[arg(long, default_value = algorithm::EXC_C14N)]
        c14n: String,

        /// Signature method URI
        #[arg(long, default_value = algorithm::HMAC_SHA256)]
        method: String,

        /// Base directory for external references
        #[arg(long = "base-dir")]
        base_dir: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a signed document
    Verify {
        /// Input XML file
        file: PathBuf,

        /// Raw HMAC key (binary file)
        #[arg(long = "hmac-key")]
        hmac_key: PathBuf,

        /// Base directory for external references
        #[arg(long = "base-dir")]
        base_dir: Option<PathBuf>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,
    },

    /// List supported algorithms
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = load_properties(cli.config.as_deref()).and_then(|props| match cli.command {
        Commands::C14n {
            file,
            mode,
            id,
            prefix_list,
            output,
        } => cmd_c14n(file, &mode, id, prefix_list, output),
        Commands::Digest {
            file,
            id,
            digest,
            transforms,
        } => cmd_digest(props, file, id, digest, transforms),
        Commands::Sign {
            file,
            ids,
            externals,
            hmac_key,
            transforms,
            c14n,
            method,
            base_dir,
            output,
        } => {
            let options = SignOptions {
                ids,
                externals,
                transforms,
                c14n,
                method,
                base_dir,
            };
            cmd_sign(props, file, hmac_key, options, output)
        }
        Commands::Verify {
            file,
            hmac_key,
            base_dir,
            id_attr,
        } => cmd_verify(props, file, hmac_key, base_dir, id_attr),
        Commands::Info => cmd_info(),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_properties(path: Option<&Path>) -> Result<SecurityProperties, Error> {
    match path {
        Some(path) => SecurityProperties::from_json_str(&read_file(path)?),
        None => Ok(SecurityProperties::default()),
    }
}

fn cmd_c14n(
    file: PathBuf,
    mode: &str,
    id: Option<String>,
    prefix_list: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let mode = C14nMode::from_uri(mode)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("C14N: {mode}")))?;
    let prefixes = prefix_list
        .as_deref()
        .map(strom_c14n::parse_prefix_list)
        .unwrap_or_default();
    debug!(file = %file.display(), ?mode, "canonicalizing");
    let canonical = match id {
        Some(id) => strom_c14n::canonicalize_subtree(&xml, &id, mode, &prefixes)?,
        None => strom_c14n::canonicalize(&xml, mode, &prefixes)?,
    };
    write_output(output, &canonical)
}

fn cmd_digest(
    props: SecurityProperties,
    file: PathBuf,
    id: String,
    digest: Option<String>,
    transforms: Vec<String>,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let mut part = transforms
        .iter()
        .fold(SecurePart::id(&id), |part, uri| part.with_transform(uri));
    if let Some(uri) = &digest {
        part = part.with_digest_method(uri);
    }

    let mut chain = OutputProcessorChain::new(SecurityContext::new(props));
    chain.add_processor(Box::new(SignatureOutputProcessor::new(vec![part])));
    chain.process_tokens(strom_xml::parse_tokens(&xml)?)?;
    chain.do_final()?;

    let context = chain.into_context();
    let part = context
        .part(&id)
        .ok_or_else(|| Error::Other(format!("no element with Id `{id}`")))?;
    let value = part
        .digest_value()
        .ok_or_else(|| Error::Other(format!("element `{id}` was not closed")))?;
    println!("{} {}", part.digest_algorithm, value);
    if let Some(prefixes) = &part.inclusive_prefixes {
        println!("PrefixList=\"{prefixes}\"");
    }
    Ok(())
}

struct SignOptions {
    ids: Vec<String>,
    externals: Vec<String>,
    transforms: Vec<String>,
    c14n: String,
    method: String,
    base_dir: Option<PathBuf>,
}

fn cmd_sign(
    props: SecurityProperties,
    file: PathBuf,
    hmac_key: PathBuf,
    options: SignOptions,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let c14n = C14nMode::from_uri(&options.c14n)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("C14N: {}", options.c14n)))?;
    let ctx = DsigContext::new(props)
        .with_key(read_hmac_key(&hmac_key)?)
        .with_c14n_mode(c14n)
        .with_signature_method(&options.method)
        .with_resolver(Arc::new(file_resolver(options.base_dir, &file)));

    let mut parts: Vec<SecurePart> = options
        .ids
        .iter()
        .map(|id| {
            options
                .transforms
                .iter()
                .fold(SecurePart::id(id), |part, uri| part.with_transform(uri))
        })
        .collect();
    parts.extend(options.externals.iter().map(|uri| SecurePart::external(uri)));

    let signed = strom_dsig::sign_document(&ctx, &xml, parts)?;
    write_output(output, signed.xml.as_bytes())
}

fn cmd_verify(
    props: SecurityProperties,
    file: PathBuf,
    hmac_key: PathBuf,
    base_dir: Option<PathBuf>,
    id_attr: Vec<String>,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let mut ctx = DsigContext::new(props)
        .with_key(read_hmac_key(&hmac_key)?)
        .with_resolver(Arc::new(file_resolver(base_dir, &file)));
    for attr in &id_attr {
        ctx.add_id_attr(attr);
    }
    match strom_dsig::verify_document(&ctx, &xml)? {
        VerifyResult::Valid => {
            println!("OK");
            Ok(())
        }
        VerifyResult::Invalid { reason } => {
            eprintln!("INVALID: {reason}");
            process::exit(1);
        }
    }
}

fn cmd_info() -> Result<(), Error> {
    println!("Strom: streaming XML canonicalization, digest and signature pipeline");
    println!();
    println!("Canonicalization:");
    for mode in [
        C14nMode::Inclusive,
        C14nMode::InclusiveWithComments,
        C14nMode::Inclusive11,
        C14nMode::Inclusive11WithComments,
        C14nMode::Exclusive,
        C14nMode::ExclusiveWithComments,
    ] {
        println!("  {}", mode.uri());
    }
    println!();
    println!("Transforms:");
    println!("  {}", algorithm::BASE64);
    println!("  {}", algorithm::ENVELOPED_SIGNATURE);
    println!();
    println!("Digests:");
    for uri in [
        algorithm::SHA1,
        algorithm::SHA224,
        algorithm::SHA256,
        algorithm::SHA384,
        algorithm::SHA512,
        algorithm::SHA3_224,
        algorithm::SHA3_256,
        algorithm::SHA3_384,
        algorithm::SHA3_512,
    ] {
        println!("  {uri}");
    }
    println!();
    println!("Signatures:");
    for uri in [
        algorithm::HMAC_SHA1,
        algorithm::HMAC_SHA224,
        algorithm::HMAC_SHA256,
        algorithm::HMAC_SHA384,
        algorithm::HMAC_SHA512,
    ] {
        println!("  {uri}");
    }
    Ok(())
}

// ── Utility functions ────────────────────────────────────────────────

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn read_hmac_key(path: &Path) -> Result<SigningKey, Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::Key(format!("{}: {e}", path.display())))?;
    Ok(SigningKey::Hmac(bytes))
}

/// External references resolve relative to `base_dir`, or to the input
/// file's directory.
fn file_resolver(base_dir: Option<PathBuf>, input: &Path) -> FileResolver {
    let base = base_dir
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    FileResolver::new().with_base_dir(base)
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| Error::Other(format!("{}: {e}", p.display()))),
        None => std::io::stdout()
            .write_all(data)
            .map_err(|e| Error::Other(format!("stdout: {e}"))),
    }
}
