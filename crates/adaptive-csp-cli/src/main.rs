// crates/adaptive-csp-cli/src/main.rs
// ============================================================================
// Module: Adaptive CSP CLI Entry Point
// Description: Command dispatcher for policy, build, and header tooling.
// Purpose: Expose synthesis, HTML injection, and the dev server to operators.
// Dependencies: adaptive-csp-config, adaptive-csp-core, adaptive-csp-server, clap, tokio
// ============================================================================

//! ## Overview
//! The `adaptive-csp` CLI prints synthesized policies, injects them into
//! built HTML, computes inline hashes, generates nonces, sanitizes header
//! files, reports the detected environment, and runs the development server.
//! Security posture: file inputs are untrusted and read under size limits.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use adaptive_csp_config::AdaptiveCspConfig;
use adaptive_csp_core::Environment;
use adaptive_csp_core::HashValue;
use adaptive_csp_core::HeaderCollection;
use adaptive_csp_core::PolicyBundle;
use adaptive_csp_core::PolicyConfig;
use adaptive_csp_core::ProcessSignals;
use adaptive_csp_core::SecurityContext;
use adaptive_csp_core::compute_content_hash;
use adaptive_csp_core::crypto::is_nonce;
use adaptive_csp_core::detect_environment;
use adaptive_csp_core::generate_nonce;
use adaptive_csp_core::policy::reporting_endpoints_header;
use adaptive_csp_server::CspServer;
use adaptive_csp_server::html::MAX_INJECT_BYTES;
use adaptive_csp_server::inject_policy;
use clap::ArgAction;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a header JSON input file.
const MAX_HEADER_INPUT_BYTES: usize = 1024 * 1024;
/// Maximum size of a hashed content file.
const MAX_HASH_INPUT_BYTES: usize = 1024 * 1024;
/// Maximum nonces printed by one invocation.
const MAX_NONCE_COUNT: usize = 1000;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "adaptive-csp", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the synthesized policy.
    Policy(PolicyCommand),
    /// Inject the policy and nonce into an HTML document.
    Inject(InjectCommand),
    /// Compute CSP hash sources.
    Hash(HashCommand),
    /// Generate nonces.
    Nonce(NonceCommand),
    /// Sanitize a JSON header collection.
    Sanitize(SanitizeCommand),
    /// Print the detected environment.
    Detect(DetectCommand),
    /// Start the development server.
    Serve(ServeCommand),
}

/// Environment selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum EnvironmentArg {
    /// Development profile.
    Development,
    /// Production profile.
    Production,
    /// Test profile.
    Test,
}

impl From<EnvironmentArg> for Environment {
    fn from(value: EnvironmentArg) -> Self {
        match value {
            EnvironmentArg::Development => Self::Development,
            EnvironmentArg::Production => Self::Production,
            EnvironmentArg::Test => Self::Test,
        }
    }
}

/// Output format selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OutputFormat {
    /// Policy text only.
    #[default]
    Text,
    /// Policy bundle as JSON.
    Json,
}

/// Arguments shared by synthesizing commands.
#[derive(Args, Debug)]
struct SynthesisArgs {
    /// Config file path (defaults to `ADAPTIVE_CSP_CONFIG` or `adaptive-csp.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Profile override.
    #[arg(long = "env", value_enum, value_name = "ENV")]
    environment: Option<EnvironmentArg>,
    /// Nonce to embed instead of a generated one.
    #[arg(long, value_name = "NONCE")]
    nonce: Option<String>,
}

/// Arguments for `policy`.
#[derive(Args, Debug)]
struct PolicyCommand {
    /// Synthesis inputs.
    #[command(flatten)]
    synthesis: SynthesisArgs,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Arguments for `inject`.
#[derive(Args, Debug)]
struct InjectCommand {
    /// Synthesis inputs.
    #[command(flatten)]
    synthesis: SynthesisArgs,
    /// HTML document to rewrite.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Output path (stdout when omitted).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

/// Arguments for `hash`.
#[derive(Args, Debug)]
struct HashCommand {
    /// File whose content is hashed.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["text", "trusted"])]
    input: Option<PathBuf>,
    /// Literal content to hash.
    #[arg(long, value_name = "TEXT", conflicts_with = "trusted")]
    text: Option<String>,
    /// Print the trusted fragment hash mapping as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    trusted: bool,
}

/// Arguments for `nonce`.
#[derive(Args, Debug)]
struct NonceCommand {
    /// Number of nonces to print.
    #[arg(long, default_value_t = 1)]
    count: usize,
}

/// Arguments for `sanitize`.
#[derive(Args, Debug)]
struct SanitizeCommand {
    /// Config file path supplying `api_protection` flags.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// JSON object (record) or array of pairs.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Fail on the first invalid header instead of dropping it.
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,
}

/// Arguments for `detect`.
#[derive(Args, Debug)]
struct DetectCommand {
    /// Serving host signal.
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    /// Document URL signal.
    #[arg(long, value_name = "URL")]
    url: Option<String>,
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Bind address override.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
    /// Static document served at `/`.
    #[arg(long, value_name = "PATH")]
    index: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Bounded read failures.
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

impl ReadLimitError {
    /// Renders the failure for `path`.
    fn describe(&self, path: &Path) -> String {
        match self {
            Self::Io(err) => format!("failed to read {}: {err}", path.display()),
            Self::TooLarge {
                size,
                limit,
            } => format!("{} is {size} bytes; limit is {limit}", path.display()),
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    if cli.show_version {
        write_stdout_line(&format!("adaptive-csp {}", env!("CARGO_PKG_VERSION")))?;
        return Ok(ExitCode::SUCCESS);
    }
    let Some(command) = cli.command else {
        let help = Cli::command().render_help().to_string();
        write_stdout_line(&help)?;
        return Ok(ExitCode::SUCCESS);
    };
    match command {
        Commands::Policy(command) => command_policy(command).await,
        Commands::Inject(command) => command_inject(command).await,
        Commands::Hash(command) => command_hash(command).await,
        Commands::Nonce(command) => command_nonce(&command),
        Commands::Sanitize(command) => command_sanitize(&command),
        Commands::Detect(command) => command_detect(command),
        Commands::Serve(command) => command_serve(command).await,
    }
}

// ============================================================================
// SECTION: Synthesis Commands
// ============================================================================

/// Loads configuration and builds a context for synthesizing commands.
fn load_synthesis(args: &SynthesisArgs) -> CliResult<(PolicyConfig, SecurityContext)> {
    let config = AdaptiveCspConfig::load(args.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    let mut policy = config.policy_config();
    if let Some(environment) = args.environment {
        policy.environment = Some(environment.into());
    }
    let audit = config.build_audit_sink().map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    let context = SecurityContext::builder()
        .audit(audit)
        .sanitizer_config(config.sanitizer_config())
        .build();
    Ok((policy, context))
}

/// Synthesizes a bundle honoring a caller-supplied nonce.
async fn synthesize_bundle(
    context: &SecurityContext,
    policy: &PolicyConfig,
    nonce: Option<&str>,
) -> CliResult<PolicyBundle> {
    let nonce = match nonce {
        Some(nonce) => validate_nonce(nonce)?,
        None => context.generate_nonce(),
    };
    let environment = context.resolve_environment(policy);
    let embedded = policy.enable_nonces.then_some(nonce.as_str());
    let text = context.synthesize_with_nonce(environment, policy, embedded).await;
    Ok(PolicyBundle {
        environment,
        report_to: reporting_endpoints_header(environment, policy),
        nonce,
        policy: text,
    })
}

/// Accepts only nonces in the generated format.
fn validate_nonce(nonce: &str) -> CliResult<String> {
    if is_nonce(nonce) {
        Ok(nonce.to_string())
    } else {
        Err(CliError::new("nonce must be 32 lowercase hex characters".to_string()))
    }
}

/// Executes the `policy` command.
async fn command_policy(command: PolicyCommand) -> CliResult<ExitCode> {
    let (policy, context) = load_synthesis(&command.synthesis)?;
    let bundle = synthesize_bundle(&context, &policy, command.synthesis.nonce.as_deref()).await?;
    match command.format {
        OutputFormat::Text => write_stdout_line(&bundle.policy)?,
        OutputFormat::Json => write_json(&serde_json::to_value(&bundle).map_err(json_error)?)?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `inject` command.
async fn command_inject(command: InjectCommand) -> CliResult<ExitCode> {
    let bytes = read_bytes_with_limit(&command.input, MAX_INJECT_BYTES)
        .map_err(|err| CliError::new(err.describe(&command.input)))?;
    let html = String::from_utf8(bytes)
        .map_err(|_| CliError::new(format!("{} must be utf-8", command.input.display())))?;
    let (policy, context) = load_synthesis(&command.synthesis)?;
    let bundle = synthesize_bundle(&context, &policy, command.synthesis.nonce.as_deref()).await?;
    let nonce = policy.enable_nonces.then_some(bundle.nonce.as_str());
    let injected = inject_policy(&html, &bundle.policy, nonce);
    match &command.output {
        Some(path) => fs::write(path, injected)
            .map_err(|err| CliError::new(format!("failed to write {}: {err}", path.display())))?,
        None => write_stdout_line(&injected)?,
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Utility Commands
// ============================================================================

/// Executes the `hash` command.
async fn command_hash(command: HashCommand) -> CliResult<ExitCode> {
    if command.trusted {
        let context = SecurityContext::builder().build();
        let hashes = context.hash_cache().get_trusted_hashes().await;
        let mapping: BTreeMap<&str, &HashValue> = hashes.iter().collect();
        write_json(&serde_json::to_value(mapping).map_err(json_error)?)?;
        return Ok(ExitCode::SUCCESS);
    }
    let content = match (&command.input, command.text) {
        (Some(path), _) => {
            let bytes = read_bytes_with_limit(path, MAX_HASH_INPUT_BYTES)
                .map_err(|err| CliError::new(err.describe(path)))?;
            String::from_utf8(bytes).map_err(|_| CliError::new(format!("{} must be utf-8", path.display())))?
        }
        (None, Some(text)) => text,
        (None, None) => return Err(CliError::new("one of --input, --text, or --trusted is required".to_string())),
    };
    let hash = compute_content_hash(&content).map_err(|err| CliError::new(format!("hash failed: {err}")))?;
    write_stdout_line(&format!("'{hash}'"))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `nonce` command.
fn command_nonce(command: &NonceCommand) -> CliResult<ExitCode> {
    if command.count == 0 || command.count > MAX_NONCE_COUNT {
        return Err(CliError::new(format!("count must be between 1 and {MAX_NONCE_COUNT}")));
    }
    for _ in 0 .. command.count {
        write_stdout_line(&generate_nonce())?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `sanitize` command.
fn command_sanitize(command: &SanitizeCommand) -> CliResult<ExitCode> {
    let bytes = read_bytes_with_limit(&command.input, MAX_HEADER_INPUT_BYTES)
        .map_err(|err| CliError::new(err.describe(&command.input)))?;
    let input: Value = serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(format!("{} is not valid json: {err}", command.input.display())))?;
    let config = AdaptiveCspConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    let context = SecurityContext::builder().sanitizer_config(config.sanitizer_config()).build();
    let output = if command.strict {
        let collection = collection_from_json(input)?;
        let sanitized = context
            .sanitizer()
            .sanitize_strict(collection)
            .map_err(|err| CliError::new(format!("header rejected: {err}")))?;
        collection_to_json(sanitized)?
    } else {
        context.sanitizer().sanitize_json(input)
    };
    write_json(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Converts a JSON record or pair list into a header collection.
fn collection_from_json(value: Value) -> CliResult<HeaderCollection> {
    match value {
        Value::Object(_) => serde_json::from_value(value)
            .map(HeaderCollection::Record)
            .map_err(|err| CliError::new(format!("header record must map names to strings: {err}"))),
        Value::Array(_) => serde_json::from_value(value)
            .map(HeaderCollection::Pairs)
            .map_err(|err| CliError::new(format!("header pairs must be string arrays: {err}"))),
        _ => Err(CliError::new("headers must be a json object or array".to_string())),
    }
}

/// Converts a header collection back to JSON.
fn collection_to_json(collection: HeaderCollection) -> CliResult<Value> {
    match collection {
        HeaderCollection::Record(record) => serde_json::to_value(record).map_err(json_error),
        HeaderCollection::Pairs(pairs) => serde_json::to_value(pairs).map_err(json_error),
        HeaderCollection::Native(_) => Err(CliError::new("native header maps have no json form".to_string())),
    }
}

/// Executes the `detect` command.
fn command_detect(command: DetectCommand) -> CliResult<ExitCode> {
    let mut signals = ProcessSignals::new();
    if let Some(host) = command.host {
        signals = signals.with_host(host);
    }
    if let Some(url) = command.url {
        signals = signals.with_url(url);
    }
    write_stdout_line(detect_environment(&signals).as_str())?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Applies `serve` flag overrides to loaded configuration.
fn apply_serve_overrides(config: &mut AdaptiveCspConfig, command: &ServeCommand) {
    if let Some(bind) = &command.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(index) = &command.index {
        config.server.index_html = Some(index.clone());
    }
}

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let mut config = AdaptiveCspConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    apply_serve_overrides(&mut config, &command);
    let server = tokio::task::spawn_blocking(move || CspServer::from_config(config))
        .await
        .map_err(|err| CliError::new(format!("server init failed: init join failed: {err}")))?
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    let context = Arc::clone(server.context());
    let result = server.serve().await;
    context.teardown_reporting();
    result.map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: I/O Helpers
// ============================================================================

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut limited = file.take(limit.saturating_add(1));
    let mut bytes = Vec::new();
    limited.read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Maps a JSON serialization failure.
fn json_error(err: serde_json::Error) -> CliError {
    CliError::new(format!("json output failed: {err}"))
}

/// Writes pretty JSON to stdout.
fn write_json(value: &Value) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(json_error)?;
    write_stdout_line(&rendered)
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
