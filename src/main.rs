use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use voiceforge::config::ConfigStore;
use voiceforge::conversion::{ConversionOptions, plan_conversion};
use voiceforge::output::OutputOptions;
use voiceforge::presets::{PRESETS, ParameterOverrides, PauseClass, describe_preset, find_preset};
use voiceforge::progress::{ProgressSink, ProgressUpdate, format_megabytes};
use voiceforge::provider::{
    AVAILABLE_PROVIDERS, DEFAULT_BITRATE, VoiceKind, create_provider, ensure_provider_available,
    format_thousands,
};

const DEFAULT_VOICE_LIMIT: usize = 20;
const PROGRESS_BAR_WIDTH: usize = 30;
const VOICES_URL: &str = "https://fish.audio/";

#[derive(Debug, Parser)]
#[command(name = "voiceforge", version)]
#[command(about = "Convert text files to MP3 audio using remote text-to-speech APIs")]
struct Cli {
    #[arg(long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, help = "Use a custom configuration directory")]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a text file to MP3.
    Convert(ConvertArgs),
    /// List speech presets, or describe one.
    Presets(PresetsArgs),
    /// List voices offered by a provider.
    ListVoices(ListVoicesArgs),
    /// Manage API keys and defaults.
    Config(ConfigCommandTop),
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[arg(short, long, help = "Input text file (.txt)")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output directory (default: configured directory)")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Output file name; .mp3 is appended when missing")]
    output_name: Option<String>,
    #[arg(short, long, help = "TTS provider (default: configured provider)")]
    provider: Option<String>,
    #[arg(long, help = "Voice or model id (default: preset, then configured voice)")]
    voice: Option<String>,
    #[arg(short = 'b', long, default_value_t = DEFAULT_BITRATE, help = "MP3 bitrate in kbps")]
    bitrate: u32,
    #[arg(long, help = "Speech preset; see `voiceforge presets`")]
    preset: Option<String>,
    #[arg(long, help = "Speech speed, 0.5 to 2.0")]
    speed: Option<f32>,
    #[arg(long, help = "Sampling temperature, 0.0 to 1.0")]
    temperature: Option<f32>,
    #[arg(long, help = "Nucleus sampling top_p, 0.0 to 1.0")]
    top_p: Option<f32>,
    #[arg(long, value_enum)]
    paragraph_pause: Option<PauseClass>,
    #[arg(long, help = "Overwrite an existing output file")]
    overwrite: bool,
    #[arg(long, help = "Only show the cost estimate")]
    estimate_only: bool,
    #[arg(short = 'y', long, help = "Do not ask for confirmation")]
    yes: bool,
}

impl ConvertArgs {
    fn overrides(&self) -> ParameterOverrides {
        ParameterOverrides {
            speed: self.speed,
            temperature: self.temperature,
            top_p: self.top_p,
            paragraph_pause: self.paragraph_pause,
        }
    }
}

#[derive(Debug, Args)]
struct PresetsArgs {
    name: Option<String>,
}

#[derive(Debug, Args)]
struct ListVoicesArgs {
    #[arg(short, long)]
    provider: Option<String>,
    #[arg(long, help = "Print only voice ids, one per line")]
    ids_only: bool,
    #[arg(short, long, default_value_t = DEFAULT_VOICE_LIMIT)]
    limit: usize,
}

#[derive(Debug, Args)]
struct ConfigCommandTop {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Store an API key; read from stdin when omitted.
    SetApiKey {
        provider: String,
        api_key: Option<String>,
        #[arg(long, help = "Do not check the key against the provider")]
        no_validate: bool,
    },
    RemoveApiKey {
        provider: String,
    },
    ListProviders,
    Show,
    SetDefaultVoice {
        provider: String,
        voice_id: String,
    },
    SetDefaultProvider {
        provider: String,
    },
    SetOutputDir {
        directory: PathBuf,
    },
    /// Restore defaults; stored API keys are kept.
    Reset,
}

/// Renders progress as a redrawn bar on a terminal, or as one status line
/// per update when output is redirected.
struct TerminalProgress<W: Write> {
    out: W,
    interactive: bool,
    drawn: bool,
}

impl TerminalProgress<io::Stderr> {
    fn stderr() -> Self {
        let out = io::stderr();
        let interactive = out.is_terminal();
        Self::new(out, interactive)
    }
}

impl<W: Write> TerminalProgress<W> {
    fn new(out: W, interactive: bool) -> Self {
        Self {
            out,
            interactive,
            drawn: false,
        }
    }

    fn finish(&mut self) {
        if self.drawn {
            let _ = writeln!(self.out);
            self.drawn = false;
        }
    }
}

impl<W: Write> ProgressSink for TerminalProgress<W> {
    fn report(&mut self, update: &ProgressUpdate) {
        if self.interactive {
            let _ = write!(self.out, "\r{}", render_progress_line(update));
            self.drawn = true;
        } else {
            let _ = writeln!(self.out, "[{:>3}%] {}", update.percent, update.message);
        }
        let _ = self.out.flush();
    }
}

fn render_progress_line(update: &ProgressUpdate) -> String {
    let filled = usize::from(update.percent.min(100)) * PROGRESS_BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}% {:<48}",
        "#".repeat(filled),
        "-".repeat(PROGRESS_BAR_WIDTH - filled),
        update.percent,
        update.message
    )
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn read_secret_from_stdin() -> Result<String> {
    if io::stdin().is_terminal() {
        eprint!("API key: ");
        io::stderr().flush()?;
    }
    let mut key = String::new();
    io::stdin()
        .read_line(&mut key)
        .context("failed reading API key from stdin")?;
    Ok(key.trim().to_string())
}

fn run_convert(store: &ConfigStore, args: &ConvertArgs) -> Result<()> {
    let mut options = ConversionOptions::new(&args.input);
    options.provider = args.provider.as_deref();
    options.voice = args.voice.as_deref();
    options.preset = args.preset.as_deref();
    options.overrides = args.overrides();
    options.mp3_bitrate = args.bitrate;

    let plan = plan_conversion(store, &options)?;
    let provider_id = plan.request.provider.as_str();
    let api_key = store.api_key(provider_id)?;
    if api_key.is_none() && !args.estimate_only {
        bail!(
            "no API key found for {provider_id}. Use `voiceforge config set-api-key {provider_id}` to set it"
        );
    }

    let stats = &plan.input.stats;
    println!("Input: {} ({})", args.input.display(), plan.input.encoding);
    println!("Text statistics:");
    println!("  Characters: {}", format_thousands(stats.characters));
    println!(
        "  Characters (no spaces): {}",
        format_thousands(stats.characters_no_spaces)
    );
    println!("  Words: {}", format_thousands(stats.words));
    println!("  Lines: {}", format_thousands(stats.lines));
    println!("  Paragraphs: {}", format_thousands(stats.paragraphs));

    let provider = create_provider(provider_id, api_key, store.settings())?;
    if let Some(preset) = plan.speech.preset {
        println!("Preset: {preset}");
    }
    println!("Voice: {}", plan.request.voice);
    let over_limit = provider
        .character_limit()
        .filter(|limit| stats.characters > *limit);
    if let Some(limit) = over_limit {
        eprintln!(
            "warning: {} characters exceeds the {} limit of {}",
            format_thousands(stats.characters),
            provider.display_name(),
            format_thousands(limit)
        );
    }
    println!(
        "Estimated cost: {}",
        provider.estimate_cost(&plan.request.text)
    );
    if args.estimate_only {
        return Ok(());
    }

    let interactive = io::stdin().is_terminal();
    if !args.yes
        && interactive
        && !confirm(&format!(
            "Convert using {} with voice '{}'?",
            provider.display_name(),
            plan.request.voice
        ))?
    {
        println!("Conversion cancelled.");
        return Ok(());
    }

    let output = OutputOptions {
        directory: args.output_dir.as_deref(),
        file_name: args.output_name.as_deref(),
        overwrite: args.overwrite,
    };
    let dest = plan.destination(store, &output)?;
    println!("Converting to {}", dest.display());

    let mut progress = TerminalProgress::stderr();
    let result = provider.synthesize(&plan.request, &dest, &mut progress);
    progress.finish();

    if let Some(err) = result.error {
        if result.file_size > 0 {
            eprintln!(
                "partial output left at {} ({})",
                result.output_path.display(),
                format_megabytes(result.file_size)
            );
        }
        return Err(anyhow!(err).context("conversion failed"));
    }
    println!("Conversion successful");
    println!("  Output file: {}", result.output_path.display());
    println!("  File size: {}", format_megabytes(result.file_size));
    Ok(())
}

fn run_presets(args: &PresetsArgs) -> Result<()> {
    if let Some(name) = &args.name {
        let preset = find_preset(name)?;
        println!("{}", describe_preset(preset));
        println!("  Voice: {}", preset.voice);
        println!("  Speed: {}", preset.params.speed);
        println!("  Temperature: {}", preset.params.temperature);
        println!("  Top P: {}", preset.params.top_p);
        println!("  Paragraph pause: {}", preset.params.paragraph_pause.as_str());
        return Ok(());
    }

    println!("Available presets:");
    for preset in &PRESETS {
        println!("- {:<16} {}", preset.key, preset.description);
    }
    Ok(())
}

fn run_list_voices(store: &ConfigStore, args: &ListVoicesArgs) -> Result<()> {
    let provider_id = args
        .provider
        .as_deref()
        .unwrap_or_else(|| store.default_provider());
    ensure_provider_available(provider_id)?;
    let api_key = store
        .api_key(provider_id)?
        .ok_or_else(|| anyhow!("no API key found for {provider_id}"))?;
    let provider = create_provider(provider_id, Some(api_key), store.settings())?;
    let catalog = provider
        .list_voices(args.limit)
        .with_context(|| format!("failed listing voices for {provider_id}"))?;

    if args.ids_only {
        for voice in &catalog.voices {
            println!("{}", voice.id);
        }
        return Ok(());
    }

    println!("Available voices for {}:", catalog.provider);
    println!(
        "Total voices available: {}",
        format_thousands(catalog.total_available as usize)
    );
    if catalog.voices.is_empty() {
        println!("  No voices available.");
        return Ok(());
    }

    for (kind, heading) in [(VoiceKind::Ai, "AI models:"), (VoiceKind::Human, "Human voices:")] {
        let voices: Vec<_> = catalog.voices.iter().filter(|v| v.kind == kind).collect();
        if voices.is_empty() {
            continue;
        }
        println!("{heading}");
        for voice in voices {
            let marker = if voice.id == catalog.default_voice {
                " (default)"
            } else {
                ""
            };
            println!("- {} ({}){marker}", voice.name, voice.id);
            if !voice.description.is_empty() {
                println!("    {}", voice.description);
            }
            if !voice.languages.is_empty() {
                println!("    Languages: {}", voice.languages.join(", "));
            }
            if let Some(author) = &voice.author {
                println!("    Author: {author}");
            }
            if kind == VoiceKind::Human {
                println!(
                    "    {} likes | {} uses",
                    format_thousands(voice.like_count as usize),
                    format_thousands(voice.task_count as usize)
                );
            }
            if !voice.tags.is_empty() {
                println!("    Tags: {}", voice.tags.join(", "));
            }
        }
    }

    let shown = catalog.voices.len() as u64;
    if catalog.total_available > shown {
        println!(
            "{} more voices are available at {VOICES_URL}",
            format_thousands((catalog.total_available - shown) as usize)
        );
    }
    Ok(())
}

fn run_config(store: &mut ConfigStore, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::SetApiKey {
            provider,
            api_key,
            no_validate,
        } => {
            ensure_provider_available(&provider)?;
            let api_key = match api_key {
                Some(key) => key,
                None => read_secret_from_stdin()?,
            };
            store.set_api_key(&provider, &api_key)?;
            store.save()?;
            println!("API key set for {provider}");
            if !no_validate {
                let key = store.api_key(&provider)?;
                let client = create_provider(&provider, key, store.settings())?;
                if client.validate_api_key() {
                    println!("API key validated successfully");
                } else {
                    eprintln!("warning: API key validation failed");
                }
            }
        }
        ConfigCommands::RemoveApiKey { provider } => {
            if store.remove_api_key(&provider) {
                store.save()?;
                println!("API key removed for {provider}");
            } else {
                println!("No API key stored for {provider}");
            }
        }
        ConfigCommands::ListProviders => {
            println!("Available TTS providers:");
            for provider in AVAILABLE_PROVIDERS {
                let marker = if *provider == store.default_provider() {
                    "*"
                } else {
                    " "
                };
                let key = if store.has_api_key(provider) {
                    "(API key set)"
                } else {
                    "(no API key)"
                };
                println!("  {marker} {provider} {key}");
            }
        }
        ConfigCommands::Show => {
            let settings = store.settings();
            println!("VoiceForge configuration ({})", store.config_path().display());
            println!("  Default provider: {}", store.default_provider());
            println!("  Output directory: {}", store.output_directory()?.display());
            println!(
                "  Timeouts: connect {}s, request {}s, stall {}s",
                settings.network.connect_timeout_secs,
                settings.network.request_timeout_secs,
                settings.network.stall_timeout_secs
            );
            let providers = store.list_providers();
            println!("  Configured providers: {}", providers.len());
            for provider in providers {
                println!("  {provider}:");
                match store.api_key_fingerprint(provider)? {
                    Some(fingerprint) => println!("    API key: sha256 {fingerprint}"),
                    None => println!("    API key: not set"),
                }
                if let Some(voice) = store.default_voice(provider) {
                    println!("    Default voice: {voice}");
                }
            }
        }
        ConfigCommands::SetDefaultVoice { provider, voice_id } => {
            ensure_provider_available(&provider)?;
            if !store.has_api_key(&provider) {
                bail!("no API key found for {provider}. Set the API key first");
            }
            store.set_default_voice(&provider, &voice_id);
            store.save()?;
            println!("Default voice for {provider}: {voice_id}");
        }
        ConfigCommands::SetDefaultProvider { provider } => {
            ensure_provider_available(&provider)?;
            store.set_default_provider(&provider);
            store.save()?;
            println!("Default provider: {provider}");
        }
        ConfigCommands::SetOutputDir { directory } => {
            store.set_output_directory(&directory);
            store.save()?;
            println!("Output directory: {}", store.output_directory()?.display());
        }
        ConfigCommands::Reset => {
            store.reset_to_defaults();
            store.save()?;
            println!("Configuration reset to defaults (API keys kept)");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Presets(args) = &cli.command {
        return run_presets(args);
    }

    let mut store = ConfigStore::open(cli.config_dir.as_deref())
        .context("failed opening configuration")?;
    match cli.command {
        Commands::Convert(args) => run_convert(&store, &args)?,
        Commands::ListVoices(args) => run_list_voices(&store, &args)?,
        Commands::Config(config) => run_config(&mut store, config.command)?,
        Commands::Presets(_) => {}
    }

    Ok(())
}
