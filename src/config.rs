use anyhow::Context;
use clap::{ Args, Parser, Subcommand };
use std::path::{ Path, PathBuf };

use crate::classifier::EmbeddingChoice;
use crate::posture::Posture;

/// Improv comedian robot: Gemini dialogue, zero-shot gesture classification
/// and scene orchestration for a NAO-style robot (or a desktop stand-in).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Directory holding gestures.json, scenes.json, eyecolors.json and api_key.txt
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the zero-shot gesture classification REST service
    Serve(ServeArgs),
    /// Run the scripted improv show (scenes and breaks)
    Show(ShowArgs),
    /// Free conversation with the comedian persona
    Chat(ChatArgs),
    /// Type a line, see which gesture category and animation it maps to
    Gestures(GesturesArgs),
}

// ── Classification service ─────────────────────────────────────────────

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// REST API port
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Local model cache; filled on first start, reused afterwards
    #[arg(long, default_value = "local_model")]
    pub model_dir: PathBuf,

    /// Embedding model used for hypothesis scoring
    #[arg(long, value_enum, default_value_t = EmbeddingChoice::AllMiniLmL6V2)]
    pub model: EmbeddingChoice,

    /// Hypothesis built from each candidate label (`{}` is replaced by the label)
    #[arg(long, default_value = "This example is {}.")]
    pub hypothesis_template: String,

    /// Softmax temperature applied to the cosine similarities
    #[arg(long, default_value_t = 0.05)]
    pub temperature: f32,

    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 60)]
    pub stats_interval_secs: u64,
}

impl ServeArgs {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Conversation sessions (show / chat) ────────────────────────────────

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Plaintext file containing the Gemini API key (default: <config-dir>/api_key.txt)
    #[arg(long)]
    pub api_key_file: Option<PathBuf>,

    /// Gemini API key; takes precedence over the key file
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, default_value = "gemini-2.5-flash")]
    pub gemini_model: String,

    /// Gemini REST base URL
    #[arg(long, default_value = "https://generativelanguage.googleapis.com")]
    pub gemini_base_url: String,

    /// Base URL of the gesture classification service
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub classifier_url: String,

    /// Timeout for a single classification request
    #[arg(long, default_value_t = 30)]
    pub classifier_timeout_secs: u64,

    /// Skip gesture classification entirely (speech only)
    #[arg(long, default_value_t = false)]
    pub no_gestures: bool,

    /// Directory for the JSONL interaction logs
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Tag embedded in the log file name (interaction_log_<tag><unix>.jsonl)
    #[arg(long, default_value = "desktop")]
    pub log_tag: String,
}

impl SessionArgs {
    /// Resolve the Gemini key: explicit flag / env var first, then the key file.
    pub fn resolve_api_key(&self, config_dir: &Path) -> anyhow::Result<String> {
        if let Some(key) = self.gemini_api_key.as_deref() {
            let key = key.trim();
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }
        let path = self.api_key_file.clone().unwrap_or_else(|| config_dir.join("api_key.txt"));
        load_api_key(&path)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// JSON file describing the scene program (default: built-in performance order)
    #[arg(long)]
    pub program: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Gesture set to draw from
    #[arg(long, value_enum, default_value_t = Posture::Standing)]
    pub posture: Posture,

    /// System instruction for the comedian
    #[arg(
        long,
        default_value = "\
You are a comedian in an improv comedy show. You play a specialist that is being interviewed about your specialty.\n\
You are slightly sarcastic and witty, with a dry sense of humor.\n\
You talk in easy English, don't use complicated words.\n\
Keep replies SHORT, punchy and improv-friendly, and make sure the other comedian can respond."
    )]
    pub system_prompt: String,
}

#[derive(Args, Debug, Clone)]
pub struct GesturesArgs {
    /// Gesture set to draw from
    #[arg(long, value_enum, default_value_t = Posture::Standing)]
    pub posture: Posture,

    /// Base URL of the gesture classification service
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub classifier_url: String,

    /// Timeout for a single classification request
    #[arg(long, default_value_t = 30)]
    pub classifier_timeout_secs: u64,
}

impl Config {
    pub fn gestures_path(&self) -> PathBuf {
        self.config_dir.join("gestures.json")
    }

    pub fn scenes_path(&self) -> PathBuf {
        self.config_dir.join("scenes.json")
    }

    pub fn eye_colors_path(&self) -> PathBuf {
        self.config_dir.join("eyecolors.json")
    }
}

/// Read a plaintext key file, trimming surrounding whitespace.
pub fn load_api_key(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs
        ::read_to_string(path)
        .with_context(|| format!("reading API key file {}", path.display()))?;
    let key = raw.trim();
    if key.is_empty() {
        anyhow::bail!("API key file {} is empty", path.display());
    }
    Ok(key.to_string())
}
