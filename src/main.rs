use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::FuzzySelect;
use std::path::PathBuf;
use termvideo::terminal::{CrosstermTerminal, TerminalCaps, TerminalSession};
use termvideo::{AppConfig, MediaPlayer, PlayerOptions, RenderConfig};
use walkdir::WalkDir;

fn load_config() -> Result<AppConfig> {
    // Look for termvideo.json in app support, current dir fallback, then built-in default
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("termvideo");
        d.push("termvideo.json");
        tried.push(d);
    }
    tried.push(PathBuf::from("termvideo.json"));

    for p in &tried {
        if p.exists() {
            log::debug!("using config {}", p.display());
            return AppConfig::from_file(p);
        }
    }

    // Built-in defaults
    Ok(AppConfig::default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Play a video as text in the terminal, with sound.")]
struct Args {
    /// Video file to play
    input: Option<PathBuf>,

    /// Render in colour
    #[arg(long, short = 'c', visible_alias = "color", default_value_t = false)]
    colour: bool,

    /// Keep the video's aspect ratio, padding the rest of the terminal
    #[arg(long, short = 'a', default_value_t = false)]
    force_aspect: bool,

    /// Weight red, green and blue equally when computing brightness
    #[arg(long, default_value_t = false)]
    avg_lumi: bool,

    /// Frames to decode but not draw between drawn frames
    #[arg(long, short = 's')]
    skip_frames: Option<u32>,

    /// Colour difference (0-255) needed before the colour is re-sent
    #[arg(long, short = 't')]
    threshold: Option<u8>,

    /// Seek step in milliseconds for Ctrl+Left / Ctrl+Right
    #[arg(long)]
    seek_step: Option<u64>,

    /// Use the double-buffered cell writer on true-colour terminals
    #[arg(long, short = 'b', default_value_t = false)]
    buffer: bool,

    /// Play without sound
    #[arg(long, default_value_t = false)]
    no_audio: bool,

    /// Preferred audio track language (e.g. eng, jpn)
    #[arg(long)]
    audio_language: Option<String>,

    /// Show frame time and audio/video drift in the window title
    #[arg(long, default_value_t = false)]
    show_stats: bool,

    /// Quality preset from the config file
    #[arg(long)]
    preset: Option<String>,

    /// Widest frame in pixels requested from the decoder
    #[arg(long)]
    decode_width: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let mut args = Args::parse();
    let config = load_config()?;

    // --- Interactive Prompts ---
    if args.input.is_none() {
        let files = find_media_files()?;
        if files.is_empty() {
            return Err(anyhow!("No media files found in current directory."));
        }
        let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Choose a video to play")
            .default(0)
            .items(&files)
            .interact()?;
        args.input = Some(PathBuf::from(&files[selection]));
    }
    let input = args.input.take().ok_or_else(|| anyhow!("No input file given"))?;

    let preset_name = args.preset.as_deref().unwrap_or(&config.default_preset);
    let preset = config.preset(preset_name)?;

    let mut render = RenderConfig::from_preset(preset, config.chars_for(args.colour).to_string())
        .with_color(args.colour)
        .with_force_aspect(args.force_aspect)
        .with_average_luminance(args.avg_lumi);
    if let Some(skip) = args.skip_frames {
        render = render.with_frames_to_skip(skip);
    }
    if let Some(threshold) = args.threshold {
        render = render.with_color_threshold(threshold);
    }

    let options = PlayerOptions::new(input)
        .with_seek_step_ms(args.seek_step.unwrap_or(config.seek_step_ms))
        .with_double_buffer(args.buffer)
        .with_audio(!args.no_audio)
        .with_audio_language(args.audio_language.clone())
        .with_decode_width(args.decode_width.unwrap_or(preset.decode_width))
        .with_stats(args.show_stats);

    let player = MediaPlayer::open(&config, render, options)?;

    let caps = TerminalCaps::probe();
    let mut session = TerminalSession::enter().context("preparing terminal")?;
    let result = player.play(CrosstermTerminal::new(caps));
    let restored = session.restore().context("restoring terminal");

    let report = result?;
    restored?;
    println!("Average frame time: {:.3}ms", report.video.avg_frame_time_ms);
    Ok(())
}

fn find_media_files() -> Result<Vec<String>> {
    Ok(WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file()
                && e.path().extension().is_some_and(|ext| {
                    matches!(
                        ext.to_ascii_lowercase().to_str(),
                        Some("mp4" | "mkv" | "mov" | "avi" | "webm" | "m4v" | "flv" | "wmv" | "gif")
                    )
                })
        })
        .map(|e| e.path().to_str().unwrap_or("").to_string())
        .collect())
}
