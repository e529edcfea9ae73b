use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "bingkai", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite the overlay onto a photo or video and export it.
    Export(ExportArgs),
    /// Print source media information.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Source photo or video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Overlay image (the bingkai). Omit to export source-only.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Output directory for the download. Overrides the config's directory
    /// when given.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Output format. Defaults to png for photos and mp4 for videos.
    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// Pipeline configuration JSON; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Source photo or video.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Png,
    Mp4,
    Webm,
}

impl From<FormatChoice> for bingkai::OutputFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Png => bingkai::OutputFormat::Png,
            FormatChoice::Mp4 => bingkai::OutputFormat::Mp4,
            FormatChoice::Webm => bingkai::OutputFormat::Webm,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Export(args) => cmd_export(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => bingkai::ExportConfig::from_json_file(path)?,
        None => bingkai::ExportConfig::default(),
    };
    if args.overlay.is_some() {
        cfg.overlay_path = args.overlay.clone();
    }
    if let Some(dir) = &args.out_dir {
        cfg.out_dir = dir.clone();
    }

    let exporter = bingkai::Exporter::new(cfg)?;

    let mut request = bingkai::ExportRequest::new(&args.in_path);
    if let Some(format) = args.format {
        request = request.with_format(format.into());
    }

    let outcome = exporter.export_with_progress(&request, |fraction| {
        eprintln!("progress: {:>3.0}%", fraction * 100.0);
    })?;

    if let Some(note) = &outcome.format_note {
        eprintln!("note: {note}");
    }
    eprintln!("wrote {}", outcome.path.display());
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    match bingkai::sniff_media_kind(&args.in_path)? {
        bingkai::MediaKind::Image => {
            let frame = bingkai::media::decode_image_frame(&args.in_path)?;
            println!("kind:     image");
            println!("size:     {}x{}", frame.width, frame.height);
        }
        bingkai::MediaKind::Video => {
            let info = bingkai::probe_video(&args.in_path)?;
            println!("kind:     video");
            println!("size:     {}x{}", info.width, info.height);
            println!("fps:      {:.3}", info.source_fps());
            println!("duration: {:.3}s", info.duration_sec);
            println!("audio:    {}", if info.has_audio { "yes" } else { "no" });
        }
    }
    Ok(())
}
