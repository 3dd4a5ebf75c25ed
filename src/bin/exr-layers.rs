use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use exr_layers::io::openexr::ExrFileInput;
use exr_layers::layer::codec;
use exr_layers::{AbortHandle, Document, Layer, LayerPixels, ReadDocument, ReadOptions};

#[derive(Parser, Debug)]
#[command(name = "exr-layers", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the layers reconstructed from an EXR file.
    Inspect(InspectArgs),
    /// Write one layer as an 8-bit PNG.
    Extract(ExtractArgs),
    /// Print the layer-string attribute the file's layers encode to.
    LayersString(OpenArgs),
}

#[derive(Parser, Debug)]
struct OpenArgs {
    /// Input EXR file.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Give every alpha channel a layer of its own.
    #[arg(long)]
    split_alpha: bool,

    /// Prefix the first part's channels with its part name too.
    #[arg(long)]
    rename_first_part: bool,

    /// Read options as JSON; the flags above are applied on top.
    #[arg(long)]
    options: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[command(flatten)]
    open: OpenArgs,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    open: OpenArgs,

    /// Layer name; defaults to the main layer.
    #[arg(long)]
    layer: Option<String>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Unpremultiply colour before export.
    #[arg(long)]
    straight: bool,
}

#[derive(serde::Serialize)]
struct LayerSummary {
    name: String,
    channels: Vec<String>,
    alpha: Option<String>,
    visible: bool,
    mode: String,
    opacity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manif_file: Option<String>,
}

#[derive(serde::Serialize)]
struct FileSummary {
    width: usize,
    height: usize,
    parts: usize,
    complete: bool,
    used_layers_string: bool,
    main_layer: Option<String>,
    layers: Vec<LayerSummary>,
    crypto_layers: Vec<LayerSummary>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Inspect(args) => cmd_inspect(args),
        Command::Extract(args) => cmd_extract(args),
        Command::LayersString(args) => cmd_layers_string(args),
    }
}

fn read_options(args: &OpenArgs) -> anyhow::Result<ReadOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read options '{}'", path.display()))?;
            ReadOptions::from_json_str(&text)?
        }
        None => ReadOptions::default(),
    };
    options.split_alpha |= args.split_alpha;
    options.rename_first_part |= args.rename_first_part;
    Ok(options)
}

fn open(args: &OpenArgs) -> anyhow::Result<ReadDocument> {
    let options = read_options(args)?;
    let input = open_input(&args.in_path)?;
    let doc = ReadDocument::open(Box::new(input), options, AbortHandle::never())
        .with_context(|| format!("open '{}'", args.in_path.display()))?;
    Ok(doc)
}

fn open_input(path: &Path) -> anyhow::Result<ExrFileInput> {
    ExrFileInput::open(path).with_context(|| format!("decode '{}'", path.display()))
}

fn summarize(layer: &Layer, doc: &Document) -> LayerSummary {
    let chans = doc.channels();
    LayerSummary {
        name: layer.name(chans),
        channels: layer
            .channels()
            .iter()
            .map(|id| chans[id.0].name().to_owned())
            .collect(),
        alpha: layer
            .alpha_channel(chans)
            .map(|id| chans[id.0].name().to_owned()),
        visible: layer.props.visible,
        mode: layer.props.mode.to_string(),
        opacity: layer.props.opacity,
        manifest: layer.manifest().map(str::to_owned),
        manif_file: layer.manif_file().map(str::to_owned),
    }
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let file = open(&args.open)?;
    let doc = file.document();
    let summary = FileSummary {
        width: doc.width(),
        height: doc.height(),
        parts: file.file().parts(),
        complete: file.is_complete(),
        used_layers_string: doc.used_layers_string(),
        main_layer: doc
            .find_main_layer(true, false)
            .and_then(|idx| doc.layer_name(idx)),
        layers: doc.layers().iter().map(|l| summarize(l, doc)).collect(),
        crypto_layers: doc
            .crypto_layers()
            .iter()
            .map(|l| summarize(l, doc))
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}x{} from {} part(s){}",
        summary.width,
        summary.height,
        summary.parts,
        if summary.complete { "" } else { " (incomplete)" }
    );
    for layer in summary.layers.iter().chain(&summary.crypto_layers) {
        let main = summary.main_layer.as_deref() == Some(layer.name.as_str());
        println!(
            "{}{} [{}]{}",
            if main { "* " } else { "  " },
            layer.name,
            layer.channels.join(", "),
            layer
                .alpha
                .as_deref()
                .map(|a| format!(" alpha={a}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_extract(args: ExtractArgs) -> anyhow::Result<()> {
    let mut file = open(&args.open)?;
    let idx = match &args.layer {
        Some(name) => file
            .document()
            .find_layer(name)
            .with_context(|| format!("no layer named '{name}'"))?,
        None => file
            .document()
            .find_main_layer(true, true)
            .context("file has no layers")?,
    };
    file.load_layer(idx)?;
    let doc = file.document_mut();
    let pixels = LayerPixels::from_layer(doc, idx, args.straight)
        .context("layer could not be loaded, possibly for lack of memory")?;
    let png = image::DynamicImage::ImageRgba32F(pixels.to_rgba32f_image()?).to_rgba8();
    png.save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write '{}'", args.out.display()))?;
    Ok(())
}

fn cmd_layers_string(args: OpenArgs) -> anyhow::Result<()> {
    let file = open(&args)?;
    let doc = file.document();
    println!("{}", codec::encode_layers(doc.layers(), doc.channels()));
    Ok(())
}
