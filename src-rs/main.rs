use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, Rgba, RgbaImage};
use pixel_pusher::{
    apply_shortcut, DiffEngine, DiffVariant, ImageFileSource, KeyChord, OverlayConfig,
    OverlaySession, Point, RasterSource, RawEvent, RecordingPresenter, Region,
};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const EVENTS_HELP: &str = r##"Event script JSON (array, replayed in order):
[
  {"type": "down", "x": 100, "y": 100},
  {"type": "move", "x": 150, "y": 130},
  {"type": "down", "x": 150, "y": 130},
  {"type": "key", "key": "Escape"},
  {"type": "key", "key": "R", "alt": true, "shift": true}
]

Notes:
- pointer types: down|click|pointerdown|touchstart, move|mousemove|pointermove|touchmove.
- events without coordinates (or with unknown types) are ignored.
- shortcut keys update the session configuration the same way the store would.
"##;

#[derive(Parser, Debug)]
#[command(
    name = "pixel-pusher",
    version,
    about = "Reference overlay tools: ruler measurement replay and pixel diff regions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Diff a page capture against a positioned reference image
    Diff(DiffArgs),
    /// Look up the diff region under a viewport point
    Hover(HoverArgs),
    /// Replay pointer/key events through the ruler and print each step
    Measure(MeasureArgs),
    /// Apply a keyboard shortcut to an overlay config file
    Shortcut(ShortcutArgs),
}

#[derive(Args, Debug, Clone)]
struct OverlayArgs {
    /// Page capture (PNG/JPEG)
    page: PathBuf,
    /// Reference image to overlay
    overlay: PathBuf,
    /// Overlay config JSON (offsets/scale are taken from it unless overridden)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Horizontal overlay offset in px
    #[arg(long, allow_hyphen_values = true)]
    offset_x: Option<i32>,
    /// Vertical overlay offset in px
    #[arg(long, allow_hyphen_values = true)]
    offset_y: Option<i32>,
    /// Overlay scale in percent
    #[arg(long)]
    scale: Option<u32>,
    /// Viewport size as WIDTHxHEIGHT (default: page size)
    #[arg(long)]
    viewport: Option<String>,
    /// Compare luminance only
    #[arg(long, action = ArgAction::SetTrue)]
    no_color: bool,
    /// Per-channel difference a pixel must exceed to be marked
    #[arg(long, default_value_t = pixel_pusher::diff::DEFAULT_THRESHOLD)]
    threshold: u8,
}

#[derive(Args, Debug)]
struct DiffArgs {
    #[command(flatten)]
    overlay: OverlayArgs,
    /// Path to write the diff mask (PNG)
    #[arg(long)]
    mask_out: Option<PathBuf>,
    /// Path to write the page with highlighted diff regions (PNG)
    #[arg(long)]
    annotated_out: Option<PathBuf>,
    /// Path to write JSON report
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HoverArgs {
    #[command(flatten)]
    overlay: OverlayArgs,
    /// Pointer x in viewport px
    #[arg(long, allow_hyphen_values = true)]
    x: i32,
    /// Pointer y in viewport px
    #[arg(long, allow_hyphen_values = true)]
    y: i32,
}

#[derive(Args, Debug)]
struct MeasureArgs {
    /// Viewport size as WIDTHxHEIGHT
    #[arg(long)]
    viewport: Option<String>,
    /// Event script JSON file (or - for stdin)
    #[arg(long)]
    events: Option<String>,
    /// Starting overlay config (ruler mode is switched on)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Page capture used if a replayed shortcut turns diff mode on
    #[arg(long)]
    page: Option<PathBuf>,
    /// Print event script schema and exit
    #[arg(long, action = ArgAction::SetTrue)]
    events_help: bool,
}

#[derive(Args, Debug)]
struct ShortcutArgs {
    /// Overlay config JSON (created with defaults if missing)
    #[arg(long)]
    config: PathBuf,
    /// Key name, e.g. D, R, ArrowUp
    #[arg(long)]
    key: String,
    #[arg(long, action = ArgAction::SetTrue)]
    alt: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    shift: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    ctrl: bool,
    /// Write the updated config back to disk
    #[arg(long, action = ArgAction::SetTrue)]
    write: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Diff(args) => command_diff(args),
        Commands::Hover(args) => command_hover(args),
        Commands::Measure(args) => command_measure(args),
        Commands::Shortcut(args) => command_shortcut(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "diff",
            "description": "Diff a page capture against the positioned overlay and list changed regions.",
        }),
        json!({
            "name": "hover",
            "description": "Report the diff region (if any) under a viewport point.",
        }),
        json!({
            "name": "measure",
            "description": "Replay ruler clicks/moves/keys and print measurements with scale detection.",
        }),
        json!({
            "name": "shortcut",
            "description": "Apply an overlay keyboard shortcut to a config file.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

struct DiffRun {
    config: OverlayConfig,
    viewport: (u32, u32),
    variant: DiffVariant,
    page: RgbaImage,
    engine: DiffEngine,
}

fn command_diff(args: DiffArgs) -> Result<()> {
    let mut run = run_overlay_diff(&args.overlay)?;

    let mask = run
        .engine
        .mask()
        .context("diff produced no mask")?
        .clone();
    let regions = run.engine.regions().to_vec();
    let (width, height) = run.viewport;

    if let Some(path) = args.mask_out.as_deref() {
        ensure_parent_dir(path)?;
        DynamicImage::ImageRgba8(mask.image().clone())
            .save(path)
            .with_context(|| format!("failed to save diff mask: {}", path.display()))?;
    }

    if let Some(path) = args.annotated_out.as_deref() {
        let mut annotated = run.page.clone();
        for (dst, marked) in annotated.pixels_mut().zip(mask.image().pixels()) {
            if marked[3] > 0 {
                blend_over(dst, *marked);
            }
        }
        for region in &regions {
            outline_region(&mut annotated, region);
            label_region(&mut annotated, region);
        }
        ensure_parent_dir(path)?;
        DynamicImage::ImageRgba8(annotated)
            .save(path)
            .with_context(|| format!("failed to save annotated image: {}", path.display()))?;
    }

    let total_pixels = u64::from(width) * u64::from(height);
    let diff_pixels = mask.marked_count();
    let percent_diff = if total_pixels > 0 {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    } else {
        0.0
    };

    let region_rows: Vec<Value> = regions
        .iter()
        .map(|r| {
            json!({
                "x": r.x,
                "y": r.y,
                "width": r.width,
                "height": r.height,
                "label": r.label(),
            })
        })
        .collect();

    let result = json!({
        "page": abs_path(&args.overlay.page).display().to_string(),
        "overlay": abs_path(&args.overlay.overlay).display().to_string(),
        "generated_at": timestamp_iso(),
        "size": {"width": width, "height": height},
        "threshold": run.engine.threshold(),
        "mode": run.variant,
        "offset": {"x": run.config.offset_x, "y": run.config.offset_y},
        "scale": run.config.scale,
        "diff_pixels": diff_pixels,
        "percent_diff": round_to(percent_diff, 3),
        "regions": region_rows,
        "region_count": regions.len(),
        "mask_image": args.mask_out.as_deref().map(|p| abs_path(p).display().to_string()),
        "annotated_image": args.annotated_out.as_deref().map(|p| abs_path(p).display().to_string()),
    });

    if let Some(path) = args.json_out.as_deref() {
        write_json_pretty(path, &result)?;
    }

    run.engine.disable();
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn command_hover(args: HoverArgs) -> Result<()> {
    let mut run = run_overlay_diff(&args.overlay)?;
    let point = Point::new(args.x, args.y);
    let on_diff = run.engine.mask().is_some_and(|m| m.is_marked_at(point));
    let region = run.engine.hover(point);
    run.engine.disable();

    let payload = json!({
        "point": point,
        "on_diff": on_diff,
        "region": region,
        "label": region.map(|r| r.label()),
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn command_measure(args: MeasureArgs) -> Result<()> {
    if args.events_help {
        println!("{EVENTS_HELP}");
        return Ok(());
    }

    let Some(viewport_raw) = args.viewport.as_deref() else {
        bail!("--viewport is required (e.g. 1280x800)");
    };
    let viewport = parse_viewport(viewport_raw)?;
    let events = load_events(args.events.as_deref().unwrap_or("-"))?;

    let mut config = match args.config.as_deref() {
        Some(path) => OverlayConfig::load(path)?,
        None => OverlayConfig::default(),
    };
    config.ruler_mode = true;

    let source = ImageFileSource::new(args.page.clone().unwrap_or_default());
    let mut session = OverlaySession::new(RecordingPresenter::new(), source, viewport);
    session.apply_config(config);

    let mut steps = Vec::with_capacity(events.len());
    for (index, raw) in events.iter().enumerate() {
        let input = raw.to_input();
        if let Some(next) = session.handle_raw(raw) {
            session.apply_config(next);
        }
        steps.push(json!({
            "index": index,
            "event": input,
            "ignored": input.is_none(),
            "state": session.ruler().state().name(),
            "start": session.ruler().start_point(),
            "end": session.ruler().end_point(),
            "reading": session.ruler().last_reading(),
            "screen": session.presenter(),
        }));
    }

    let payload = json!({
        "viewport": {"width": viewport.0, "height": viewport.1},
        "generated_at": timestamp_iso(),
        "steps": steps,
        "config": session.config(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_shortcut(args: ShortcutArgs) -> Result<()> {
    let current = if args.config.exists() {
        OverlayConfig::load(&args.config)?
    } else {
        OverlayConfig::default()
    };
    let chord = KeyChord {
        key: args.key.clone(),
        alt: args.alt,
        shift: args.shift,
        ctrl: args.ctrl,
    };

    let next = apply_shortcut(&current, &chord);
    let changed = next.as_ref().is_some_and(|n| *n != current);
    if let (true, Some(updated)) = (args.write, next.as_ref()) {
        updated.save(&args.config)?;
    }

    let payload = json!({
        "config_path": abs_path(&args.config).display().to_string(),
        "shortcut": chord,
        "recognized": next.is_some(),
        "changed": changed,
        "written": args.write && next.is_some(),
        "config": next.as_ref().unwrap_or(&current),
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn overlay_config(args: &OverlayArgs) -> Result<OverlayConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => OverlayConfig::load(path)?,
        None => OverlayConfig::default(),
    };
    config.image_path = Some(args.overlay.clone());
    config.is_visible = true;
    config.diff_mode = !args.no_color;
    config.no_color_diff = args.no_color;
    if let Some(x) = args.offset_x {
        config.offset_x = x;
    }
    if let Some(y) = args.offset_y {
        config.offset_y = y;
    }
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    Ok(config.normalized())
}

fn run_overlay_diff(args: &OverlayArgs) -> Result<DiffRun> {
    let config = overlay_config(args)?;
    let viewport = match args.viewport.as_deref() {
        Some(raw) => parse_viewport(raw)?,
        None => image::image_dimensions(&args.page)
            .with_context(|| format!("failed to read page size: {}", args.page.display()))?,
    };
    let Some(variant) = config.effective_diff() else {
        bail!("overlay config does not enable a diff mode");
    };

    let mut source = ImageFileSource::new(&args.page);
    let page = source.capture_page(viewport)?;
    let overlay = source.render_overlay(&config, viewport)?;

    let mut engine = DiffEngine::new().with_threshold(args.threshold);
    engine.run(&page, &overlay, variant)?;

    Ok(DiffRun {
        config,
        viewport,
        variant,
        page,
        engine,
    })
}

fn parse_viewport(raw: &str) -> Result<(u32, u32)> {
    let Some((w, h)) = raw.trim().split_once(['x', 'X']) else {
        bail!("viewport must look like WIDTHxHEIGHT, got {raw:?}");
    };
    let width: u32 = w
        .trim()
        .parse()
        .with_context(|| format!("invalid viewport width: {w:?}"))?;
    let height: u32 = h
        .trim()
        .parse()
        .with_context(|| format!("invalid viewport height: {h:?}"))?;
    if width == 0 || height == 0 {
        bail!("viewport must be non-empty, got {width}x{height}");
    }
    Ok((width, height))
}

fn load_events(path: &str) -> Result<Vec<RawEvent>> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read events from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read events file: {path}"))?
    };

    let value: Value = serde_json::from_str(&raw).context("invalid events JSON")?;
    let Value::Array(items) = value else {
        bail!("events must be a JSON array");
    };

    // one bad entry should not sink the whole script
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect())
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}

const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 69, 58, 255]);
const OUTLINE_WIDTH: u32 = 2;
const LABEL_PLATE: Rgba<u8> = Rgba([0, 0, 0, 170]);
const LABEL_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GLYPH_SIZE: i32 = 8;

/// Source-over with integer weights. Alpha only ever grows.
fn blend_over(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let a = u16::from(src[3]);
    for c in 0..3 {
        let mixed = u16::from(dst[c]) * (255 - a) + u16::from(src[c]) * a;
        dst[c] = ((mixed + 127) / 255) as u8;
    }
    dst[3] = dst[3].max(src[3]);
}

fn blend_at(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
        return;
    };
    if let Some(px) = img.get_pixel_mut_checked(x, y) {
        blend_over(px, color);
    }
}

/// Frames a region with a band that grows outward from its edge pixels.
/// Edges that fall outside the image are not drawn.
fn outline_region(img: &mut RgbaImage, region: &Region) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let grow = OUTLINE_WIDTH - 1;
    let (left, top) = (region.x, region.y);
    let right = left + region.width - 1;
    let bottom = top + region.height - 1;

    for y in top.saturating_sub(grow)..(bottom + grow + 1).min(img.height()) {
        for x in left.saturating_sub(grow)..(right + grow + 1).min(img.width()) {
            let interior = x > left && x < right && y > top && y < bottom;
            if !interior {
                img.put_pixel(x, y, OUTLINE_COLOR);
            }
        }
    }
}

/// "WxH" caption just above the region's top-left corner.
fn label_region(img: &mut RgbaImage, region: &Region) {
    let text = format!("{}x{}", region.width, region.height);
    let left = region.x as i32;
    let top = region.y as i32 - 10;
    let plate_right = left + text.chars().count() as i32 * GLYPH_SIZE;

    for y in top - 1..=top + GLYPH_SIZE {
        for x in left - 1..=plate_right {
            blend_at(img, x, y, LABEL_PLATE);
        }
    }

    for (i, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch) else {
            continue;
        };
        let origin = left + i as i32 * GLYPH_SIZE;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if (bits >> col) & 1 == 1 {
                    blend_at(img, origin + col, top + row as i32, LABEL_TEXT);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn save_png(path: &Path, img: RgbaImage) {
        DynamicImage::ImageRgba8(img).save(path).unwrap();
    }

    fn overlay_args(page: PathBuf, overlay: PathBuf) -> OverlayArgs {
        OverlayArgs {
            page,
            overlay,
            config: None,
            offset_x: None,
            offset_y: None,
            scale: None,
            viewport: None,
            no_color: false,
            threshold: 30,
        }
    }

    #[test]
    fn parses_viewport_sizes() {
        assert_eq!(parse_viewport("1280x800").unwrap(), (1280, 800));
        assert_eq!(parse_viewport(" 390X844 ").unwrap(), (390, 844));
        assert!(parse_viewport("1280").is_err());
        assert!(parse_viewport("0x10").is_err());
        assert!(parse_viewport("wide x tall").is_err());
    }

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn events_file_keeps_malformed_entries_as_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        fs::write(
            &path,
            r#"[{"type": "down", "x": 1, "y": 2}, {"type": 5}, {"type": "move"}]"#,
        )
        .unwrap();
        let events = load_events(path.to_str().unwrap()).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].to_input().is_some());
        assert!(events[1].to_input().is_none());
        assert!(events[2].to_input().is_none());
    }

    #[test]
    fn overlay_diff_finds_offset_block() {
        let dir = tempdir().unwrap();
        let page_path = dir.path().join("page.png");
        let overlay_path = dir.path().join("mock.png");

        save_png(&page_path, RgbaImage::from_pixel(80, 60, Rgba([255, 255, 255, 255])));
        let mut mock = RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 255]));
        for y in 10..22 {
            for x in 10..22 {
                mock.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        save_png(&overlay_path, mock);

        let mut args = overlay_args(page_path, overlay_path);
        args.offset_x = Some(5);
        args.offset_y = Some(-5);

        let mut run = run_overlay_diff(&args).unwrap();
        assert_eq!(run.viewport, (80, 60));
        assert_eq!(run.variant, DiffVariant::Color);
        let regions = run.engine.regions().to_vec();
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].x, regions[0].y), (15, 5));
        assert_eq!((regions[0].width, regions[0].height), (12, 12));
        run.engine.disable();
    }

    #[test]
    fn overlay_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("overlay.json");
        OverlayConfig {
            offset_x: 40,
            scale: 150,
            diff_mode: false,
            ..OverlayConfig::default()
        }
        .save(&config_path)
        .unwrap();

        let mut args = overlay_args(dir.path().join("p.png"), dir.path().join("o.png"));
        args.config = Some(config_path);
        args.scale = Some(500);
        args.no_color = true;

        let config = overlay_config(&args).unwrap();
        assert_eq!(config.offset_x, 40);
        assert_eq!(config.scale, 200);
        assert_eq!(config.effective_diff(), Some(DiffVariant::Luminance));
    }

    #[test]
    fn region_annotations_clip_at_edges() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        outline_region(
            &mut img,
            &Region {
                x: 6,
                y: 6,
                width: 20,
                height: 20,
            },
        );
        assert_eq!(img.get_pixel(6, 9).0, [255, 69, 58, 255]);
        assert_eq!(img.get_pixel(5, 5).0, [255, 69, 58, 255]);
        assert_eq!(img.get_pixel(9, 9).0, [0, 0, 0, 255]);

        label_region(
            &mut img,
            &Region {
                x: 0,
                y: 2,
                width: 12,
                height: 9,
            },
        );
        assert_eq!(img.dimensions(), (10, 10));
    }

    #[test]
    fn blend_over_mixes_by_source_alpha() {
        let mut px = Rgba([0, 0, 0, 255]);
        blend_over(&mut px, Rgba([255, 0, 0, 200]));
        assert_eq!(px.0, [200, 0, 0, 255]);

        let mut clear = Rgba([10, 20, 30, 0]);
        blend_over(&mut clear, Rgba([255, 255, 255, 0]));
        assert_eq!(clear.0, [10, 20, 30, 0]);
    }
}
