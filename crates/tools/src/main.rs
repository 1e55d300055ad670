use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use foundation::Extent;
use foundation::math::Vec2;
use layers::{
    Atlas, DiscardPacks, LayerConfig, LiveLayer, MapQuery, PackedBufferHandoff, ViewState,
};
use runtime::{COMMITTED_FEATURES, PACKED_FEATURES};
use streaming::{ConnectionConfig, WsConnector};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Inspect a live track stream")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct StreamArgs {
    /// Connection config JSON (camelCase, as served to the layer).
    #[arg(long)]
    config: PathBuf,
    /// Atlas metrics JSON: `{"<type>": {xmin, ymin, xmax, ymax}}`.
    #[arg(long)]
    atlas: PathBuf,
    /// Visible extent as `xmin,ymin,xmax,ymax`.
    #[arg(long, value_parser = parse_extent)]
    extent: Extent,
    /// Optional layer config JSON (store, pack, tickMs).
    #[arg(long)]
    layer: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the parsed atlas words and metrics.
    Atlas { path: PathBuf },
    /// Connect and log every commit/pack cycle.
    Watch {
        #[command(flatten)]
        stream: StreamArgs,
        /// Stop after this many seconds (runs until ctrl-c when absent).
        #[arg(long)]
        duration_s: Option<f64>,
    },
    /// Connect, let the table fill, then hit test a map point.
    Hit {
        #[command(flatten)]
        stream: StreamArgs,
        /// Map point as `x,y`.
        #[arg(long, value_parser = parse_point)]
        at: Vec2,
        #[arg(long, default_value_t = 591657527.591555)]
        scale: f64,
        #[arg(long, default_value_t = 156543.03392800014)]
        resolution: f64,
        #[arg(long, default_value_t = 0.0)]
        rotation: f64,
        #[arg(long, default_value_t = 2.0)]
        after_s: f64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = real_main(Args::parse()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn real_main(args: Args) -> Result<(), String> {
    match args.command {
        Command::Atlas { path } => cmd_atlas(&path),
        Command::Watch { stream, duration_s } => cmd_watch(stream, duration_s).await,
        Command::Hit {
            stream,
            at,
            scale,
            resolution,
            rotation,
            after_s,
        } => {
            let query = MapQuery {
                point: at,
                resolution,
                scale,
                rotation_deg: rotation,
            };
            cmd_hit(stream, query, after_s).await
        }
    }
}

fn cmd_atlas(path: &Path) -> Result<(), String> {
    let atlas = load_atlas(path)?;
    for (feature_type, entry) in atlas.iter() {
        println!(
            "type {feature_type:>3}: word 0x{:08x}  {}x{}",
            entry.word, entry.width, entry.height
        );
    }
    Ok(())
}

async fn cmd_watch(stream: StreamArgs, duration_s: Option<f64>) -> Result<(), String> {
    let (config, layer_config, atlas) = load_stream(&stream)?;
    let (sink, mut packs) = mpsc::unbounded_channel::<PackedBufferHandoff>();
    let (layer, _task) = LiveLayer::spawn(layer_config, Arc::new(atlas), WsConnector, sink);

    layer
        .set_view_state(ViewState::centered(stream.extent))
        .await
        .map_err(|e| e.to_string())?;
    layer.connect(config).await.map_err(|e| e.to_string())?;

    let mut status = layer.status();
    let run_for = duration_s
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(Duration::MAX);
    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(handoff) = packs.recv() => {
                info!(
                    "pack: {} features, {} slots ({} allocated), origin ({:.1}, {:.1})",
                    handoff.data.feature_count(),
                    handoff.buffer_length,
                    handoff.data.capacity(),
                    handoff.local_origin.x(),
                    handoff.local_origin.y()
                );
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("connection {}", *status.borrow_and_update());
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let metrics = layer.metrics().await.map_err(|e| e.to_string())?;
    for (name, value) in &metrics.counters {
        info!("{name}: {value}");
    }
    if let Some(committed) = metrics.gauge(COMMITTED_FEATURES) {
        info!("{COMMITTED_FEATURES}: {committed}");
    }
    if let Some(mean) = metrics
        .histogram(PACKED_FEATURES)
        .and_then(|visible| visible.mean())
    {
        info!("{PACKED_FEATURES} mean: {mean:.1}");
    }
    layer.disconnect().await.map_err(|e| e.to_string())
}

async fn cmd_hit(stream: StreamArgs, query: MapQuery, after_s: f64) -> Result<(), String> {
    let (config, layer_config, atlas) = load_stream(&stream)?;
    // Nothing renders here; packs are dropped without closing the sink.
    let (layer, _task) =
        LiveLayer::spawn(layer_config, Arc::new(atlas), WsConnector, DiscardPacks);

    layer
        .set_view_state(ViewState::centered(stream.extent))
        .await
        .map_err(|e| e.to_string())?;
    layer.connect(config).await.map_err(|e| e.to_string())?;
    tokio::time::sleep(Duration::try_from_secs_f64(after_s).unwrap_or_default()).await;

    if !layer.is_connected().await.map_err(|e| e.to_string())? {
        warn!("not connected; hit testing whatever was received");
    }

    match layer.hit_test_map(query).await.map_err(|e| e.to_string())? {
        Some(feature) => {
            let json = serde_json::to_string_pretty(&feature.to_wire())
                .map_err(|e| format!("json: {e}"))?;
            println!("{json}");
        }
        None => println!("no feature at ({}, {})", query.point.x, query.point.y),
    }
    layer.disconnect().await.map_err(|e| e.to_string())
}

fn load_stream(stream: &StreamArgs) -> Result<(ConnectionConfig, LayerConfig, Atlas), String> {
    let text = fs::read_to_string(&stream.config)
        .map_err(|e| format!("read {:?}: {e}", stream.config))?;
    let config = ConnectionConfig::from_json_str(&text).map_err(|e| e.to_string())?;

    let layer_config = match &stream.layer {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
            serde_json::from_str(&text).map_err(|e| format!("layer config {path:?}: {e}"))?
        }
        None => LayerConfig::default(),
    };

    let atlas = load_atlas(&stream.atlas)?;
    Ok((config, layer_config, atlas))
}

fn load_atlas(path: &Path) -> Result<Atlas, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
    let atlas = Atlas::from_json_str(&text).map_err(|e| format!("{path:?}: {e}"))?;
    if atlas.is_empty() {
        return Err(format!("{path:?}: atlas has no entries"));
    }
    Ok(atlas)
}

fn parse_numbers<const N: usize>(s: &str) -> Result<[f64; N], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers, got {s:?}"));
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|e| format!("{part:?}: {e}"))?;
        if !slot.is_finite() {
            return Err(format!("{part:?} is not finite"));
        }
    }
    Ok(out)
}

fn parse_extent(s: &str) -> Result<Extent, String> {
    let [xmin, ymin, xmax, ymax] = parse_numbers::<4>(s)?;
    if xmax < xmin || ymax < ymin {
        return Err(format!("extent {s:?} is inverted"));
    }
    Ok(Extent::new(xmin, ymin, xmax, ymax))
}

fn parse_point(s: &str) -> Result<Vec2, String> {
    let [x, y] = parse_numbers::<2>(s)?;
    Ok(Vec2::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::{Args, Command, parse_extent, parse_point};
    use clap::Parser;
    use foundation::Extent;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_extents_and_points() {
        assert_eq!(
            parse_extent("-100, -50.5, 100, 50.5"),
            Ok(Extent::new(-100.0, -50.5, 100.0, 50.5))
        );
        assert!(parse_extent("1,2,3").is_err());
        assert!(parse_extent("10,0,0,10").is_err());
        assert!(parse_extent("0,0,nan,1").is_err());

        let p = parse_point("12.5,-3").unwrap();
        assert_eq!((p.x, p.y), (12.5, -3.0));
        assert!(parse_point("x,1").is_err());
    }

    #[test]
    fn hit_command_parses() {
        let args = Args::try_parse_from([
            "tracks",
            "hit",
            "--config",
            "stream.json",
            "--atlas",
            "cars.json",
            "--extent",
            "0,0,100,100",
            "--at",
            "50,50",
            "--scale",
            "1024",
        ])
        .unwrap();
        let Command::Hit {
            stream, at, scale, ..
        } = args.command
        else {
            panic!("expected hit");
        };
        assert_eq!(stream.extent, Extent::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!((at.x, at.y, scale), (50.0, 50.0, 1024.0));
        assert!(stream.layer.is_none());
    }
}
