use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use crt_filter_chain::runtime::{ParameterUpdate, PassOutcome, PassStatus};
use crt_filter_chain::{ChainOptions, FilterChain, FrameReport, FsSource, HeadlessBackend};
use log::{info, warn};

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    preset: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    dump_json: bool,
    params: Vec<(String, f32)>,
    frames: u32,
    source_size: [u32; 2],
    viewport: [u32; 2],
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            preset: None,
            out_dir: None,
            dump_json: false,
            params: Vec::new(),
            frames: 1,
            source_size: [320, 240],
            viewport: [1280, 960],
        }
    }
}

const USAGE: &str = "usage: crt-filter-chain --preset <file.slangp> [--out-dir <dir>] [--dump-json] \
[--param NAME=VALUE]... [--frames N] [--source WxH] [--viewport WxH]";

fn parse_size(flag: &str, v: &str) -> Result<[u32; 2]> {
    let (w, h) = v
        .split_once('x')
        .ok_or_else(|| anyhow!("{flag} expects WxH, got {v}"))?;
    let w: u32 = w.trim().parse().with_context(|| format!("{flag}: bad width {w}"))?;
    let h: u32 = h.trim().parse().with_context(|| format!("{flag}: bad height {h}"))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("{flag}: size must be non-zero"));
    }
    Ok([w, h])
}

fn arg_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--preset" => {
                cli.preset = Some(PathBuf::from(arg_value(args, i, flag)?));
                i += 2;
            }
            "--out-dir" | "--outputdir" => {
                cli.out_dir = Some(PathBuf::from(arg_value(args, i, flag)?));
                i += 2;
            }
            "--dump-json" => {
                cli.dump_json = true;
                i += 1;
            }
            "--param" => {
                let v = arg_value(args, i, flag)?;
                let (name, num) = v
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--param expects NAME=VALUE, got {v}"))?;
                let num: f32 = num
                    .trim()
                    .parse()
                    .with_context(|| format!("--param {name}: not a number"))?;
                cli.params.push((name.trim().to_string(), num));
                i += 2;
            }
            "--frames" => {
                cli.frames = arg_value(args, i, flag)?.parse().context("--frames expects a count")?;
                i += 2;
            }
            "--source" => {
                cli.source_size = parse_size(flag, arg_value(args, i, flag)?)?;
                i += 2;
            }
            "--viewport" => {
                cli.viewport = parse_size(flag, arg_value(args, i, flag)?)?;
                i += 2;
            }
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            other => return Err(anyhow!("unknown argument: {other}\n{USAGE}")),
        }
    }
    if cli.preset.is_none() {
        return Err(anyhow!("--preset is required\n{USAGE}"));
    }
    Ok(cli)
}

fn print_report(report: &FrameReport) {
    for pass in &report.passes {
        let inputs: Vec<String> = pass
            .inputs
            .iter()
            .map(|i| format!("{}=#{}", i.name, i.texture.0))
            .collect();
        let outcome = match &pass.outcome {
            PassOutcome::Rendered => "rendered".to_string(),
            PassOutcome::Bypassed { reason } => format!("bypassed ({reason})"),
        };
        println!(
            "  pass {} {:<24} {}x{} {} [{}]",
            pass.index,
            pass.shader,
            pass.size[0],
            pass.size[1],
            outcome,
            inputs.join(", ")
        );
    }
}

fn write_json(out_dir: Option<&Path>, name: &str, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out_dir {
        Some(dir) => {
            let path = dir.join(name);
            std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
            println!("[cli] wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let Some(preset_path) = cli.preset.as_deref() else {
        return Err(anyhow!(USAGE));
    };
    if let Some(dir) = &cli.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create --out-dir {}", dir.display()))?;
    }

    let mut options = ChainOptions::default().with_viewport(cli.viewport);
    if let Some(dir) = &cli.out_dir {
        options = options.with_dump_dir(dir);
    }
    let mut chain = FilterChain::new(HeadlessBackend::new(), Arc::new(FsSource::new()), options);
    chain
        .load_preset(preset_path)
        .with_context(|| format!("failed to load preset {}", preset_path.display()))?;

    for (name, value) in &cli.params {
        match chain.set_parameter(name, *value)? {
            ParameterUpdate::Unknown => warn!("[cli] no pass declares {name}"),
            ParameterUpdate::Recompile { passes } => {
                info!("[cli] {name} = {value} rebuilds passes {passes:?}")
            }
            ParameterUpdate::Uniform => info!("[cli] {name} = {value}"),
        }
    }

    for i in 0..chain.pass_count() {
        match chain.pass_status(i) {
            Some(PassStatus::Stubbed(stubs)) => {
                println!("pass {i}: linked with stubs for {}", stubs.join(", "))
            }
            Some(PassStatus::Failed(e)) => {
                println!("pass {i}: FAILED, will bypass: {e}");
                if let Some(listing) = chain.failure_listing(i) {
                    print!("{listing}");
                }
            }
            _ => {}
        }
    }

    let source = chain.backend_mut().create_source(cli.source_size);
    let mut last = None;
    for _ in 0..cli.frames.max(1) {
        let report = chain.render_frame(source)?;
        chain.backend_mut().touch(source);
        last = Some(report);
    }
    let Some(report) = last else {
        return Ok(());
    };
    println!(
        "[cli] {}: frame {} ({} passes, {} bypassed)",
        preset_path.display(),
        report.frame,
        report.passes.len(),
        report.bypassed().count()
    );
    print_report(&report);

    if cli.dump_json {
        let value = serde_json::json!({
            "preset": chain.preset(),
            "parameters": chain.parameters(),
            "frame": report,
        });
        write_json(cli.out_dir.as_deref(), "report.json", &value)?;
    }

    chain.dispose();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_full() {
        let cli = parse_cli(&args(&[
            "--preset",
            "crt/zfast.slangp",
            "--out-dir",
            "out",
            "--dump-json",
            "--param",
            "GLOW=0.5",
            "--param",
            "MASK_TYPE = 2",
            "--source",
            "256x224",
        ]))
        .unwrap();
        assert_eq!(cli.preset, Some(PathBuf::from("crt/zfast.slangp")));
        assert_eq!(cli.out_dir, Some(PathBuf::from("out")));
        assert!(cli.dump_json);
        assert_eq!(
            cli.params,
            vec![("GLOW".to_string(), 0.5), ("MASK_TYPE".to_string(), 2.0)]
        );
        assert_eq!(cli.source_size, [256, 224]);
        assert_eq!(cli.frames, 1);
    }

    #[test]
    fn parse_cli_errors() {
        assert!(parse_cli(&args(&[])).is_err());
        assert!(parse_cli(&args(&["--preset"])).is_err());
        assert!(parse_cli(&args(&["--preset", "a", "--param", "X"])).is_err());
        assert!(parse_cli(&args(&["--preset", "a", "--viewport", "0x4"])).is_err());
        assert!(parse_cli(&args(&["--preset", "a", "--bogus"])).is_err());
    }
}
