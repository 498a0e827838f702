//! 画像ファイル1枚を分類するコマンドラインツール

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use pokedex_lib::logging::{init_logging, LogLevel};
use pokedex_lib::model::AppConfig;
use pokedex_lib::pipeline::AppContext;

#[derive(Parser, Debug)]
#[command(name = "classify")]
#[command(version)]
#[command(about = "Classify a single Pokémon picture")]
struct Cli {
    /// 分類する画像（JPEG/PNG）
    image: PathBuf,

    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 学習済みモデル（tar.gz）
    #[arg(long)]
    model: Option<PathBuf>,

    /// 結果をJSONで出力
    #[arg(long)]
    json: bool,

    /// ログレベル (trace/debug/info/warn/error)
    #[arg(long, default_value = "warn")]
    log_level: LogLevel,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    let mut config = AppConfig::load_or_default(&cli.config);
    if let Some(model) = cli.model {
        config.model.model_path = model.to_string_lossy().to_string();
    }

    let context = AppContext::initialize(&config)?;
    let bytes = std::fs::read(&cli.image)
        .with_context(|| format!("Failed to read image: {}", cli.image.display()))?;
    let result = context.classify_bytes(&bytes)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let prediction = &result.prediction;
    println!("{} ({:.2}%)", prediction.label, prediction.confidence * 100.0);
    for ranked in &prediction.top_k {
        println!("  {:<16} {:.2}%", ranked.label, ranked.confidence * 100.0);
    }

    if let Some(notice) = &result.notice {
        println!("\n{}", notice);
    }
    if let Some(entry) = prediction.entry.as_ref().filter(|_| prediction.confident) {
        println!("\n{} {}  {}", entry.display_number(), entry.name, entry.species);
        println!("Type: {}", entry.types.join(" / "));
        println!("Height: {} m  Weight: {} kg", entry.height_m, entry.weight_kg);
        for (name, value) in entry.base_stats.display_rows() {
            println!("  {:<10} {}", name, value);
        }
        println!("\n{}", entry.entry_text());
    }
    if let Some(warning) = &result.catalogue_warning {
        eprintln!("{}", warning);
    }

    Ok(())
}
