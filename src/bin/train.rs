//! 分類モデルの学習用バイナリ
//!
//! クラスごとのサブディレクトリに画像を置いたデータセットから学習し、
//! モデル（tar.gz）とクラス対応表（class_names.json）を出力します。

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use pokedex_lib::logging::{init_logging, LogLevel};
use pokedex_lib::ml::run_training;
use pokedex_lib::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(version)]
#[command(about = "Train the Pokémon image classifier")]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// データセットのルート
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 出力先ディレクトリ
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// バックボーンの事前学習済み重み
    #[arg(long)]
    backbone: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// 1クラスあたりの最大枚数
    #[arg(long)]
    max_per_class: Option<usize>,

    /// GPU (WGPU) で学習する
    #[arg(long)]
    gpu: bool,

    /// ログレベル (trace/debug/info/warn/error)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    let mut config = AppConfig::load_or_default(&cli.config);
    let training = &mut config.training;
    if let Some(dir) = cli.data_dir {
        training.data_dir = dir.to_string_lossy().to_string();
    }
    if let Some(dir) = cli.output_dir {
        training.output_dir = dir.to_string_lossy().to_string();
    }
    if let Some(epochs) = cli.epochs {
        training.num_epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(lr) = cli.learning_rate {
        training.learning_rate = lr;
    }
    if cli.max_per_class.is_some() {
        training.max_per_class = cli.max_per_class;
    }
    if let Some(backbone) = cli.backbone {
        config.model.backbone_weights = Some(backbone.to_string_lossy().to_string());
    }
    if cli.gpu {
        config.device_type = DeviceType::Wgpu;
    }

    let report = run_training(&config, |stats| {
        println!(
            "[{}/{}] loss {:.4}  train {:.2}%  val {}",
            stats.epoch,
            stats.total_epochs,
            stats.train_loss,
            stats.train_accuracy,
            stats
                .val_accuracy
                .map(|a| format!("{:.2}%", a))
                .unwrap_or_else(|| "-".to_string())
        );
    })?;

    info!("=== 学習完了 ===");
    info!("クラス数: {}", report.labels.len());
    if let Some(acc) = report.final_val_accuracy() {
        info!("検証精度: {:.2}%", acc);
    }
    info!("モデル: {}", report.model_path.display());
    info!("クラス対応表: {}", report.class_index_path.display());

    Ok(())
}
