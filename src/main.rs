//! Pokédex 分類サーバー
//!
//! 起動時にカタログと学習済みモデルを読み込み、画像アップロードを受け付けます。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use pokedex_lib::logging::{init_logging, LogLevel};
use pokedex_lib::model::{AppConfig, DeviceType};
use pokedex_lib::pipeline::AppContext;
use pokedex_lib::server;

/// Pokédex classifier server
#[derive(Parser, Debug)]
#[command(name = "pokedex")]
#[command(version)]
#[command(about = "Upload a Pokémon picture and get its Pokédex entry")]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 待ち受けホスト
    #[arg(long, env = "POKEDEX_HOST")]
    host: Option<String>,

    /// 待ち受けポート
    #[arg(short, long, env = "POKEDEX_PORT")]
    port: Option<u16>,

    /// 学習済みモデル（tar.gz）
    #[arg(long, env = "POKEDEX_MODEL")]
    model: Option<PathBuf>,

    /// カタログJSON
    #[arg(long, env = "POKEDEX_CATALOGUE")]
    catalogue: Option<PathBuf>,

    /// GPU (WGPU) で推論する
    #[arg(long)]
    gpu: bool,

    /// ログレベル (trace/debug/info/warn/error)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    let mut config = AppConfig::load_or_default(&cli.config);
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model) = cli.model {
        config.model.model_path = model.to_string_lossy().to_string();
    }
    if let Some(catalogue) = cli.catalogue {
        config.catalogue.path = catalogue.to_string_lossy().to_string();
    }
    if cli.gpu {
        config.device_type = DeviceType::Wgpu;
    }
    config.display();

    // モデルの読み込みは重いのでブロッキングスレッドで行う
    let init_config = config.clone();
    let context = tokio::task::spawn_blocking(move || AppContext::initialize(&init_config)).await??;
    info!("初期化が完了しました");

    server::serve(Arc::new(context), &config.server).await
}
