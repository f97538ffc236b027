/// 工位看守 (Workwatch)
///
/// 系统架构:
/// 1. 采集线程: 每个摄像头一个, 按目标帧率抽帧写入账本, 定期轮换
/// 2. 预测线程: 人体检测 → 人员跟踪 → 空闲视频合成
/// 3. 主线程:   等待 Ctrl-C 后停止全部工作
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workwatch::{build_detector, Config, Controller};

#[derive(Parser, Debug)]
#[command(author, version, about = "工位看守 - 摄像头人员空闲检测", long_about = None)]
struct Args {
    /// 配置文件 (JSON)
    #[arg(short, long, default_value = "workwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 同时运行采集与预测
    Run,
    /// 只运行摄像头采集
    Capture,
    /// 只运行检测流水线
    Predict,
    /// 清空账本、参数与生成的文件
    Reset,
    /// 写入默认配置
    InitConfig {
        /// 覆盖已有配置
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::InitConfig { force } => init_config(&args.config, force),
        Command::Reset => {
            let (mut controller, _) = open(&args.config)?;
            controller.reset().context("resetting pipeline")
        }
        Command::Run => serve(&args.config, true, true),
        Command::Capture => serve(&args.config, true, false),
        Command::Predict => serve(&args.config, false, true),
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }
    let config = Config::default();
    config
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(config = %path.display(), "默认配置已写入");
    if let Some(font) = &config.tracking.font_path {
        if !font.exists() {
            tracing::warn!(
                font = %font.display(),
                "标注字体不存在, 只画框不写 working/not working 标签; 放入字体或修改 tracking.font_path"
            );
        }
    }
    Ok(())
}

fn open(path: &Path) -> anyhow::Result<(Controller, Config)> {
    let config = Config::load_or_create(path).with_context(|| format!("loading {}", path.display()))?;
    let controller = Controller::open(config.clone()).context("opening data directory")?;
    Ok((controller, config))
}

/// 启动采集和/或预测, 直到 Ctrl-C
fn serve(path: &Path, capture: bool, predict: bool) -> anyhow::Result<()> {
    let (mut controller, config) = open(path)?;
    if capture {
        controller.start_capture().context("starting capture")?;
    }
    if predict {
        let detector = build_detector(&config.detection).context("loading detector")?;
        controller.start_predictor(detector).context("starting predictor")?;
    }

    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;
    tracing::info!(capture, predict, "运行中, 按 Ctrl-C 停止");
    let _ = rx.recv();

    tracing::info!("正在停止...");
    controller.shutdown();
    Ok(())
}
