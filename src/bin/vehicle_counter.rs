/// 车辆计数 (Vehicle Counter)
///
/// 流程:
/// 1. 解析参数和计数配置,启动时确定计算设备
/// 2. 第一次需要时加载模型 (之后所有输入共享)
/// 3. 依次处理每个输入视频: 落盘 → 检测计数 → 写出标注视频
/// 4. 交付 `<名称>_output<扩展名>` 并打印计数摘要
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vehicle_counter_rs::models::weights;
use vehicle_counter_rs::{
    Args, ComputeDevice, CounterConfig, CountingModel, FfmpegBackend, ModelSlot, ObjectCounter,
    ObjectCounterConfig, Orchestrator, Settings, SharedModel, TempStorage,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            error!("❌ {}/{} 个输入处理失败", failed, args.inputs.len());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// 返回失败的输入个数
fn run(args: &Args) -> Result<usize> {
    let file_config = args
        .config
        .as_deref()
        .map(CounterConfig::load)
        .transpose()?;
    let settings = Settings::resolve(args, file_config)?;
    let device = ComputeDevice::resolve(args.device);

    info!(
        "🚀 车辆计数启动 | 设备 {} | 输入 {} 个 | 输出目录 {}",
        device,
        args.inputs.len(),
        args.output_dir.display()
    );

    let slot = ModelSlot::new();
    let storage = args
        .temp_dir
        .clone()
        .map(TempStorage::in_dir)
        .unwrap_or_default();

    let mut failed = 0;
    for input in &args.inputs {
        let model = slot.get_or_try_init(|| load_model(args, &settings, device))?;
        if let Err(e) = process_one(args, &settings, &storage, model, input) {
            failed += 1;
            error!("❌ {}: {:#}", input.display(), e);
        }
    }
    Ok(failed)
}

fn load_model(
    args: &Args,
    settings: &Settings,
    device: ComputeDevice,
) -> Result<Box<dyn CountingModel + Send>> {
    let model_path = weights::resolve(&args.model, args.weights_url.as_deref())?;
    let config = ObjectCounterConfig {
        model_path,
        detector: settings.detector.clone(),
        tracker: settings.tracker.clone(),
        font: args.font.clone(),
    };
    Ok(Box::new(ObjectCounter::load(config, device)?))
}

fn process_one(
    args: &Args,
    settings: &Settings,
    storage: &TempStorage,
    model: SharedModel,
    input: &Path,
) -> Result<()> {
    let file =
        File::open(input).with_context(|| format!("无法打开输入: {}", input.display()))?;
    let extension = input
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let base_name = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());

    info!("🎬 开始处理: {}", input.display());

    let backend = FfmpegBackend::new(args.codec.as_str());
    let mut orchestrator = Orchestrator::new(backend, storage.clone(), model)
        .with_region(settings.region.clone());
    let mut summary = orchestrator.run(BufReader::new(file), &extension, |_| {})?;

    let delivered = summary.deliver(&args.output_dir, &base_name)?;
    println!("{}\n\n{}", delivered.display(), summary.render_text());

    if args.json {
        let report = summary.report(&input.display().to_string(), &delivered);
        let json_path = args.output_dir.join(format!("{}_summary.json", base_name));
        let json = serde_json::to_string_pretty(&report).context("序列化摘要失败")?;
        fs::write(&json_path, json)
            .with_context(|| format!("写出摘要失败: {}", json_path.display()))?;
        info!("📝 摘要: {}", json_path.display());
    }

    Ok(())
}
