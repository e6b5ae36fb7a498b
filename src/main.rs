use anyhow::{Context, Result};
use denoise_recorder::accumulator::StreamAccumulator;
use denoise_recorder::audio_input::AudioInput;
use denoise_recorder::config::Config;
use denoise_recorder::denoise::SpectralGate;
use denoise_recorder::processor::ChunkProcessor;
use denoise_recorder::stop_token::StopToken;
use denoise_recorder::wav_writer::WavWriter;
use env_logger::Env;
use std::sync::Arc;

fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        AudioInput::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            args[2].as_str()
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        args[1].as_str()
    } else {
        "config.toml"
    };

    let config = Config::load_or_default(config_path)?;
    let stream_config = config.stream_config().context("設定値が不正です")?;

    log::info!("denoise-recorder を起動します");
    log::info!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let stop = StopToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        handler_stop.request_stop();
    })?;

    // 入力デバイスを開けなければループは開始しない（ファイルも作らない）
    let input = match AudioInput::open(&config.audio, &stream_config) {
        Ok(input) => input,
        Err(e) => {
            log::error!("{} 段階で失敗しました: {}", e.stage(), e);
            return Err(e.into());
        }
    };

    let device_name = input.device_name().to_string();

    let processor = Arc::new(ChunkProcessor::new(Box::new(SpectralGate::new(
        &config.denoise,
    ))));
    let mut accumulator =
        StreamAccumulator::new(stream_config.clone(), input, processor, WavWriter::new())
            .with_workers(config.processing.workers);

    println!(
        "リアルタイムノイズ除去を実行中です ({})... Ctrl+C で停止します",
        device_name
    );

    let result = accumulator.run(&stop);
    println!();
    println!("リアルタイム音声処理を停止しました");

    match result {
        Ok(summary) => {
            match &summary.output_path {
                Some(path) => println!(
                    "処理済み音声を保存しました: {} ({}チャンク, {:.2}秒)",
                    path.display(),
                    summary.chunks,
                    summary.duration_seconds(stream_config.sample_rate())
                ),
                None => println!("音声が記録されなかったため、ファイルは作成していません"),
            }
            log::info!("denoise-recorder を終了しました");
            Ok(())
        }
        Err(e) => {
            log::error!("{} 段階で異常終了しました: {}", e.stage(), e);
            Err(e.into())
        }
    }
}
