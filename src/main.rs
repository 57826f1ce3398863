use anyhow::{Context, Result};
use caption_relay::capture::CapturePipeline;
use caption_relay::config::Config;
use caption_relay::dispatcher::Dispatcher;
use caption_relay::playback::AudioPlayback;
use caption_relay::session::Session;
use caption_relay::store::TranscriptStore;
use caption_relay::translate::TranslateClient;
use caption_relay::tts::TtsClient;
use caption_relay::types::{ColumnUpdate, SessionState, AUTO_LANGUAGE};
use env_logger::Env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        CapturePipeline::list_devices()?;
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        &args[1]
    } else {
        "config.toml"
    };

    let config = Config::load_or_default(config_path)?;

    log::info!("caption-relay を起動します");
    log::info!("設定: {:?}", config);

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    // ストアとディスパッチャ
    let store = Arc::new(Mutex::new(TranscriptStore::new(
        &config.session.source_label,
        &config.session.source_language,
    )));
    {
        let mut store = store.lock().unwrap();
        for column in &config.columns {
            // "auto" はソースカラム専用の言語タグ
            if column.language == AUTO_LANGUAGE {
                log::warn!(
                    "翻訳先カラム {} に \"auto\" は指定できないためスキップします",
                    column.label
                );
                continue;
            }
            store.add_column(&column.label, &column.language);
        }
    }

    let translator = Arc::new(
        TranslateClient::new(&config.server.translate_url, &config.session.model)
            .context("翻訳クライアントの作成に失敗")?,
    );
    let (update_tx, mut update_rx) = mpsc::channel::<ColumnUpdate>(256);
    let dispatcher = Dispatcher::new(
        store,
        translator,
        &config.session.source_language,
        update_tx,
    );

    // セッションを開く
    let mut session = Session::new(&config.server.ws_url);
    let mut fragments = session
        .open(&config.session.source_language)
        .await
        .context("セッションの確立に失敗")?;
    let mut state_rx = session.subscribe();

    // キャプチャを開始。マイクが取得できない場合は、この試行のために
    // 開いたセッションも必ずクローズする（接続だけ残る状態を作らない）
    let mut capture = match CapturePipeline::new(&config.audio) {
        Ok(capture) => capture,
        Err(e) => {
            session.close();
            return Err(e).context("マイクの取得に失敗");
        }
    };
    let mut fault_rx = capture.subscribe_faults();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(1024);
    if let Err(e) = capture.start(chunk_tx, session.subscribe()) {
        session.close();
        return Err(e).context("キャプチャの開始に失敗");
    }

    // TTS読み上げ（オプション）
    let tts = if config.tts.enabled {
        Some(Arc::new(
            TtsClient::new(
                &config.server.tts_url,
                &config.tts.voice,
                &config.tts.language,
                config.tts.speed,
            )
            .context("TTSクライアントの作成に失敗")?,
        ))
    } else {
        None
    };
    let mut playback = if config.tts.enabled {
        let mut playback = AudioPlayback::new(config.tts.sample_rate)?;
        playback.start()?;
        Some(playback)
    } else {
        None
    };
    let (tts_tx, mut tts_rx) = mpsc::channel::<Vec<u8>>(8);

    log::info!("リレーを開始しました (Ctrl+C で停止)");

    // メインループ
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            Some(chunk) = chunk_rx.recv() => {
                session.send(chunk);
            }
            Some(fragment) = fragments.recv() => {
                if let Some(tts) = &tts {
                    let tts = Arc::clone(tts);
                    let tts_tx = tts_tx.clone();
                    let text = fragment.clone();
                    tokio::spawn(async move {
                        match tts.synthesize(&text).await {
                            Ok(bytes) => {
                                let _ = tts_tx.send(bytes).await;
                            }
                            Err(e) => {
                                // 読み上げ1回分の欠落にとどめる
                                log::warn!("TTS失敗、読み上げをスキップ: {}", e);
                            }
                        }
                    });
                }
                dispatcher.handle_fragment(fragment);
            }
            Some(update) = update_rx.recv() => {
                // 更新イベントをJSON形式で出力
                if let Ok(json) = serde_json::to_string(&update) {
                    println!("{}", json);
                }
            }
            Some(bytes) = tts_rx.recv() => {
                if let Some(playback) = &playback {
                    if let Err(e) = playback.play_wav(&bytes).await {
                        log::warn!("再生失敗、読み上げをスキップ: {}", e);
                    }
                }
            }
            changed = fault_rx.changed() => {
                if changed.is_ok() && *fault_rx.borrow() {
                    // デバイス障害は回復不能。リソースを解放して終了する
                    log::error!("キャプチャデバイスのエラーを検出しました。リレーを停止します");
                    capture.stop();
                    session.close();
                    running.store(false, Ordering::SeqCst);
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow();
                if state == SessionState::Failed {
                    // 接続断はキャプチャの自動停止を伴う。再接続はしない
                    log::error!("セッションが失敗しました。キャプチャを停止します");
                    capture.stop();
                    running.store(false, Ordering::SeqCst);
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                // タイムアウト: ループを継続して running をチェック
            }
        }
    }

    // クリーンアップ
    log::info!("停止処理を開始します...");
    capture.stop();
    session.close();
    if let Some(playback) = &mut playback {
        playback.stop();
    }
    log::info!("caption-relay を終了します");

    Ok(())
}
