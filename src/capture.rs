//! キャプチャパイプライン
//!
//! マイクの入力ストリームを取得し、固定サイズのブロックごとに
//! リサンプル → PCM16エンコード → ワイヤチャンク分割を行って
//! セッショントランスポートへ順に送り出す。
//!
//! トランスポートが `Live` でない間に生成されたチャンクは破棄する。
//! ライブ音声は古くなった時点で再送の価値がないため、バッファリングや
//! バックプレッシャは行わない（設計上のドロップポリシー）。

use crate::config::AudioConfig;
use crate::resampler;
use crate::types::SessionState;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use tokio::sync::{mpsc, watch};

/// ストリーム所有権のホルダ
///
/// 開始・停止の冪等性をここに集約し、状態判定を実デバイス操作から
/// 分離する。二重の activate は先のストリームを保持したまま no-op。
struct StreamSlot<S> {
    inner: Option<S>,
}

impl<S> Default for StreamSlot<S> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<S> StreamSlot<S> {
    fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// ストリームを保持。すでに保持中なら渡されたものを破棄して false
    fn activate(&mut self, stream: S) -> bool {
        if self.inner.is_some() {
            return false;
        }
        self.inner = Some(stream);
        true
    }

    /// 保持中のストリームを解放。保持していなければ false
    fn release(&mut self) -> bool {
        self.inner.take().is_some()
    }
}

/// マイク入力とそのデバイスリソースの排他的な所有者
///
/// ストリーム・デバイスは録音中のみ保持され、`stop()`・エラー時・
/// ドロップ時に確定的に解放される。実行時のデバイスエラーは
/// 障害フラグ（`subscribe_faults`）へ通知され、購読側が停止処理を行う。
pub struct CapturePipeline {
    device: cpal::Device,
    config: cpal::StreamConfig,
    slot: StreamSlot<cpal::Stream>,
    fault_tx: watch::Sender<bool>,
    num_channels: u16,
    device_sample_rate: u32,
    chunk_bytes: usize,
}

impl CapturePipeline {
    /// 新しいCapturePipelineを作成
    ///
    /// デバイスの取得のみを行い、ストリームはまだ開始しない。
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        // デバイスを取得
        let device = if config.device_id == "default" {
            host.default_input_device()
                .context("デフォルト入力デバイスが見つかりません")?
        } else {
            Self::input_devices()?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(&config.device_id))
                .with_context(|| format!("デバイスが見つかりません: {}", config.device_id))?
        };

        log::info!("入力デバイス: {:?}", device.name());

        // デバイスのデフォルト設定からサンプリングレートを採用し、
        // 16kHzへの変換はリサンプラに任せる
        let default_config = device
            .default_input_config()
            .context("デフォルト入力設定が取得できません")?;

        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(config.block_samples),
        };

        let (fault_tx, _) = watch::channel(false);

        Ok(Self {
            device,
            device_sample_rate: stream_config.sample_rate.0,
            config: stream_config,
            slot: StreamSlot::default(),
            fault_tx,
            num_channels: config.channels,
            chunk_bytes: config.chunk_bytes,
        })
    }

    /// デバイス障害フラグの購読
    ///
    /// 実行時のストリームエラーで true へ変化する。購読側は
    /// `stop()` とセッションのクローズを行うこと。
    pub fn subscribe_faults(&self) -> watch::Receiver<bool> {
        self.fault_tx.subscribe()
    }

    /// キャプチャを開始
    ///
    /// すでにキャプチャ中の場合は no-op（二重ストリームは開かない）。
    ///
    /// # Arguments
    /// * `chunk_tx` - ワイヤチャンクの送信先（セッションへ転送される）
    /// * `state_rx` - セッション状態の購読。`Live` 以外の間はチャンクを破棄
    ///
    /// # Errors
    ///
    /// マイクが取得できない・ストリームを開始できない場合にエラーを返す。
    /// このとき呼び出し側は、この試行のために開いたセッションを
    /// 必ずクローズすること（マイクなしの接続を残さない）。
    pub fn start(
        &mut self,
        chunk_tx: mpsc::Sender<Vec<u8>>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Result<()> {
        if self.slot.is_active() {
            log::warn!("すでにキャプチャ中のため開始要求を無視します");
            return Ok(());
        }

        let default_config = self.device.default_input_config()?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(chunk_tx, state_rx)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(chunk_tx, state_rx)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(chunk_tx, state_rx)?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>(chunk_tx, state_rx)?,
            _ => anyhow::bail!("サポートされていないサンプルフォーマット"),
        };

        stream.play().context("ストリームの再生開始に失敗")?;
        self.slot.activate(stream);

        log::info!("キャプチャを開始しました");
        Ok(())
    }

    /// ストリームを構築
    fn build_stream<T>(
        &self,
        chunk_tx: mpsc::Sender<Vec<u8>>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let num_channels = self.num_channels as usize;
        let device_sample_rate = self.device_sample_rate;
        let chunk_bytes = self.chunk_bytes;

        // チャンク境界をまたぐ端数バイトのキャリーバッファ。
        // ワイヤフレームは常にちょうど chunk_bytes バイトにする。
        let mut carry: Vec<u8> = Vec::new();

        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            // トランスポートが送信可能でない間のブロックは破棄
            if *state_rx.borrow() != SessionState::Live {
                carry.clear();
                return;
            }

            // インターリーブされたデータからチャンネル0をモノラル抽出
            let mut samples = Vec::with_capacity(data.len() / num_channels);
            for frame in data.chunks_exact(num_channels) {
                let f: f32 = frame[0].to_float_sample().into();
                samples.push(f);
            }

            let pcm = resampler::resample_to_pcm16(&samples, device_sample_rate);
            carry.extend_from_slice(&pcm);

            while carry.len() >= chunk_bytes {
                let chunk: Vec<u8> = carry.drain(..chunk_bytes).collect();
                if chunk_tx.try_send(chunk).is_err() {
                    // キュー満杯またはクローズ済み。鮮度優先で破棄
                    log::debug!("ワイヤチャンク破棄（送信キュー不可）");
                }
            }
        };

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                data_callback,
                Self::fault_callback(self.fault_tx.clone()),
                None,
            )
            .context("入力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// デバイスエラーを障害フラグへ接続するコールバックを作成
    ///
    /// 実行時のストリームエラーは回復不能として扱う。フラグを立てる
    /// だけで、リソースの解放は購読側に任せる（コールバックは
    /// オーディオスレッド上で呼ばれるため）。
    fn fault_callback(fault_tx: watch::Sender<bool>) -> impl FnMut(cpal::StreamError) {
        move |err| {
            log::error!("キャプチャストリームエラー: {}", err);
            fault_tx.send_replace(true);
        }
    }

    /// キャプチャを停止してデバイスリソースを解放
    ///
    /// 冪等。キャプチャしていない状態での呼び出しは no-op。
    pub fn stop(&mut self) {
        if self.slot.release() {
            log::info!("キャプチャを停止しました");
        }
    }

    /// キャプチャ中かどうか
    pub fn is_capturing(&self) -> bool {
        self.slot.is_active()
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in Self::input_devices()?.into_iter().enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }

    /// 通常入力デバイスとして利用してはいけないデバイスを除外した一覧を取得
    fn input_devices() -> Result<Vec<cpal::Device>> {
        let host = cpal::default_host();
        let excluded = Regex::new(
            "MacBook (Air|Pro)|AirPods|iPhone|Webcam|Background|Microsoft Teams|ZoomAudioDevice",
        )
        .context("除外パターンのコンパイル失敗")?;

        let devices = host
            .input_devices()?
            .filter(|device| {
                device
                    .name()
                    .map(|name| !excluded.is_match(&name))
                    .unwrap_or(true)
            })
            .collect();
        Ok(devices)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
