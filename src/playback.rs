//! TTS音声の再生
//!
//! TTSエンドポイントが返すWAVバイト列をデコードして出力デバイスへ
//! 流す。再生の失敗は読み上げ1回分の欠落にとどまり、リレー本体の
//! 状態には影響しない。

use crate::types::SampleI16;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// WAVバイト列をモノラルのi16サンプルとサンプルレートにデコード
///
/// ステレオ以上のWAVはチャンネル0のみ採用する。
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<SampleI16>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).context("WAVデータのパース失敗")?;
    let spec = reader.spec();

    let samples: Vec<SampleI16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("WAVサンプル読み込み失敗")?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|f| (f.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("WAVサンプル読み込み失敗")?,
    };

    let mono: Vec<SampleI16> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|frame| frame[0])
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

/// 音声出力デバイスマネージャ
///
/// ストリームは起動時に1度開き、サンプルをチャンネル経由で受け取って
/// 順次再生する。バッファが空の間は無音を出力する。
pub struct AudioPlayback {
    device: cpal::Device,
    sample_rate: u32,
    stream: Option<Stream>,
    audio_tx: Option<mpsc::Sender<Vec<SampleI16>>>,
}

impl AudioPlayback {
    /// 新しいAudioPlaybackを作成
    ///
    /// `sample_rate` は再生するTTS音声のサンプルレート。
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("デフォルト出力デバイスが見つかりません")?;

        log::info!("出力デバイス: {:?}", device.name());

        Ok(Self {
            device,
            sample_rate,
            stream: None,
            audio_tx: None,
        })
    }

    /// 出力ストリームを開始
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let default_config = self
            .device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (audio_tx, audio_rx) = mpsc::channel::<Vec<SampleI16>>(64);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(config, audio_rx)?,
            SampleFormat::I16 => self.build_stream::<i16>(config, audio_rx)?,
            SampleFormat::U16 => self.build_stream::<u16>(config, audio_rx)?,
            other => anyhow::bail!("サポートされていないサンプルフォーマット: {:?}", other),
        };

        stream.play().context("出力ストリームの再生開始に失敗")?;

        self.stream = Some(stream);
        self.audio_tx = Some(audio_tx);
        log::info!("出力ストリームを開始しました ({}Hz)", self.sample_rate);

        Ok(())
    }

    /// TTSのWAVバイト列を再生キューへ投入
    ///
    /// ストリーム未開始の場合はエラー。デコード失敗もエラーとして
    /// 返し、呼び出し側がログに残してスキップする。
    pub async fn play_wav(&self, bytes: &[u8]) -> Result<()> {
        let tx = self
            .audio_tx
            .as_ref()
            .context("出力ストリームが開始されていません")?;

        let (samples, rate) = decode_wav(bytes)?;
        if rate != self.sample_rate {
            log::warn!(
                "TTS音声のサンプルレートが想定と異なります: {} != {}",
                rate,
                self.sample_rate
            );
        }

        tx.send(samples).await.context("再生キューへの投入失敗")?;
        Ok(())
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(
        &self,
        config: StreamConfig,
        mut audio_rx: mpsc::Receiver<Vec<SampleI16>>,
    ) -> Result<Stream>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let sample_buffer: Arc<Mutex<Vec<SampleI16>>> = Arc::new(Mutex::new(Vec::new()));
        let sample_buffer_clone = sample_buffer.clone();

        // 受信タスク: 再生キューから共有バッファへ積む
        tokio::spawn(async move {
            while let Some(samples) = audio_rx.recv().await {
                let mut buffer = sample_buffer_clone.lock().unwrap();
                buffer.extend_from_slice(&samples);
            }
        });

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = sample_buffer.lock().unwrap();
                    let available = buffer.len().min(data.len());

                    for (i, sample) in data.iter_mut().enumerate() {
                        if i < available {
                            *sample = Self::convert_sample::<T>(buffer[i]);
                        } else {
                            // バッファ不足分は無音
                            *sample = Sample::EQUILIBRIUM;
                        }
                    }
                    buffer.drain(..available);
                },
                move |err| {
                    log::error!("出力ストリームエラー: {}", err);
                },
                None,
            )
            .context("出力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// i16サンプルを指定されたフォーマットに変換
    fn convert_sample<T: Sample + FromSample<f32>>(sample: SampleI16) -> T {
        let normalized = sample as f32 / i16::MAX as f32;
        T::from_sample(normalized)
    }

    /// 出力ストリームを停止
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("出力ストリームを停止しました");
        }
        self.audio_tx = None;
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let samples = vec![0i16, 100, -100, 32000];
        let bytes = wav_bytes(spec, &samples);

        let (decoded, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 24000);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_decode_stereo_takes_channel_zero() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        // L/R交互: チャンネル0のみ採用される
        let samples = vec![1i16, -1, 2, -2, 3, -3];
        let bytes = wav_bytes(spec, &samples);

        let (decoded, _) = decode_wav(&bytes).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"not a wav file").is_err());
        assert!(decode_wav(&[]).is_err());
    }
}
