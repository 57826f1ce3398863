//! 音声合成APIクライアント
//!
//! バックエンドの `/v1/tts` エンドポイントを呼び出し、合成された
//! WAVバイト列をそのまま返す。合成・再生の失敗はこのリレーの
//! 状態に影響しない（ログに残して読み上げをスキップするだけ）。

use anyhow::{Context, Result};
use serde::Serialize;

/// TTSリクエストボディ
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
    speed: f32,
}

/// 音声合成HTTPクライアント
pub struct TtsClient {
    endpoint: String,
    voice: String,
    language: String,
    speed: f32,
    client: reqwest::Client,
}

impl TtsClient {
    /// 新しいクライアントを作成
    ///
    /// # Arguments
    /// * `endpoint` - TTSエンドポイントのURL
    /// * `voice` - 音声ID（例: "am_adam"）
    /// * `language` - 読み上げ言語タグ（例: "en-us"）
    /// * `speed` - 再生速度（1.0が等速）
    pub fn new(endpoint: &str, voice: &str, language: &str, speed: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("TTS HTTPクライアント作成失敗")?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            voice: voice.to_string(),
            language: language.to_string(),
            speed,
            client,
        })
    }

    /// テキストを合成して音声バイト列（WAV）を取得
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = TtsRequest {
            text,
            voice: &self.voice,
            language: &self.language,
            speed: self.speed,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("TTS リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS エラー: {} - {}", status, error_text);
        }

        let bytes = response.bytes().await.context("TTS レスポンス読み込み失敗")?;
        log::debug!("TTS 合成完了: {} バイト", bytes.len());

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_serialization() {
        let request = TtsRequest {
            text: "hello",
            voice: "am_adam",
            language: "en-us",
            speed: 1.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["voice"], "am_adam");
        assert_eq!(json["language"], "en-us");
        assert_eq!(json["speed"], 1.0);
    }

    #[test]
    fn test_client_creation() {
        let client = TtsClient::new("http://localhost:8000/v1/tts", "am_adam", "en-us", 1.0);
        assert!(client.is_ok());
    }
}
