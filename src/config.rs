use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default = "default_columns")]
    pub columns: Vec<ColumnConfig>,
}

/// バックエンドのエンドポイント設定
///
/// # デフォルト値
///
/// - `ws_url`: "ws://localhost:8000/v1/realtime/transcription_sessions"
/// - `translate_url`: "http://localhost:8000/translate"
/// - `tts_url`: "http://localhost:8000/v1/tts"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_translate_url")]
    pub translate_url: String,
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
}

/// オーディオ入力設定
///
/// # デフォルト値
///
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `channels`: 1 (モノラル)
/// - `block_samples`: 4096 (処理ブロックあたりのサンプル数)
/// - `chunk_bytes`: 320 (ワイヤチャンクのバイト数)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_block_samples")]
    pub block_samples: u32,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

/// セッション設定
///
/// # デフォルト値
///
/// - `source_language`: "en"
/// - `source_label`: "原文"
/// - `model`: "whisper-1"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// セッションを開くソース言語タグ（"auto" で自動検出）
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// ソースカラムの表示名
    #[serde(default = "default_source_label")]
    pub source_label: String,
    /// 翻訳APIに渡す文字起こしモデル名
    #[serde(default = "default_model")]
    pub model: String,
}

/// TTS読み上げ設定
///
/// # デフォルト値
///
/// - `enabled`: false
/// - `voice`: "am_adam"
/// - `language`: "en-us"
/// - `speed`: 1.0
/// - `sample_rate`: 24000 Hz (Kokoro系TTSの出力レート)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_tts_language")]
    pub language: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

/// 翻訳先カラムの初期設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnConfig {
    pub label: String,
    pub language: String,
}

// Default functions
fn default_ws_url() -> String {
    "ws://localhost:8000/v1/realtime/transcription_sessions".to_string()
}

fn default_translate_url() -> String {
    "http://localhost:8000/translate".to_string()
}

fn default_tts_url() -> String {
    "http://localhost:8000/v1/tts".to_string()
}

fn default_device_id() -> String {
    "default".to_string()
}

fn default_channels() -> u16 {
    1
}

fn default_block_samples() -> u32 {
    4096
}

fn default_chunk_bytes() -> usize {
    320
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_source_label() -> String {
    "原文".to_string()
}

fn default_model() -> String {
    "whisper-1".to_string()
}

fn default_voice() -> String {
    "am_adam".to_string()
}

fn default_tts_language() -> String {
    "en-us".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_tts_sample_rate() -> u32 {
    24000
}

fn default_columns() -> Vec<ColumnConfig> {
    vec![ColumnConfig {
        label: "日本語".to_string(),
        language: "ja".to_string(),
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            audio: AudioConfig::default(),
            session: SessionConfig::default(),
            tts: TtsConfig::default(),
            columns: default_columns(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            translate_url: default_translate_url(),
            tts_url: default_tts_url(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            channels: default_channels(),
            block_samples: default_block_samples(),
            chunk_bytes: default_chunk_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source_language: default_source_language(),
            source_label: default_source_label(),
            model: default_model(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            voice: default_voice(),
            language: default_tts_language(),
            speed: default_speed(),
            sample_rate: default_tts_sample_rate(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.server.ws_url,
            "ws://localhost:8000/v1/realtime/transcription_sessions"
        );
        assert_eq!(config.audio.device_id, "default");
        assert_eq!(config.audio.block_samples, 4096);
        assert_eq!(config.audio.chunk_bytes, 320);
        assert_eq!(config.session.source_language, "en");
        assert!(!config.tts.enabled);
        assert_eq!(config.columns.len(), 1);
        assert_eq!(config.columns[0].language, "ja");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.audio.chunk_bytes, 320);
        assert_eq!(config.session.model, "whisper-1");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[server]
ws_url = "ws://example.com/v1/realtime/transcription_sessions"
translate_url = "http://example.com/translate"

[audio]
device_id = "USB Microphone"
channels = 2
block_samples = 2048
chunk_bytes = 640

[session]
source_language = "ja"
source_label = "日本語原文"

[tts]
enabled = true
voice = "af_bella"
speed = 1.2

[[columns]]
label = "English"
language = "en"

[[columns]]
label = "Français"
language = "fr"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.server.ws_url, "ws://example.com/v1/realtime/transcription_sessions");
        // 省略したフィールドはデフォルト値
        assert_eq!(config.server.tts_url, "http://localhost:8000/v1/tts");
        assert_eq!(config.audio.device_id, "USB Microphone");
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.chunk_bytes, 640);
        assert_eq!(config.session.source_language, "ja");
        assert!(config.tts.enabled);
        assert_eq!(config.tts.voice, "af_bella");
        assert_eq!(config.columns.len(), 2);
        assert_eq!(config.columns[1].language, "fr");
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.session.source_language, "en");
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[session]
source_language = "zh"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.session.source_language, "zh");
        assert_eq!(config.audio.block_samples, 4096);
        assert_eq!(config.columns.len(), 1);
    }
}
