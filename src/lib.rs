//! caption-relay - リアルタイム文字起こしリレー
//!
//! このクレートは、マイクのライブ音声を文字起こしバックエンドへ
//! ストリーミングし、受信した文字起こしフラグメントを複数の翻訳先
//! カラムへ並行ファンアウトするリレーを提供します。
//!
//! # 主な機能
//!
//! - **音声キャプチャ**: マイク入力を固定ブロックで取得し16kHz PCM16へ変換
//! - **セッショントランスポート**: WebSocket全二重接続の確立・送受信・状態管理
//! - **翻訳ファンアウト**: フラグメントごとにカラム数分の翻訳を並行実行
//! - **カラム順序保証**: 翻訳の完了順が入れ替わっても到着順どおりに追記
//! - **TTS読み上げ**: 文字起こし結果の音声合成と再生（オプション）
//!
//! # アーキテクチャ
//!
//! ```text
//! [Microphone] → [CapturePipeline] → [Session] ⇄ 文字起こしバックエンド
//!                                        ↓ フラグメント
//!                                  [Dispatcher] → 翻訳API (×カラム数、並行)
//!                                        ↓
//!                                [TranscriptStore]
//!                                        ↓
//!                                  [ColumnUpdate] → 表示側 (読み取り専用)
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use caption_relay::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod playback;
pub mod resampler;
pub mod session;
pub mod store;
pub mod translate;
pub mod tts;
pub mod types;
