//! 翻訳APIクライアント
//!
//! バックエンドの `/translate` エンドポイントを呼び出す
//! [`Translator`](crate::dispatcher::Translator) 実装。
//! リクエストはmultipartフォーム、レスポンスはJSON。

use crate::dispatcher::Translator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;

/// レスポンスで翻訳文を探すフィールド名
///
/// サーバのバージョンによって返すフィールドが異なるため、
/// この順で最初に見つかった空でない値を採用する。
const RESPONSE_TEXT_FIELDS: [&str; 3] = ["translated_text", "text", "translation"];

/// 翻訳HTTPクライアント
///
/// リトライは行わない。1回の呼び出し失敗は呼び出し側
/// （ディスパッチャ）が原文フォールバックで処理する。
pub struct TranslateClient {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl TranslateClient {
    /// 新しいクライアントを作成
    ///
    /// # Arguments
    /// * `endpoint` - 翻訳エンドポイントのURL
    /// * `model` - 文字起こしモデル名（サーバ仕様上必須、通常 "whisper-1"）
    pub fn new(endpoint: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("翻訳API HTTPクライアント作成失敗")?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            client,
        })
    }

    /// レスポンスJSONから翻訳文を取り出す
    ///
    /// 受理するフィールド名のうち最初に見つかった空でない文字列を返す。
    /// どれも使えない場合は `None`。
    fn pick_translated_text(value: &Value) -> Option<String> {
        for field in RESPONSE_TEXT_FIELDS {
            if let Some(Value::String(s)) = value.get(field) {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Translator for TranslateClient {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        let form = multipart::Form::new()
            .text("text", text.to_string())
            .text("source_language", source_lang.to_string())
            .text("target_language", target_lang.to_string())
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("翻訳API リクエスト失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("翻訳API エラー: {} - {}", status, error_text);
        }

        let body: Value = response
            .json()
            .await
            .context("翻訳API レスポンスパース失敗")?;

        Self::pick_translated_text(&body)
            .ok_or_else(|| anyhow::anyhow!("翻訳API レスポンスに翻訳文が見つかりません: {}", body))
    }
}
