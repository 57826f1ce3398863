use serde::Serialize;
use serde_json::Value;
use std::time::SystemTime;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// カラムの一意識別子
///
/// カラムの生存期間中は不変。削除後に再利用されることはない。
pub type ColumnId = u64;

/// セッションの接続状態
///
/// 文字起こしバックエンドとのWebSocket接続のライフサイクルを表す。
///
/// # 状態遷移
///
/// ```text
/// Idle → Connecting → Live → Closed
///              ↓        ↓
///            Failed   Failed
/// ```
///
/// - `Connecting → Failed`: ハンドシェイク失敗
/// - `Live → Failed`: 実行時エラー（接続断など）。キャプチャの自動停止を誘発する
/// - `close()` は前の状態にかかわらず常に `Closed` へ遷移する
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 未接続
    Idle,
    /// 接続処理中
    Connecting,
    /// 接続確立済み（音声送信可能）
    Live,
    /// 明示的にクローズ済み
    Closed,
    /// エラーにより切断
    Failed,
}

/// 音声言語の自動検出を表すセンチネル値
///
/// ソースカラムの言語タグとしてのみ有効。
pub const AUTO_LANGUAGE: &str = "auto";

/// 受信メッセージから文字起こしテキストを抽出
///
/// バックエンドからのJSONメッセージは `transcript` フィールドに
/// 文字起こし結果を持つ。フィールドの形は2通りある:
///
/// - 文字列: `{"transcript": "こんにちは"}`
/// - オブジェクト: `{"transcript": {"text": "こんにちは"}}`
///
/// どちらでもない形（フィールド欠落、数値、空文字列など）は
/// 空とみなして `None` を返す。呼び出し側はログに残して破棄する。
///
/// # Examples
///
/// ```
/// # use caption_relay::types::extract_transcript;
/// let msg = r#"{"type": "conversation.item.input_audio_transcription.completed",
///               "transcript": "hello"}"#;
/// assert_eq!(extract_transcript(msg), Some("hello".to_string()));
///
/// assert_eq!(extract_transcript(r#"{"transcript": {"text": "hi"}}"#), Some("hi".to_string()));
/// assert_eq!(extract_transcript(r#"{"transcript": 42}"#), None);
/// assert_eq!(extract_transcript("not json"), None);
/// ```
pub fn extract_transcript(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;

    let text = match value.get("transcript") {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(obj)) => match obj.get("text") {
            Some(Value::String(s)) => s.as_str(),
            _ => return None,
        },
        _ => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// カラム行の更新イベント
///
/// ストアに行が追加されるたびに発行される。
/// JSON形式でシリアライズして標準出力に出力される。
///
/// # JSON出力例
///
/// ```json
/// {
///   "column": 1,
///   "label": "日本語",
///   "index": 3,
///   "text": "こんにちは",
///   "timestamp": "2025-01-02T14:30:15+00:00"
/// }
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct ColumnUpdate {
    /// カラムID
    pub column: ColumnId,

    /// カラムの表示名
    pub label: String,

    /// 追加された行のインデックス
    pub index: usize,

    /// 行テキスト
    pub text: String,

    /// ISO 8601形式のタイムスタンプ
    pub timestamp: String,
}

impl ColumnUpdate {
    /// 新しい更新イベントを作成
    pub fn new(column: ColumnId, label: String, index: usize, text: String) -> Self {
        let timestamp = chrono::DateTime::from_timestamp(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            0,
        )
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

        Self {
            column,
            label,
            index,
            text,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_transcript_plain_string() {
        let raw = r#"{
            "event_id": "e1",
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "i1",
            "content_index": 0,
            "transcript": "こちら本部、応答願います"
        }"#;
        assert_eq!(
            extract_transcript(raw),
            Some("こちら本部、応答願います".to_string())
        );
    }

    #[test]
    fn test_extract_transcript_object_form() {
        let raw = r#"{"transcript": {"text": "hello world"}}"#;
        assert_eq!(extract_transcript(raw), Some("hello world".to_string()));
    }

    #[test]
    fn test_extract_transcript_rejects_other_shapes() {
        // フィールド欠落
        assert_eq!(extract_transcript(r#"{"type": "noise"}"#), None);
        // 数値
        assert_eq!(extract_transcript(r#"{"transcript": 123}"#), None);
        // textフィールドのないオブジェクト
        assert_eq!(extract_transcript(r#"{"transcript": {"value": "x"}}"#), None);
        // 空文字列は空とみなす
        assert_eq!(extract_transcript(r#"{"transcript": ""}"#), None);
        // JSONですらない
        assert_eq!(extract_transcript("garbage"), None);
    }

    #[test]
    fn test_session_state_equality() {
        assert_eq!(SessionState::Idle, SessionState::Idle);
        assert_ne!(SessionState::Live, SessionState::Closed);
    }

    #[test]
    fn test_column_update_json_serialization() {
        let update = ColumnUpdate::new(2, "Français".to_string(), 0, "bonjour".to_string());
        let json = serde_json::to_string(&update).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["column"], 2);
        assert_eq!(parsed["label"], "Français");
        assert_eq!(parsed["index"], 0);
        assert_eq!(parsed["text"], "bonjour");
        assert!(!parsed["timestamp"].as_str().unwrap().is_empty());
    }
}
