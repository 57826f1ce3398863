//! セッショントランスポート
//!
//! 文字起こしバックエンドとのWebSocket全二重接続を所有する。
//! 1セッションは1つのソース言語に紐づき、アクティブな接続は
//! 常に最大1つ。音声チャンクの送信と文字起こしメッセージの受信を
//! それぞれ専用タスクで処理する。

use crate::types::{extract_transcript, SessionState};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// 音声チャンク送信キューの容量
///
/// 満杯時はチャンクを破棄する（ライブ音声に再送の価値はない）。
const AUDIO_QUEUE_CAPACITY: usize = 1024;

/// 接続URLにソース言語のクエリパラメータを付与
fn build_session_url(base: &str, source_language: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("接続URLが不正です: {}", base))?;
    url.query_pairs_mut()
        .append_pair("src_lang", source_language);
    Ok(url)
}

/// 文字起こしセッション
///
/// # 状態遷移
///
/// [`SessionState`] を参照。状態は `watch` チャンネルで公開され、
/// キャプチャパイプラインと呼び出し側が購読する。`Failed` への遷移を
/// 観測した呼び出し側はキャプチャを自動停止する。
///
/// # Examples
///
/// ```no_run
/// # use caption_relay::session::Session;
/// # async fn run() -> anyhow::Result<()> {
/// let mut session = Session::new("ws://localhost:8000/v1/realtime/transcription_sessions");
/// let mut fragments = session.open("en").await?;
/// while let Some(text) = fragments.recv().await {
///     println!("{}", text);
/// }
/// session.close();
/// # Ok(())
/// # }
/// ```
pub struct Session {
    ws_url: String,
    state_tx: watch::Sender<SessionState>,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    source_language: Option<String>,
}

impl Session {
    /// 未接続のセッションを作成
    pub fn new(ws_url: &str) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            ws_url: ws_url.to_string(),
            state_tx,
            audio_tx: None,
            source_language: None,
        }
    }

    /// 接続を確立して文字起こしフラグメントの受信チャンネルを返す
    ///
    /// ソース言語はセッションの生存期間中は不変。言語を変えるには
    /// このメソッドを再度呼ぶ（既存の接続は先にクローズされる）。
    ///
    /// # Errors
    ///
    /// ハンドシェイクに失敗した場合、状態を `Failed` にしてエラーを返す。
    pub async fn open(&mut self, source_language: &str) -> Result<mpsc::Receiver<String>> {
        // アクティブな接続は最大1つ
        if self.audio_tx.is_some() {
            log::info!("既存のセッションをクローズして再接続します");
            self.close();
        }

        self.state_tx.send_replace(SessionState::Connecting);
        let url = build_session_url(&self.ws_url, source_language)?;
        log::info!("セッション接続中: {}", url);

        let (ws_stream, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                self.state_tx.send_replace(SessionState::Failed);
                return Err(e).context("WebSocket接続失敗");
            }
        };

        self.state_tx.send_replace(SessionState::Live);
        self.source_language = Some(source_language.to_string());
        log::info!("セッション確立: lang={}", source_language);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_QUEUE_CAPACITY);
        let (fragment_tx, fragment_rx) = mpsc::channel::<String>(256);

        // 送信タスク: 音声チャンクをバイナリフレームとして生成順に送る
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Binary(chunk)).await {
                    log::error!("音声チャンク送信失敗: {}", e);
                    fail_if_live(&state_tx);
                    return;
                }
            }
            // audio_tx がドロップされた = 明示的クローズ
            let _ = ws_tx.send(Message::Close(None)).await;
            log::debug!("送信タスク終了");
        });

        // 受信タスク: 文字起こしメッセージをパースしてフラグメントを流す
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => match extract_transcript(&text) {
                        Some(fragment) => {
                            if fragment_tx.send(fragment).await.is_err() {
                                // 受信側が破棄された
                                break;
                            }
                        }
                        None => {
                            // 不正なメッセージはセッションを終了させない
                            log::warn!("不正な文字起こしメッセージを破棄: {}", text);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("サーバが接続をクローズしました");
                        break;
                    }
                    Ok(_) => {
                        // Ping/Pong/バイナリは無視
                    }
                    Err(e) => {
                        log::error!("WebSocket受信エラー: {}", e);
                        break;
                    }
                }
            }
            // 明示的クローズ以外で受信が途絶えたら接続断扱い
            fail_if_live(&state_tx);
            log::debug!("受信タスク終了");
        });

        self.audio_tx = Some(audio_tx);
        Ok(fragment_rx)
    }

    /// 音声チャンクを送信
    ///
    /// `Live` 以外の状態では黙って破棄する。キューが満杯の場合も
    /// 同様に破棄する。ライブ音声は鮮度を完全性より優先するため、
    /// バックプレッシャや再送は行わない（設計上のドロップポリシー）。
    pub fn send(&self, chunk: Vec<u8>) {
        if *self.state_tx.borrow() != SessionState::Live {
            return;
        }
        if let Some(tx) = &self.audio_tx {
            if tx.try_send(chunk).is_err() {
                log::debug!("送信キュー満杯またはクローズ済み、チャンクを破棄");
            }
        }
    }

    /// セッションをクローズ
    ///
    /// 冪等。前の状態にかかわらず `Closed` へ遷移し、接続を解放する。
    /// 送信待ちのチャンクの完了は待たない。
    pub fn close(&mut self) {
        // 送信キューを閉じると送信タスクがCloseフレームを送って終了する
        self.audio_tx = None;
        let previous = self.state_tx.send_replace(SessionState::Closed);
        if previous != SessionState::Closed {
            log::info!("セッションをクローズしました (直前の状態: {:?})", previous);
        }
    }

    /// 現在の状態を取得
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// 状態変化の購読チャンネルを取得
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// セッションを開いたソース言語を取得
    pub fn source_language(&self) -> Option<&str> {
        self.source_language.as_deref()
    }
}

/// `Live` のままの切断を `Failed` として記録
///
/// `close()` 済みの `Closed` を上書きしないための比較付き更新。
fn fail_if_live(state_tx: &watch::Sender<SessionState>) {
    state_tx.send_if_modified(|state| {
        if *state == SessionState::Live {
            *state = SessionState::Failed;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_build_session_url() {
        let url =
            build_session_url("ws://localhost:8000/v1/realtime/transcription_sessions", "ja")
                .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/v1/realtime/transcription_sessions?src_lang=ja"
        );

        assert!(build_session_url("これはURLではない", "en").is_err());
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new("ws://localhost:8000/ws");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.source_language(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = Session::new("ws://localhost:8000/ws");
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        // 2回クローズしても同じ終端状態
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_send_outside_live_is_silent_noop() {
        let session = Session::new("ws://localhost:8000/ws");
        // Idle状態での送信はエラーにならず破棄される
        session.send(vec![0u8; 320]);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_open_failure_transitions_to_failed() {
        // 誰もlistenしていないポートへの接続は拒否される
        let mut session = Session::new("ws://127.0.0.1:1/ws");
        let result = session.open("en").await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_open_send_receive_and_malformed_discard() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // ローカルのモックバックエンド
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // クライアントからの音声チャンクを1つ受信
            let chunk = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Binary(data) => break data,
                    _ => continue,
                }
            };
            assert_eq!(chunk.len(), 320);

            // 不正なメッセージ → 破棄されてセッションは継続する
            ws.send(Message::Text("{\"type\": \"noise\"}".into()))
                .await
                .unwrap();
            // 正常な文字起こしメッセージ
            ws.send(Message::Text(
                "{\"transcript\": \"hello\"}".into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                "{\"transcript\": {\"text\": \"world\"}}".into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let mut session = Session::new(&format!("ws://{}/v1/realtime/transcription_sessions", addr));
        let mut fragments = session.open("en").await.unwrap();
        assert_eq!(session.state(), SessionState::Live);
        assert_eq!(session.source_language(), Some("en"));

        session.send(vec![0u8; 320]);

        assert_eq!(fragments.recv().await, Some("hello".to_string()));
        assert_eq!(fragments.recv().await, Some("world".to_string()));
        // サーバクローズ後はチャンネルも閉じる
        assert_eq!(fragments.recv().await, None);

        server.await.unwrap();

        // 明示的クローズなしの切断は Failed（キャプチャ自動停止の契機）
        let mut state_rx = session.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while *state_rx.borrow() != SessionState::Failed {
                state_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("Failedへの遷移がタイムアウト");
    }

    #[tokio::test]
    async fn test_explicit_close_ends_in_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // クライアントのクローズを待つ
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });

        let mut session = Session::new(&format!("ws://{}/ws", addr));
        let _fragments = session.open("en").await.unwrap();
        assert_eq!(session.state(), SessionState::Live);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        // クローズ後の送信は no-op
        session.send(vec![0u8; 320]);
        assert_eq!(session.state(), SessionState::Closed);

        server.await.unwrap();
    }
}
