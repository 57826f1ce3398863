//! ファンアウトディスパッチャ
//!
//! 受信したフラグメントをソースカラムへ同期追記し、到着時点に存在する
//! 各翻訳先カラムへ並行して翻訳リクエストを発行する。翻訳呼び出しは
//! 完了順が呼び出し順と一致しないため、カラムごとのシーケンス番号と
//! 並べ替えバッファで到着順どおりの追記を保証する。
//!
//! ここがこのクレートで唯一、明示的な順序制御を必要とする箇所。
//! それ以外の変更操作はすべて短いロック区間内で完結する。

use crate::store::TranscriptStore;
use crate::types::{ColumnId, ColumnUpdate};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// 翻訳バックエンドの共通トレイト
///
/// 実運用ではHTTPクライアント、テストではモックを差し込む。
#[async_trait]
pub trait Translator: Send + Sync {
    /// テキストを翻訳
    ///
    /// # Arguments
    /// * `text` - 原文
    /// * `source_lang` - 原文の言語タグ
    /// * `target_lang` - 翻訳先の言語タグ
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str)
        -> Result<String>;
}

/// カラムごとの順序制御状態
///
/// `next_issue` はこのカラムに発行した翻訳リクエストの通し番号、
/// `next_deliver` は次に追記してよい番号。先に完了したリクエストの
/// 結果は `pending` に留め置き、欠番が埋まり次第まとめて排出する。
///
/// `epoch` はカラムの言語変更・全クリアのたびに加算される世代番号。
/// 古い世代のリクエスト結果は到着時に破棄される。
#[derive(Debug, Default)]
struct ColumnSequencer {
    epoch: u64,
    next_issue: u64,
    next_deliver: u64,
    pending: BTreeMap<u64, String>,
}

/// フラグメントのファンアウトとカラム変更操作の窓口
///
/// ストアへの変更はすべてこの型を経由する。`Clone` は内部状態を
/// 共有するハンドルの複製であり、翻訳タスクへ渡すために使う。
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Mutex<TranscriptStore>>,
    translator: Arc<dyn Translator>,
    source_language: String,
    sequencers: Arc<Mutex<HashMap<ColumnId, ColumnSequencer>>>,
    update_tx: mpsc::Sender<ColumnUpdate>,
}

impl Dispatcher {
    /// 新しいディスパッチャを作成
    ///
    /// `source_language` はセッションを開いた言語。セッションの
    /// 生存期間中は不変。
    pub fn new(
        store: Arc<Mutex<TranscriptStore>>,
        translator: Arc<dyn Translator>,
        source_language: &str,
        update_tx: mpsc::Sender<ColumnUpdate>,
    ) -> Self {
        // 既存の翻訳先カラムにシーケンサを用意
        let sequencers = {
            let store = store.lock().unwrap();
            store
                .target_columns()
                .into_iter()
                .map(|(id, _)| (id, ColumnSequencer::default()))
                .collect::<HashMap<_, _>>()
        };

        Self {
            store,
            translator,
            source_language: source_language.to_string(),
            sequencers: Arc::new(Mutex::new(sequencers)),
            update_tx,
        }
    }

    /// ストアへの共有参照を取得（読み取り用）
    pub fn store(&self) -> Arc<Mutex<TranscriptStore>> {
        Arc::clone(&self.store)
    }

    /// フラグメントを処理
    ///
    /// 1. ソースカラムへ同期追記
    /// 2. この時点で存在する翻訳先カラムそれぞれに翻訳タスクを発行
    ///
    /// 後から追加されたカラムが過去のフラグメントを遡って受け取る
    /// ことはない。tokioランタイム上で呼び出すこと。
    pub fn handle_fragment(&self, text: String) {
        let (source_id, source_label, index, targets) = {
            let mut store = self.store.lock().unwrap();
            let source_id = store.source_id();
            let label = store
                .column(source_id)
                .map(|c| c.label.clone())
                .unwrap_or_default();
            let Some(index) = store.append_line(source_id, text.clone()) else {
                return;
            };
            (source_id, label, index, store.target_columns())
        };

        log::debug!(
            "フラグメント受信: index={}, 翻訳先={}件, text={}",
            index,
            targets.len(),
            text
        );
        self.emit(ColumnUpdate::new(source_id, source_label, index, text.clone()));

        let mut sequencers = self.sequencers.lock().unwrap();
        for (column_id, target_lang) in targets {
            // スナップショット直後に削除されたカラムはスキップ
            // （entry で復活させると空のシーケンサが残り続ける）
            let Some(seq_state) = sequencers.get_mut(&column_id) else {
                log::debug!("カラム {} は削除済み、翻訳を発行しません", column_id);
                continue;
            };
            let seq = seq_state.next_issue;
            seq_state.next_issue += 1;
            let epoch = seq_state.epoch;

            let dispatcher = self.clone();
            let fragment = text.clone();
            let source_lang = self.source_language.clone();
            tokio::spawn(async move {
                let translated = match dispatcher
                    .translator
                    .translate(&fragment, &source_lang, &target_lang)
                    .await
                {
                    Ok(t) if !t.trim().is_empty() => t,
                    Ok(_) => {
                        log::warn!(
                            "カラム {}: 翻訳が空応答、原文で代替します",
                            column_id
                        );
                        fragment.clone()
                    }
                    Err(e) => {
                        // 劣化出力は無言の欠落に勝る
                        log::warn!("カラム {}: 翻訳失敗、原文で代替します: {}", column_id, e);
                        fragment.clone()
                    }
                };
                dispatcher.deliver(column_id, epoch, seq, translated);
            });
        }
    }

    /// 翻訳結果をカラムへ順序どおりに反映
    ///
    /// シーケンス番号が揃うまで結果をバッファし、`next_deliver` から
    /// 連続している分だけ追記する。カラムが削除済み・世代が古い場合は
    /// 結果を黙って破棄する。
    fn deliver(&self, column_id: ColumnId, epoch: u64, seq: u64, text: String) {
        let mut sequencers = self.sequencers.lock().unwrap();

        let Some(seq_state) = sequencers.get_mut(&column_id) else {
            log::debug!("カラム {} は削除済み、翻訳結果を破棄", column_id);
            return;
        };
        if seq_state.epoch != epoch {
            log::debug!("カラム {} の世代が更新済み、翻訳結果を破棄", column_id);
            return;
        }

        seq_state.pending.insert(seq, text);

        // 欠番が埋まっている範囲を排出
        // シーケンサのロックを保持したまま追記することで、
        // 並行する deliver 同士の追記順序が入れ替わらないようにする
        while let Some(ready) = seq_state.pending.remove(&seq_state.next_deliver) {
            seq_state.next_deliver += 1;

            let mut store = self.store.lock().unwrap();
            let Some(index) = store.append_line(column_id, ready.clone()) else {
                // ロック取得とカラム削除が競合した場合もここで no-op
                continue;
            };
            let label = store
                .column(column_id)
                .map(|c| c.label.clone())
                .unwrap_or_default();
            drop(store);

            self.emit(ColumnUpdate::new(column_id, label, index, ready));
        }
    }

    /// 翻訳先カラムを追加
    ///
    /// 追加以降に到着したフラグメントのみがこのカラムへ流れる。
    pub fn add_column(&self, label: &str, language_tag: &str) -> ColumnId {
        let id = self.store.lock().unwrap().add_column(label, language_tag);
        self.sequencers
            .lock()
            .unwrap()
            .insert(id, ColumnSequencer::default());
        id
    }

    /// カラムを削除
    ///
    /// 実行中の翻訳リクエストはキャンセルしない。結果は到着時に
    /// 破棄される。
    pub fn remove_column(&self, id: ColumnId) -> bool {
        let removed = self.store.lock().unwrap().remove_column(id);
        if removed {
            self.sequencers.lock().unwrap().remove(&id);
        }
        removed
    }

    /// カラムの言語を変更
    ///
    /// 行はクリアされ、変更前に発行済みの翻訳結果は世代番号の
    /// 不一致により破棄される。
    pub fn set_column_language(&self, id: ColumnId, language_tag: &str) -> bool {
        let changed = self
            .store
            .lock()
            .unwrap()
            .set_column_language(id, language_tag);
        if changed {
            let mut sequencers = self.sequencers.lock().unwrap();
            if let Some(seq_state) = sequencers.get_mut(&id) {
                let epoch = seq_state.epoch + 1;
                *seq_state = ColumnSequencer {
                    epoch,
                    ..ColumnSequencer::default()
                };
            }
        }
        changed
    }

    /// 全カラムの行をクリア
    ///
    /// 実行中の翻訳結果がクリア後のカラムへ紛れ込まないよう、
    /// 全シーケンサの世代を進める。
    pub fn clear_all(&self) {
        self.store.lock().unwrap().clear_all();
        let mut sequencers = self.sequencers.lock().unwrap();
        for seq_state in sequencers.values_mut() {
            let epoch = seq_state.epoch + 1;
            *seq_state = ColumnSequencer {
                epoch,
                ..ColumnSequencer::default()
            };
        }
    }

    /// 指定インデックスの行を削除
    pub fn delete_line(&self, id: ColumnId, index: usize) -> bool {
        self.store.lock().unwrap().delete_line(id, index)
    }

    fn emit(&self, update: ColumnUpdate) {
        if let Err(e) = self.update_tx.try_send(update) {
            log::warn!("更新イベント送信失敗: {}", e);
        }
    }
}
