//! トランスクリプトストア
//!
//! カラムとその行リストのインメモリモデル。すべての変更は
//! ここで定義された操作を通してのみ行われる。行リストは追記と
//! インデックス指定の単一行削除のみが許され、並べ替えは発生しない。

use crate::types::ColumnId;

/// 1つのトランスクリプトストリーム（カラム）
///
/// ソースカラム（文字起こし結果そのもの）または翻訳先カラムを表す。
///
/// # 不変条件
///
/// - アクティブなカラム集合のうち `is_source == true` は常にちょうど1つ
/// - ソースカラムは削除できない
/// - `lines` は追記とインデックス削除のみ（並べ替えなし）
#[derive(Clone, Debug)]
pub struct Column {
    /// 一意識別子（生存期間中不変）
    pub id: ColumnId,

    /// 表示名（動作には影響しない）
    pub label: String,

    /// BCP-47風の言語タグ、またはソースカラムのみ有効な "auto"
    pub language_tag: String,

    /// ソースカラムかどうか
    pub is_source: bool,

    /// 行リスト（到着順）
    pub lines: Vec<String>,
}

/// カラム集合を保持するストア
///
/// 生成時にソースカラムが1つ作られ、以後削除されることはない。
/// 翻訳先カラムは実行中いつでも追加・削除できる。
///
/// # Examples
///
/// ```
/// # use caption_relay::store::TranscriptStore;
/// let mut store = TranscriptStore::new("English", "en");
/// let source = store.source_id();
/// let ja = store.add_column("日本語", "ja");
///
/// store.append_line(source, "hello".to_string());
/// store.append_line(ja, "こんにちは".to_string());
///
/// assert_eq!(store.column(source).unwrap().lines, vec!["hello"]);
/// assert_eq!(store.column(ja).unwrap().lines, vec!["こんにちは"]);
/// ```
#[derive(Debug)]
pub struct TranscriptStore {
    columns: Vec<Column>,
    next_id: ColumnId,
}

impl TranscriptStore {
    /// ソースカラム1つを持つストアを作成
    pub fn new(source_label: &str, source_language: &str) -> Self {
        let source = Column {
            id: 0,
            label: source_label.to_string(),
            language_tag: source_language.to_string(),
            is_source: true,
            lines: Vec::new(),
        };
        Self {
            columns: vec![source],
            next_id: 1,
        }
    }

    /// ソースカラムのIDを取得
    pub fn source_id(&self) -> ColumnId {
        // 生成時に必ず作られ、削除もできないため常に存在する
        self.columns
            .iter()
            .find(|c| c.is_source)
            .map(|c| c.id)
            .unwrap_or(0)
    }

    /// 翻訳先カラムを追加してIDを返す
    pub fn add_column(&mut self, label: &str, language_tag: &str) -> ColumnId {
        let id = self.next_id;
        self.next_id += 1;
        self.columns.push(Column {
            id,
            label: label.to_string(),
            language_tag: language_tag.to_string(),
            is_source: false,
            lines: Vec::new(),
        });
        log::info!("カラム追加: id={}, label={}, lang={}", id, label, language_tag);
        id
    }

    /// カラムを削除
    ///
    /// ソースカラムは削除できない。存在しないIDの場合も `false` を返す。
    pub fn remove_column(&mut self, id: ColumnId) -> bool {
        let Some(pos) = self.columns.iter().position(|c| c.id == id) else {
            return false;
        };
        if self.columns[pos].is_source {
            log::warn!("ソースカラムは削除できません: id={}", id);
            return false;
        }
        self.columns.remove(pos);
        log::info!("カラム削除: id={}", id);
        true
    }

    /// カラムの言語タグを変更
    ///
    /// 既存の行は新しい言語では無効なため、同時にクリアされる。
    pub fn set_column_language(&mut self, id: ColumnId, language_tag: &str) -> bool {
        let Some(column) = self.columns.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        column.language_tag = language_tag.to_string();
        column.lines.clear();
        log::info!("カラム言語変更: id={}, lang={}", id, language_tag);
        true
    }

    /// 行を末尾に追加して、その行が占めるインデックスを返す
    ///
    /// カラムが存在しない場合は no-op として `None` を返す。
    /// 削除済みカラムへ遅れて到着した翻訳結果がここに落ちる。
    pub fn append_line(&mut self, id: ColumnId, text: String) -> Option<usize> {
        let column = self.columns.iter_mut().find(|c| c.id == id)?;
        column.lines.push(text);
        Some(column.lines.len() - 1)
    }

    /// 指定インデックスの行を削除
    pub fn delete_line(&mut self, id: ColumnId, index: usize) -> bool {
        let Some(column) = self.columns.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if index >= column.lines.len() {
            return false;
        }
        column.lines.remove(index);
        true
    }

    /// 全カラムの行をクリア
    ///
    /// カラム自体は残る。
    pub fn clear_all(&mut self) {
        for column in &mut self.columns {
            column.lines.clear();
        }
        log::info!("全カラムの行をクリアしました");
    }

    /// カラムを参照
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// 全カラムを参照
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// 翻訳先カラムの (ID, 言語タグ) 一覧を取得
    ///
    /// ディスパッチャがフラグメント到着時点のファンアウト先を
    /// スナップショットするために使う。
    pub fn target_columns(&self) -> Vec<(ColumnId, String)> {
        self.columns
            .iter()
            .filter(|c| !c.is_source)
            .map(|c| (c.id, c.language_tag.clone()))
            .collect()
    }
}
