//! クラスインデックスとクラス名の対応
//!
//! ネットワーク出力のインデックス位置とクラス名の対応表です。
//! 長さと順序が学習時の出力層と一致していないと、誤ったラベルが黙って返ります。
//! 推論側は学習時に保存した対応表をそのまま使い、カタログからの再構築は照合にのみ使います。

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};

use crate::catalogue_loader::Catalogue;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassLabelSet {
    labels: Vec<String>,
}

impl ClassLabelSet {
    /// 出力インデックス順のラベル列から作成
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// カタログの名前を重複なしでソートして作成
    pub fn from_catalogue(catalogue: &Catalogue) -> Self {
        let names: BTreeSet<String> = catalogue.names().map(str::to_string).collect();
        Self {
            labels: names.into_iter().collect(),
        }
    }

    /// 学習データディレクトリ直下のサブディレクトリ名をソートして作成
    pub fn from_directory(root: &Path) -> Result<Self> {
        let mut labels = Vec::new();
        for entry in std::fs::read_dir(root)
            .with_context(|| format!("Failed to read dataset directory: {}", root.display()))?
        {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?;
            labels.push(name.to_string());
        }
        labels.sort();
        Ok(Self { labels })
    }

    /// `{クラス名: インデックス}` から作成
    ///
    /// インデックスは 0..n を欠番・重複なしで網羅している必要がある。
    pub fn from_class_indices(indices: &BTreeMap<String, usize>) -> Result<Self> {
        let n = indices.len();
        let mut slots: Vec<Option<String>> = vec![None; n];

        for (name, &index) in indices {
            let slot = slots.get_mut(index).ok_or_else(|| {
                anyhow::anyhow!("クラス '{}' のインデックス {} は範囲外です (クラス数 {})", name, index, n)
            })?;
            if let Some(existing) = slot {
                anyhow::bail!("インデックス {} が '{}' と '{}' で重複しています", index, existing, name);
            }
            *slot = Some(name.clone());
        }

        // n個の異なるインデックスが全て 0..n に収まっていれば欠番は無い
        let labels = slots.into_iter().flatten().collect();
        Ok(Self { labels })
    }

    /// `{クラス名: インデックス}` 形式に変換
    pub fn to_class_indices(&self) -> BTreeMap<String, usize> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// カタログとの差分
    ///
    /// (カタログに無いラベル, モデルが知らないカタログ名)。比較は小文字で行う。
    pub fn diff_with_catalogue(&self, catalogue: &Catalogue) -> (Vec<String>, Vec<String>) {
        let missing_metadata = self
            .labels
            .iter()
            .filter(|label| !catalogue.contains(label))
            .cloned()
            .collect();

        let known: BTreeSet<String> = self.labels.iter().map(|l| l.to_lowercase()).collect();
        let mut unknown_to_model: Vec<String> = catalogue
            .names()
            .filter(|name| !known.contains(&name.to_lowercase()))
            .map(str::to_string)
            .collect();
        unknown_to_model.sort();

        (missing_metadata, unknown_to_model)
    }
}
