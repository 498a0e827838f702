//! 予測の後処理
//!
//! スコア列から上位k件のランキングを作り、信頼度の閾値とカタログの有無で
//! 「確信あり」を判定します。副作用の無い純粋関数のみ。

use crate::catalogue_loader::Catalogue;
use crate::error::ClassifyError;
use crate::model::{ClassLabelSet, InferenceSettings};
use crate::types::{PredictionResult, RankedLabel};

/// スコアの高い順に最大k件の (インデックス, スコア) を返す
///
/// 同点は出力インデックスの小さい方を先にする。
pub fn rank_top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}

/// スコア列とクラス対応表から予測結果を組み立てる
pub fn postprocess(
    scores: &[f32],
    labels: &ClassLabelSet,
    catalogue: &Catalogue,
    settings: &InferenceSettings,
) -> Result<PredictionResult, ClassifyError> {
    if scores.is_empty() {
        return Err(ClassifyError::EmptyScores);
    }
    if scores.len() != labels.len() {
        return Err(ClassifyError::LabelMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }

    let top_k: Vec<RankedLabel> = rank_top_k(scores, settings.top_k.max(1))
        .into_iter()
        .filter_map(|(index, confidence)| {
            labels.label(index).map(|label| RankedLabel {
                index,
                label: label.to_string(),
                confidence,
            })
        })
        .collect();

    // scoresが空でなくtop_k >= 1なので先頭は必ず存在する
    let best = top_k.first().cloned().ok_or(ClassifyError::EmptyScores)?;
    let entry = catalogue.get(&best.label).cloned();
    let confident = best.confidence >= settings.confidence_threshold && entry.is_some();

    Ok(PredictionResult {
        label: best.label,
        index: best.index,
        confidence: best.confidence,
        confident,
        top_k,
        entry,
    })
}
