use serde::{Deserialize, Serialize};

/// 図鑑エントリが無い場合の表示文
pub const NO_ENTRY_TEXT: &str = "No entry available";

/// 種族値
///
/// 欠けている項目は 0 として読み込む。特攻・特防は任意。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStats {
    #[serde(default)]
    pub hp: u32,
    #[serde(default)]
    pub attack: u32,
    #[serde(default)]
    pub defense: u32,
    #[serde(default)]
    pub speed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_attack: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_defense: Option<u32>,
}

impl BaseStats {
    /// 表示用の (ラベル, 値) 一覧
    ///
    /// HP・攻撃・防御・素早さは常に含め、データに無かったものは 0 と表示する。
    /// 特攻・特防はデータに存在する場合のみ含める。
    pub fn display_rows(&self) -> Vec<(&'static str, u32)> {
        let mut rows = vec![
            ("HP", self.hp),
            ("Attack", self.attack),
            ("Defense", self.defense),
            ("Speed", self.speed),
        ];
        if let Some(sp_attack) = self.sp_attack {
            rows.push(("Sp. Atk", sp_attack));
        }
        if let Some(sp_defense) = self.sp_defense {
            rows.push(("Sp. Def", sp_defense));
        }
        rows
    }
}

/// 図鑑カタログの1レコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub id: u32,
    pub name: String,
    pub species: String,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub height_m: f64,
    pub weight_kg: f64,
    // 種族値が無いレコードも表示できるようにする
    #[serde(default)]
    pub base_stats: BaseStats,
    #[serde(default)]
    pub pokedex_entry: Option<String>,

    // 読み込み時にidから組み立てる
    #[serde(default, skip_deserializing)]
    pub sprite_url: Option<String>,
}

impl CatalogueEntry {
    /// "#025" 形式の図鑑番号
    pub fn display_number(&self) -> String {
        format!("#{:03}", self.id)
    }

    pub fn entry_text(&self) -> &str {
        self.pokedex_entry.as_deref().unwrap_or(NO_ENTRY_TEXT)
    }
}

/// 上位ランキングの1要素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLabel {
    pub index: usize,
    pub label: String,
    pub confidence: f32,
}

/// 1枚の画像に対する予測結果
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub label: String,
    pub index: usize,
    pub confidence: f32,
    /// 閾値以上かつカタログにメタデータが存在する場合のみtrue
    pub confident: bool,
    /// 降順の上位k件
    pub top_k: Vec<RankedLabel>,
    pub entry: Option<CatalogueEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_stats_optional_fields() {
        let json = r#"{"hp": 35, "attack": 55, "defense": 40, "speed": 90}"#;
        let stats: BaseStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.sp_attack, None);
        assert_eq!(stats.display_rows().len(), 4);

        let json = r#"{"hp": 35, "attack": 55, "defense": 40, "speed": 90, "sp_attack": 50}"#;
        let stats: BaseStats = serde_json::from_str(json).unwrap();
        let rows = stats.display_rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], ("Sp. Atk", 50));
    }

    #[test]
    fn test_missing_core_stats_default_to_zero() {
        let json = r#"{"hp": 35, "attack": 55, "defense": 40}"#;
        let stats: BaseStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.speed, 0);
        assert_eq!(
            stats.display_rows(),
            vec![("HP", 35), ("Attack", 55), ("Defense", 40), ("Speed", 0)]
        );
    }

    #[test]
    fn test_entry_display_helpers() {
        let json = r#"{
            "id": 25, "name": "Pikachu", "species": "Mouse Pokémon",
            "type": ["Electric"], "height_m": 0.4, "weight_kg": 6.0,
            "base_stats": {"hp": 35, "attack": 55, "defense": 40, "speed": 90}
        }"#;
        let entry: CatalogueEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.display_number(), "#025");
        assert_eq!(entry.entry_text(), NO_ENTRY_TEXT);
        assert_eq!(entry.types, vec!["Electric".to_string()]);
        assert!(entry.sprite_url.is_none());
    }
}
