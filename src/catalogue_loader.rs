//! 図鑑カタログの読み込み
//!
//! 起動時に一度だけ読み込み、以降は読み取り専用で共有します。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::error::CatalogueError;
use crate::types::CatalogueEntry;

/// スプライト画像のデフォルト配信元
pub const DEFAULT_SPRITE_BASE_URL: &str =
    "https://raw.githubusercontent.com/PokeAPI/sprites/master/sprites/pokemon/";

#[derive(Deserialize)]
struct CatalogueFile {
    #[serde(rename = "Pokedex", default)]
    pokedex: Vec<CatalogueEntry>,
}

/// 名前（小文字）をキーにしたカタログ
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: HashMap<String, CatalogueEntry>,
    load_error: Option<String>,
}

impl Catalogue {
    pub fn empty() -> Self {
        Self::default()
    }

    /// エントリ一覧からカタログを構築
    ///
    /// 大文字小文字を無視して同名のエントリがある場合は後勝ち。
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogueEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.name.to_lowercase(), entry))
            .collect();
        Self {
            entries,
            load_error: None,
        }
    }

    /// カタログファイルを読み込む（厳密版）
    pub fn load(path: &Path, sprite_base_url: &str) -> Result<Self, CatalogueError> {
        if !path.exists() {
            return Err(CatalogueError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| CatalogueError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content, sprite_base_url).map_err(|e| match e {
            CatalogueError::Parse { source, .. } => CatalogueError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// JSON文字列からカタログを構築
    pub fn from_json_str(json: &str, sprite_base_url: &str) -> Result<Self, CatalogueError> {
        let file: CatalogueFile =
            serde_json::from_str(json).map_err(|source| CatalogueError::Parse {
                path: Default::default(),
                source,
            })?;

        // 末尾の `/` が無いと join で最後のセグメントが置き換えられる
        let base = if sprite_base_url.ends_with('/') {
            Url::parse(sprite_base_url)?
        } else {
            Url::parse(&format!("{}/", sprite_base_url))?
        };
        let mut entries = file.pokedex;
        for entry in entries.iter_mut() {
            let url = base.join(&format!("{}.png", entry.id))?;
            entry.sprite_url = Some(url.to_string());
        }

        Ok(Self::from_entries(entries))
    }

    /// カタログファイルを読み込む。失敗した場合は空のカタログで続行する
    ///
    /// - ファイルが無い: 空のカタログ（エラー扱いしない）
    /// - 解析に失敗: 空のカタログ + `load_error` にメッセージを保持
    pub fn load_or_empty(path: &Path, sprite_base_url: &str) -> Self {
        match Self::load(path, sprite_base_url) {
            Ok(catalogue) => {
                info!(
                    "カタログを読み込みました: {} ({}件)",
                    path.display(),
                    catalogue.len()
                );
                catalogue
            }
            Err(CatalogueError::NotFound(_)) => {
                warn!(
                    "カタログファイルが存在しません: {}。メタデータなしで続行します",
                    path.display()
                );
                Self::empty()
            }
            Err(e) => {
                warn!("カタログの読み込みに失敗しました: {}。メタデータなしで続行します", e);
                Self {
                    entries: HashMap::new(),
                    load_error: Some(format!("Error loading JSON: {}", e)),
                }
            }
        }
    }

    /// 名前でエントリを検索（大文字小文字は区別しない）
    pub fn get(&self, name: &str) -> Option<&CatalogueEntry> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 全エントリの名前（元の表記）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 読み込み時のエラーメッセージ（利用者に提示する）
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaseStats;
    use std::io::Write;

    fn record(id: u32, name: &str) -> String {
        format!(
            r#"{{"id": {id}, "name": "{name}", "species": "Test Pokémon", "type": ["Grass", "Poison"],
               "height_m": 0.7, "weight_kg": 6.9,
               "base_stats": {{"hp": 45, "attack": 49, "defense": 49, "speed": 45, "sp_attack": 65}},
               "pokedex_entry": "A strange seed."}}"#
        )
    }

    fn write_catalogue(dir: &Path, records: &[String]) -> std::path::PathBuf {
        let path = dir.join("pokedex.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"Pokedex": [{}]}}"#, records.join(",")).unwrap();
        path
    }

    #[test]
    fn test_load_all_records_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["Bulbasaur", "Charmander", "Squirtle", "Mr. Mime"];
        let records: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, n)| record(i as u32 + 1, n))
            .collect();
        let path = write_catalogue(dir.path(), &records);

        let catalogue = Catalogue::load(&path, DEFAULT_SPRITE_BASE_URL).unwrap();
        assert_eq!(catalogue.len(), names.len());
        for name in names {
            assert!(catalogue.contains(&name.to_uppercase()));
            assert!(catalogue.contains(&name.to_lowercase()));
        }
        assert!(catalogue.load_error().is_none());
    }

    #[test]
    fn test_sprite_url_from_id() {
        let json = format!(r#"{{"Pokedex": [{}]}}"#, record(4, "Charmander"));
        let catalogue = Catalogue::from_json_str(&json, DEFAULT_SPRITE_BASE_URL).unwrap();
        let entry = catalogue.get("charmander").unwrap();
        assert_eq!(
            entry.sprite_url.as_deref(),
            Some("https://raw.githubusercontent.com/PokeAPI/sprites/master/sprites/pokemon/4.png")
        );
        assert_eq!(entry.base_stats.sp_attack, Some(65));
        assert_eq!(entry.base_stats.sp_defense, None);
    }

    #[test]
    fn test_sprite_base_without_trailing_slash() {
        let json = format!(r#"{{"Pokedex": [{}]}}"#, record(4, "Charmander"));
        let base = "https://example.com/sprites/pokemon";
        let catalogue = Catalogue::from_json_str(&json, base).unwrap();
        assert_eq!(
            catalogue.get("charmander").unwrap().sprite_url.as_deref(),
            Some("https://example.com/sprites/pokemon/4.png")
        );
    }

    #[test]
    fn test_record_without_base_stats_still_loads() {
        let bare = r#"{"id": 132, "name": "Ditto", "species": "Transform Pokémon",
                       "type": ["Normal"], "height_m": 0.3, "weight_kg": 4.0}"#;
        let json = format!(r#"{{"Pokedex": [{}, {}]}}"#, record(1, "Bulbasaur"), bare);
        let catalogue = Catalogue::from_json_str(&json, DEFAULT_SPRITE_BASE_URL).unwrap();

        assert_eq!(catalogue.len(), 2);
        assert_eq!(catalogue.get("bulbasaur").unwrap().base_stats.hp, 45);
        let ditto = catalogue.get("ditto").unwrap();
        assert_eq!(ditto.base_stats, BaseStats::default());
        assert_eq!(
            ditto.base_stats.display_rows(),
            vec![("HP", 0), ("Attack", 0), ("Defense", 0), ("Speed", 0)]
        );
    }

    #[test]
    fn test_duplicate_names_fold_to_one_entry() {
        let json = format!(
            r#"{{"Pokedex": [{}, {}]}}"#,
            record(1, "Pikachu"),
            record(2, "PIKACHU")
        );
        let catalogue = Catalogue::from_json_str(&json, DEFAULT_SPRITE_BASE_URL).unwrap();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue.get("pikachu").unwrap().id, 2);
    }

    #[test]
    fn test_missing_file_gives_empty_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");

        assert!(matches!(
            Catalogue::load(&path, DEFAULT_SPRITE_BASE_URL),
            Err(CatalogueError::NotFound(_))
        ));

        let catalogue = Catalogue::load_or_empty(&path, DEFAULT_SPRITE_BASE_URL);
        assert!(catalogue.is_empty());
        assert!(catalogue.load_error().is_none());
        assert!(catalogue.get("bulbasaur").is_none());
    }

    #[test]
    fn test_malformed_file_degrades_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pokedex.json");
        fs::write(&path, "{ not json").unwrap();

        let catalogue = Catalogue::load_or_empty(&path, DEFAULT_SPRITE_BASE_URL);
        assert!(catalogue.is_empty());
        assert!(catalogue.load_error().unwrap().starts_with("Error loading JSON"));
    }

    #[test]
    fn test_missing_top_level_key_is_empty() {
        let catalogue =
            Catalogue::from_json_str(r#"{"Other": []}"#, DEFAULT_SPRITE_BASE_URL).unwrap();
        assert!(catalogue.is_empty());
    }
}
