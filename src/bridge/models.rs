//! Records returned by plugin entry points
//!
//! Plugins produce these shapes and hand them back through
//! `end_with_result`. The bridge carries them without checking them;
//! [`PluginPayload::validate`] is the host-side check for callers that want
//! one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{BridgeError, Result};

/// Well-known plugin entry points
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `getMangaList`, returns [`MangaListResult`]
    GetMangaList,
    /// `getMangaData`, returns [`MangaDataResult`]
    GetMangaData,
    /// `getChapterImageList`, returns a list of [`ChapterImage`]
    GetChapterImageList,
    /// `setMangaListFilterOptions`, returns [`FilterOptions`]
    SetMangaListFilterOptions,
    /// Any other function a plugin exports
    Other(String),
}

impl EntryPoint {
    pub fn as_str(&self) -> &str {
        match self {
            EntryPoint::GetMangaList => "getMangaList",
            EntryPoint::GetMangaData => "getMangaData",
            EntryPoint::GetChapterImageList => "getChapterImageList",
            EntryPoint::SetMangaListFilterOptions => "setMangaListFilterOptions",
            EntryPoint::Other(name) => name,
        }
    }
}

impl From<&str> for EntryPoint {
    fn from(name: &str) -> Self {
        match name {
            "getMangaList" => EntryPoint::GetMangaList,
            "getMangaData" => EntryPoint::GetMangaData,
            "getChapterImageList" => EntryPoint::GetChapterImageList,
            "setMangaListFilterOptions" => EntryPoint::SetMangaListFilterOptions,
            other => EntryPoint::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `getMangaList`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MangaListResult {
    pub list: Vec<MangaListItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MangaListItem {
    pub title: String,
    pub url: String,
    pub cover_url: String,
}

/// Result of `getMangaData`
///
/// Either `chapter_list` is filled, or it is left out and
/// `chapter_list_total_page` tells the host how many pages to request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MangaDataResult {
    pub title: String,
    pub description: String,
    pub cover_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_list: Option<Vec<ChapterLink>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_list_total_page: Option<u32>,
    /// Enables the "continue reading" button
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_chapter: Option<ChapterLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterLink {
    pub title: String,
    pub url: String,
}

/// One image of a chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// A filter shown on the manga list page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterOption {
    pub label: String,
    pub name: FilterName,
    pub options: Vec<FilterChoice>,
}

/// Filter names may be strings or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterName {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterChoice {
    pub label: String,
    pub value: String,
}

/// Result of `setMangaListFilterOptions`
pub type FilterOptions = Vec<FilterOption>;

/// Payload carried by `end_with_result`
///
/// Serializes untagged, so the JSON the host sees is exactly the shape the
/// plugin produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PluginPayload {
    MangaList(MangaListResult),
    MangaData(MangaDataResult),
    ChapterImages(Vec<ChapterImage>),
    FilterOptions(FilterOptions),
    /// Anything else, including `null`
    Opaque(Value),
}

impl PluginPayload {
    /// Classify raw JSON by the entry point that produced it
    ///
    /// Values that do not fit the entry point's shape are kept as
    /// [`PluginPayload::Opaque`] rather than rejected. A typed variant always
    /// serializes back to the value it was built from.
    pub fn from_json(entry_point: &EntryPoint, value: Value) -> Self {
        fn typed<T: serde::de::DeserializeOwned + Serialize>(value: &Value) -> Option<T> {
            let typed = T::deserialize(value).ok()?;
            // e.g. `null` for an optional field, or 800.0 for a pixel size
            match serde_json::to_value(&typed) {
                Ok(round_trip) if round_trip == *value => Some(typed),
                _ => None,
            }
        }

        let classified = match entry_point {
            EntryPoint::GetMangaList => typed(&value).map(PluginPayload::MangaList),
            EntryPoint::GetMangaData => typed(&value).map(PluginPayload::MangaData),
            EntryPoint::GetChapterImageList => typed(&value).map(PluginPayload::ChapterImages),
            EntryPoint::SetMangaListFilterOptions => {
                typed(&value).map(PluginPayload::FilterOptions)
            }
            EntryPoint::Other(_) => None,
        };

        classified.unwrap_or(PluginPayload::Opaque(value))
    }

    /// Convert back to JSON
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PluginPayload::MangaList(_) => "manga_list",
            PluginPayload::MangaData(_) => "manga_data",
            PluginPayload::ChapterImages(_) => "chapter_images",
            PluginPayload::FilterOptions(_) => "filter_options",
            PluginPayload::Opaque(_) => "opaque",
        }
    }

    /// Host-side sanity check of a typed payload
    ///
    /// `Opaque` payloads always pass.
    pub fn validate(&self) -> Result<()> {
        match self {
            PluginPayload::MangaList(result) => {
                for (index, item) in result.list.iter().enumerate() {
                    require(&item.title, || format!("list[{}].title", index))?;
                    require(&item.url, || format!("list[{}].url", index))?;
                }
                Ok(())
            }
            PluginPayload::MangaData(data) => {
                require(&data.title, || "title".to_string())?;
                let chapters = data.chapter_list.as_deref().unwrap_or_default();
                if chapters.is_empty() && data.chapter_list_total_page.is_none() {
                    return Err(BridgeError::ValidationError(
                        "either chapterList or chapterListTotalPage must be provided".to_string(),
                    ));
                }
                for (index, chapter) in chapters.iter().enumerate() {
                    require(&chapter.url, || format!("chapterList[{}].url", index))?;
                }
                if let Some(last) = &data.last_read_chapter {
                    require(&last.url, || "lastReadChapter.url".to_string())?;
                }
                Ok(())
            }
            PluginPayload::ChapterImages(images) => {
                for (index, image) in images.iter().enumerate() {
                    require(&image.url, || format!("[{}].url", index))?;
                    if image.width == 0 || image.height == 0 {
                        return Err(BridgeError::ValidationError(format!(
                            "[{}] has a zero dimension ({}x{})",
                            index, image.width, image.height
                        )));
                    }
                }
                Ok(())
            }
            PluginPayload::FilterOptions(filters) => {
                for (index, filter) in filters.iter().enumerate() {
                    require(&filter.label, || format!("[{}].label", index))?;
                }
                Ok(())
            }
            PluginPayload::Opaque(_) => Ok(()),
        }
    }
}

fn require(value: &str, field: impl FnOnce() -> String) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::ValidationError(format!("{} cannot be empty", field())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPoint::from("getMangaList"), EntryPoint::GetMangaList);
        assert_eq!(
            EntryPoint::from("setMangaListFilterOptions"),
            EntryPoint::SetMangaListFilterOptions
        );
        assert_eq!(
            EntryPoint::from("getChapterList"),
            EntryPoint::Other("getChapterList".to_string())
        );
        assert_eq!(EntryPoint::GetChapterImageList.to_string(), "getChapterImageList");
    }

    #[test]
    fn test_classify_manga_list() {
        let value = json!({
            "list": [
                { "title": "Yotsuba", "url": "/m/1", "coverUrl": "https://x.test/1.jpg" }
            ]
        });

        let payload = PluginPayload::from_json(&EntryPoint::GetMangaList, value.clone());
        match &payload {
            PluginPayload::MangaList(result) => {
                assert_eq!(result.list[0].cover_url, "https://x.test/1.jpg");
            }
            other => panic!("expected manga list, got {:?}", other),
        }
        assert_eq!(payload.to_json().unwrap(), value);
    }

    #[test]
    fn test_classify_paginated_manga_data() {
        let value = json!({
            "title": "Yotsuba",
            "description": "",
            "coverUrl": "",
            "chapterList": [],
            "chapterListTotalPage": 4,
            "lastReadChapter": { "title": "Ch. 2", "url": "/c/2" }
        });

        let payload = PluginPayload::from_json(&EntryPoint::GetMangaData, value.clone());
        match &payload {
            PluginPayload::MangaData(data) => {
                assert_eq!(data.chapter_list_total_page, Some(4));
                assert_eq!(data.last_read_chapter.as_ref().unwrap().url, "/c/2");
            }
            other => panic!("expected manga data, got {:?}", other),
        }
        assert!(payload.validate().is_ok());
        assert_eq!(payload.to_json().unwrap(), value);
    }

    #[test]
    fn test_extra_fields_are_passed_through_untouched() {
        let value = json!({
            "list": [{ "title": "A", "url": "/a", "coverUrl": "", "author": "X" }],
            "hasMore": true
        });

        let payload = PluginPayload::from_json(&EntryPoint::GetMangaList, value.clone());
        assert_eq!(payload.kind(), "opaque");
        assert_eq!(payload.to_json().unwrap(), value);

        let images = json!([{ "url": "/1.webp", "width": 800, "height": 1200, "referer": "/c/1" }]);
        let payload = PluginPayload::from_json(&EntryPoint::GetChapterImageList, images.clone());
        assert_eq!(payload.to_json().unwrap(), images);
    }

    #[test]
    fn test_absent_chapter_list_stays_absent() {
        let value = json!({
            "title": "Yotsuba",
            "description": "",
            "coverUrl": "",
            "chapterListTotalPage": 4
        });

        let payload = PluginPayload::from_json(&EntryPoint::GetMangaData, value.clone());
        match &payload {
            PluginPayload::MangaData(data) => assert!(data.chapter_list.is_none()),
            other => panic!("expected manga data, got {:?}", other),
        }
        assert!(payload.validate().is_ok());
        assert_eq!(payload.to_json().unwrap(), value);
    }

    #[test]
    fn test_values_that_would_be_rewritten_stay_opaque() {
        let explicit_null = json!({
            "title": "Yotsuba",
            "description": "",
            "coverUrl": "",
            "chapterList": [],
            "lastReadChapter": null
        });
        let payload = PluginPayload::from_json(&EntryPoint::GetMangaData, explicit_null.clone());
        assert_eq!(payload, PluginPayload::Opaque(explicit_null));

        let float_size = json!([{ "url": "/1.webp", "width": 800.0, "height": 1200 }]);
        let payload = PluginPayload::from_json(&EntryPoint::GetChapterImageList, float_size.clone());
        assert_eq!(payload.to_json().unwrap(), float_size);
    }

    #[test]
    fn test_filter_name_accepts_numbers() {
        let value = json!([
            { "label": "Region", "name": "region", "options": [{ "label": "Japan", "value": "jp" }] },
            { "label": "Sort", "name": 2, "options": [] }
        ]);

        let payload = PluginPayload::from_json(&EntryPoint::SetMangaListFilterOptions, value.clone());
        match &payload {
            PluginPayload::FilterOptions(filters) => {
                assert_eq!(filters[0].name, FilterName::Text("region".to_string()));
                assert!(matches!(filters[1].name, FilterName::Number(_)));
            }
            other => panic!("expected filter options, got {:?}", other),
        }
        assert_eq!(payload.to_json().unwrap(), value);
    }

    #[test]
    fn test_mismatched_shape_stays_opaque() {
        let value = json!({ "images": [] });
        let payload = PluginPayload::from_json(&EntryPoint::GetChapterImageList, value.clone());
        assert_eq!(payload, PluginPayload::Opaque(value));

        let payload = PluginPayload::from_json(&EntryPoint::Other("search".into()), json!([1, 2]));
        assert_eq!(payload.kind(), "opaque");
    }

    #[test]
    fn test_validate_rejects_detail_without_chapters() {
        let payload = PluginPayload::MangaData(MangaDataResult {
            title: "Yotsuba".to_string(),
            description: String::new(),
            cover_url: String::new(),
            chapter_list: Some(Vec::new()),
            chapter_list_total_page: None,
            last_read_chapter: None,
        });

        let err = payload.validate().unwrap_err();
        assert!(matches!(err, BridgeError::ValidationError(_)));
    }

    #[test]
    fn test_validate_image_dimensions() {
        let payload = PluginPayload::ChapterImages(vec![
            ChapterImage { url: "https://x.test/1.webp".into(), width: 800, height: 1200 },
            ChapterImage { url: "https://x.test/2.webp".into(), width: 0, height: 1200 },
        ]);

        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("[1]"));
    }
}
