//! Regional filter list lifecycle
//!
//! Regional lists come from a catalog keyed by UUID, each tagged with the
//! locales it serves. At most one list is auto-selected per locale; the user
//! may enable additional lists on top. A list moves through
//! registered (rules loading) -> ready (rules compiled) -> enabled/disabled,
//! and is unregistered when the locale moves away (unless the user pinned
//! it). Enabling a list whose rules are still loading is rejected
//! transiently and retried when the load completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use sg_core::matcher::FilterMatcher;
use sg_core::rules::FilterRuleSet;

/// One catalog entry, as delivered by the list service.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionalCatalogEntry {
    pub uuid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub support_url: String,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub base64_public_key: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("regional catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a catalog blob.
pub fn parse_catalog(json: &str) -> Result<Vec<RegionalCatalogEntry>, CatalogError> {
    Ok(serde_json::from_str(json)?)
}

/// Case-insensitive primary-subtag locale match: `fr-CA` and `fr` both
/// match a list whose langs include `fr`.
pub fn find_for_locale<'a>(
    catalog: &'a [RegionalCatalogEntry],
    locale: &str,
) -> Option<&'a RegionalCatalogEntry> {
    let primary = locale.split('-').next().unwrap_or(locale);
    catalog.iter().find(|entry| {
        entry
            .langs
            .iter()
            .any(|lang| lang.eq_ignore_ascii_case(primary))
    })
}

pub fn is_supported_locale(catalog: &[RegionalCatalogEntry], locale: &str) -> bool {
    find_for_locale(catalog, locale).is_some()
}

/// List lifecycle failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    #[error("no filter list with uuid {0} in the catalog")]
    UnknownList(String),
    #[error("filter list {0} is still loading")]
    UpdatePending(String),
}

struct RegionalList {
    entry: RegionalCatalogEntry,
    matcher: FilterMatcher,
    ready: bool,
    enabled: bool,
}

/// Owns the registered regional lists and their matchers.
pub struct RegionalListManager {
    catalog: Vec<RegionalCatalogEntry>,
    lists: HashMap<String, RegionalList>,
    /// Lists the user enabled explicitly (survive locale changes)
    user_enabled: HashSet<String>,
    /// Enable requests deferred until the list finishes loading
    pending_enable: HashSet<String>,
    /// The list auto-selected for the current locale
    selected: Option<String>,
}

impl RegionalListManager {
    pub fn new() -> Self {
        Self {
            catalog: Vec::new(),
            lists: HashMap::new(),
            user_enabled: HashSet::new(),
            pending_enable: HashSet::new(),
            selected: None,
        }
    }

    pub fn set_catalog(&mut self, catalog: Vec<RegionalCatalogEntry>) {
        self.catalog = catalog;
    }

    pub fn catalog(&self) -> &[RegionalCatalogEntry] {
        &self.catalog
    }

    pub fn is_supported_locale(&self, locale: &str) -> bool {
        is_supported_locale(&self.catalog, locale)
    }

    /// Apply a locale change: unregister the previously auto-selected list
    /// if it no longer matches, then register and auto-enable the new one.
    /// One logical transaction; callers observe either the old or the new
    /// selection, never both.
    pub fn select_for_locale(&mut self, locale: &str) -> Option<String> {
        let new_uuid = find_for_locale(&self.catalog, locale).map(|e| e.uuid.clone());

        if self.selected == new_uuid {
            return new_uuid;
        }

        if let Some(old) = self.selected.take() {
            if !self.user_enabled.contains(&old) {
                self.lists.remove(&old);
                self.pending_enable.remove(&old);
                log::debug!("unregistered regional list {} on locale change", old);
            }
        }

        if let Some(uuid) = &new_uuid {
            self.register(uuid);
            self.pending_enable.insert(uuid.clone());
            self.selected = Some(uuid.clone());
        }

        new_uuid
    }

    /// Register a catalog list (rules not yet loaded). No-op if present.
    fn register(&mut self, uuid: &str) -> bool {
        if self.lists.contains_key(uuid) {
            return true;
        }
        let entry = match self.catalog.iter().find(|e| e.uuid == uuid) {
            Some(entry) => entry.clone(),
            None => return false,
        };
        self.lists.insert(
            uuid.to_string(),
            RegionalList {
                entry,
                matcher: FilterMatcher::new(FilterRuleSet::empty()),
                ready: false,
                enabled: false,
            },
        );
        true
    }

    /// User toggle for a list. Enabling a list whose rules are still
    /// loading is a transient rejection; the request is retried when the
    /// load completes.
    pub fn enable_list(&mut self, uuid: &str, enabled: bool) -> Result<(), ListError> {
        if !enabled {
            self.user_enabled.remove(uuid);
            self.pending_enable.remove(uuid);
            if let Some(list) = self.lists.get_mut(uuid) {
                list.enabled = false;
            }
            return Ok(());
        }

        if !self.register(uuid) {
            return Err(ListError::UnknownList(uuid.to_string()));
        }

        self.user_enabled.insert(uuid.to_string());

        let list = self.lists.get_mut(uuid).unwrap();
        if !list.ready {
            self.pending_enable.insert(uuid.to_string());
            log::debug!("enable of regional list {} deferred: still loading", uuid);
            return Err(ListError::UpdatePending(uuid.to_string()));
        }

        list.enabled = true;
        Ok(())
    }

    /// Rules for a registered list finished compiling. Completes any
    /// deferred enable.
    pub fn on_list_ready(&mut self, uuid: &str, rule_set: Arc<FilterRuleSet>) {
        if !self.register(uuid) {
            log::warn!("dropping rules for unknown regional list {}", uuid);
            return;
        }
        let list = self.lists.get_mut(uuid).unwrap();
        list.matcher.replace_rule_set(rule_set);
        list.ready = true;
        if self.pending_enable.remove(uuid) {
            list.enabled = true;
        }
    }

    /// Matchers of lists that are both ready and enabled.
    pub fn enabled_matchers(&self) -> impl Iterator<Item = &FilterMatcher> {
        self.lists
            .values()
            .filter(|l| l.ready && l.enabled)
            .map(|l| &l.matcher)
    }

    pub fn enable_tag_all(&mut self, tag: &str, enabled: bool) {
        for list in self.lists.values_mut() {
            list.matcher.enable_tag(tag, enabled);
        }
    }

    pub fn is_registered(&self, uuid: &str) -> bool {
        self.lists.contains_key(uuid)
    }

    pub fn is_ready(&self, uuid: &str) -> bool {
        self.lists.get(uuid).map(|l| l.ready).unwrap_or(false)
    }

    pub fn is_enabled(&self, uuid: &str) -> bool {
        self.lists.get(uuid).map(|l| l.enabled).unwrap_or(false)
    }

    pub fn registered_count(&self) -> usize {
        self.lists.len()
    }

    pub fn list_title(&self, uuid: &str) -> Option<&str> {
        self.lists.get(uuid).map(|l| l.entry.title.as_str())
    }
}

impl Default for RegionalListManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_compiler::compile_filter_list;

    const FR_UUID: &str = "9852EFC4-99E4-4F2D-A915-9C3196C7A1DE";

    fn catalog() -> Vec<RegionalCatalogEntry> {
        parse_catalog(&format!(
            r#"[
              {{
                "uuid": "{}",
                "url": "https://lists.example/liste_fr.txt",
                "title": "Liste FR",
                "langs": ["fr"],
                "support_url": "https://forums.example/fr",
                "component_id": "emaecjinaegfkoklcdafkiocjhoeilao",
                "base64_public_key": "",
                "desc": "Removes advertisements from French websites"
              }},
              {{
                "uuid": "FFFFFFFF-0000-0000-0000-000000000000",
                "url": "https://lists.example/liste_de.txt",
                "title": "Liste DE",
                "langs": ["de"]
              }}
            ]"#,
            FR_UUID
        ))
        .unwrap()
    }

    fn manager() -> RegionalListManager {
        let mut m = RegionalListManager::new();
        m.set_catalog(catalog());
        m
    }

    #[test]
    fn test_locale_matching_case_insensitive_primary_subtag() {
        let c = catalog();
        for locale in ["fr", "fR", "fr-FR", "fr-ca"] {
            assert!(is_supported_locale(&c, locale), "locale {}", locale);
            assert_eq!(find_for_locale(&c, locale).unwrap().uuid, FR_UUID);
        }
        assert!(!is_supported_locale(&c, "en-US"));
    }

    #[test]
    fn test_locale_selection_registers_and_auto_enables() {
        let mut m = manager();
        assert_eq!(m.select_for_locale("fr-CA").as_deref(), Some(FR_UUID));
        assert!(m.is_registered(FR_UUID));
        assert!(!m.is_enabled(FR_UUID));

        m.on_list_ready(FR_UUID, compile_filter_list("adbanner"));
        assert!(m.is_ready(FR_UUID));
        assert!(m.is_enabled(FR_UUID));
        assert_eq!(m.enabled_matchers().count(), 1);
    }

    #[test]
    fn test_locale_change_unregisters_old_list() {
        let mut m = manager();
        m.select_for_locale("fr");
        m.on_list_ready(FR_UUID, compile_filter_list(""));

        m.select_for_locale("de");
        assert!(!m.is_registered(FR_UUID));
        assert!(m.is_registered("FFFFFFFF-0000-0000-0000-000000000000"));
        assert_eq!(m.registered_count(), 1);
    }

    #[test]
    fn test_user_enabled_list_survives_locale_change() {
        let mut m = manager();
        m.select_for_locale("fr");
        m.on_list_ready(FR_UUID, compile_filter_list(""));
        m.enable_list(FR_UUID, true).unwrap();

        m.select_for_locale("de");
        assert!(m.is_registered(FR_UUID));
        assert!(m.is_enabled(FR_UUID));
    }

    #[test]
    fn test_enable_while_loading_is_transient() {
        let mut m = manager();
        m.select_for_locale("fr");
        // Rules not loaded yet
        assert_eq!(
            m.enable_list(FR_UUID, true),
            Err(ListError::UpdatePending(FR_UUID.to_string()))
        );
        assert!(!m.is_enabled(FR_UUID));

        // The deferred enable lands once the load completes
        m.on_list_ready(FR_UUID, compile_filter_list(""));
        assert!(m.is_enabled(FR_UUID));
    }

    #[test]
    fn test_enable_unknown_uuid() {
        let mut m = manager();
        assert!(matches!(
            m.enable_list("not-a-uuid", true),
            Err(ListError::UnknownList(_))
        ));
    }

    #[test]
    fn test_disable_clears_enabled_state() {
        let mut m = manager();
        m.select_for_locale("fr");
        m.on_list_ready(FR_UUID, compile_filter_list(""));
        assert!(m.is_enabled(FR_UUID));

        m.enable_list(FR_UUID, false).unwrap();
        assert!(!m.is_enabled(FR_UUID));
        assert_eq!(m.enabled_matchers().count(), 0);
    }
}
