// src/types/model.rs

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

/// Drop unnamed entries and sort by id.
pub fn normalize_models(mut models: Vec<ModelInfo>) -> Vec<ModelInfo> {
    models.retain(|m| !m.id.is_empty());
    models.sort_by(|a, b| a.id.cmp(&b.id));
    models
}

/// Model picker order: entries matching a priority pattern first, then the full list.
///
/// Returns `(priority, all)`; the caller shows a separator between the two when
/// `priority` is non-empty.
pub fn order_models(models: &[ModelInfo], priority: &[String]) -> (Vec<ModelInfo>, Vec<ModelInfo>) {
    let preferred = models
        .iter()
        .filter(|m| priority.iter().any(|p| m.id.contains(p.as_str())))
        .cloned()
        .collect();
    (preferred, models.to_vec())
}

/// Keep the last used model when it is still offered.
pub fn pick_model(models: &[ModelInfo], last_model: Option<&str>) -> Option<String> {
    match last_model {
        Some(last) if models.iter().any(|m| m.id == last) => Some(last.to_string()),
        _ => models.first().map(|m| m.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(models: &[ModelInfo]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn normalize_filters_and_sorts() {
        let models = normalize_models(vec![
            ModelInfo::new("gpt-4.1"),
            ModelInfo::new(""),
            ModelInfo::new("deepseek-v3"),
        ]);
        assert_eq!(ids(&models), vec!["deepseek-v3", "gpt-4.1"]);
    }

    #[test]
    fn priority_matches_by_substring() {
        let models = normalize_models(vec![
            ModelInfo::new("claude-sonnet-4-5"),
            ModelInfo::new("gpt-4.1-mini"),
            ModelInfo::new("qwen3-max"),
        ]);
        let (preferred, all) = order_models(&models, &["qwen3".to_string(), "gpt-4.1".to_string()]);
        assert_eq!(ids(&preferred), vec!["gpt-4.1-mini", "qwen3-max"]);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn last_model_survives_when_offered() {
        let models = vec![ModelInfo::new("a"), ModelInfo::new("b")];
        assert_eq!(pick_model(&models, Some("b")), Some("b".to_string()));
        assert_eq!(pick_model(&models, Some("gone")), Some("a".to_string()));
        assert_eq!(pick_model(&[], None), None);
    }
}
