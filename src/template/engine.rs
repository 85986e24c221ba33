//! File-backed template engine with a synchronized parse cache.
//!
//! Templates live as `.hbs` (preferred) or `.html` files in a single
//! directory. The first render of a name reads and compiles the file and
//! registers it in the internal handlebars registry; later renders are
//! served from the registry without touching the file system. There is
//! no automatic invalidation on file change; [`TemplateEngine::clear_cache`]
//! provides hot-reload semantics.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Supported template file extensions, in resolution priority order.
const TEMPLATE_EXTENSIONS: [&str; 2] = ["hbs", "html"];

/// Template engine errors.
#[derive(Debug, Error)]
pub enum TemplateEngineError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse template {0}: {1}")]
    Parse(String, String),

    #[error("failed to render template {0}: {1}")]
    Render(String, String),
}

/// Result type for template engine operations
pub type TemplateEngineResult<T> = Result<T, TemplateEngineError>;

/// Loads, caches and renders file-based templates.
pub struct TemplateEngine {
    template_dir: PathBuf,
    registry: RwLock<Handlebars<'static>>,
}

impl TemplateEngine {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            registry: RwLock::new(strict_registry()),
        }
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// Render the named template with the provided data.
    ///
    /// Resolution tries `<name>.hbs` then `<name>.html`. The compiled
    /// template is cached on first use; parse failures are not cached, so
    /// a fixed file takes effect on the next call.
    pub async fn render(&self, name: &str, data: &Value) -> TemplateEngineResult<String> {
        {
            let registry = self.registry.read().await;
            if registry.get_template(name).is_some() {
                return registry
                    .render(name, data)
                    .map_err(|e| TemplateEngineError::Render(name.to_string(), e.to_string()));
            }
        }

        let path = self.resolve(name)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| TemplateEngineError::Io {
                path: path.clone(),
                source,
            })?;

        let mut registry = self.registry.write().await;
        registry
            .register_template_string(name, &content)
            .map_err(|e| TemplateEngineError::Parse(name.to_string(), e.to_string()))?;

        tracing::debug!(template = %name, path = %path.display(), "Template compiled and cached");

        registry
            .render(name, data)
            .map_err(|e| TemplateEngineError::Render(name.to_string(), e.to_string()))
    }

    /// List the cache-eligible template names in the template directory,
    /// one entry per file, extensions stripped.
    pub fn list_templates(&self) -> TemplateEngineResult<Vec<String>> {
        let entries =
            std::fs::read_dir(&self.template_dir).map_err(|source| TemplateEngineError::Io {
                path: self.template_dir.clone(),
                source,
            })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| TemplateEngineError::Io {
                path: self.template_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let has_template_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| TEMPLATE_EXTENSIONS.contains(&e))
                .unwrap_or(false);
            if !has_template_ext {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        Ok(names)
    }

    /// Drop every cached template so the next render re-reads the files.
    pub async fn clear_cache(&self) {
        let mut registry = self.registry.write().await;
        *registry = strict_registry();
        tracing::debug!("Template cache cleared");
    }

    fn resolve(&self, name: &str) -> TemplateEngineResult<PathBuf> {
        for ext in TEMPLATE_EXTENSIONS {
            let candidate = self.template_dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(TemplateEngineError::NotFound(name.to_string()))
    }
}

fn strict_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    // Missing fields are render errors, not silently empty output
    registry.set_strict_mode(true);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_template(dir: &TempDir, file_name: &str, content: &str) {
        std::fs::write(dir.path().join(file_name), content).unwrap();
    }

    #[tokio::test]
    async fn test_render_substitutes_variables() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "greeting.hbs", "Hello {{name}}");
        let engine = TemplateEngine::new(dir.path());

        let rendered = engine
            .render("greeting", &json!({"name": "Ann"}))
            .await
            .unwrap();
        assert_eq!(rendered, "Hello Ann");
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "greeting.hbs", "Hello {{name}}");
        let engine = TemplateEngine::new(dir.path());

        let data = json!({"name": "Ann"});
        let first = engine.render("greeting", &data).await.unwrap();
        let second = engine.render("greeting", &data).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_hbs_takes_priority_over_html() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "page.hbs", "from hbs");
        write_template(&dir, "page.html", "from html");
        let engine = TemplateEngine::new(dir.path());

        let rendered = engine.render("page", &json!({})).await.unwrap();
        assert_eq!(rendered, "from hbs");
    }

    #[tokio::test]
    async fn test_html_fallback() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "page.html", "plain html");
        let engine = TemplateEngine::new(dir.path());

        let rendered = engine.render("page", &json!({})).await.unwrap();
        assert_eq!(rendered, "plain html");
    }

    #[tokio::test]
    async fn test_unknown_name_fails_without_poisoning_cache() {
        let dir = TempDir::new().unwrap();
        let engine = TemplateEngine::new(dir.path());

        let err = engine.render("late", &json!({})).await.unwrap_err();
        assert!(matches!(err, TemplateEngineError::NotFound(_)));

        // Creating the file afterwards must make the next render succeed
        write_template(&dir, "late.hbs", "better late");
        let rendered = engine.render("late", &json!({})).await.unwrap();
        assert_eq!(rendered, "better late");
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_cached() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "broken.hbs", "Hello {{name");
        let engine = TemplateEngine::new(dir.path());

        let err = engine.render("broken", &json!({})).await.unwrap_err();
        assert!(matches!(err, TemplateEngineError::Parse(_, _)));

        write_template(&dir, "broken.hbs", "Hello {{name}}");
        let rendered = engine
            .render("broken", &json!({"name": "Ann"}))
            .await
            .unwrap();
        assert_eq!(rendered, "Hello Ann");
    }

    #[tokio::test]
    async fn test_missing_field_is_render_error() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "strict.hbs", "Hello {{name}}");
        let engine = TemplateEngine::new(dir.path());

        let err = engine.render("strict", &json!({})).await.unwrap_err();
        assert!(matches!(err, TemplateEngineError::Render(_, _)));
    }

    #[tokio::test]
    async fn test_cache_serves_stale_content_until_cleared() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "cached.hbs", "version one");
        let engine = TemplateEngine::new(dir.path());

        assert_eq!(engine.render("cached", &json!({})).await.unwrap(), "version one");

        write_template(&dir, "cached.hbs", "version two");
        // Still cached
        assert_eq!(engine.render("cached", &json!({})).await.unwrap(), "version one");

        engine.clear_cache().await;
        assert_eq!(engine.render("cached", &json!({})).await.unwrap(), "version two");
    }

    #[tokio::test]
    async fn test_list_templates() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "welcome.hbs", "hi");
        write_template(&dir, "reset.html", "reset");
        write_template(&dir, "notes.txt", "ignored");
        let engine = TemplateEngine::new(dir.path());

        let mut names = engine.list_templates().unwrap();
        names.sort();
        assert_eq!(names, vec!["reset", "welcome"]);
    }

    #[tokio::test]
    async fn test_list_templates_missing_directory() {
        let engine = TemplateEngine::new("/nonexistent/template/dir");
        assert!(matches!(
            engine.list_templates(),
            Err(TemplateEngineError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_first_renders() {
        let dir = TempDir::new().unwrap();
        write_template(&dir, "shared.hbs", "Hello {{name}}");
        let engine = std::sync::Arc::new(TemplateEngine::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.render("shared", &json!({"name": format!("w{}", i)})).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let rendered = handle.await.unwrap().unwrap();
            assert_eq!(rendered, format!("Hello w{}", i));
        }
    }
}
