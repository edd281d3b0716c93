//! Context source reading org material from a content directory.
//!
//! Layout under the root:
//!
//! ```text
//! company.md                  company header (always included)
//! departments/<id>.md         included when selected
//! roles/<id>.md               included when selected
//! projects/<id>.md            included when selected
//! playbooks/<id>.md           included when selected
//! playbooks/auto/*.md         always included (auto-inject)
//! decisions/<id>.md           included when selected
//! ```
//!
//! A fragment's title is its first `# ` heading, falling back to the file
//! stem. Selectors pointing at missing files are skipped with a warning;
//! a sparse library is normal, not an error.

use async_trait::async_trait;
use council_application::ports::context_source::{ContextError, ContextSelectors, ContextSource};
use council_domain::{CompanyId, Fragment, FragmentKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct DirectoryContextSource {
    root: PathBuf,
}

impl DirectoryContextSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_fragment(&self, kind: FragmentKind, path: &Path) -> Option<Fragment> {
        let body = match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "context file unreadable, skipped");
                return None;
            }
        };
        Some(make_fragment(kind, path, body))
    }

    async fn read_selected(
        &self,
        kind: FragmentKind,
        dir: &str,
        ids: &[String],
        out: &mut Vec<Fragment>,
    ) {
        for id in ids {
            let path = self.root.join(dir).join(format!("{id}.md"));
            if let Some(fragment) = self.read_fragment(kind, &path).await {
                out.push(fragment);
            }
        }
    }

    async fn read_auto_playbooks(&self, out: &mut Vec<Fragment>) {
        let dir = self.root.join("playbooks").join("auto");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut paths = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                paths.push(path);
            }
        }
        // Directory iteration order is not stable; assembly must be.
        paths.sort();

        for path in paths {
            if let Some(fragment) = self.read_fragment(FragmentKind::Playbook, &path).await {
                out.push(fragment);
            }
        }
    }
}

fn make_fragment(kind: FragmentKind, path: &Path, body: String) -> Fragment {
    let title = body
        .lines()
        .find_map(|line| line.strip_prefix("# ").map(str::trim))
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "untitled".to_string())
        });
    Fragment::new(kind, title, body.trim().to_string())
}

#[async_trait]
impl ContextSource for DirectoryContextSource {
    async fn fetch(
        &self,
        company: Option<&CompanyId>,
        selectors: &ContextSelectors,
    ) -> Result<Vec<Fragment>, ContextError> {
        let mut fragments = Vec::new();

        let company_file = self.root.join("company.md");
        if company_file.exists() {
            if let Some(fragment) = self
                .read_fragment(FragmentKind::Company, &company_file)
                .await
            {
                fragments.push(fragment);
            }
        }

        self.read_selected(
            FragmentKind::Department,
            "departments",
            &selectors.departments,
            &mut fragments,
        )
        .await;
        self.read_selected(FragmentKind::Role, "roles", &selectors.roles, &mut fragments)
            .await;
        if let Some(project) = &selectors.project {
            self.read_selected(
                FragmentKind::Project,
                "projects",
                std::slice::from_ref(project),
                &mut fragments,
            )
            .await;
        }
        self.read_selected(
            FragmentKind::Playbook,
            "playbooks",
            &selectors.playbooks,
            &mut fragments,
        )
        .await;
        self.read_auto_playbooks(&mut fragments).await;
        self.read_selected(
            FragmentKind::PriorDecision,
            "decisions",
            &selectors.prior_decisions,
            &mut fragments,
        )
        .await;

        debug!(
            company = company.map(|c| c.as_str()).unwrap_or("-"),
            count = fragments.len(),
            "context snapshot read"
        );
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn reads_selected_and_auto_injected_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "company.md", "# Acme\n\nWe make widgets.").await;
        write(root, "departments/eng.md", "# Engineering\n\nBuilds things.").await;
        write(root, "departments/sales.md", "Sells things.").await;
        write(root, "playbooks/auto/safety.md", "# Safety first\n\nAlways.").await;
        write(root, "decisions/d1.md", "# Q1 pricing\n\nWe held prices.").await;

        let source = DirectoryContextSource::new(root);
        let selectors = ContextSelectors {
            departments: vec!["eng".into()],
            prior_decisions: vec!["d1".into()],
            ..ContextSelectors::default()
        };
        let fragments = source.fetch(None, &selectors).await.unwrap();

        let titles: Vec<(&FragmentKind, &str)> = fragments
            .iter()
            .map(|f| (&f.kind, f.title.as_str()))
            .collect();
        assert!(titles.contains(&(&FragmentKind::Company, "Acme")));
        assert!(titles.contains(&(&FragmentKind::Department, "Engineering")));
        assert!(titles.contains(&(&FragmentKind::Playbook, "Safety first")));
        assert!(titles.contains(&(&FragmentKind::PriorDecision, "Q1 pricing")));
        // sales.md was not selected.
        assert_eq!(fragments.len(), 4);
    }

    #[tokio::test]
    async fn missing_selectors_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryContextSource::new(dir.path());
        let selectors = ContextSelectors {
            departments: vec!["nope".into()],
            ..ContextSelectors::default()
        };
        let fragments = source.fetch(None, &selectors).await.unwrap();
        assert!(fragments.is_empty());
    }

    #[tokio::test]
    async fn title_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "roles/cto.md", "Sets technical direction.").await;

        let source = DirectoryContextSource::new(dir.path());
        let selectors = ContextSelectors {
            roles: vec!["cto".into()],
            ..ContextSelectors::default()
        };
        let fragments = source.fetch(None, &selectors).await.unwrap();
        assert_eq!(fragments[0].title, "cto");
    }
}
