//! Figure deduplication across concurrently processed pages.
//!
//! [`FigureRegistry`] is the only mutable state shared between page workers.
//! It is a cheap `Clone` handle passed into every worker, never a global.
//!
//! Two mechanisms keep descriptions unique:
//!
//! - **Commit**: [`FigureRegistry::insert_if_absent`] checks and inserts under
//!   one lock. A second writer for the same key gets [`RaceLost`] back and
//!   must drop its own description.
//! - **Claim**: before spending a vision call, a worker takes the per-key
//!   async lock from [`FigureRegistry::claim`]. A page racing on the same key
//!   waits, then finds the figure already committed and skips it, so the
//!   describe call is made once per key.
//!   The lock is dropped from the registry once nobody holds or awaits it.

use crate::config::FigureKeyPolicy;
use crate::error::{PageError, RaceLost};
use crate::output::Figure;
use crate::pipeline::call::{call_with_retry, CallFailure, CallPolicy};
use crate::pipeline::postprocess::clean_for_speech;
use crate::pipeline::segment::Page;
use crate::pipeline::vision::{VisionCapability, VisionTask};
use crate::prompts::parse_presence;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Key under which a figure description is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FigureKey {
    /// Owning chapter, when descriptions are scoped per chapter.
    pub chapter: Option<u32>,
    pub name: String,
}

impl FigureKey {
    pub fn new(policy: FigureKeyPolicy, chapter: u32, name: impl Into<String>) -> Self {
        let chapter = match policy {
            FigureKeyPolicy::Name => None,
            FigureKeyPolicy::ChapterAndName => Some(chapter),
        };
        Self {
            chapter,
            name: name.into(),
        }
    }
}

impl fmt::Display for FigureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chapter {
            Some(ch) => write!(f, "chapter {} figure {}", ch, self.name),
            None => write!(f, "figure {}", self.name),
        }
    }
}

/// Shared "already described" map.
#[derive(Clone, Default)]
pub struct FigureRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    figures: Mutex<HashMap<FigureKey, Figure>>,
    claims: Mutex<HashMap<FigureKey, Arc<AsyncMutex<()>>>>,
}

impl FigureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &FigureKey) -> bool {
        self.figures().contains_key(key)
    }

    pub fn get(&self, key: &FigureKey) -> Option<Figure> {
        self.figures().get(key).cloned()
    }

    /// Commit `figure` under `key` unless the key is already taken.
    pub fn insert_if_absent(&self, key: FigureKey, figure: Figure) -> Result<(), RaceLost> {
        let mut figures = self.figures();
        if let Some(existing) = figures.get(&key) {
            return Err(RaceLost {
                existing: existing.clone(),
            });
        }
        figures.insert(key, figure);
        Ok(())
    }

    /// Wait for exclusive resolution rights on `key`.
    ///
    /// The per-key lock lives only while someone holds or awaits it; the
    /// last [`Claim`] dropped removes it from the registry.
    pub async fn claim(&self, key: &FigureKey) -> Claim {
        let lock = Arc::clone(self.claims().entry(key.clone()).or_default());
        Claim {
            key: key.clone(),
            registry: self.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Keys with a claim currently held or awaited.
    pub fn pending_claims(&self) -> usize {
        self.claims().len()
    }

    pub fn len(&self) -> usize {
        self.figures().len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures().is_empty()
    }

    /// Every committed figure, ordered by page then name.
    pub fn snapshot(&self) -> Vec<Figure> {
        let mut all: Vec<Figure> = self.figures().values().cloned().collect();
        all.sort_by(|a, b| {
            a.page_number
                .cmp(&b.page_number)
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    fn figures(&self) -> std::sync::MutexGuard<'_, HashMap<FigureKey, Figure>> {
        self.inner
            .figures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashMap<FigureKey, Arc<AsyncMutex<()>>>> {
        self.inner
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to resolve one [`FigureKey`], released on drop.
pub struct Claim {
    key: FigureKey,
    registry: FigureRegistry,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        // Waiters clone the lock under the map mutex, so a count of two
        // (map entry plus this guard) means nobody else is queued.
        let mut claims = self.registry.claims();
        if claims
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            claims.remove(&self.key);
        }
    }
}

impl fmt::Debug for FigureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FigureRegistry")
            .field("figures", &self.len())
            .finish()
    }
}

/// Confirms and describes the figures a page references.
pub struct FigureResolver {
    vision: Arc<dyn VisionCapability>,
    policy: CallPolicy,
    key_policy: FigureKeyPolicy,
}

impl FigureResolver {
    pub fn new(vision: Arc<dyn VisionCapability>, policy: CallPolicy, key_policy: FigureKeyPolicy) -> Self {
        Self {
            vision,
            policy,
            key_policy,
        }
    }

    /// Figures newly described on `page`, in reference order.
    ///
    /// References already in the registry are skipped, as are references the
    /// presence check says are not drawn on this page.
    pub async fn resolve(
        &self,
        page: &Page,
        chapter: u32,
        registry: &FigureRegistry,
    ) -> Result<Vec<Figure>, PageError> {
        let mut resolved = Vec::new();

        for name in &page.figure_refs {
            let key = FigureKey::new(self.key_policy, chapter, name.as_str());
            if registry.contains(&key) {
                debug!("Page {}: {} already described", page.number, key);
                continue;
            }

            let _claim = registry.claim(&key).await;
            if registry.contains(&key) {
                debug!("Page {}: {} described while waiting", page.number, key);
                continue;
            }

            let present = self
                .ask(page, name, VisionTask::FigurePresent { figure: name.clone() })
                .await?;
            if !parse_presence(&present) {
                debug!("Page {}: {} referenced but not drawn here", page.number, key);
                continue;
            }

            let description = self
                .ask(
                    page,
                    name,
                    VisionTask::DescribeFigure {
                        figure: name.clone(),
                        page_text: page.raw_text.clone(),
                    },
                )
                .await?;

            let figure = Figure {
                name: name.clone(),
                page_number: page.number,
                description: clean_for_speech(&description),
            };
            match registry.insert_if_absent(key, figure.clone()) {
                Ok(()) => resolved.push(figure),
                Err(lost) => debug!("Page {}: discarding description, {}", page.number, lost),
            }
        }

        Ok(resolved)
    }

    async fn ask(&self, page: &Page, figure: &str, task: VisionTask) -> Result<String, PageError> {
        let label = format!("page {} figure {} {}", page.number, figure, task.operation());
        call_with_retry(&label, &self.policy, || self.vision.describe(&page.image, &task))
            .await
            .map(|(text, _)| text)
            .map_err(|failure| match failure {
                CallFailure::TimedOut { secs } => PageError::Timeout {
                    page: page.number,
                    operation: task.operation().to_string(),
                    secs,
                },
                CallFailure::Exhausted { detail, .. } => PageError::FigureDescription {
                    page: page.number,
                    figure: figure.to_string(),
                    detail,
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::pipeline::vision::PageImage;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Says every figure is present, describes slowly, counts describe calls.
    struct SlowVision {
        present: bool,
        describes: AtomicUsize,
        checks: AtomicUsize,
    }

    impl SlowVision {
        fn new(present: bool) -> Arc<Self> {
            Arc::new(Self {
                present,
                describes: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionCapability for SlowVision {
        async fn describe(&self, _: &PageImage, task: &VisionTask) -> Result<String, ServiceError> {
            match task {
                VisionTask::FigurePresent { .. } => {
                    self.checks.fetch_add(1, Ordering::SeqCst);
                    Ok(String::from(if self.present { "True" } else { "False" }))
                }
                VisionTask::DescribeFigure { figure, .. } => {
                    self.describes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(format!("The figure shows diagram {figure}."))
                }
                VisionTask::CleanupPage { .. } => Err(ServiceError::Unusable("unexpected".into())),
            }
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    fn page(number: usize, refs: &[&str]) -> Page {
        Page {
            number,
            raw_text: format!("Text on page {number}"),
            cleaned_text: format!("Text on page {number}"),
            image: PageImage {
                path: PathBuf::from(format!("pages/{number}/image/page.png")),
                png: Vec::new(),
            },
            figure_refs: refs.iter().map(|s| s.to_string()).collect(),
            figures: Vec::new(),
        }
    }

    fn figure(name: &str, page_number: usize) -> Figure {
        Figure {
            name: name.into(),
            page_number,
            description: format!("figure on page {page_number}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_have_one_winner() {
        let registry = FigureRegistry::new();
        let key = FigureKey::new(FigureKeyPolicy::Name, 1, "1.1");

        let handles: Vec<_> = (1..=8)
            .map(|page_number| {
                let registry = registry.clone();
                let key = key.clone();
                tokio::spawn(async move { registry.insert_if_absent(key, figure("1.1", page_number)) })
            })
            .collect();

        let mut winners = 0;
        let mut losers = Vec::new();
        for h in handles {
            match h.await.unwrap() {
                Ok(()) => winners += 1,
                Err(lost) => losers.push(lost.existing),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(losers.len(), 7);
        let committed = registry.get(&key).unwrap();
        assert!(losers.iter().all(|f| *f == committed));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_pages_describe_a_shared_figure_once() {
        let vision = SlowVision::new(true);
        let resolver = Arc::new(FigureResolver::new(vision.clone(), policy(), FigureKeyPolicy::Name));
        let registry = FigureRegistry::new();

        let (a, b) = tokio::join!(
            {
                let resolver = Arc::clone(&resolver);
                let registry = registry.clone();
                async move { resolver.resolve(&page(2, &["1.1"]), 1, &registry).await }
            },
            {
                let resolver = Arc::clone(&resolver);
                let registry = registry.clone();
                async move { resolver.resolve(&page(3, &["1.1"]), 1, &registry).await }
            }
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(vision.describes.load(Ordering::SeqCst), 1);
        assert_eq!(a.len() + b.len(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].name, "1.1");
        assert_eq!(registry.pending_claims(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn claims_are_released_once_figures_resolve() {
        let vision = SlowVision::new(true);
        let resolver = Arc::new(FigureResolver::new(vision.clone(), policy(), FigureKeyPolicy::Name));
        let registry = FigureRegistry::new();

        let tasks: Vec<_> = (1..=40)
            .map(|n| {
                let resolver = Arc::clone(&resolver);
                let registry = registry.clone();
                let name = format!("{}.{}", n % 10 + 1, n % 4 + 1);
                tokio::spawn(async move {
                    resolver.resolve(&page(n, &[name.as_str()]), 1, &registry).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.len(), 20);
        assert_eq!(vision.describes.load(Ordering::SeqCst), 20);
        assert_eq!(registry.pending_claims(), 0);
    }

    #[tokio::test]
    async fn queued_claim_outlives_the_first_holder() {
        let registry = FigureRegistry::new();
        let key = FigureKey::new(FigureKeyPolicy::Name, 1, "3.2");

        let first = registry.claim(&key).await;
        let waiter = tokio::spawn({
            let registry = registry.clone();
            let key = key.clone();
            async move {
                let _second = registry.claim(&key).await;
                registry.pending_claims()
            }
        });
        tokio::task::yield_now().await;
        drop(first);

        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(registry.pending_claims(), 0);
    }

    #[test]
    fn absent_figure_is_skipped_without_error() {
        let vision = SlowVision::new(false);
        let resolver = FigureResolver::new(vision.clone(), policy(), FigureKeyPolicy::Name);
        let registry = FigureRegistry::new();

        let figures = tokio_test::block_on(resolver.resolve(&page(4, &["2.1"]), 1, &registry)).unwrap();

        assert!(figures.is_empty());
        assert!(registry.is_empty());
        assert_eq!(registry.pending_claims(), 0);
        assert_eq!(vision.checks.load(Ordering::SeqCst), 1);
        assert_eq!(vision.describes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn name_policy_dedups_across_chapters() {
        let vision = SlowVision::new(true);
        let resolver = FigureResolver::new(vision.clone(), policy(), FigureKeyPolicy::Name);
        let registry = FigureRegistry::new();

        let first = resolver.resolve(&page(2, &["1.1"]), 1, &registry).await.unwrap();
        let second = resolver.resolve(&page(30, &["1.1"]), 2, &registry).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(vision.describes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chapter_policy_scopes_names() {
        let vision = SlowVision::new(true);
        let resolver = FigureResolver::new(vision.clone(), policy(), FigureKeyPolicy::ChapterAndName);
        let registry = FigureRegistry::new();

        let first = resolver.resolve(&page(2, &["1.1"]), 1, &registry).await.unwrap();
        let second = resolver.resolve(&page(30, &["1.1"]), 2, &registry).await.unwrap();
        let repeat = resolver.resolve(&page(31, &["1.1"]), 2, &registry).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(repeat.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(vision.describes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn multiple_refs_keep_reference_order() {
        let vision = SlowVision::new(true);
        let resolver = FigureResolver::new(vision, policy(), FigureKeyPolicy::Name);
        let registry = FigureRegistry::new();

        let figures = resolver
            .resolve(&page(5, &["2.3", "1.9"]), 1, &registry)
            .await
            .unwrap();
        let names: Vec<_> = figures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["2.3", "1.9"]);
        assert_eq!(figures[0].description, "The figure shows diagram 2.3.");
    }

    #[test]
    fn key_display() {
        assert_eq!(
            FigureKey::new(FigureKeyPolicy::Name, 3, "1.1").to_string(),
            "figure 1.1"
        );
        assert_eq!(
            FigureKey::new(FigureKeyPolicy::ChapterAndName, 3, "1.1").to_string(),
            "chapter 3 figure 1.1"
        );
    }
}
