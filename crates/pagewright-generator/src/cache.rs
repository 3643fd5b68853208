//! Template and model cache.
//!
//! A [`Generation`] is one consistent snapshot of the template registry and
//! the site model. The [`CacheController`] owns at most one published
//! generation, populates it on demand and drops it on invalidation.
//!
//! Population is serialized: callers that arrive while a load is running
//! wait for it and share its result instead of starting another one. An
//! invalidation that lands during a load bumps the epoch, so the finished
//! load is handed to its callers but never published.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pagewright_core::{Config, CoreError, ModelPolicy, SiteModel};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::template::{TemplateError, TemplateRegistry};

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Site model could not be loaded.
    #[error("site model error: {0}")]
    Model(#[from] CoreError),

    /// Template registry could not be loaded.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// The background load task failed.
    #[error("population task failed: {0}")]
    Join(String),
}

/// A consistent template registry and site model pair.
#[derive(Debug)]
pub struct Generation {
    model: SiteModel,
    templates: TemplateRegistry,
}

impl Generation {
    /// Pair a model with a registry.
    pub fn new(model: SiteModel, templates: TemplateRegistry) -> Self {
        Self { model, templates }
    }

    /// The site model.
    pub fn model(&self) -> &SiteModel {
        &self.model
    }

    /// The template registry.
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }
}

/// Produces fresh generations.
pub trait GenerationSource: Send + Sync + 'static {
    /// Load a complete generation. Blocking.
    fn load(&self) -> Result<Generation, CacheError>;
}

/// Loads generations from the template source tree and the model file.
#[derive(Debug, Clone)]
pub struct FsGenerationSource {
    templates_root: PathBuf,
    model_path: PathBuf,
    policy: ModelPolicy,
}

impl FsGenerationSource {
    /// Create a source reading the given locations.
    pub fn new(
        templates_root: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        policy: ModelPolicy,
    ) -> Self {
        Self {
            templates_root: templates_root.into(),
            model_path: model_path.into(),
            policy,
        }
    }

    /// Source for the paths in `config`.
    pub fn from_config(config: &Config, policy: ModelPolicy) -> Self {
        Self::new(config.templates_dir(), config.model_path(), policy)
    }
}

impl GenerationSource for FsGenerationSource {
    fn load(&self) -> Result<Generation, CacheError> {
        let model = SiteModel::load_with_policy(&self.model_path, self.policy)?;
        let templates = TemplateRegistry::load(&self.templates_root)?;
        Ok(Generation::new(model, templates))
    }
}

/// Lifecycle of the cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Populating,
    Populated,
}

/// Cache lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A load started.
    Populating,
    /// A load finished and was published.
    Populated {
        layouts: usize,
        partials: usize,
        helpers: usize,
    },
    /// A load failed; the cache is absent.
    PopulateFailed { message: String },
    /// The cache was dropped, optionally because `trigger` changed.
    Invalidated { trigger: Option<PathBuf> },
}

const EVENT_CAPACITY: usize = 16;

#[derive(Debug)]
struct Slot {
    state: CacheState,
    generation: Option<Arc<Generation>>,
    epoch: u64,
}

/// Owns the published generation.
pub struct CacheController {
    source: Arc<dyn GenerationSource>,
    slot: Mutex<Slot>,
    populate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<CacheEvent>,
}

impl std::fmt::Debug for CacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheController")
            .field("slot", &*self.slot())
            .finish_non_exhaustive()
    }
}

impl CacheController {
    /// Create an empty cache over `source`.
    pub fn new(source: Arc<dyn GenerationSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            slot: Mutex::new(Slot {
                state: CacheState::Absent,
                generation: None,
                epoch: 0,
            }),
            populate: tokio::sync::Mutex::new(()),
            events,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CacheState {
        self.slot().state
    }

    /// The published generation, if any.
    pub fn current(&self) -> Option<Arc<Generation>> {
        self.slot().generation.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Return the published generation, loading one if absent.
    ///
    /// Concurrent callers share a single load. On failure the cache stays
    /// absent and the next call retries.
    pub async fn ensure(&self) -> Result<Arc<Generation>, CacheError> {
        if let Some(generation) = self.current() {
            return Ok(generation);
        }

        let _populating = self.populate.lock().await;
        if let Some(generation) = self.current() {
            debug!("joined in-flight cache population");
            return Ok(generation);
        }

        let epoch = {
            let mut slot = self.slot();
            slot.state = CacheState::Populating;
            slot.epoch
        };
        self.notify(CacheEvent::Populating);
        debug!("populating template cache");

        let guard = PopulateGuard { cache: self, epoch };
        let source = Arc::clone(&self.source);
        let loaded = match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(result) => result,
            Err(e) => Err(CacheError::Join(e.to_string())),
        };
        std::mem::forget(guard);

        let mut slot = self.slot();
        let current_epoch = slot.epoch == epoch;
        match loaded {
            Ok(generation) => {
                let generation = Arc::new(generation);
                if current_epoch {
                    slot.generation = Some(Arc::clone(&generation));
                    slot.state = CacheState::Populated;
                    drop(slot);

                    let templates = generation.templates();
                    let event = CacheEvent::Populated {
                        layouts: templates.layout_names().count(),
                        partials: templates.partial_names().count(),
                        helpers: templates.helper_names().count(),
                    };
                    info!(?event, "template cache populated");
                    self.notify(event);
                } else {
                    drop(slot);
                    debug!("cache invalidated during population, result not published");
                }
                Ok(generation)
            }
            Err(err) => {
                if current_epoch {
                    slot.state = CacheState::Absent;
                }
                drop(slot);

                warn!(error = %err, "template cache population failed");
                self.notify(CacheEvent::PopulateFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Drop the published generation.
    ///
    /// A population running concurrently will not publish its result.
    pub fn invalidate(&self, trigger: Option<&Path>) {
        {
            let mut slot = self.slot();
            slot.epoch = slot.epoch.wrapping_add(1);
            slot.generation = None;
            slot.state = CacheState::Absent;
        }

        match trigger {
            Some(path) => info!(trigger = %path.display(), "template cache invalidated"),
            None => info!("template cache invalidated"),
        }
        self.notify(CacheEvent::Invalidated {
            trigger: trigger.map(Path::to_path_buf),
        });
    }

    fn notify(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Resets the slot when an `ensure` future is dropped mid-load.
struct PopulateGuard<'a> {
    cache: &'a CacheController,
    epoch: u64,
}

impl Drop for PopulateGuard<'_> {
    fn drop(&mut self) {
        {
            let mut slot = self.cache.slot();
            if slot.epoch == self.epoch && slot.state == CacheState::Populating {
                slot.state = CacheState::Absent;
            }
        }
        warn!("template cache population cancelled");
        self.cache.notify(CacheEvent::PopulateFailed {
            message: "population cancelled".to_string(),
        });
    }
}
