//! Lifecycle hooks for records.
//!
//! Each concrete record type owns one [`HookRegistry`] (through its
//! [`RecordService`](super::RecordService)). Hooks are registered once during
//! startup and run in registration order.

use crate::errors::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{fmt, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    AfterInitialize,
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl HookKind {
    pub const ALL: [HookKind; 5] = [
        HookKind::AfterInitialize,
        HookKind::BeforeSave,
        HookKind::AfterSave,
        HookKind::BeforeDelete,
        HookKind::AfterDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::AfterInitialize => "afterInitialize",
            HookKind::BeforeSave => "beforeSave",
            HookKind::AfterSave => "afterSave",
            HookKind::BeforeDelete => "beforeDelete",
            HookKind::AfterDelete => "afterDelete",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HookKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownHook(s.to_string()))
    }
}

/// Options handed to every hook of a save, delete, or initialize call.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// Skip the `beforeSave` / `afterSave` hooks.
    pub skip_hooks: bool,
    /// Free-form caller data, visible to hooks.
    pub context: Map<String, Value>,
}

impl RecordOptions {
    pub fn skipping_hooks() -> Self {
        Self {
            skip_hooks: true,
            ..Self::default()
        }
    }
}

/// An awaited lifecycle hook.
///
/// Plain closures `Fn(&mut T, &RecordOptions) -> anyhow::Result<()>` are
/// hooks; implement the trait directly for hooks that need to await.
#[async_trait]
pub trait Hook<T>: Send + Sync {
    async fn call(&self, record: &mut T, options: &RecordOptions) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F> Hook<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(&mut T, &RecordOptions) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, record: &mut T, options: &RecordOptions) -> anyhow::Result<()> {
        (self)(record, options)
    }
}

type InitializeHook<T> = Arc<dyn Fn(&mut T, &RecordOptions) -> anyhow::Result<()> + Send + Sync>;

pub struct HookRegistry<T> {
    after_initialize: RwLock<Vec<InitializeHook<T>>>,
    before_save: RwLock<Vec<Arc<dyn Hook<T>>>>,
    after_save: RwLock<Vec<Arc<dyn Hook<T>>>>,
    before_delete: RwLock<Vec<Arc<dyn Hook<T>>>>,
    after_delete: RwLock<Vec<Arc<dyn Hook<T>>>>,
}

impl<T> Default for HookRegistry<T> {
    fn default() -> Self {
        Self {
            after_initialize: RwLock::new(Vec::new()),
            before_save: RwLock::new(Vec::new()),
            after_save: RwLock::new(Vec::new()),
            before_delete: RwLock::new(Vec::new()),
            after_delete: RwLock::new(Vec::new()),
        }
    }
}

impl<T> fmt::Debug for HookRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("after_initialize", &self.after_initialize.read().len())
            .field("before_save", &self.before_save.read().len())
            .field("after_save", &self.after_save.read().len())
            .field("before_delete", &self.before_delete.read().len())
            .field("after_delete", &self.after_delete.read().len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> HookRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous hook by name (`"beforeSave"`, `"afterDelete"`, ...).
    pub fn register<F>(&self, name: &str, hook: F) -> Result<()>
    where
        F: Fn(&mut T, &RecordOptions) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match name.parse::<HookKind>()? {
            HookKind::AfterInitialize => self.after_initialize(hook),
            HookKind::BeforeSave => self.before_save(hook),
            HookKind::AfterSave => self.after_save(hook),
            HookKind::BeforeDelete => self.before_delete(hook),
            HookKind::AfterDelete => self.after_delete(hook),
        }
        Ok(())
    }

    /// Runs synchronously while a record is being constructed.
    pub fn after_initialize<F>(&self, hook: F)
    where
        F: Fn(&mut T, &RecordOptions) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_initialize.write().push(Arc::new(hook));
    }

    pub fn before_save(&self, hook: impl Hook<T> + 'static) {
        self.before_save.write().push(Arc::new(hook));
    }

    pub fn after_save(&self, hook: impl Hook<T> + 'static) {
        self.after_save.write().push(Arc::new(hook));
    }

    pub fn before_delete(&self, hook: impl Hook<T> + 'static) {
        self.before_delete.write().push(Arc::new(hook));
    }

    pub fn after_delete(&self, hook: impl Hook<T> + 'static) {
        self.after_delete.write().push(Arc::new(hook));
    }

    pub fn len(&self, kind: HookKind) -> usize {
        match self.awaited(kind) {
            Some(group) => group.read().len(),
            None => self.after_initialize.read().len(),
        }
    }

    /// `None` for `afterInitialize`, whose hooks are not awaited.
    fn awaited(&self, kind: HookKind) -> Option<&RwLock<Vec<Arc<dyn Hook<T>>>>> {
        match kind {
            HookKind::BeforeSave => Some(&self.before_save),
            HookKind::AfterSave => Some(&self.after_save),
            HookKind::BeforeDelete => Some(&self.before_delete),
            HookKind::AfterDelete => Some(&self.after_delete),
            HookKind::AfterInitialize => None,
        }
    }

    pub(crate) fn run_initialize(&self, record: &mut T, options: &RecordOptions) -> Result<()> {
        let hooks = self.after_initialize.read().clone();
        for hook in hooks {
            hook(record, options).map_err(|source| Error::Hook {
                hook: HookKind::AfterInitialize.as_str(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run one awaited hook group in order; the first failure stops the rest.
    pub(crate) async fn run(
        &self,
        kind: HookKind,
        record: &mut T,
        options: &RecordOptions,
    ) -> Result<()> {
        let Some(group) = self.awaited(kind) else {
            return self.run_initialize(record, options);
        };
        // Snapshot so no lock is held across an await.
        let hooks = group.read().clone();
        for hook in hooks {
            hook.call(record, options)
                .await
                .map_err(|source| Error::Hook {
                    hook: kind.as_str(),
                    source,
                })?;
        }
        Ok(())
    }
}
