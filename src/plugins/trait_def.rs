//! Plugin-facing API
//!
//! A plugin's entry function returns an explicit list of [`PluginElement`]s,
//! each tagged with the role it plays. Shared-library plugins export the
//! entry function through [`declare_plugin!`](crate::declare_plugin).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::domain::traits::{ClientContext, Handler};

/// Version of the element ABI; bumped on any breaking change to these types
pub const PLUGIN_API_VERSION: u32 = 1;

/// Exported static holding the API version a plugin was built against
pub const API_VERSION_SYMBOL: &[u8] = b"plugbot_plugin_api_version";

/// Exported entry function returning the plugin's elements
pub const ENTRY_SYMBOL: &[u8] = b"plugbot_plugin_elements";

/// Passed to a plugin's entry function
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub name: String,
    /// Plugin folder under the plugins root
    pub folder: PathBuf,
    /// The plugin's isolated dependency environment
    pub environment: PathBuf,
}

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Pre-load or post-load hook
#[derive(Clone)]
pub enum Hook {
    /// Runs on the blocking pool and is not awaited
    Blocking(Arc<dyn Fn() + Send + Sync>),
    /// Awaited before activation continues
    Async(Arc<dyn Fn() -> HookFuture + Send + Sync>),
}

impl Hook {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Hook::Blocking(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Hook::Async(Arc::new(move || Box::pin(f()) as HookFuture))
    }
}

/// A handler and the dispatcher group it goes into
#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<dyn Handler>,
    pub group: i32,
}

impl HandlerEntry {
    pub fn new(handler: Arc<dyn Handler>, group: i32) -> Self {
        Self { handler, group }
    }
}

/// An object that contributes a set of handlers at once
pub trait Controller: Send + Sync {
    fn name(&self) -> &str;

    fn handlers(&self) -> Vec<HandlerEntry>;
}

/// One role-tagged element exported by a plugin
#[derive(Clone)]
pub enum PluginElement {
    PreLoad(Hook),
    PostLoad(Hook),
    Handler {
        context: ClientContext,
        entries: Vec<HandlerEntry>,
    },
    Controller {
        context: ClientContext,
        controller: Arc<dyn Controller>,
    },
}

/// Everything a plugin declares, in declaration order
#[derive(Clone, Default)]
pub struct PluginElements {
    elements: Vec<PluginElement>,
}

impl PluginElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, element: PluginElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn pre_load(self, hook: Hook) -> Self {
        self.push(PluginElement::PreLoad(hook))
    }

    pub fn post_load(self, hook: Hook) -> Self {
        self.push(PluginElement::PostLoad(hook))
    }

    pub fn handler(self, context: ClientContext, handler: Arc<dyn Handler>, group: i32) -> Self {
        self.push(PluginElement::Handler {
            context,
            entries: vec![HandlerEntry::new(handler, group)],
        })
    }

    pub fn user_handler(self, handler: Arc<dyn Handler>, group: i32) -> Self {
        self.handler(ClientContext::User, handler, group)
    }

    pub fn assistant_handler(self, handler: Arc<dyn Handler>, group: i32) -> Self {
        self.handler(ClientContext::Assistant, handler, group)
    }

    pub fn controller(self, context: ClientContext, controller: Arc<dyn Controller>) -> Self {
        self.push(PluginElement::Controller { context, controller })
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_vec(self) -> Vec<PluginElement> {
        self.elements
    }
}

/// Signature of a plugin's entry function
pub type PluginEntryFn = fn(&PluginContext) -> PluginElements;

/// Export a plugin entry function from a `cdylib` plugin crate.
///
/// ```ignore
/// fn elements(ctx: &PluginContext) -> PluginElements {
///     PluginElements::new().user_handler(Arc::new(Ping), 0)
/// }
///
/// plugbot::declare_plugin!(elements);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($entry:path) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static plugbot_plugin_api_version: u32 = $crate::plugins::PLUGIN_API_VERSION;

        #[no_mangle]
        pub fn plugbot_plugin_elements(
            ctx: &$crate::plugins::PluginContext,
        ) -> $crate::plugins::PluginElements {
            $entry(ctx)
        }
    };
}
