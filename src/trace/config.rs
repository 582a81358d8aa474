/*!
 * Thread Trace Configuration
 * Per-monitor capture settings and request-context triggers
 */

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::thread::Thread;

/// Capture settings for a monitor that roots internal thread traces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadTraceConfig {
    /// Maximum checkpoint depth below the root (0 = unlimited)
    #[serde(default)]
    pub max_depth: u32,
    /// Traces shorter than this are discarded
    #[serde(default)]
    pub min_duration_to_capture: u64,
    /// Appender names that receive completed traces
    #[serde(default)]
    pub appenders: Vec<String>,
    /// When non-empty, a trace starts only if one trigger matches
    #[serde(default)]
    pub triggers: Vec<TraceTrigger>,
}

impl ThreadTraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_duration(mut self, millis: u64) -> Self {
        self.min_duration_to_capture = millis;
        self
    }

    pub fn with_appender(mut self, name: &str) -> Self {
        self.appenders.push(name.to_string());
        self
    }

    pub fn with_trigger(mut self, trigger: TraceTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Whether a trace may start on `thread` given the current trigger context
    pub fn should_trace(&self, thread: &Thread) -> bool {
        if self.triggers.is_empty() {
            return true;
        }
        CURRENT_CONTEXT.with(|ctx| {
            let ctx = ctx.borrow();
            self.triggers
                .iter()
                .any(|trigger| trigger.matches(ctx.as_ref(), thread))
        })
    }
}

/// Condition gating a thread trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceTrigger {
    HttpRequestParameter { name: String, value: String },
    HttpSession { attribute: String, value: String },
    HttpCookie { name: String, value: String },
    ThreadName { name: String },
}

impl TraceTrigger {
    pub fn matches(&self, ctx: Option<&TriggerContext>, thread: &Thread) -> bool {
        match self {
            TraceTrigger::ThreadName { name } => thread.name() == Some(name.as_str()),
            TraceTrigger::HttpRequestParameter { name, value } => {
                ctx.is_some_and(|c| contains(&c.request_parameters, name, value))
            }
            TraceTrigger::HttpSession { attribute, value } => {
                ctx.is_some_and(|c| contains(&c.session_attributes, attribute, value))
            }
            TraceTrigger::HttpCookie { name, value } => {
                ctx.is_some_and(|c| contains(&c.cookies, name, value))
            }
        }
    }
}

fn contains(pairs: &[(String, String)], name: &str, value: &str) -> bool {
    pairs.iter().any(|(n, v)| n == name && v == value)
}

/// Number of configured triggers by kind, used to decide whether request
/// glue needs to capture parameters, sessions or cookies at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCounts {
    pub http_request: usize,
    pub http_session: usize,
    pub http_cookie: usize,
    pub thread_name: usize,
}

impl TriggerCounts {
    pub fn add(&mut self, trigger: &TraceTrigger) {
        match trigger {
            TraceTrigger::HttpRequestParameter { .. } => self.http_request += 1,
            TraceTrigger::HttpSession { .. } => self.http_session += 1,
            TraceTrigger::HttpCookie { .. } => self.http_cookie += 1,
            TraceTrigger::ThreadName { .. } => self.thread_name += 1,
        }
    }

    pub fn needs_request_context(&self) -> bool {
        self.http_request + self.http_session + self.http_cookie > 0
    }
}

/// Request attributes visible to triggers on the current thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerContext {
    pub request_parameters: Vec<(String, String)>,
    pub session_attributes: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.request_parameters
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_session_attribute(mut self, name: &str, value: &str) -> Self {
        self.session_attributes
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<TriggerContext>> = const { RefCell::new(None) };
}

/// Run `f` with `ctx` as the current thread's trigger context
pub fn with_trigger_context<R>(ctx: TriggerContext, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<TriggerContext>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT_CONTEXT.with(|c| *c.borrow_mut() = previous);
        }
    }

    let previous = CURRENT_CONTEXT.with(|c| c.borrow_mut().replace(ctx));
    let _restore = Restore(previous);
    f()
}
