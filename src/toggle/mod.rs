//! Toggleable Producer/Consumer
//!
//! A [`ToggleSwitch`] gates message production (or consumption) on one
//! member. Switches start disabled, are enabled once when startup
//! completes, and are flipped by toggle commands afterwards. Concurrent
//! writers are last-writer-wins. A suspension masks the commanded state
//! without replacing it, so a command issued while suspended takes effect
//! once the last suspension ends.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};


/// Which side of the pipeline a switch gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleType {
    /// Publishing local changes (the "master" role)
    Producer,
    /// Applying remote changes (the "slave" role)
    Consumer,
}

impl ToggleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleType::Producer => "master",
            ToggleType::Consumer => "slave",
        }
    }
}

impl fmt::Display for ToggleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToggleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" | "producer" => Ok(ToggleType::Producer),
            "slave" | "consumer" => Ok(ToggleType::Consumer),
            other => Err(format!("unknown toggle type: {}", other)),
        }
    }
}

/// Lifecycle and control signals delivered to switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    /// The application finished starting up
    ContextLoaded,
    /// Enable or disable switches of one kind
    Toggle { enable: bool, kind: ToggleType },
}

/// Receiver of application events
pub trait ApplicationListener: Send + Sync {
    fn on_application_event(&self, event: &ApplicationEvent);
}

/// Thread-safe enable/disable flag
#[derive(Debug)]
pub struct ToggleSwitch {
    kind: ToggleType,
    enabled: AtomicBool,
    started: AtomicBool,
    suspended: AtomicUsize,
}

impl ToggleSwitch {
    /// Create a disabled switch
    pub fn new(kind: ToggleType) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            suspended: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> ToggleType {
        self.kind
    }

    /// Commanded state, unless a suspension is active
    pub fn is_enabled(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) == 0 && self.enabled.load(Ordering::SeqCst)
    }

    /// Whether a [`ToggleGuard`] currently masks the switch
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    /// Set the commanded state, returning the previous one
    pub fn set(&self, enabled: bool) -> bool {
        let prev = self.enabled.swap(enabled, Ordering::SeqCst);
        if prev != enabled {
            debug!(
                "Toggle {}: {}",
                self.kind,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        prev
    }

    /// Whether the startup signal has been seen
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Enable the switch on the first startup signal; later calls do nothing
    ///
    /// Returns true if this call performed the startup enable.
    pub fn startup_complete(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.enable();
            info!("Toggle {} enabled after startup", self.kind);
            true
        } else {
            false
        }
    }

    /// Disable the switch until the returned guard is dropped
    ///
    /// Suspensions nest. Dropping the last guard, on any exit path
    /// including unwinding, reveals the commanded state as it is then,
    /// so a toggle command issued meanwhile is kept.
    pub fn suspend(&self) -> ToggleGuard<'_> {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        ToggleGuard { switch: self }
    }
}

impl ApplicationListener for ToggleSwitch {
    fn on_application_event(&self, event: &ApplicationEvent) {
        match *event {
            ApplicationEvent::ContextLoaded => {
                self.startup_complete();
            }
            ApplicationEvent::Toggle { enable, kind } if kind == self.kind => {
                self.set(enable);
            }
            ApplicationEvent::Toggle { .. } => {}
        }
    }
}

/// Scoped suspension of a [`ToggleSwitch`]
#[must_use = "the switch is restored as soon as the guard is dropped"]
pub struct ToggleGuard<'a> {
    switch: &'a ToggleSwitch,
}

impl ToggleGuard<'_> {
    /// State the switch returns to if this guard is the last to drop
    pub fn restores_to(&self) -> bool {
        self.switch.enabled.load(Ordering::SeqCst)
    }
}

impl Drop for ToggleGuard<'_> {
    fn drop(&mut self) {
        self.switch.suspended.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fan-out of application events to registered listeners
#[derive(Default)]
pub struct Lifecycle {
    listeners: RwLock<Vec<Arc<dyn ApplicationListener>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ApplicationListener>) {
        self.listeners.write().push(listener);
    }

    /// Deliver an event to every listener in subscription order
    pub fn publish(&self, event: ApplicationEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_application_event(&event);
        }
    }
}
