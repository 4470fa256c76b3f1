use crate::bus::{Event, EventBus};
use crate::error::WidgetError;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Default)]
struct Hold {
    active: bool,
    pending: Option<Url>,
}

/// Validates navigation targets and hands them to the page.
///
/// While held (voice playback in progress) the most recent target is
/// parked and only published on [`Navigator::release`].
pub struct Navigator {
    origin: Url,
    bus: Arc<EventBus>,
    hold: Mutex<Hold>,
}

impl Navigator {
    pub fn new(origin: Url, bus: Arc<EventBus>) -> Self {
        Self {
            origin,
            bus,
            hold: Mutex::new(Hold::default()),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Absolute http(s) URL for `raw`; relative paths resolve against the
    /// storefront origin.
    pub fn resolve(&self, raw: &str) -> Result<Url, WidgetError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(WidgetError::InvalidTarget("empty redirect url".into()));
        }
        let url = self
            .origin
            .join(raw)
            .map_err(|e| WidgetError::InvalidTarget(format!("unparseable url '{}': {}", raw, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(WidgetError::InvalidTarget(format!(
                "refusing to navigate to {} url '{}'",
                scheme, raw
            ))),
        }
    }

    pub fn navigate(&self, raw: &str) -> Result<Url, WidgetError> {
        let url = match self.resolve(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!("{}", e);
                return Err(e);
            }
        };
        let mut hold = self.hold.lock().unwrap_or_else(|e| e.into_inner());
        if hold.active {
            info!("navigation to {} deferred", url);
            hold.pending = Some(url.clone());
        } else {
            drop(hold);
            self.publish(&url);
        }
        Ok(url)
    }

    pub fn hold(&self) {
        self.hold.lock().unwrap_or_else(|e| e.into_inner()).active = true;
    }

    pub fn has_pending(&self) -> bool {
        self.hold
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .is_some()
    }

    /// Ends the hold and performs the parked navigation, if any.
    pub fn release(&self) -> Option<Url> {
        let pending = {
            let mut hold = self.hold.lock().unwrap_or_else(|e| e.into_inner());
            hold.active = false;
            hold.pending.take()
        };
        if let Some(url) = &pending {
            self.publish(url);
        }
        pending
    }

    /// Ends the hold without navigating.
    pub fn discard(&self) {
        let mut hold = self.hold.lock().unwrap_or_else(|e| e.into_inner());
        hold.active = false;
        hold.pending = None;
    }

    fn publish(&self, url: &Url) {
        info!("navigating to {}", url);
        self.bus.publish(Event::Navigate {
            url: url.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::drain;

    fn navigator() -> (Navigator, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let origin = Url::parse("https://shop.example").unwrap();
        (Navigator::new(origin, bus.clone()), bus)
    }

    fn navigations(events: Vec<Event>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e {
                Event::Navigate { url } => Some(url),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn relative_paths_resolve_against_the_origin() {
        let (nav, bus) = navigator();
        let mut rx = bus.subscribe();
        let url = nav.navigate("/account").unwrap();
        assert_eq!(url.as_str(), "https://shop.example/account");
        assert_eq!(navigations(drain(&mut rx)), vec!["https://shop.example/account"]);
    }

    #[test]
    fn javascript_urls_are_rejected() {
        let (nav, bus) = navigator();
        let mut rx = bus.subscribe();
        let err = nav.navigate("javascript:alert(1)").unwrap_err();
        assert!(matches!(err, WidgetError::InvalidTarget(_)));
        assert!(nav.navigate("data:text/html,hi").is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn held_navigation_waits_for_release() {
        let (nav, bus) = navigator();
        let mut rx = bus.subscribe();
        nav.hold();
        nav.navigate("/cart").unwrap();
        assert!(drain(&mut rx).is_empty());
        let released = nav.release().unwrap();
        assert_eq!(released.as_str(), "https://shop.example/cart");
        assert_eq!(navigations(drain(&mut rx)), vec!["https://shop.example/cart"]);
        assert!(nav.release().is_none());
    }
}
