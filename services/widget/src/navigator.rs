use aura_core::tools::{Navigator, Page};
use std::sync::Mutex;
use tracing::info;

/// Site path for each navigable page.
pub fn path_for(page: Page) -> &'static str {
    match page {
        Page::Home => "/",
        Page::About => "/about",
        Page::Services => "/services",
        Page::Contact => "/contact",
        Page::Press => "/press",
    }
}

/// Keeps track of the page the visitor is on and logs every move.
#[derive(Debug, Default)]
pub struct LoggingNavigator {
    current: Mutex<Page>,
}

impl LoggingNavigator {
    pub fn current(&self) -> Page {
        self.current
            .lock()
            .map(|page| *page)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

impl Navigator for LoggingNavigator {
    fn navigate(&self, page: Page) -> anyhow::Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("navigation state poisoned"))?;
        info!(from = %*current, to = %page, path = path_for(page), "Navigated");
        *current = page;
        Ok(())
    }
}
