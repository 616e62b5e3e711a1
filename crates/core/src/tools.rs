//! Local side of the function-calling protocol.
//!
//! The remote model may ask the widget to move the visitor to another page.
//! Every call is answered exactly once with a response carrying the call's
//! own id; calls the widget cannot serve are answered with an error payload.

use crate::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{info, warn};

pub const NAVIGATE_TO_PAGE: &str = "navigateToPage";

/// Pages the assistant is allowed to navigate to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Home,
    About,
    Services,
    Contact,
    Press,
}

impl Page {
    pub const ALL: [Page; 5] = [
        Page::Home,
        Page::About,
        Page::Services,
        Page::Contact,
        Page::Press,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::About => "about",
            Page::Services => "services",
            Page::Contact => "contact",
            Page::Press => "press",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Page {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Page::ALL
            .into_iter()
            .find(|page| page.as_str() == s)
            .ok_or_else(|| format!("Unknown page '{s}'"))
    }
}

/// Performs the in-page navigation side effect.
#[cfg_attr(test, mockall::automock)]
pub trait Navigator: Send + Sync {
    fn navigate(&self, page: Page) -> anyhow::Result<()>;
}

/// Declaration advertised to the model in the session setup.
pub fn navigate_declaration() -> FunctionDeclaration {
    let pages: Vec<&str> = Page::ALL.iter().map(Page::as_str).collect();
    FunctionDeclaration {
        name: NAVIGATE_TO_PAGE.to_string(),
        description: "Navigates the user to a specific page on the website.".to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "page": {
                    "type": "STRING",
                    "description": format!("The target page ({}).", pages.join(", ")),
                    "enum": pages,
                }
            },
            "required": ["page"],
        }),
    }
}

/// What the session should do in reply to one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDispatch {
    pub response: FunctionResponse,
    /// Status text to surface in the transcript bubble, if any.
    pub notice: Option<String>,
    /// How long to wait before sending `response`.
    pub delay: Duration,
}

pub struct ToolBridge {
    navigator: Arc<dyn Navigator>,
    response_delay: Duration,
}

impl ToolBridge {
    pub fn new(navigator: Arc<dyn Navigator>, response_delay: Duration) -> Self {
        Self {
            navigator,
            response_delay,
        }
    }

    pub fn handle(&self, call: &FunctionCall) -> ToolDispatch {
        if call.name != NAVIGATE_TO_PAGE {
            warn!(id = %call.id, name = %call.name, "Model called an unknown tool");
            return self.reply(
                call,
                json!({ "error": format!("Unknown tool '{}'", call.name) }),
                None,
                Duration::ZERO,
            );
        }

        let page = match call
            .args
            .get("page")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing 'page' argument".to_string())
            .and_then(Page::from_str)
        {
            Ok(page) => page,
            Err(reason) => {
                warn!(id = %call.id, args = %call.args, %reason, "Rejecting navigation request");
                return self.reply(call, json!({ "error": reason }), None, Duration::ZERO);
            }
        };

        info!(id = %call.id, %page, "Navigating");
        if let Err(e) = self.navigator.navigate(page) {
            warn!(id = %call.id, %page, error = ?e, "Navigation failed");
            return self.reply(
                call,
                json!({ "error": format!("Failed to open {page}: {e}") }),
                None,
                Duration::ZERO,
            );
        }

        self.reply(
            call,
            json!({ "result": format!("Success: User moved to {page}") }),
            Some(format!("Navigating to {page}...")),
            self.response_delay,
        )
    }

    fn reply(
        &self,
        call: &FunctionCall,
        response: serde_json::Value,
        notice: Option<String>,
        delay: Duration,
    ) -> ToolDispatch {
        ToolDispatch {
            response: FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response,
            },
            notice,
            delay,
        }
    }
}
